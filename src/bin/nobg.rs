//! nobg command-line tool
//!
//! Removes the background of a JPG, PNG or WebP image and exports the cutout
//! as PNG or JPEG at its own size or contain-fitted into a target box.

#[cfg(feature = "cli")]
use nobg::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
