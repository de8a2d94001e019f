//! nobg command-line front end
//!
//! Removes the background of one image and writes the export next to the
//! chosen output directory.

use super::config::CliConfigBuilder;
use crate::{
    cutout::CutoutStage,
    error::NobgError,
    export::ExportStage,
    segmentation::{ModelStore, OnnxSegmentationModel},
    services::{read_source, save_export, ProgressReporter, UploadValidator},
    session::Session,
    telemetry::{telemetry_from_config, NoOpTelemetry, Telemetry},
    tracing_config::{init_cli_tracing, spans},
    types::{ExportFormat, ProgressEvent, SizeSpec, SIZE_PRESETS},
    StudioConfig,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Longest wait for pending analytics before the process exits
const TELEMETRY_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Remove the background from an image
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "nobg")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// JPG, PNG or WebP image to process
    #[arg(
        value_name = "INPUT",
        required_unless_present_any = &["list_sizes", "show_providers", "show_cache_dir"]
    )]
    pub input: Option<PathBuf>,

    /// Directory the export is written to
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Export size: a preset (original, 1920x1080, ...), WxH, Wx or xH
    #[arg(short, long, default_value = "original")]
    pub size: String,

    /// Export format
    #[arg(short, long, value_enum, default_value_t = CliExportFormat::Png)]
    pub format: CliExportFormat,

    /// JPEG quality (1-100) [default: 92]
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Model weight precision [default: fp32]
    #[arg(long, value_enum)]
    pub precision: Option<CliPrecision>,

    /// Compute device [default: gpu, falls back to cpu]
    #[arg(long, value_enum)]
    pub device: Option<CliDevice>,

    /// Local ONNX model file instead of the downloaded weights
    #[arg(long, value_name = "PATH")]
    pub model_path: Option<PathBuf>,

    /// Use custom model cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Do not send analytics events
    #[arg(long)]
    pub no_telemetry: bool,

    /// List size presets and exit
    #[arg(long)]
    pub list_sizes: bool,

    /// Show execution provider availability and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Show model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Log output format (json needs the tracing-json feature)
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliExportFormat {
    Png,
    #[value(alias = "jpg")]
    Jpeg,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliPrecision {
    Fp32,
    Fp16,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliDevice {
    Gpu,
    Cpu,
}

/// Feeds cutout progress into an indicatif bar
struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(100)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn report_progress(&self, event: ProgressEvent) {
        self.bar.set_position(u64::from(event.percentage));
        self.bar.set_message(event.message);
    }

    fn report_completion(&self, elapsed_ms: u64) {
        self.bar
            .finish_with_message(format!("Background removed in {elapsed_ms}ms"));
    }

    fn report_error(&self, error: &str) {
        debug!("Cutout error: {}", error);
        self.bar.abandon();
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format = CliConfigBuilder::tracing_format(cli.log_format)?;
    init_cli_tracing(cli.verbose, log_format).context("Failed to initialize tracing")?;

    if cli.list_sizes {
        list_sizes();
        return Ok(());
    }

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.show_cache_dir {
        let store = ModelStore::new(config.cache_dir.clone())?;
        println!("{}", store.cache_dir().display());
        return Ok(());
    }

    let Some(input) = cli.input.as_deref() else {
        anyhow::bail!("An input image is required");
    };
    let size = CliConfigBuilder::size_spec(&cli)?;
    let format = ExportFormat::from(cli.format);

    info!("Input: {}", input.display());
    info!(
        "Model: {} on {}, export {} at {}",
        config.model.precision, config.model.device, format, size
    );

    let start_time = Instant::now();
    let span = spans::run(input, &config.model.device.to_string());
    let written = process(&cli, input, &config, &size, format)
        .instrument(span)
        .await?;

    info!("Finished in {:.2}s", start_time.elapsed().as_secs_f64());
    println!("{}", written.display());
    Ok(())
}

async fn process(
    cli: &Cli,
    input: &Path,
    config: &StudioConfig,
    size: &SizeSpec,
    format: ExportFormat,
) -> Result<PathBuf> {
    let validator = UploadValidator::new(config.upload.clone());
    let source = read_source(input, &validator).map_err(user_facing)?;

    let model = OnnxSegmentationModel::from_config(config)
        .context("Failed to set up the segmentation model")?;
    let stage = CutoutStage::new(Arc::new(model), config.model.clone());

    let telemetry: Arc<dyn Telemetry> = if cli.no_telemetry {
        Arc::new(NoOpTelemetry)
    } else {
        telemetry_from_config(&config.telemetry)
    };
    let mut session = Session::new(telemetry, ExportStage::new(&config.export));

    let reporter = Arc::new(BarReporter::new(cli.verbose > 1));
    let cutout = match session.run_cutout(source, &stage, reporter).await {
        Ok(cutout) => cutout,
        Err(e) => {
            session.flush_telemetry(TELEMETRY_FLUSH_TIMEOUT).await;
            return Err(user_facing(e));
        },
    };
    debug!("Cutout is {}x{}", cutout.width, cutout.height);

    let exported = session
        .export(size, format)
        .await
        .context("Failed to export the cutout")?;
    info!(
        "Exported {} ({}x{}, {} bytes)",
        exported.filename,
        exported.width,
        exported.height,
        exported.bytes.len()
    );

    let written = {
        let _save = spans::save(&cli.output_dir, &exported.filename).entered();
        save_export(&exported, &cli.output_dir)
            .with_context(|| format!("Failed to save to {}", cli.output_dir.display()))?
    };

    session.flush_telemetry(TELEMETRY_FLUSH_TIMEOUT).await;
    Ok(written)
}

/// Upload and cutout failures print only the message a user should see
fn user_facing(error: NobgError) -> anyhow::Error {
    match &error {
        NobgError::Validation(_) | NobgError::CutoutFailed { .. } => {
            debug!("{:?}", error);
            anyhow::anyhow!(error.user_message())
        },
        _ => anyhow::Error::new(error),
    }
}

fn list_sizes() {
    println!("Size presets:");
    for preset in &SIZE_PRESETS {
        match (preset.width, preset.height) {
            (Some(w), Some(h)) => println!("  {:<10} {w}x{h}", preset.label),
            _ => println!("  {:<10} source size", preset.label),
        }
    }
    println!("Custom sizes: WxH, Wx (width only) or xH (height only), up to 10000");
}

fn show_provider_diagnostics() {
    println!("Execution providers:");
    for (name, available) in OnnxSegmentationModel::list_providers() {
        let status = if available { "available" } else { "not available" };
        println!("  {name:<8} {status}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["nobg", "photo.jpg"]).unwrap();
        assert_eq!(cli.input.as_deref(), Some(Path::new("photo.jpg")));
        assert_eq!(cli.output_dir, PathBuf::from("."));
        assert_eq!(cli.size, "original");
        assert_eq!(cli.format, CliExportFormat::Png);
        assert!(cli.jpeg_quality.is_none());
        assert!(!cli.no_telemetry);
        assert_eq!(cli.log_format, CliLogFormat::Console);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "nobg", "-o", "out", "-s", "800x600", "-f", "jpg", "--device", "cpu", "-vv",
            "--log-format", "compact", "photo.png",
        ])
        .unwrap();
        assert_eq!(cli.output_dir, PathBuf::from("out"));
        assert_eq!(cli.size, "800x600");
        assert_eq!(ExportFormat::from(cli.format), ExportFormat::Jpeg);
        assert_eq!(cli.device, Some(CliDevice::Cpu));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, CliLogFormat::Compact);
    }

    #[test]
    fn test_input_required_unless_listing() {
        assert!(Cli::try_parse_from(["nobg"]).is_err());
        assert!(Cli::try_parse_from(["nobg", "--list-sizes"]).is_ok());
    }

    #[test]
    fn test_user_facing_messages() {
        let err = user_facing(NobgError::cutout_failed(NobgError::inference("nan")));
        assert_eq!(
            err.to_string(),
            "Background removal failed, please try another image"
        );

        let err = user_facing(NobgError::validation("File size must not exceed 20MB"));
        assert_eq!(err.to_string(), "File size must not exceed 20MB");
    }
}
