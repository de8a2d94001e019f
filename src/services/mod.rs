//! Services shared by the pipeline stages and the CLI

pub mod io;
pub mod progress;
pub mod validation;

pub use io::{read_source, save_export};
pub use progress::{
    ChannelProgressReporter, ConsoleProgressReporter, CutoutPhase, NoOpProgressReporter,
    ProgressReporter, ProgressTracker,
};
pub use validation::{mime_for_path, FileDescriptor, UploadValidator};
