#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # nobg
//!
//! Local background removal with aspect-preserving PNG and JPEG export.
//!
//! An upload is validated, handed to a segmentation model that returns an
//! RGBA cutout, and the cutout can then be exported at its own size or
//! contain-fitted into a target box. PNG keeps transparency; JPEG is
//! flattened onto a white matte.
//!
//! ## Features
//!
//! - **Upload validation**: JPG, PNG and WebP up to 20 MB
//! - **Segmentation**: `ISNet` through ONNX Runtime with CUDA/`CoreML` when available,
//!   weights downloaded from `HuggingFace` and cached on first use
//! - **Progress**: monotonic percentage events with readable phase messages
//! - **Export**: size presets or custom dimensions, PNG fast path for source-size exports
//! - **Session**: stale result discarding, preview file lifecycle, analytics events
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nobg::{
//!     CutoutStage, ExportFormat, NoOpProgressReporter, OnnxSegmentationModel, Session,
//!     SizeSpec, StudioConfig, UploadValidator,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = StudioConfig::default();
//! let validator = UploadValidator::new(config.upload.clone());
//! let source = nobg::read_source("photo.jpg", &validator)?;
//!
//! let model = OnnxSegmentationModel::from_config(&config)?;
//! let stage = CutoutStage::new(Arc::new(model), config.model.clone());
//!
//! let mut session = Session::default();
//! session
//!     .run_cutout(source, &stage, Arc::new(NoOpProgressReporter))
//!     .await?;
//!
//! let size: SizeSpec = "800x600".parse()?;
//! let exported = session.export(&size, ExportFormat::Png).await?;
//! nobg::save_export(&exported, "out")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime segmentation model
//! - `cli` (default): command-line interface, progress bar and tracing subscriber
//! - `webp-support` (default): WebP decoding
//! - `tracing-json`: JSON log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! nobg = { version = "0.1", default-features = false, features = ["onnx"] }
//! ```
//!
//! Without `onnx`, supply your own [`SegmentationModel`] implementation.

#[cfg(feature = "cli")]
pub mod cli;
pub mod comparator;
pub mod config;
pub mod cutout;
pub mod error;
pub mod export;
pub mod segmentation;
pub mod services;
pub mod session;
pub mod telemetry;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

// Public API exports
pub use comparator::{Comparator, ContainerBounds};
pub use config::{
    ComputeDevice, ExportSettings, ModelOptions, ModelPrecision, StudioConfig,
    StudioConfigBuilder, TelemetryConfig, UploadLimits,
};
pub use cutout::CutoutStage;
pub use error::{NobgError, Result};
pub use export::{fit_contain, generate_filename, ExportStage};
#[cfg(feature = "onnx")]
pub use segmentation::OnnxSegmentationModel;
pub use segmentation::{ModelStore, PhaseCallback, SegmentationModel};
pub use services::{
    read_source, save_export, ChannelProgressReporter, ConsoleProgressReporter, FileDescriptor,
    NoOpProgressReporter, ProgressReporter, ProgressTracker, UploadValidator,
};
pub use session::{CutoutTicket, PreviewHandle, Resolution, Session, SessionState};
pub use telemetry::{
    telemetry_from_config, NoOpTelemetry, PosthogTelemetry, Telemetry, TelemetryEvent,
};
pub use types::{
    CutoutResult, ExportFormat, ExportResult, MediaType, ProgressEvent, SizePreset, SizeSpec,
    SourceImage, SIZE_PRESETS,
};

#[cfg(feature = "cli")]
pub use tracing_config::{cli_tracing_config, init_cli_tracing, TracingConfig, TracingFormat};

/// Validate a file, remove its background with the ONNX model and export it
///
/// One-shot helper for callers that do not need a [`Session`]: no preview
/// file is created and no analytics are sent.
///
/// # Examples
///
/// ```rust,no_run
/// use nobg::{ExportFormat, SizeSpec, StudioConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = StudioConfig::default();
/// let jpeg = nobg::remove_background_from_file(
///     "portrait.png",
///     &config,
///     &SizeSpec::custom_width(640)?,
///     ExportFormat::Jpeg,
/// )
/// .await?;
/// assert!(jpeg.filename.ends_with("_nobg_640w.jpg"));
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "onnx")]
pub async fn remove_background_from_file<P: AsRef<std::path::Path>>(
    path: P,
    config: &StudioConfig,
    size: &SizeSpec,
    format: ExportFormat,
) -> Result<ExportResult> {
    let validator = UploadValidator::new(config.upload.clone());
    let source = read_source(path, &validator)?;

    let model = OnnxSegmentationModel::from_config(config)?;
    let stage = CutoutStage::new(std::sync::Arc::new(model), config.model.clone());
    let cutout = stage
        .run(&source, std::sync::Arc::new(NoOpProgressReporter))
        .await?;

    ExportStage::new(&config.export)
        .export(std::sync::Arc::new(cutout), &source.file_name, size, format)
        .await
}
