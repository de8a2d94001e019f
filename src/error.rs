//! Error types for cutout and export operations

use thiserror::Error;

/// Result type alias for nobg operations
pub type Result<T> = std::result::Result<T, NobgError>;

/// User-facing text shown when the segmentation model rejects an image
pub const CUTOUT_FAILED_MESSAGE: &str = "Background removal failed, please try another image";

/// Error types for the upload, cutout and export pipeline
#[derive(Error, Debug)]
pub enum NobgError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Raster decode or encode errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Upload rejected before any stage ran; the message is shown to the user as-is
    #[error("{0}")]
    Validation(String),

    /// The segmentation model rejected the image
    #[error("Background removal failed: {source}")]
    CutoutFailed {
        #[source]
        source: Box<NobgError>,
    },

    /// Decode, resize or encode failed while exporting
    #[error("Export failed at stage '{stage}': {details}")]
    ExportFailed { stage: String, details: String },

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Model inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Model weight download errors
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl NobgError {
    /// Create a new upload validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap the cause of a rejected model invocation
    #[must_use]
    pub fn cutout_failed(cause: NobgError) -> Self {
        Self::CutoutFailed {
            source: Box::new(cause),
        }
    }

    /// Create an export error for the named stage
    pub fn export_failed<S: Into<String>, D: std::fmt::Display>(stage: S, details: D) -> Self {
        Self::ExportFailed {
            stage: stage.into(),
            details: details.to_string(),
        }
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create network error with request context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether this error came from the upload boundary
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Text a front end shows for this error
    ///
    /// Validation messages pass through unchanged, cutout failures collapse to a
    /// generic retry hint, everything else uses the display form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::CutoutFailed { .. } => CUTOUT_FAILED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
