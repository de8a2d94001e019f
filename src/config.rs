//! Configuration types for cutout and export operations

use crate::error::{NobgError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the model cache directory
pub const CACHE_DIR_ENV: &str = "NOBG_CACHE_DIR";
/// Environment variable holding the telemetry API key
pub const TELEMETRY_KEY_ENV: &str = "NOBG_POSTHOG_KEY";
/// Environment variable overriding the telemetry host
pub const TELEMETRY_HOST_ENV: &str = "NOBG_POSTHOG_HOST";

/// Default telemetry endpoint host
pub const DEFAULT_TELEMETRY_HOST: &str = "https://app.posthog.com";

/// Default upload size limit: 20 MB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Default JPEG export quality
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Weight precision of the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelPrecision {
    /// Full-precision ISNet, best quality
    #[default]
    Fp32,
    /// Half-precision variant, smaller and faster
    Fp16,
}

impl std::fmt::Display for ModelPrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fp32 => write!(f, "fp32"),
            Self::Fp16 => write!(f, "fp16"),
        }
    }
}

/// Where inference should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    /// GPU acceleration when available, CPU otherwise
    #[default]
    Gpu,
    Cpu,
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Encoding the model is asked to return its cutout in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEncoding {
    /// MIME type of the model output
    pub format: String,
    /// Encoder quality in 0.0-1.0
    pub quality: f32,
}

impl Default for OutputEncoding {
    fn default() -> Self {
        Self {
            format: "image/png".to_string(),
            quality: 1.0,
        }
    }
}

/// Options handed to the segmentation model on every run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    pub precision: ModelPrecision,
    pub device: ComputeDevice,
    pub output: OutputEncoding,
    /// Local ONNX file; skips the download when set
    pub model_path: Option<PathBuf>,
    /// Expected SHA-256 of downloaded weights, hex encoded
    pub sha256: Option<String>,
}

/// Upload boundary limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_bytes: u64,
    /// Accepted MIME types
    pub accepted_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            accepted_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
        }
    }
}

/// Export encoder and naming settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Marker placed between the base name and the size label
    pub filename_suffix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            filename_suffix: "nobg".to_string(),
        }
    }
}

/// Product analytics settings; no key means no events are sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub api_key: Option<String>,
    pub host: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            host: DEFAULT_TELEMETRY_HOST.to_string(),
        }
    }
}

impl TelemetryConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }
}

/// Top-level configuration for a cutout session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub model: ModelOptions,
    pub upload: UploadLimits,
    pub export: ExportSettings,
    pub telemetry: TelemetryConfig,
    /// Model cache directory; platform default when unset
    pub cache_dir: Option<PathBuf>,
}

impl StudioConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use nobg::{ComputeDevice, StudioConfig};
    ///
    /// let config = StudioConfig::builder()
    ///     .device(ComputeDevice::Cpu)
    ///     .jpeg_quality(85)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.export.jpeg_quality, 85);
    /// ```
    #[must_use]
    pub fn builder() -> StudioConfigBuilder {
        StudioConfigBuilder::default()
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - Content is not valid JSON for this shape
    /// - Resulting values fail [`StudioConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NobgError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            NobgError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the process environment
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable lookup
    #[must_use]
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty(CACHE_DIR_ENV) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(key) = non_empty(TELEMETRY_KEY_ENV) {
            self.telemetry.api_key = Some(key);
        }
        if let Some(host) = non_empty(TELEMETRY_HOST_ENV) {
            self.telemetry.host = host;
        }
        self
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - JPEG quality outside 1-100
    /// - Zero upload size limit
    /// - Empty accepted type list
    pub fn validate(&self) -> Result<()> {
        if self.export.jpeg_quality == 0 || self.export.jpeg_quality > 100 {
            return Err(NobgError::config_value_error(
                "JPEG quality",
                self.export.jpeg_quality,
                "1-100",
                Some(DEFAULT_JPEG_QUALITY),
            ));
        }

        if self.upload.max_bytes == 0 {
            return Err(NobgError::config_value_error(
                "upload size limit",
                self.upload.max_bytes,
                "1 or more bytes",
                Some(DEFAULT_MAX_UPLOAD_BYTES),
            ));
        }

        if self.upload.accepted_types.is_empty() {
            return Err(NobgError::invalid_config(
                "At least one accepted upload type is required",
            ));
        }

        if !(0.0..=1.0).contains(&self.model.output.quality) {
            return Err(NobgError::config_value_error(
                "model output quality",
                self.model.output.quality,
                "0.0-1.0",
                Some(1.0),
            ));
        }

        Ok(())
    }
}

/// Builder for `StudioConfig`
#[derive(Debug, Default)]
pub struct StudioConfigBuilder {
    config: StudioConfig,
}

impl StudioConfigBuilder {
    /// Start from an existing configuration
    #[must_use]
    pub fn from_config(config: StudioConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn precision(mut self, precision: ModelPrecision) -> Self {
        self.config.model.precision = precision;
        self
    }

    #[must_use]
    pub fn device(mut self, device: ComputeDevice) -> Self {
        self.config.model.device = device;
        self
    }

    /// Use a local model file instead of downloading weights
    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model.model_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn model_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.config.model.sha256 = Some(digest.into());
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.upload.max_bytes = bytes;
        self
    }

    /// Set JPEG quality, values above 100 are clamped
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.export.jpeg_quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn filename_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.config.export.filename_suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn telemetry_key<S: Into<String>>(mut self, key: Option<S>) -> Self {
        self.config.telemetry.api_key = key.map(Into::into);
        self
    }

    #[must_use]
    pub fn telemetry_host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.telemetry.host = host.into();
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`StudioConfig::validate`]
    pub fn build(self) -> Result<StudioConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
