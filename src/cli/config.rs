//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliDevice, CliExportFormat, CliLogFormat, CliPrecision};
use crate::{
    config::{ComputeDevice, ModelPrecision, StudioConfig, StudioConfigBuilder},
    tracing_config::TracingFormat,
    types::{ExportFormat, SizeSpec},
};
use anyhow::{Context, Result};

impl From<CliPrecision> for ModelPrecision {
    fn from(value: CliPrecision) -> Self {
        match value {
            CliPrecision::Fp32 => Self::Fp32,
            CliPrecision::Fp16 => Self::Fp16,
        }
    }
}

impl From<CliDevice> for ComputeDevice {
    fn from(value: CliDevice) -> Self {
        match value {
            CliDevice::Gpu => Self::Gpu,
            CliDevice::Cpu => Self::Cpu,
        }
    }
}

impl From<CliExportFormat> for ExportFormat {
    fn from(value: CliExportFormat) -> Self {
        match value {
            CliExportFormat::Png => Self::Png,
            CliExportFormat::Jpeg => Self::Jpeg,
        }
    }
}

/// Convert CLI arguments to a [`StudioConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Layer defaults, the optional JSON file, the environment and the flags
    pub(crate) fn from_cli(cli: &Cli) -> Result<StudioConfig> {
        let base = match &cli.config {
            Some(path) => StudioConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => StudioConfig::default(),
        };
        Self::apply_flags(cli, base.apply_env())
    }

    fn apply_flags(cli: &Cli, base: StudioConfig) -> Result<StudioConfig> {
        let mut builder = StudioConfigBuilder::from_config(base);

        if let Some(precision) = cli.precision {
            builder = builder.precision(precision.into());
        }
        if let Some(device) = cli.device {
            builder = builder.device(device.into());
        }
        if let Some(path) = &cli.model_path {
            builder = builder.model_path(path);
        }
        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir);
        }
        if let Some(quality) = cli.jpeg_quality {
            builder = builder.jpeg_quality(quality);
        }
        if cli.no_telemetry {
            builder = builder.telemetry_key::<String>(None);
        }

        builder.build().context("Invalid configuration")
    }

    /// Map `--log-format`; JSON is only available with the `tracing-json` feature
    pub(crate) fn tracing_format(format: CliLogFormat) -> Result<TracingFormat> {
        match format {
            CliLogFormat::Console => Ok(TracingFormat::Console),
            CliLogFormat::Compact => Ok(TracingFormat::Compact),
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Ok(TracingFormat::Json),
            #[cfg(not(feature = "tracing-json"))]
            CliLogFormat::Json => {
                anyhow::bail!("JSON log output requires the tracing-json feature")
            },
        }
    }

    /// Parse the `--size` argument
    pub(crate) fn size_spec(cli: &Cli) -> Result<SizeSpec> {
        cli.size
            .parse::<SizeSpec>()
            .with_context(|| format!("Invalid size '{}'", cli.size))
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(quality) = cli.jpeg_quality {
            if quality == 0 || quality > 100 {
                anyhow::bail!("JPEG quality must be between 1 and 100, got {quality}");
            }
        }
        if let Some(path) = &cli.model_path {
            if !path.is_file() {
                anyhow::bail!("Model file not found: {}", path.display());
            }
        }
        Self::size_spec(cli)?;
        Ok(())
    }
}
