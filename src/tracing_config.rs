//! Tracing subscriber setup for the command-line front end
//!
//! The library only emits `log` records and `tracing` spans. Installing a
//! subscriber is left to the binary, which goes through [`TracingConfig`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Colored compact lines (default)
    Console,
    /// Plain compact lines without ANSI colors
    Compact,
    /// One JSON object per event
    #[cfg(feature = "tracing-json")]
    Json,
}

#[derive(Debug)]
pub struct TracingConfig {
    /// Number of `-v` flags
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Filter directive that overrides `verbosity` when set
    pub env_filter: Option<String>,
    /// Correlation id logged when the subscriber starts
    pub run_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            run_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_run_id<S: Into<String>>(mut self, run_id: S) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(directive) => EnvFilter::try_new(directive)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(layer).try_init()?;
            },
            TracingFormat::Compact => {
                let layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(layer).try_init()?;
            },
        }

        if let Some(run_id) = &self.run_id {
            tracing::debug!(run_id = %run_id, "nobg run started");
        }
        Ok(())
    }
}

/// Subscriber settings for the CLI
///
/// `rust_log` (the value of `RUST_LOG`) takes precedence over the verbosity
/// count when it is non-empty.
#[must_use]
pub fn cli_tracing_config(
    verbosity: u8,
    format: TracingFormat,
    rust_log: Option<String>,
) -> TracingConfig {
    let config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_run_id(uuid::Uuid::new_v4().to_string());
    match rust_log {
        Some(directive) if !directive.trim().is_empty() => config.with_env_filter(directive),
        _ => config,
    }
}

/// Install a subscriber with CLI defaults, honouring `RUST_LOG`
///
/// # Errors
/// - See [`TracingConfig::init`]
pub fn init_cli_tracing(verbosity: u8, format: TracingFormat) -> anyhow::Result<()> {
    cli_tracing_config(verbosity, format, std::env::var("RUST_LOG").ok()).init()
}

/// Span helpers for the CLI flow
pub mod spans {
    use tracing::{Level, Span};

    /// Whole run for one input file
    #[must_use]
    pub fn run(input: &std::path::Path, device: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "run",
            input = %input.display(),
            device = %device
        )
    }

    #[must_use]
    pub fn save(directory: &std::path::Path, filename: &str) -> Span {
        tracing::span!(
            Level::DEBUG,
            "save",
            directory = %directory.display(),
            filename = %filename
        )
    }
}
