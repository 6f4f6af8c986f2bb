//! Tracing subscriber setup for the command line front end
//!
//! The library only emits `tracing` events (and `log` records, bridged by
//! `tracing-subscriber`); installing a subscriber is left to the binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Compact console output with colors (default for CLI)
    Console,
    /// Compact console output without colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "compact" => Ok(Self::Compact),
            #[cfg(feature = "tracing-json")]
            "json" => Ok(Self::Json),
            #[cfg(not(feature = "tracing-json"))]
            "json" => anyhow::bail!("JSON logs need the 'tracing-json' feature"),
            other => anyhow::bail!("Unknown log format '{other}' (console, compact, json)"),
        }
    }
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Output to stderr (default)
    Console,
    /// Output to both stderr and a log file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it last in `main`
#[must_use = "dropping the guard stops buffered log output"]
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Run identifier logged at start-up
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

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
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directive = self
            .env_filter
            .as_deref()
            .unwrap_or_else(|| self.verbosity_to_filter());
        Ok(EnvFilter::try_new(directive)?)
    }

    fn console_layer(format: TracingFormat) -> BoxedLayer {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true);
        match format {
            TracingFormat::Console => layer.with_ansi(true).compact().boxed(),
            TracingFormat::Compact => layer.with_ansi(false).compact().boxed(),
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => layer
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let filter = self.filter()?;
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();
        #[allow(unused_mut)]
        let mut layers: Vec<BoxedLayer> = vec![Self::console_layer(self.format)];

        #[cfg(feature = "tracing-files")]
        if let TracingOutput::Both(path) = &self.output {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("imgly-bgclean.log"));
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .compact()
                    .boxed(),
            );
            guard._file = Some(file_guard);
        }

        Registry::default().with(layers).with(filter).try_init()?;

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "Background cleaning session started");
        }

        Ok(guard)
    }
}

/// Install CLI defaults: `RUST_LOG` when set, otherwise the `-v` count
///
/// # Errors
/// - Unknown format, or a log file without the `tracing-files` feature
/// - Invalid `RUST_LOG` directive
/// - A global subscriber is already installed
pub fn init_cli_tracing(
    verbosity: u8,
    format: &str,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<TracingGuard> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format.parse()?)
        .with_session_id(session_id);

    if let Some(path) = log_file {
        #[cfg(feature = "tracing-files")]
        {
            config = config.with_output(TracingOutput::Both(path.to_path_buf()));
        }
        #[cfg(not(feature = "tracing-files"))]
        anyhow::bail!(
            "Cannot log to {}: the 'tracing-files' feature is disabled",
            path.display()
        );
    }

    if let Ok(directive) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !directive.trim().is_empty() {
            config = config.with_env_filter(directive);
        }
    }

    config.init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "info");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(10).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("console".parse::<TracingFormat>().unwrap(), TracingFormat::Console);
        assert_eq!("COMPACT".parse::<TracingFormat>().unwrap(), TracingFormat::Compact);
        assert!("yaml".parse::<TracingFormat>().is_err());
    }

    #[cfg(feature = "tracing-files")]
    #[test]
    fn test_file_output_builder() {
        let config = TracingConfig::new().with_output(TracingOutput::Both("run.log".into()));
        assert_eq!(config.output, TracingOutput::Both("run.log".into()));
    }

    #[test]
    fn test_env_filter_overrides_verbosity() {
        assert!(TracingConfig::new().with_env_filter("imgly_bgclean=trace").filter().is_ok());
        assert!(TracingConfig::new().with_env_filter("imgly_bgclean=loud").filter().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert_eq!(config.output, TracingOutput::Console);
        assert!(config.env_filter.is_none());
    }
}
