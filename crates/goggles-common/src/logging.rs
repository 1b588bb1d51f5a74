//! `tracing` subscriber setup.
//!
//! Command output goes to stdout as JSON, so every log line is written to
//! stderr regardless of format.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::GogglesError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a terminal.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = GogglesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("pretty") {
            Ok(Self::Pretty)
        } else if s.eq_ignore_ascii_case("compact") {
            Ok(Self::Compact)
        } else if s.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(GogglesError::config(format!("unknown log format '{s}'")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Used when neither `filter` nor `RUST_LOG` is set.
    pub level: Level,
    pub format: LogFormat,
    /// Directives such as `goggles_sw=debug,reqwest=warn`. Overrides `RUST_LOG`.
    pub filter: Option<String>,
    pub include_location: bool,
    /// Log span enter and close.
    pub include_span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
            filter: None,
            include_location: false,
            include_span_events: false,
        }
    }
}

impl LogConfig {
    /// Everything at debug, with file and line.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Self::default()
        }
    }

    pub fn with_level_name(self, name: &str) -> Result<Self, GogglesError> {
        let level = name
            .parse::<Level>()
            .map_err(|_| GogglesError::config(format!("unknown log level '{name}'")))?;
        Ok(Self { level, ..self })
    }

    pub fn with_format(self, format: LogFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..self
        }
    }

    /// An unparsable directive falls back to `level`.
    fn env_filter(&self) -> EnvFilter {
        let parsed = match &self.filter {
            Some(directives) => EnvFilter::try_new(directives).ok(),
            None => EnvFilter::try_from_default_env().ok(),
        };
        parsed.unwrap_or_else(|| EnvFilter::new(self.level.to_string()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(self.span_events());

        match self.format {
            LogFormat::Pretty => base
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .boxed(),
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Json => base.json().boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Fails if one is already installed for this process.
pub fn init_logging(config: LogConfig) -> Result<(), GogglesError> {
    tracing_subscriber::registry()
        .with(config.layer())
        .with(config.env_filter())
        .try_init()
        .map_err(|e| GogglesError::internal(format!("logging already initialized: {e}")))
}
