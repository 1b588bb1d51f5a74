//! # Goggles Common
//!
//! Plumbing shared by the Whisky Goggles client crates: the error every
//! subsystem error folds into at the binary boundary, `tracing` setup, and
//! backoff helpers.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_when, retry_with_backoff, with_timeout, RetryConfig};

type Cause = Box<dyn StdError + Send + Sync>;

/// Error surfaced by the `goggles` binary.
///
/// Subsystem variants keep the underlying error as their source so the
/// whole chain can be printed.
#[derive(Error, Debug)]
pub enum GogglesError {
    /// Installing, activating or reading the offline cache.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// The identification endpoint rejected or garbled a submission.
    #[error("Identify error: {message}")]
    Identify {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A state the client should never reach. Carries where it happened.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

fn cause<E: StdError + Send + Sync + 'static>(err: E) -> Option<Cause> {
    Some(Box::new(err))
}

impl GogglesError {
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    pub fn cache_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Cache {
            message: message.into(),
            source: cause(source),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    pub fn network_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Network {
            message: message.into(),
            source: cause(source),
        }
    }

    pub fn identify_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Identify {
            message: message.into(),
            source: cause(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: cause(source),
        }
    }

    /// Captures a backtrace at the call site.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Whether running the same command again could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout(_) | Self::Io(_))
    }

    /// Value of the `category` field when the error is logged.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Cache { .. } => "cache",
            Self::Network { .. } => "network",
            Self::Identify { .. } => "identify",
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal { .. } => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, GogglesError>;
