//! Worker-side errors: configuration, audit I/O and adapter construction.
//!
//! Orchestration failures are wrapped unchanged so callers can still ask
//! `is_retry_later()` on the inner error.

use std::path::PathBuf;

use orchestration::OrchestrationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Audit log could not be opened or written.
    #[error("audit log {path}: {source}")]
    Audit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP client could not be built.
    #[error("http client for provider '{provider}': {message}")]
    Http { provider: String, message: String },

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),
}

impl WorkerError {
    /// `true` when the failure is a provider outage rather than bad input.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, Self::Orchestration(e) if e.is_retry_later())
    }
}
