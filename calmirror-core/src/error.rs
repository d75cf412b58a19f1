//! Error types for calmirror.

use thiserror::Error;

/// Errors that can occur in calmirror operations.
#[derive(Error, Debug)]
pub enum CalMirrorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider '{0}' not found in PATH")]
    ProviderNotInstalled(String),

    #[error("Provider request timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalMirrorError {
    /// Wrap a backing-store failure as `"<operation>: <cause>"`.
    pub fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        CalMirrorError::Storage(format!("{operation}: {cause}"))
    }

    /// Rewrap the message with an operation prefix, keeping the variant.
    pub fn prefixed(self, prefix: &str) -> Self {
        use CalMirrorError::*;
        match self {
            Connection(m) => Connection(format!("{prefix}: {m}")),
            NotFound(m) => NotFound(format!("{prefix}: {m}")),
            Validation(m) => Validation(format!("{prefix}: {m}")),
            Remote(m) => Remote(format!("{prefix}: {m}")),
            Storage(m) => Storage(format!("{prefix}: {m}")),
            Config(m) => Config(format!("{prefix}: {m}")),
            Serialization(m) => Serialization(format!("{prefix}: {m}")),
            ProviderNotInstalled(m) => Remote(format!("{prefix}: provider '{m}' not found in PATH")),
            ProviderTimeout(secs) => Remote(format!("{prefix}: provider timed out after {secs}s")),
            Io(e) => Io(std::io::Error::new(e.kind(), format!("{prefix}: {e}"))),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CalMirrorError::NotFound(_))
    }
}

/// Result type alias for calmirror operations.
pub type CalMirrorResult<T> = Result<T, CalMirrorError>;
