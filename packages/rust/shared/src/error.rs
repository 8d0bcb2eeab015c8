//! Error types for DeliveryKit.
//!
//! Library crates use [`DeliveryError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all DeliveryKit operations.
///
/// Every variant is fatal to a pipeline build. Recoverable extraction problems
/// never surface as errors; they are recorded as diagnostic events instead.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Invalid resource configuration (bad macro, missing schema, bad option value).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// No single execution strategy covers every classified handler.
    #[error("ambiguous resource configuration: {message}")]
    AmbiguousConfiguration { message: String },

    /// An explicit strategy override contradicts the only usable strategy.
    #[error("invalid strategy override: {message}")]
    InvalidOverride { message: String },

    /// A handler factory judged its descriptor invalid.
    #[error("factory rejected resource [{resource}]: {message}")]
    Factory { resource: String, message: String },

    /// A lifecycle listener failed while being notified.
    #[error("lifecycle listener error: {0}")]
    Listener(String),

    /// Descriptor or schema text could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DeliveryError>;

impl DeliveryError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an ambiguity error from any displayable message.
    pub fn ambiguous(msg: impl Into<String>) -> Self {
        Self::AmbiguousConfiguration {
            message: msg.into(),
        }
    }

    /// Create an invalid-override error from any displayable message.
    pub fn invalid_override(msg: impl Into<String>) -> Self {
        Self::InvalidOverride {
            message: msg.into(),
        }
    }

    /// Create a factory configuration error for the named resource.
    pub fn factory(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Factory {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stems from the resource configuration itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::AmbiguousConfiguration { .. }
                | Self::InvalidOverride { .. }
                | Self::Factory { .. }
        )
    }
}
