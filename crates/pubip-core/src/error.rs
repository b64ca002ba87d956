//! Error types for public address resolution
//!
//! Source-level failures (`Detector`, `NotRetrieved`, `Network`, ...) are
//! produced by individual detectors and always swallowed by the resolver.
//! Only `Config`, `NoConsensus` and `Timeout` ever reach a resolver caller.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pubip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, detected before any network activity
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every applicable source finished without an address crossing the threshold
    #[error("No address exceeded the consensus threshold {threshold:.2} ({sources} source(s) queried)")]
    NoConsensus {
        /// Threshold the resolution was run with
        threshold: f64,
        /// Number of sources that were queried
        sources: usize,
    },

    /// The shared deadline elapsed before any address crossed the threshold
    #[error("No consensus for threshold {threshold:.2} within {timeout:?}")]
    Timeout {
        /// Deadline the resolution was run with
        timeout: Duration,
        /// Threshold the resolution was run with
        threshold: f64,
    },

    /// Detector-specific failure
    #[error("Detector error ({kind}): {message}")]
    Detector {
        /// Detector kind label (e.g. "HTTP")
        kind: String,
        /// Error message
        message: String,
    },

    /// A source answered, but the answer did not contain a usable address
    #[error("Address not retrieved: {0}")]
    NotRetrieved(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a detector-specific error
    pub fn detector(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Detector {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a "not retrieved" error
    pub fn not_retrieved(msg: impl Into<String>) -> Self {
        Self::NotRetrieved(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error means "the sources did not agree in time".
    ///
    /// Callers generally cannot act differently on a timeout than on an
    /// exhausted source set, so both report `true` here.
    pub fn is_no_consensus(&self) -> bool {
        matches!(self, Self::NoConsensus { .. } | Self::Timeout { .. })
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_exhaustion_both_count_as_no_consensus() {
        let timeout = Error::Timeout {
            timeout: Duration::from_secs(1),
            threshold: 0.6,
        };
        let exhausted = Error::NoConsensus {
            threshold: 0.6,
            sources: 3,
        };

        assert!(timeout.is_no_consensus());
        assert!(exhausted.is_no_consensus());
        assert!(!Error::config("empty").is_no_consensus());
    }

    #[test]
    fn detector_error_names_its_kind() {
        let err = Error::detector("STUN", "short read");
        assert_eq!(err.to_string(), "Detector error (STUN): short read");
    }
}
