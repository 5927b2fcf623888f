//! Error types for the gate
//!
//! Probe failures never reach callers of `detect()`; they are logged and
//! folded into a non-blocking signal.
//! The variants here describe failures at the host boundaries and in
//! configuration loading.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gate operations
pub type GateResult<T> = Result<T, GateError>;

/// Errors raised by host collaborators and the controller
#[derive(Error, Debug)]
pub enum GateError {
    /// The document refused an insertion, removal, or style read
    #[error("DOM operation failed: {0}")]
    Dom(String),

    /// A request failed below the HTTP layer (connect, abort, timeout)
    #[error("Network request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// A bait or base URL could not be parsed or resolved
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The gate could not be rendered (e.g. no document body)
    #[error("Gate render failed: {0}")]
    Render(String),

    /// The browsing context could not be navigated
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Configuration could not be loaded or parsed
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GateError {
    /// Shorthand for a DOM failure
    pub fn dom(message: impl Into<String>) -> Self {
        Self::Dom(message.into())
    }

    /// Shorthand for a network-layer failure
    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether this failure happened at the network layer.
    ///
    /// Only these count as a blocked signal for bait URLs.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Errors from loading a [`GateConfig`](crate::config::GateConfig)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON options: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML options: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unsupported config format for {path} (expected .json or .toml)")]
    UnsupportedFormat { path: PathBuf },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_network_failures() {
        assert!(GateError::transport("/ads.js", "connection refused").is_network_failure());
        assert!(!GateError::dom("no body").is_network_failure());
        assert!(!GateError::Render("detached".into()).is_network_failure());
        let invalid = GateError::InvalidUrl {
            url: "::".into(),
            reason: "relative URL without a base".into(),
        };
        assert!(!invalid.is_network_failure());
    }

    #[test]
    fn test_error_display() {
        let err = GateError::transport("/doubleclick", "timed out");
        assert_eq!(
            err.to_string(),
            "Network request to /doubleclick failed: timed out"
        );
    }
}
