//! Error types for netstack-dispatch
//!
//! Errors are grouped by subsystem. Nothing in this crate is fatal to the
//! process: every failure is scoped to the flow that produced it, and the
//! types here only carry enough context to log it properly.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationError(reason.into())
    }
}

/// Errors returned by an upstream DNS resolver
///
/// The DNS interceptor treats [`ResolverError::Timeout`] differently from
/// everything else: a timed-out exchange is dropped without a response so
/// the client retries on its own schedule.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The upstream did not answer in time
    #[error("DNS query to {upstream} timed out after {timeout:?}")]
    Timeout {
        /// Upstream server address
        upstream: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// Socket-level failure talking to the upstream
    #[error("Network error: {reason}")]
    Network {
        /// What was being attempted
        reason: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The upstream answered with something unusable
    #[error("Upstream server error ({upstream}): {reason}")]
    Upstream {
        /// Upstream server address
        upstream: String,
        /// Description of the failure
        reason: String,
    },
}

impl ResolverError {
    /// Create a timeout error
    pub fn timeout(upstream: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            upstream: upstream.into(),
            timeout,
        }
    }

    /// Create a network error wrapping an I/O error
    pub fn network(reason: impl Into<String>, source: io::Error) -> Self {
        Self::Network {
            reason: reason.into(),
            source,
        }
    }

    /// Create an upstream error
    pub fn upstream(upstream: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            upstream: upstream.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, ResolverError>;
