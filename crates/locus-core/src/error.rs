//! Error types for Locus.
//!
//! One error enum covers every layer: resolution, network calls, cache tiers
//! and configuration. Helpers classify errors for the retry and
//! re-resolution policies.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the Locus library.
#[derive(Debug, Error)]
pub enum LocusError {
    // Resolution errors
    #[error("Service unavailable: no local or healthy network instance of '{capability}'")]
    ServiceUnavailable { capability: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request to {endpoint} timed out after {timeout:?}")]
    NetworkTimeout { endpoint: String, timeout: Duration },

    #[error("Remote service returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Circuit breaker open for {endpoint}")]
    CircuitBreakerOpen { endpoint: String },

    // Cache errors
    #[error("Failed to deserialize cache entry {key}: {message}")]
    CacheDeserialization { key: String, message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Dispatch errors
    #[error("'{capability}' does not understand '{input}'")]
    UnknownIntent { capability: String, input: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Locus operations.
pub type Result<T> = std::result::Result<T, LocusError>;

impl From<std::io::Error> for LocusError {
    fn from(err: std::io::Error) -> Self {
        LocusError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LocusError {
    fn from(err: serde_json::Error) -> Self {
        LocusError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for LocusError {
    fn from(err: rusqlite::Error) -> Self {
        LocusError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for LocusError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if err.is_timeout() {
            LocusError::NetworkTimeout {
                endpoint,
                timeout: Duration::ZERO,
            }
        } else {
            LocusError::Network {
                message: format!("{} ({})", err, endpoint),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl LocusError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LocusError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry at the proxy layer.
    ///
    /// Only connection-level failures qualify; application errors reported
    /// by a reachable peer are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocusError::Network { .. } | LocusError::NetworkTimeout { .. }
        )
    }

    /// Check if this error means the resolved endpoint could not be reached.
    ///
    /// Connectivity errors invalidate the locator's resolution cache.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            LocusError::Network { .. }
                | LocusError::NetworkTimeout { .. }
                | LocusError::CircuitBreakerOpen { .. }
        )
    }

    /// Map to the HTTP status used by the service host.
    pub fn http_status(&self) -> u16 {
        match self {
            LocusError::ServiceUnavailable { .. } | LocusError::CircuitBreakerOpen { .. } => 503,
            LocusError::NetworkTimeout { .. } => 504,
            LocusError::Network { .. } => 502,
            LocusError::Remote { status, .. } => *status,
            LocusError::UnknownIntent { .. } | LocusError::Validation { .. } => 422,
            LocusError::Json { .. } => 400,
            _ => 500,
        }
    }
}
