//! Error types for estate-link.
//!
//! The taxonomy separates failures the cache can recover from (network,
//! timeouts, transport loss) from failures that need a caller fix
//! (validation, not-found, configuration).

use std::fmt;
use thiserror::Error;

/// Result type for estate-link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur in the client.
///
/// Every variant carries owned strings so the error can be cloned into a
/// [`Snapshot`](crate::models::Snapshot) and handed to many consumers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Transient network failure (connect refused, reset, DNS).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Malformed table name, filter, or query options.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Realtime channel failure. Never surfaced to table consumers.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Single-record lookup found nothing.
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Non-success status returned by the remote store.
    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Coarse classification of a [`LinkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Validation,
    Transport,
    NotFound,
    Server,
    Timeout,
    Configuration,
    Serialization,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Transport => "transport",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Server => "server",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::NetworkError(_) => ErrorKind::Network,
            LinkError::ValidationError(_) => ErrorKind::Validation,
            LinkError::TransportError(_) => ErrorKind::Transport,
            LinkError::NotFoundError(_) => ErrorKind::NotFound,
            LinkError::ServerError { .. } => ErrorKind::Server,
            LinkError::TimeoutError(_) => ErrorKind::Timeout,
            LinkError::ConfigurationError(_) => ErrorKind::Configuration,
            LinkError::SerializationError(_) => ErrorKind::Serialization,
            LinkError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller-driven retry has a chance of succeeding.
    ///
    /// 5xx server responses count as transient; 4xx never do.
    pub fn is_retriable(&self) -> bool {
        match self {
            LinkError::NetworkError(_) | LinkError::TimeoutError(_) => true,
            LinkError::ServerError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        LinkError::ValidationError(msg.into())
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinkError::TimeoutError(err.to_string())
        } else if err.is_decode() {
            LinkError::SerializationError(err.to_string())
        } else if err.is_builder() {
            LinkError::ConfigurationError(err.to_string())
        } else {
            LinkError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        LinkError::ConfigurationError(format!("Invalid TOML: {}", err))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::ConfigurationError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::TransportError(err.to_string())
    }
}
