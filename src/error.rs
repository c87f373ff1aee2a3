// src/error.rs

//! Unified error handling for the leaderboard watcher.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Leaderboard fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Notification delivery failed
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot store error
    #[error("Storage error for {key}: {message}")]
    Storage { key: String, message: String },
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a storage error with the record key as context.
    pub fn storage(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Errors raised by a leaderboard fetch.
///
/// Clients never retry on their own; the scheduler decides what each kind
/// means for the entity's backoff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The credential was rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The leaderboard does not exist or is not visible with this credential
    #[error("leaderboard {leaderboard} ({year}) not found")]
    NotFound { leaderboard: String, year: u16 },

    /// The provider asked us to slow down
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Connection, timeout, or server-side failure
    #[error("network error: {0}")]
    Network(String),

    /// The response could not be decoded into a snapshot
    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn auth(message: impl fmt::Display) -> Self {
        Self::Auth(message.to_string())
    }

    pub fn network(message: impl fmt::Display) -> Self {
        Self::Network(message.to_string())
    }

    pub fn parse(message: impl fmt::Display) -> Self {
        Self::Parse(message.to_string())
    }

    /// Failure classification used by the scheduler.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Network(_) => FailureKind::Network,
            Self::Parse(_) => FailureKind::Parse,
        }
    }
}

/// Notification delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery to {destination} failed: {message}")]
pub struct DeliveryError {
    pub destination: String,
    pub message: String,
}

impl DeliveryError {
    pub fn new(destination: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            destination: destination.into(),
            message: message.to_string(),
        }
    }
}

/// Why a poll cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Auth,
    NotFound,
    RateLimited,
    Network,
    Parse,
    /// The snapshot could not be persisted
    Storage,
}

impl FailureKind {
    /// Failures that mean the entity itself is misconfigured.
    pub fn is_terminal_candidate(self) -> bool {
        matches!(self, Self::Auth | Self::NotFound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::NotFound => "not-found",
            Self::RateLimited => "rate-limited",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kinds() {
        assert_eq!(FetchError::auth("bad cookie").kind(), FailureKind::Auth);
        assert_eq!(
            FetchError::NotFound {
                leaderboard: "1".into(),
                year: 2024
            }
            .kind(),
            FailureKind::NotFound
        );
        assert_eq!(FetchError::network("reset").kind(), FailureKind::Network);
        assert!(FailureKind::Auth.is_terminal_candidate());
        assert!(FailureKind::NotFound.is_terminal_candidate());
        assert!(!FailureKind::Network.is_terminal_candidate());
        assert!(!FailureKind::Parse.is_terminal_candidate());
    }

    #[test]
    fn test_rate_limited_display() {
        let err = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "rate limited (retry after 30s)");

        let err = FetchError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "rate limited");
    }
}
