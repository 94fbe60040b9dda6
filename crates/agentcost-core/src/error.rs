//! Error types for agentcost-core
//!
//! Only configuration problems, backpressure and use-after-shutdown reach the
//! caller. Delivery failures stay inside the batcher and show up in stats.

use std::time::Duration;
use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error("invalid configuration: {field}: {message}")]
    Configuration {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// Queue is full
    #[error("event queue full ({capacity} events)")]
    Backpressure {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Tracker or batcher has been shut down
    #[error("tracker has been shut down")]
    ShutDown,

    /// Batch delivery failed
    #[error("send error: {0}")]
    Send(#[from] SendError),

    /// Pricing fetch error
    #[error("pricing error: {0}")]
    Pricing(#[from] agentcost_pricing::Error),

    /// Internal error (runtime missing, serialization, etc.)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn config(field: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Classified delivery failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Timeout, connection error, 5xx or an unexpected 2xx body
    #[error("transient failure: {0}")]
    Transient(String),

    /// HTTP 429
    #[error("rate limited")]
    RateLimited {
        /// Server-provided `Retry-After`
        retry_after: Option<Duration>,
    },

    /// Any other 4xx; never retried
    #[error("permanent failure: HTTP {status}")]
    Permanent {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },
}

impl SendError {
    /// Whether a retry could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent { .. })
    }

    /// Server-requested delay before the next attempt
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SendError::Transient("reset".into()).is_retryable());
        assert!(SendError::RateLimited { retry_after: None }.is_retryable());
        assert!(!SendError::Permanent {
            status: 401,
            body: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = SendError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(SendError::Transient("x".into()).retry_after(), None);
    }

    #[test]
    fn test_error_display() {
        let err = Error::config("api_key", "required in cloud mode");
        assert_eq!(
            err.to_string(),
            "invalid configuration: api_key: required in cloud mode"
        );
        assert_eq!(
            Error::Backpressure { capacity: 10 }.to_string(),
            "event queue full (10 events)"
        );
    }
}
