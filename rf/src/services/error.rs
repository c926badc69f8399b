//! Collaborator error taxonomy

use std::time::Duration;
use thiserror::Error;

use crate::domain::FailureKind;

/// Errors returned by external collaborators
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Permanent(String),

    /// Output was delivered but rejected; the calls were still billed
    #[error("{message}")]
    NonCompliant { message: String, spent: f64 },

    #[error("Cancelled")]
    Cancelled,
}

impl ServiceError {
    /// Classify an HTTP status code
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited { retry_after: None },
            408 | 500..=599 => Self::Transient(format!("HTTP {}: {}", status, message)),
            422 => Self::Validation(message),
            _ => Self::Permanent(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Check if this error should be retried with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Transient(_)
            | ServiceError::RateLimited { .. }
            | ServiceError::Timeout(_)
            | ServiceError::Network(_) => true,
            ServiceError::Validation(_)
            | ServiceError::Permanent(_)
            | ServiceError::NonCompliant { .. }
            | ServiceError::Cancelled => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }

    /// Get the retry duration if the service asked for one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Cost already billed by the failed operation
    pub fn spent(&self) -> f64 {
        match self {
            ServiceError::NonCompliant { spent, .. } => *spent,
            _ => 0.0,
        }
    }

    /// Classification stored on a failed sequence
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ServiceError::Validation(_) => FailureKind::Validation,
            ServiceError::Permanent(_) | ServiceError::NonCompliant { .. } => FailureKind::Permanent,
            _ => FailureKind::Retryable,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout(Duration::ZERO)
        } else if let Some(status) = e.status() {
            ServiceError::from_status(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            ServiceError::Validation(e.to_string())
        } else {
            ServiceError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Validation(e.to_string())
    }
}
