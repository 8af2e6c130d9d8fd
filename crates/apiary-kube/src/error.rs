//! Error types for apiary-kube

use thiserror::Error;

/// Result type for apiary-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to the cluster or running a plan
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Plan construction or descriptor lookup failed
    #[error("resolution error: {0}")]
    Resolution(#[from] apiary_core::CoreError),

    /// Descriptor rendering failed
    #[error("interpolation error: {0}")]
    Interpolation(#[from] apiary_engine::EngineError),

    /// Connection-level failure, retried
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Unexpected HTTP status
    #[error("{method} {path} failed with HTTP {status}: {message}")]
    Http {
        status: u16,
        method: String,
        path: String,
        message: String,
    },

    /// Retry budget spent on transient failures
    #[error("giving up after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Await condition not met in time
    #[error("timed out after {timeout:?} waiting for {resource}")]
    AwaitTimeout {
        resource: String,
        timeout: std::time::Duration,
    },

    /// Run cancelled before completion
    #[error("run cancelled")]
    Cancelled,

    /// Object unusable for an API call
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Invalid client configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Kubernetes client setup error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Transient failures: network errors, 5xx and 429
    pub fn is_retryable(&self) -> bool {
        match self {
            KubeError::Transport { .. } => true,
            KubeError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if this is a 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Http { status: 404, .. })
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Http { status: 409, .. })
    }

    /// Errors raised before anything was sent to the cluster
    pub fn is_resolution(&self) -> bool {
        matches!(self, KubeError::Resolution(e) if e.is_resolution())
    }

    pub fn is_interpolation(&self) -> bool {
        matches!(self, KubeError::Interpolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> KubeError {
        KubeError::Http {
            status,
            method: "GET".to_string(),
            path: "/api/v1".to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn test_retry_classification() {
        assert!(http(500).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(403).is_retryable());
        assert!(KubeError::Transport { message: "reset".into() }.is_retryable());
        assert!(!KubeError::Cancelled.is_retryable());
    }

    #[test]
    fn test_status_helpers() {
        assert!(http(404).is_not_found());
        assert!(http(409).is_conflict());
        assert!(!http(500).is_not_found());
    }
}
