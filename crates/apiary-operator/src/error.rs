//! Error types for apiary-operator

use thiserror::Error;

/// Result type for apiary-operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors raised by the watch loop and reconcile runs
#[derive(Debug, Error)]
pub enum OperatorError {
    /// The smoke test listing the watched resource failed
    #[error("cannot list {resource}, check the role bindings: {message}")]
    PermissionDenied { resource: String, message: String },

    /// Watch stream could not be opened or broke
    #[error("watch error: {0}")]
    Watch(String),

    /// A watch record that cannot become a reconcile event
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// A reconcile run finished with a failed plan entry
    #[error("run for '{resource}' failed at {entry}: {message}")]
    RunFailed {
        resource: String,
        entry: String,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] apiary_core::CoreError),

    #[error(transparent)]
    Kube(#[from] apiary_kube::KubeError),

    #[error("state file error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<kube::Error> for OperatorError {
    fn from(e: kube::Error) -> Self {
        OperatorError::Watch(e.to_string())
    }
}
