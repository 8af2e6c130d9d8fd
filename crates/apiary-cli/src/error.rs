//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use apiary_core::CoreError;
use apiary_engine::EngineError;
use apiary_kube::KubeError;
use apiary_operator::OperatorError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Plan could not be built
    #[error("Resolution failed: {message}")]
    #[diagnostic(code(apiary::cli::resolution))]
    Resolution {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Descriptor rendering failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Interpolation(#[from] EngineError),

    /// A plan entry failed against the cluster
    #[error("Apply failed at {entry}: {message}")]
    #[diagnostic(
        code(apiary::cli::apply),
        help("entries listed as DONE were left in place; fix the failure and re-run")
    )]
    ApplyFailed { entry: String, message: String },

    /// Configuration file or cluster connection problem
    #[error("Configuration error: {message}")]
    #[diagnostic(code(apiary::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Invalid command line input
    #[error("Invalid usage: {message}")]
    #[diagnostic(code(apiary::cli::usage))]
    Usage { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(apiary::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(apiary::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Resolution { .. } => exit_codes::RESOLUTION_ERROR,
            CliError::Interpolation(_) => exit_codes::INTERPOLATION_ERROR,
            CliError::ApplyFailed { .. } => exit_codes::APPLY_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Config { .. } | CliError::Io { .. } | CliError::Internal { .. } => {
                exit_codes::ERROR
            }
        }
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error for a run that stopped at `entry`
    pub fn from_run_failure(entry: String, error: KubeError) -> Self {
        match error {
            KubeError::Resolution(e) => e.into(),
            KubeError::Interpolation(e) => CliError::Interpolation(e),
            other => CliError::ApplyFailed {
                entry,
                message: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let help = match &err {
            CoreError::AlveolusNotFound { .. } => {
                Some("run `apiary list` to see the alveoli found in the bundles".to_string())
            }
            CoreError::CycleDetected { .. } => {
                Some("remove one of the dependencies along the chain".to_string())
            }
            CoreError::IncompatibleOverride { .. } => Some(
                "a shared dependency must receive the same placeholders on every path".to_string(),
            ),
            _ => None,
        };
        match err {
            CoreError::Io(e) => e.into(),
            e if e.is_resolution() => CliError::Resolution {
                message: e.to_string(),
                help,
            },
            e => CliError::Config {
                message: e.to_string(),
                help,
            },
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Resolution(e) => e.into(),
            KubeError::Interpolation(e) => CliError::Interpolation(e),
            other => CliError::config_with_help(
                other.to_string(),
                "check the kube section of the configuration or your kubeconfig",
            ),
        }
    }
}

impl From<OperatorError> for CliError {
    fn from(err: OperatorError) -> Self {
        match err {
            OperatorError::Core(e) => e.into(),
            OperatorError::Kube(e) => e.into(),
            OperatorError::Io(e) => e.into(),
            OperatorError::PermissionDenied { .. } => CliError::config_with_help(
                err.to_string(),
                "grant list and watch on the custom resource to the operator service account",
            ),
            other => CliError::internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
