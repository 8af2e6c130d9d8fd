//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Manifest not found: {path}")]
    ManifestNotFound { path: String },

    #[error("Invalid manifest: {message}")]
    InvalidManifest { message: String },

    #[error("Alveolus not found: {name}{}", .version.as_deref().map(|v| format!(" (version {v})")).unwrap_or_default())]
    AlveolusNotFound {
        name: String,
        version: Option<String>,
    },

    #[error("Descriptor '{descriptor}' not found for alveolus '{alveolus}'")]
    DescriptorNotFound { alveolus: String, descriptor: String },

    #[error("Dependency cycle detected: {chain}")]
    CycleDetected { chain: String },

    #[error(
        "Incompatible placeholder overrides for alveolus '{alveolus}': first reached with {first}, then with {second}"
    )]
    IncompatibleOverride {
        alveolus: String,
        first: String,
        second: String,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl CoreError {
    /// Resolution failures abort a run before any cluster call is made
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            CoreError::AlveolusNotFound { .. }
                | CoreError::DescriptorNotFound { .. }
                | CoreError::CycleDetected { .. }
                | CoreError::IncompatibleOverride { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
