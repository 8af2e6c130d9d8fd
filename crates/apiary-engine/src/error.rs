//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Unresolved(#[from] UnresolvedPlaceholder),

    #[error("Invalid descriptor '{descriptor}': {message}")]
    #[diagnostic(code(apiary::engine::descriptor))]
    InvalidDescriptor { descriptor: String, message: String },

    #[error("Patch for '{descriptor}' failed: {message}")]
    #[diagnostic(
        code(apiary::engine::patch),
        help("check the patch paths against the rendered descriptor")
    )]
    InvalidPatch { descriptor: String, message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A placeholder with no value in any layer and no default
#[derive(Error, Debug, Diagnostic)]
#[error("unresolved placeholder '{key}' in {descriptor}")]
#[diagnostic(code(apiary::engine::unresolved_placeholder))]
pub struct UnresolvedPlaceholder {
    pub key: String,

    pub descriptor: String,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("no value for this placeholder")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
