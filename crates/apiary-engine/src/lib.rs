//! Apiary Engine - placeholder interpolation for Kubernetes descriptors
//!
//! This crate provides:
//! - `{{key}}` / `{{key:-default}}` substitution with nested keys and escapes
//! - A layered lookup chain (built-ins, alveolus, configuration, environment)
//! - Descriptor rendering from YAML/JSON text to JSON objects
//! - JSON-Patch application for alveolus patches
//! - Diagnostics pointing at the unresolved token, with suggestions

pub mod error;
pub mod interpolate;
pub mod lookup;
pub mod patch;
pub mod render;

pub use error::{EngineError, Result, UnresolvedPlaceholder};
pub use interpolate::Interpolator;
pub use lookup::{ConfigLookup, EnvLayer, LayeredConfig, MapLayer};
pub use render::{DescriptorRenderer, RenderContext};
