//! Apiary Core - Core types for the alveolus deployment orchestrator
//!
//! This crate provides the foundational types used throughout Apiary:
//! - `Manifest` / `Alveolus` / `Descriptor`: bundle definitions
//! - `ManifestSource`: where definitions and descriptor contents come from
//! - `PlanBuilder`: dependency graph resolution into an `ApplyPlan`
//! - `ApiaryConfig`: runtime configuration

pub mod condition;
pub mod config;
pub mod error;
pub mod manifest;
pub mod plan;
pub mod source;

pub use condition::{Condition, ConditionKind, Conditions, Environment, is_included};
pub use config::{
    ApiaryConfig, AwaitConfig, KubeConfig, LabelConfig, OperatorConfig, RateLimitConfig,
    RetryConfig,
};
pub use error::{CoreError, Result};
pub use manifest::{
    Alveolus, AlveolusId, AwaitCondition, AwaitConditionType, AwaitConditions,
    ConditionOperator, Dependency, Descriptor, KUBERNETES_TYPE, Manifest, Patch, Placeholders,
    PointerOperator, name_matches,
};
pub use plan::{AUTO_MODE_WARNING, ApplyPlan, PlanBuilder, PlanEntry, PlanRequest};
pub use source::{
    DescriptorFormat, FilesystemSource, InMemorySource, ManifestSource, RawDescriptor,
};
