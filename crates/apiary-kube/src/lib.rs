//! Apiary Kube - Kubernetes integration for Apiary
//!
//! This crate provides:
//! - **Rate Limiting**: Fixed-window request budget shared by every API call
//! - **Transport**: Raw HTTP or `kube::Client` backed request execution
//! - **Discovery**: apiVersion/kind to REST path mapping with a process-lifetime cache
//! - **API Client**: Create-or-update, get and delete with bounded retries
//! - **Await Conditions**: JSON pointer, status condition and readiness checks
//! - **Orchestrator**: Ordered, fail-fast execution of apply plans

pub mod client;
pub mod conditions;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod rate_limit;
pub mod resource;
pub mod transport;

pub use client::{ApiClient, ApplyOutcome, ClientOptions, DeleteOutcome, ResourceClient};
pub use conditions::{group_satisfied, is_ready};
pub use discovery::{DiscoveryCache, ResourceInfo};
pub use error::{KubeError, Result};
pub use orchestrator::{
    Command, EntryReport, EntryState, Orchestrator, OrchestratorOptions, RunFailure, RunReport,
};
pub use rate_limit::{Clock, ManualClock, RateLimiter, SystemClock};
pub use resource::{ROOT_NAME_LABEL, ROOT_VERSION_LABEL, ResourceRef, TIMESTAMP_LABEL};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, KubeTransport, Transport};
