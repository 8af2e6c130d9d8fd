//! Apiary Operator - re-runs apply plans when custom resources change
//!
//! This crate provides:
//! - **Watch Boundary**: `WatchSource` over a custom resource kind, with a `kube` implementation
//! - **Watch Loop**: reconnects with backoff and persists the last resource version
//! - **Reconciler**: per-resource ordering, stale-event dropping and coalescing
//! - **Run Handler**: turns `spec.args` into an apply or delete run

pub mod error;
pub mod event;
pub mod handler;
pub mod reconciler;
pub mod watch;

pub use error::{OperatorError, Result};
pub use event::{EventType, ReconcileEvent, RunArgs};
pub use handler::OrchestratorHandler;
pub use reconciler::{Reconciler, RunHandler, Submission};
pub use watch::{Backoff, KubeWatchSource, ResourceVersionStore, WatchLoop, WatchRecord, WatchSource};
