//! Watch boundary and the reconnecting watch loop

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, WatchEvent, WatchParams};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{OperatorError, Result};
use crate::event::{EventType, ReconcileEvent};
use crate::reconciler::Reconciler;

/// HTTP status telling the client its resource version is too old
const GONE: u16 = 410;

/// One record of the watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchRecord {
    Event(ReconcileEvent),
    /// Progress marker carrying only a resource version
    Bookmark { resource_version: String },
    Error { code: u16, message: String },
}

pub type RecordStream = BoxStream<'static, Result<WatchRecord>>;

/// A long-lived stream of changes for the watched custom resource
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Fail fast when the resource cannot be listed
    async fn check_permissions(&self) -> Result<()>;

    /// Open a stream resuming after `resource_version` (empty for "now")
    async fn watch(&self, resource_version: &str) -> Result<RecordStream>;
}

/// Watches a custom resource through `kube::Api<DynamicObject>`
pub struct KubeWatchSource {
    api: Api<DynamicObject>,
    resource: String,
}

impl KubeWatchSource {
    pub fn new(client: kube::Client, namespace: &str, group: &str, version: &str, kind: &str, plural: &str) -> Self {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        Self {
            api: Api::namespaced_with(client, namespace, &resource),
            resource: format!("{}.{}/{} in {}", plural, group, version, namespace),
        }
    }
}

#[async_trait]
impl WatchSource for KubeWatchSource {
    async fn check_permissions(&self) -> Result<()> {
        self.api
            .list(&ListParams::default().limit(1))
            .await
            .map(|_| ())
            .map_err(|e| OperatorError::PermissionDenied {
                resource: self.resource.clone(),
                message: e.to_string(),
            })
    }

    async fn watch(&self, resource_version: &str) -> Result<RecordStream> {
        let version = if resource_version.is_empty() { "0" } else { resource_version };
        let stream = self.api.watch(&WatchParams::default(), version).await?;
        Ok(stream
            .map_err(OperatorError::from)
            .and_then(|event| async move { record_from_event(event) })
            .boxed())
    }
}

fn record_from_event(event: WatchEvent<DynamicObject>) -> Result<WatchRecord> {
    let (event_type, object) = match event {
        WatchEvent::Added(object) => (EventType::Added, object),
        WatchEvent::Modified(object) => (EventType::Modified, object),
        WatchEvent::Deleted(object) => (EventType::Deleted, object),
        WatchEvent::Bookmark(bookmark) => {
            return Ok(WatchRecord::Bookmark {
                resource_version: bookmark.metadata.resource_version,
            });
        }
        WatchEvent::Error(error) => {
            return Ok(WatchRecord::Error {
                code: error.code,
                message: error.message,
            });
        }
    };
    let value = serde_json::to_value(&object).map_err(|e| OperatorError::InvalidEvent(e.to_string()))?;
    ReconcileEvent::from_object(event_type, &value).map(WatchRecord::Event)
}

/// Last seen resource version, optionally persisted to a file
#[derive(Debug, Clone, Default)]
pub struct ResourceVersionStore {
    path: Option<PathBuf>,
}

impl ResourceVersionStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Stored version, empty when nothing was persisted
    pub async fn load(&self) -> Result<String> {
        match &self.path {
            Some(path) if tokio::fs::try_exists(path).await? => {
                Ok(tokio::fs::read_to_string(path).await?.trim().to_string())
            }
            _ => Ok(String::new()),
        }
    }

    pub async fn save(&self, resource_version: &str) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_version(path, resource_version).await {
            tracing::warn!(path = %path.display(), error = %e, "cannot persist resource version");
        }
    }
}

async fn write_version(path: &Path, resource_version: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, resource_version).await
}

/// Numerically larger of two resource versions; an unparsable current value is replaced
fn newest(current: &str, candidate: &str) -> String {
    match (current.parse::<u64>(), candidate.parse::<u64>()) {
        (Ok(a), Ok(b)) if a >= b => current.to_string(),
        (_, Ok(_)) => candidate.to_string(),
        _ => current.to_string(),
    }
}

/// Reconnect delays
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Consumes a [`WatchSource`] and feeds the [`Reconciler`]
pub struct WatchLoop {
    source: Arc<dyn WatchSource>,
    reconciler: Arc<Reconciler>,
    store: ResourceVersionStore,
    backoff: Backoff,
}

impl WatchLoop {
    pub fn new(
        source: Arc<dyn WatchSource>,
        reconciler: Arc<Reconciler>,
        store: ResourceVersionStore,
        backoff: Backoff,
    ) -> Self {
        Self {
            source,
            reconciler,
            store,
            backoff,
        }
    }

    /// Run until cancelled; only the initial permission check is fatal
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.source.check_permissions().await?;

        let mut resource_version = self.store.load().await?;
        let mut delay = self.backoff.initial;

        while !cancel.is_cancelled() {
            tracing::info!(resource_version = %resource_version, "starting watch");
            let mut healthy = false;

            match self.source.watch(&resource_version).await {
                Ok(mut stream) => loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(record)) => {
                            healthy = true;
                            if !self.dispatch(record, &mut resource_version).await {
                                break;
                            }
                        }
                        Some(Err(OperatorError::InvalidEvent(message))) => {
                            tracing::warn!(message = %message, "skipping watch record");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "watch stream failed");
                            healthy = false;
                            break;
                        }
                        // healthy only if the connection delivered records
                        None => {
                            tracing::debug!(healthy, "watch stream ended");
                            break;
                        }
                    }
                },
                Err(e) => tracing::warn!(error = %e, "cannot open watch"),
            }

            if cancel.is_cancelled() {
                break;
            }
            if healthy {
                delay = self.backoff.initial;
                continue;
            }
            tracing::debug!(delay = ?delay, "reconnecting after backoff");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.backoff.next(delay);
        }

        tracing::info!("watch loop stopped, waiting for in-flight runs");
        self.reconciler.shutdown().await;
        Ok(())
    }

    /// Handle one record; `false` asks for a fresh watch
    async fn dispatch(&self, record: WatchRecord, resource_version: &mut String) -> bool {
        match record {
            WatchRecord::Event(event) => {
                let newer = newest(resource_version, &event.resource_version.to_string());
                if newer != *resource_version {
                    *resource_version = newer;
                    self.store.save(resource_version).await;
                }
                let name = event.name.clone();
                let submission = self.reconciler.submit(event);
                tracing::debug!(resource = %name, ?submission, "event dispatched");
                true
            }
            WatchRecord::Bookmark {
                resource_version: bookmark,
            } => {
                if !bookmark.is_empty() {
                    *resource_version = bookmark;
                    self.store.save(resource_version).await;
                }
                true
            }
            WatchRecord::Error { code: GONE, message } => {
                tracing::warn!(message = %message, "resource version expired, restarting watch from now");
                resource_version.clear();
                self.store.save(resource_version).await;
                false
            }
            WatchRecord::Error { code, message } => {
                tracing::error!(code, message = %message, "watch error event");
                true
            }
        }
    }
}
