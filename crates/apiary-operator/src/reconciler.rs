//! Per-resource dispatch of reconcile events
//!
//! Key features:
//! - Stale events (resource version not above the last accepted one) are dropped
//! - At most one run in flight per resource
//! - Events arriving during a run coalesce into a single pending slot, last write wins
//! - Handler failures and panics are logged and never stop dispatching
//! - A resource's slot is dropped once its deletion has run; later events for an
//!   untracked resource must be newer than every retired version

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::{EventType, ReconcileEvent};

/// Executes the pipeline for one event
#[async_trait]
pub trait RunHandler: Send + Sync + 'static {
    async fn handle(&self, event: ReconcileEvent, cancel: CancellationToken) -> Result<()>;
}

/// What [`Reconciler::submit`] did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A run started immediately
    Started,
    /// Stored as the next run; `replaced` when an older pending event was discarded
    Queued { replaced: bool },
    /// Version not newer than the last accepted one
    Stale,
}

#[derive(Debug, Default)]
struct Slot {
    last_version: Option<u64>,
    running: bool,
    pending: Option<ReconcileEvent>,
}

#[derive(Debug, Default)]
struct SlotTable {
    slots: HashMap<String, Slot>,
    /// Highest version of a slot dropped after its deletion ran
    retired_floor: Option<u64>,
}

type Slots = Arc<Mutex<SlotTable>>;

/// Dispatches events to a [`RunHandler`], one worker per busy resource
pub struct Reconciler {
    handler: Arc<dyn RunHandler>,
    slots: Slots,
    workers: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(handler: Arc<dyn RunHandler>, cancel: CancellationToken) -> Self {
        Self {
            handler,
            slots: Arc::new(Mutex::new(SlotTable::default())),
            workers: Mutex::new(JoinSet::new()),
            cancel,
        }
    }

    pub fn submit(&self, event: ReconcileEvent) -> Submission {
        let name = event.name.clone();
        {
            let mut table = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let floor = table.retired_floor;
            let slot = match table.slots.entry(name.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(_) if floor.is_some_and(|f| event.resource_version <= f) => {
                    tracing::debug!(
                        resource = %name,
                        version = event.resource_version,
                        floor = ?floor,
                        "dropping event older than a retired deletion"
                    );
                    return Submission::Stale;
                }
                Entry::Vacant(entry) => entry.insert(Slot::default()),
            };

            if slot.last_version.is_some_and(|last| event.resource_version <= last) {
                tracing::debug!(
                    resource = %name,
                    version = event.resource_version,
                    last = ?slot.last_version,
                    "dropping stale event"
                );
                return Submission::Stale;
            }
            slot.last_version = Some(event.resource_version);

            if slot.running {
                let replaced = slot.pending.replace(event).is_some();
                tracing::debug!(resource = %name, replaced, "run in flight, event queued");
                return Submission::Queued { replaced };
            }
            slot.running = true;
        }

        let handler = self.handler.clone();
        let slots = self.slots.clone();
        let cancel = self.cancel.clone();
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        while workers.try_join_next().is_some() {}
        workers.spawn(worker(handler, slots, cancel, name, event));
        Submission::Started
    }

    /// Whether a run for `name` is in flight
    pub fn is_running(&self, name: &str) -> bool {
        let table = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        table.slots.get(name).is_some_and(|s| s.running)
    }

    /// Number of resources with dispatch state
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).slots.len()
    }

    /// Wait until every worker spawned so far has drained its queue
    pub async fn wait_idle(&self) {
        let mut workers = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        while workers.join_next().await.is_some() {}
    }

    /// Cancel in-flight runs cooperatively and wait for the workers
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.wait_idle().await;
    }
}

async fn worker(
    handler: Arc<dyn RunHandler>,
    slots: Slots,
    cancel: CancellationToken,
    name: String,
    first: ReconcileEvent,
) {
    let mut next = Some(first);
    while let Some(event) = next {
        let version = event.resource_version;
        let event_type = event.event_type;
        tracing::info!(resource = %name, version, event = %event_type, "reconciling");

        let handler = handler.clone();
        let token = cancel.child_token();
        match tokio::spawn(async move { handler.handle(event, token).await }).await {
            Ok(Ok(())) => tracing::info!(resource = %name, version, "reconciled"),
            Ok(Err(error)) => tracing::error!(resource = %name, version, error = %error, "reconcile failed"),
            Err(error) => tracing::error!(resource = %name, version, error = %error, "reconcile task aborted"),
        }

        next = {
            let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
            let table = &mut *guard;
            let slot = table.slots.entry(name.clone()).or_default();
            let pending = slot.pending.take();
            if pending.is_none() {
                slot.running = false;
                if event_type == EventType::Deleted {
                    let retired = slot.last_version.unwrap_or(version).max(version);
                    table.slots.remove(&name);
                    table.retired_floor = Some(table.retired_floor.map_or(retired, |f| f.max(retired)));
                    tracing::debug!(resource = %name, version = retired, "deletion reconciled, slot released");
                }
            }
            pending
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperatorError;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        runs: Mutex<Vec<(String, u64, Vec<String>)>>,
        fail_version: Option<u64>,
    }

    impl Recorder {
        fn runs(&self) -> Vec<(String, u64, Vec<String>)> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunHandler for Recorder {
        async fn handle(&self, event: ReconcileEvent, _cancel: CancellationToken) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.runs
                .lock()
                .unwrap()
                .push((event.name.clone(), event.resource_version, event.args.clone()));
            if self.fail_version == Some(event.resource_version) {
                return Err(OperatorError::InvalidArgs("boom".to_string()));
            }
            Ok(())
        }
    }

    fn event(name: &str, version: u64, arg: &str) -> ReconcileEvent {
        ReconcileEvent {
            event_type: EventType::Modified,
            name: name.to_string(),
            resource_version: version,
            args: vec![format!("--marker={arg}")],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_event_dropped() {
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(recorder.clone(), CancellationToken::new());

        assert_eq!(reconciler.submit(event("web", 5, "five")), Submission::Started);
        assert_eq!(reconciler.submit(event("web", 3, "three")), Submission::Stale);
        assert_eq!(reconciler.submit(event("web", 5, "again")), Submission::Stale);
        reconciler.wait_idle().await;

        assert_eq!(recorder.runs(), vec![("web".to_string(), 5, vec!["--marker=five".to_string()])]);
        assert_eq!(reconciler.submit(event("web", 4, "four")), Submission::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_one_run() {
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(recorder.clone(), CancellationToken::new());

        assert_eq!(reconciler.submit(event("web", 1, "first")), Submission::Started);
        assert_eq!(
            reconciler.submit(event("web", 2, "v2")),
            Submission::Queued { replaced: false }
        );
        for version in 3..=10 {
            assert_eq!(
                reconciler.submit(event("web", version, &format!("v{version}"))),
                Submission::Queued { replaced: true }
            );
        }
        assert!(reconciler.is_running("web"));
        reconciler.wait_idle().await;

        let runs = recorder.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].1, 1);
        assert_eq!(runs[1].1, 10);
        assert_eq!(runs[1].2, vec!["--marker=v10".to_string()]);
        assert!(!reconciler.is_running("web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_replaces_queued_run() {
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(recorder.clone(), CancellationToken::new());

        reconciler.submit(event("web", 1, "first"));
        reconciler.submit(event("web", 2, "update"));
        let mut deleted = event("web", 3, "gone");
        deleted.event_type = EventType::Deleted;
        assert_eq!(reconciler.submit(deleted), Submission::Queued { replaced: true });
        reconciler.wait_idle().await;

        let versions: Vec<u64> = recorder.runs().iter().map(|r| r.1).collect();
        assert_eq!(versions, vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resources_run_independently() {
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(recorder.clone(), CancellationToken::new());

        let start = tokio::time::Instant::now();
        assert_eq!(reconciler.submit(event("a", 1, "a")), Submission::Started);
        assert_eq!(reconciler.submit(event("b", 1, "b")), Submission::Started);
        reconciler.wait_idle().await;

        assert_eq!(recorder.runs().len(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stop_dispatch() {
        let recorder = Arc::new(Recorder {
            fail_version: Some(1),
            ..Default::default()
        });
        let reconciler = Reconciler::new(recorder.clone(), CancellationToken::new());

        reconciler.submit(event("web", 1, "bad"));
        reconciler.submit(event("web", 2, "good"));
        reconciler.wait_idle().await;
        assert_eq!(reconciler.submit(event("web", 3, "later")), Submission::Started);
        reconciler.wait_idle().await;

        let versions: Vec<u64> = recorder.runs().iter().map(|r| r.1).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_delete_releases_slot() {
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(recorder.clone(), CancellationToken::new());

        reconciler.submit(event("web", 1, "first"));
        reconciler.submit(event("keep", 2, "keep"));
        let mut deleted = event("web", 3, "gone");
        deleted.event_type = EventType::Deleted;
        assert_eq!(reconciler.submit(deleted), Submission::Queued { replaced: false });
        assert_eq!(reconciler.tracked(), 2);
        reconciler.wait_idle().await;

        assert_eq!(reconciler.tracked(), 1);
        assert!(!reconciler.is_running("web"));
        assert_eq!(reconciler.submit(event("web", 3, "replayed")), Submission::Stale);
        assert_eq!(reconciler.submit(event("web", 2, "older")), Submission::Stale);
        assert_eq!(reconciler.tracked(), 1);

        assert_eq!(reconciler.submit(event("web", 4, "recreated")), Submission::Started);
        reconciler.wait_idle().await;
        assert_eq!(reconciler.tracked(), 2);
        let versions: Vec<u64> = recorder.runs().iter().filter(|r| r.0 == "web").map(|r| r.1).collect();
        assert_eq!(versions, vec![1, 3, 4]);
    }
}
