//! Ordered execution of an apply plan
//!
//! Each plan entry moves through
//! `Pending -> Rendering -> Applying -> Awaiting (optional) -> Done | Failed`,
//! or straight to `Skipped`. Entries run strictly in plan order (reverse order
//! for deletes). The first failure stops the run; entries already done are left
//! in place and the report lists every entry with its final state.
//!
//! Every descriptor is loaded before the first cluster call, so a missing
//! descriptor fails the run with nothing applied.

use apiary_core::{
    ApiaryConfig, ApplyPlan, AwaitConditions, LabelConfig, ManifestSource, PlanEntry, RawDescriptor,
};
use apiary_engine::{ConfigLookup, DescriptorRenderer, RenderContext};
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::ResourceClient;
use crate::conditions::group_satisfied;
use crate::error::{KubeError, Result};
use crate::resource::{
    ROOT_NAME_LABEL, ROOT_VERSION_LABEL, ResourceRef, TIMESTAMP_LABEL, inject_labels,
    sanitize_label_value,
};

/// Pipeline a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Apply,
    Delete,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Apply => "apply",
            Command::Delete => "delete",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Rendering,
    Applying,
    Awaiting,
    Done,
    Failed,
    Skipped,
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Rendering => "RENDERING",
            Self::Applying => "APPLYING",
            Self::Awaiting => "AWAITING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Outcome of one plan entry
#[derive(Debug, Clone)]
pub struct EntryReport {
    /// `alveolus/descriptor`
    pub entry: String,
    pub state: EntryState,
    /// Objects touched, with the action taken
    pub resources: Vec<String>,
    pub error: Option<String>,
}

impl EntryReport {
    fn pending(entry: &PlanEntry) -> Self {
        Self {
            entry: entry.to_string(),
            state: EntryState::Pending,
            resources: Vec::new(),
            error: None,
        }
    }
}

/// The error that stopped a run
#[derive(Debug)]
pub struct RunFailure {
    pub entry: String,
    pub error: KubeError,
}

/// Final report of a run
#[derive(Debug)]
pub struct RunReport {
    pub command: Command,
    pub execution_id: String,
    /// One report per plan entry, in plan order
    pub entries: Vec<EntryReport>,
    pub warnings: Vec<String>,
    pub failure: Option<RunFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn count(&self, state: EntryState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let parts: Vec<String> = [
            (EntryState::Done, "done"),
            (EntryState::Failed, "failed"),
            (EntryState::Skipped, "skipped"),
            (EntryState::Pending, "not run"),
        ]
        .iter()
        .filter_map(|(state, label)| match self.count(*state) {
            0 => None,
            n => Some(format!("{} {}", n, label)),
        })
        .collect();

        if parts.is_empty() {
            "No descriptors processed".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Polling and labelling settings
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub await_interval: Duration,
    pub await_timeout: Duration,
    pub labels: LabelConfig,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from(&ApiaryConfig::default())
    }
}

impl From<&ApiaryConfig> for OrchestratorOptions {
    fn from(config: &ApiaryConfig) -> Self {
        Self {
            await_interval: config.await_config.interval,
            await_timeout: config.await_config.timeout,
            labels: config.labels.clone(),
        }
    }
}

/// Drives apply plans through a [`ResourceClient`]
pub struct Orchestrator {
    client: Arc<dyn ResourceClient>,
    source: Arc<dyn ManifestSource>,
    lookup: Arc<dyn ConfigLookup>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    /// `lookup` holds the global configuration and environment layers
    pub fn new(
        client: Arc<dyn ResourceClient>,
        source: Arc<dyn ManifestSource>,
        lookup: Arc<dyn ConfigLookup>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            client,
            source,
            lookup,
            options,
        }
    }

    pub fn source(&self) -> &Arc<dyn ManifestSource> {
        &self.source
    }

    pub async fn apply(&self, plan: &ApplyPlan, cancel: &CancellationToken) -> RunReport {
        self.run(Command::Apply, plan, cancel).await
    }

    /// Delete the plan's objects, last entry first
    pub async fn delete(&self, plan: &ApplyPlan, cancel: &CancellationToken) -> RunReport {
        self.run(Command::Delete, plan, cancel).await
    }

    pub async fn run(&self, command: Command, plan: &ApplyPlan, cancel: &CancellationToken) -> RunReport {
        let execution_id = new_execution_id();
        let renderer = DescriptorRenderer::new(RenderContext::new(&execution_id), self.lookup.as_ref());
        let timestamp = Utc::now().timestamp_millis().to_string();

        let mut entries: Vec<EntryReport> = plan.entries.iter().map(EntryReport::pending).collect();
        let order: Vec<usize> = match command {
            Command::Apply => (0..plan.entries.len()).collect(),
            Command::Delete => (0..plan.entries.len()).rev().collect(),
        };

        tracing::info!(%command, execution_id = %execution_id, entries = plan.entries.len(), "starting run");

        let raws = match self.load_descriptors(plan) {
            Ok(raws) => raws,
            Err((index, error)) => {
                let report = &mut entries[index];
                tracing::error!(entry = %report.entry, error = %error, "descriptor not loadable, nothing applied");
                report.state = EntryState::Failed;
                report.error = Some(error.to_string());
                let failure = RunFailure {
                    entry: report.entry.clone(),
                    error,
                };
                return RunReport {
                    command,
                    execution_id,
                    entries,
                    warnings: plan.warnings.clone(),
                    failure: Some(failure),
                };
            }
        };

        let mut failure = None;
        for index in order {
            let entry = &plan.entries[index];
            let report = &mut entries[index];

            if cancel.is_cancelled() {
                tracing::warn!(entry = %report.entry, "run cancelled before rendering");
                failure = Some(RunFailure {
                    entry: report.entry.clone(),
                    error: KubeError::Cancelled,
                });
                break;
            }

            let Some(raw) = &raws[index] else {
                tracing::debug!(entry = %report.entry, "skipped");
                report.state = EntryState::Skipped;
                continue;
            };

            match self
                .run_entry(command, entry, raw, &renderer, &timestamp, report, cancel)
                .await
            {
                Ok(()) => {
                    report.state = EntryState::Done;
                }
                Err(error) => {
                    tracing::error!(entry = %report.entry, error = %error, "entry failed");
                    report.state = EntryState::Failed;
                    report.error = Some(error.to_string());
                    failure = Some(RunFailure {
                        entry: report.entry.clone(),
                        error,
                    });
                    break;
                }
            }
        }

        RunReport {
            command,
            execution_id,
            entries,
            warnings: plan.warnings.clone(),
            failure,
        }
    }

    /// Raw content of every entry in plan order, `None` for skipped entries
    fn load_descriptors(
        &self,
        plan: &ApplyPlan,
    ) -> std::result::Result<Vec<Option<RawDescriptor>>, (usize, KubeError)> {
        plan.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                if entry.descriptor.skip {
                    return Ok(None);
                }
                self.source
                    .descriptor(&entry.alveolus, &entry.descriptor.name)
                    .map(Some)
                    .map_err(|e| (index, KubeError::from(e)))
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_entry(
        &self,
        command: Command,
        entry: &PlanEntry,
        raw: &RawDescriptor,
        renderer: &DescriptorRenderer<'_>,
        timestamp: &str,
        report: &mut EntryReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        report.state = EntryState::Rendering;
        let mut objects = renderer.render(entry, raw)?;

        report.state = EntryState::Applying;
        let mut resources = Vec::with_capacity(objects.len());
        match command {
            Command::Apply => {
                let labels = self.labels(entry, timestamp);
                for object in objects.iter_mut() {
                    inject_labels(object, &labels)?;
                    let resource = ResourceRef::from_object(object)?;
                    let outcome = self.client.apply(object).await?;
                    report.resources.push(format!("{} ({})", resource, outcome));
                    resources.push(resource);
                }
            }
            Command::Delete => {
                for object in objects.iter().rev() {
                    let resource = ResourceRef::from_object(object)?;
                    self.client.delete(&resource).await?;
                    report.resources.push(format!("{} (deleted)", resource));
                    resources.push(resource);
                }
            }
        }

        if entry.descriptor.has_await(command.as_str()) {
            report.state = EntryState::Awaiting;
            self.await_resources(command, entry, &resources, cancel).await?;
        }
        Ok(())
    }

    async fn await_resources(
        &self,
        command: Command,
        entry: &PlanEntry,
        resources: &[ResourceRef],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let timeout = entry.descriptor.await_timeout.unwrap_or(self.options.await_timeout);
        let interval = entry.descriptor.await_interval.unwrap_or(self.options.await_interval);
        let deadline = Instant::now() + timeout;
        let groups: Vec<&AwaitConditions> = entry.descriptor.awaits_for(command.as_str()).collect();

        for resource in resources {
            loop {
                let current = self.client.get(resource).await?;
                if satisfied(command, entry.descriptor.await_ready, &groups, current.as_ref()) {
                    tracing::debug!(resource = %resource, "await condition met");
                    break;
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(KubeError::AwaitTimeout {
                        resource: resource.to_string(),
                        timeout,
                    });
                }

                let next = (now + interval).min(deadline);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(KubeError::Cancelled),
                    _ = tokio::time::sleep_until(next) => {}
                }
            }
        }
        Ok(())
    }

    fn labels(&self, entry: &PlanEntry, timestamp: &str) -> Vec<(String, String)> {
        let mut labels = Vec::new();
        if self.options.labels.inject_metadata {
            labels.push((ROOT_NAME_LABEL.to_string(), sanitize_label_value(&entry.root.name)));
            if let Some(version) = &entry.root.version {
                labels.push((ROOT_VERSION_LABEL.to_string(), sanitize_label_value(version)));
            }
        }
        if self.options.labels.inject_timestamp {
            labels.push((TIMESTAMP_LABEL.to_string(), timestamp.to_string()));
        }
        labels
    }
}

fn satisfied(command: Command, await_ready: bool, groups: &[&AwaitConditions], current: Option<&Value>) -> bool {
    match command {
        Command::Apply => {
            (!await_ready || current.is_some()) && groups.iter().all(|g| group_satisfied(g, current))
        }
        Command::Delete => {
            (!await_ready || current.is_none())
                && groups
                    .iter()
                    .all(|g| current.is_none() || group_satisfied(g, current))
        }
    }
}

fn new_execution_id() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>()
    )
}
