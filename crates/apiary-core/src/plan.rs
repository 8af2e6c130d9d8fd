//! Dependency graph resolution into an ordered apply plan
//!
//! Key features:
//! - **Post-order emission**: dependencies' descriptors precede their dependents'
//! - **Cycle detection**: a cycle is fatal and names the full chain
//! - **Diamond dedup**: an alveolus reached through several paths is emitted once
//! - **Override checks**: a shared alveolus must see the same placeholders on every path
//! - **Inherited customization**: excludes and patches flow from an alveolus to its dependencies
//! - **Auto mode**: every known alveolus becomes a root, with a mandatory warning

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::condition::{Environment, is_included};
use crate::error::{CoreError, Result};
use crate::manifest::{Alveolus, AlveolusId, Descriptor, Patch, Placeholders, name_matches};
use crate::source::ManifestSource;

/// Warning attached to every plan built in auto mode
pub const AUTO_MODE_WARNING: &str = "no alveolus selected: applying every discovered alveolus as an independent root. \
This bypasses explicit dependency declarations and may apply unintended manifests";

/// One descriptor to apply, with the context it renders in
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    /// Alveolus owning the descriptor
    pub alveolus: AlveolusId,
    pub descriptor: Descriptor,
    /// Effective placeholders of the owning alveolus
    pub placeholders: Placeholders,
    /// Root the entry was reached from
    pub root: AlveolusId,
    /// Patches matching the descriptor, in application order
    pub patches: Vec<Patch>,
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.alveolus, self.descriptor.name)
    }
}

/// Ordered, deduplicated list of descriptors to apply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyPlan {
    pub entries: Vec<PlanEntry>,
    /// Warnings the caller must surface
    pub warnings: Vec<String>,
}

impl ApplyPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the plan as an indented listing
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        let mut current: Option<&AlveolusId> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if current != Some(&entry.alveolus) {
                lines.push(format!("{}", entry.alveolus));
                current = Some(&entry.alveolus);
            }
            let mut flags = Vec::new();
            if entry.descriptor.skip {
                flags.push("skip");
            }
            if entry.descriptor.has_await("apply") {
                flags.push("await");
            }
            if !entry.descriptor.interpolate {
                flags.push("raw");
            }
            let suffix = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            lines.push(format!("  {:>3}. {}{}", index + 1, entry.descriptor.name, suffix));
        }
        lines.join("\n")
    }
}

/// Type alias for the alveolus fetcher function
type AlveolusFetcher<'a> = Box<dyn Fn(&str, Option<&str>) -> Result<Alveolus> + 'a>;

/// Builds apply plans from alveolus definitions
pub struct PlanBuilder<'a> {
    fetch: AlveolusFetcher<'a>,
    environment: Environment,
    excludes: HashSet<String>,
}

#[derive(Default)]
struct Traversal {
    /// Nodes on the current DFS path, in order
    visiting: Vec<String>,
    /// Fully emitted nodes and the placeholders they were resolved with
    resolved: HashMap<String, Placeholders>,
    entries: Vec<PlanEntry>,
}

impl<'a> PlanBuilder<'a> {
    /// Create a builder with a fetch function `(name, version) -> Alveolus`
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Result<Alveolus> + 'a,
    {
        Self {
            fetch: Box::new(fetch),
            environment: Environment::new(),
            excludes: HashSet::new(),
        }
    }

    /// Environment used to evaluate `includeIf` blocks
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Descriptor names never emitted, whatever the alveolus
    pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(excludes.into_iter().map(Into::into));
        self
    }

    /// Resolve a single root alveolus, layering `overrides` over its defaults
    pub fn build(
        &self,
        name: &str,
        version: Option<&str>,
        overrides: &Placeholders,
    ) -> Result<ApplyPlan> {
        let mut traversal = Traversal::default();
        let root = (self.fetch)(name, version)?;
        let root_id = root.id();
        self.visit(root, overrides, &root_id, &self.excludes, &[], &mut traversal)?;

        tracing::debug!(root = %root_id, entries = traversal.entries.len(), "resolved apply plan");
        Ok(ApplyPlan {
            entries: traversal.entries,
            warnings: Vec::new(),
        })
    }

    /// Auto mode: treat every listed alveolus as an independent root.
    ///
    /// Each root is resolved on its own, so override checks never span roots.
    /// The per-root plans are concatenated in discovery order, dropping any
    /// entry an earlier root already emitted with the same placeholders and patches.
    pub fn build_all(&self, roots: &[AlveolusId]) -> Result<ApplyPlan> {
        tracing::warn!("{}", AUTO_MODE_WARNING);

        let mut emitted = HashSet::new();
        let mut entries = Vec::new();
        let empty = Placeholders::new();
        for id in roots {
            let alveolus = (self.fetch)(&id.name, id.version.as_deref())?;
            let root_id = alveolus.id();
            let mut traversal = Traversal::default();
            self.visit(alveolus, &empty, &root_id, &self.excludes, &[], &mut traversal)?;

            for entry in traversal.entries {
                if emitted.insert(emission_key(&entry)) {
                    entries.push(entry);
                } else {
                    tracing::debug!(root = %root_id, entry = %entry, "already emitted by an earlier root");
                }
            }
        }

        Ok(ApplyPlan {
            entries,
            warnings: vec![AUTO_MODE_WARNING.to_string()],
        })
    }

    fn visit(
        &self,
        alveolus: Alveolus,
        overrides: &Placeholders,
        root: &AlveolusId,
        inherited_excludes: &HashSet<String>,
        inherited_patches: &[Patch],
        traversal: &mut Traversal,
    ) -> Result<()> {
        let id = alveolus.id();
        let key = id.to_string();

        if let Some(pos) = traversal.visiting.iter().position(|k| k == &key) {
            let mut chain = traversal.visiting[pos..].to_vec();
            chain.push(key);
            return Err(CoreError::CycleDetected {
                chain: chain.join(" -> "),
            });
        }

        let mut effective = alveolus.placeholders.clone();
        effective.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(previous) = traversal.resolved.get(&key) {
            if previous != &effective {
                return Err(CoreError::IncompatibleOverride {
                    alveolus: key,
                    first: format_placeholders(previous),
                    second: format_placeholders(&effective),
                });
            }
            return Ok(());
        }

        let excludes: HashSet<String> = inherited_excludes
            .iter()
            .cloned()
            .chain(alveolus.excluded_descriptors.iter().cloned())
            .collect();
        // own patches first, so the ones declared closer to the root apply last
        let patches: Vec<Patch> = alveolus
            .patches
            .iter()
            .chain(inherited_patches)
            .cloned()
            .collect();

        traversal.visiting.push(key.clone());
        for dependency in &alveolus.dependencies {
            if !is_included(dependency.include_if.as_ref(), &self.environment) {
                tracing::debug!(alveolus = %key, dependency = %dependency.name, "dependency skipped by includeIf");
                continue;
            }
            let child = (self.fetch)(&dependency.name, dependency.version.as_deref())?;
            self.visit(child, &dependency.placeholders, root, &excludes, &patches, traversal)?;
        }
        traversal.visiting.pop();

        for descriptor in &alveolus.descriptors {
            if excludes.iter().any(|selector| name_matches(selector, &descriptor.name)) {
                tracing::debug!(alveolus = %key, descriptor = %descriptor.name, "descriptor excluded");
                continue;
            }
            if !is_included(descriptor.include_if.as_ref(), &self.environment) {
                tracing::debug!(alveolus = %key, descriptor = %descriptor.name, "descriptor skipped by includeIf");
                continue;
            }
            traversal.entries.push(PlanEntry {
                alveolus: id.clone(),
                descriptor: descriptor.clone(),
                placeholders: effective.clone(),
                root: root.clone(),
                patches: patches
                    .iter()
                    .filter(|patch| patch.applies_to(&descriptor.name))
                    .cloned()
                    .collect(),
            });
        }

        traversal.resolved.insert(key, effective);
        Ok(())
    }
}

/// A plan resolution against a [`ManifestSource`]
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Root alveolus; auto mode when `None`
    pub alveolus: Option<String>,
    pub version: Option<String>,
    /// Root overrides, ignored in auto mode
    pub overrides: Placeholders,
    pub excludes: Vec<String>,
    pub environment: Environment,
}

impl PlanRequest {
    pub fn resolve(&self, source: &dyn ManifestSource) -> Result<ApplyPlan> {
        let builder = PlanBuilder::new(|name, version| source.load(name, version))
            .with_environment(self.environment.clone())
            .with_excludes(self.excludes.iter().cloned());

        match &self.alveolus {
            Some(name) => builder.build(name, self.version.as_deref(), &self.overrides),
            None => builder.build_all(&source.list()?),
        }
    }
}

/// Everything that shapes what an entry sends to the cluster, except its root
fn emission_key(entry: &PlanEntry) -> (String, String, Placeholders, String) {
    (
        entry.alveolus.to_string(),
        entry.descriptor.name.clone(),
        entry.placeholders.clone(),
        serde_json::to_string(&entry.patches).unwrap_or_default(),
    )
}

fn format_placeholders(placeholders: &Placeholders) -> String {
    let pairs: Vec<String> = placeholders
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}
