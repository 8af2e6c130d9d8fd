//! Alveolus manifest model
//!
//! A manifest (`manifest.json` / `manifest.yaml`) declares one or more alveoli.
//! Each alveolus is a named, versioned bundle of Kubernetes descriptors plus the
//! alveoli it depends on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::condition::Conditions;
use crate::error::{CoreError, Result};

/// Placeholder map attached to an alveolus or to a dependency edge
pub type Placeholders = BTreeMap<String, String>;

/// Root of a manifest file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub alveoli: Vec<Alveolus>,
}

impl Manifest {
    /// Parse a manifest from a file, choosing the format from the extension
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::ManifestNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        for alveolus in &self.alveoli {
            if alveolus.name.trim().is_empty() {
                return Err(CoreError::InvalidManifest {
                    message: "alveolus without a name".to_string(),
                });
            }
            if let Some(desc) = alveolus.descriptors.iter().find(|d| d.name.trim().is_empty()) {
                return Err(CoreError::InvalidManifest {
                    message: format!(
                        "alveolus '{}' declares a descriptor without a name (type {})",
                        alveolus.name, desc.kind
                    ),
                });
            }
            if let Some(desc) = alveolus
                .descriptors
                .iter()
                .find(|d| !d.kind.eq_ignore_ascii_case(KUBERNETES_TYPE))
            {
                return Err(CoreError::InvalidManifest {
                    message: format!(
                        "descriptor '{}' of alveolus '{}' has unsupported type '{}' (only '{}' is supported)",
                        desc.name, alveolus.name, desc.kind, KUBERNETES_TYPE
                    ),
                });
            }
            if let Some(patch) = alveolus.patches.iter().find(|p| p.descriptor_name.trim().is_empty()) {
                return Err(CoreError::InvalidManifest {
                    message: format!(
                        "alveolus '{}' declares a patch without a descriptorName ({} operations)",
                        alveolus.name,
                        patch.operations().len()
                    ),
                });
            }
            if let Some(patch) = alveolus.patches.iter().find(|p| !p.patch.is_array()) {
                return Err(CoreError::InvalidManifest {
                    message: format!(
                        "patch for '{}' in alveolus '{}' must be a JSON-Patch array",
                        patch.descriptor_name, alveolus.name
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Identity of an alveolus
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlveolusId {
    pub name: String,
    pub version: Option<String>,
}

impl AlveolusId {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for AlveolusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A named, versioned bundle of descriptors and dependencies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alveolus {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Default placeholder values for this alveolus
    #[serde(default)]
    pub placeholders: Placeholders,

    #[serde(default)]
    pub descriptors: Vec<Descriptor>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Descriptor names never applied for this alveolus nor its dependencies.
    /// `*` excludes every descriptor.
    #[serde(default)]
    pub excluded_descriptors: Vec<String>,

    /// JSON-Patch documents applied to matching descriptors, here and in dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
}

impl Alveolus {
    /// Declared version, or the third segment of a `group:artifact:version` name
    pub fn effective_version(&self) -> Option<String> {
        self.version
            .clone()
            .or_else(|| version_from_name(&self.name))
    }

    pub fn id(&self) -> AlveolusId {
        AlveolusId::new(&self.name, self.effective_version())
    }

    /// Whether this alveolus answers a `(name, version)` lookup
    pub fn matches(&self, name: &str, version: Option<&str>) -> bool {
        if self.name != name {
            return false;
        }
        match version {
            None => true,
            Some(wanted) => self.effective_version().as_deref() == Some(wanted),
        }
    }
}

fn version_from_name(name: &str) -> Option<String> {
    let segments: Vec<&str> = name.split(':').collect();
    if segments.len() >= 3 && !segments[2].is_empty() {
        Some(segments[2].to_string())
    } else {
        None
    }
}

/// Reference from one alveolus to another
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,

    /// Exact version wanted; any version matches when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Placeholder overrides layered over the dependency's own defaults
    #[serde(default)]
    pub placeholders: Placeholders,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_if: Option<Conditions>,
}

/// Whether a descriptor name selector matches `name`.
///
/// `*` matches everything, a selector containing `*` is a glob where each `*`
/// stands for any run of characters, anything else must match exactly.
pub fn name_matches(selector: &str, name: &str) -> bool {
    if selector == "*" {
        return true;
    }
    if !selector.contains('*') {
        return selector == name;
    }

    let parts: Vec<&str> = selector.split('*').collect();
    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = name.strip_prefix(first) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some((last, middle)) => (*last, middle),
        None => return remaining.is_empty(),
    };
    for part in middle {
        match remaining.find(part) {
            Some(at) => remaining = &remaining[at + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

/// JSON-Patch (RFC 6902) document targeting descriptors by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    /// Descriptor name selector, see [`name_matches`]
    pub descriptor_name: String,

    /// Render placeholders in the patch before applying it
    #[serde(default)]
    pub interpolate: bool,

    /// Array of patch operations
    #[serde(default = "empty_patch")]
    pub patch: serde_json::Value,
}

impl Patch {
    pub fn applies_to(&self, descriptor: &str) -> bool {
        name_matches(&self.descriptor_name, descriptor)
    }

    pub fn operations(&self) -> &[serde_json::Value] {
        self.patch.as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}

fn empty_patch() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

/// The only descriptor type this tool applies
pub const KUBERNETES_TYPE: &str = "kubernetes";

/// A single manifest unit of an alveolus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Logical name, also the file name under `kubernetes/`
    pub name: String,

    #[serde(rename = "type", default = "default_descriptor_type")]
    pub kind: String,

    /// Render placeholders before applying
    #[serde(default = "default_true")]
    pub interpolate: bool,

    #[serde(default)]
    pub skip: bool,

    /// Wait for the resource to exist (or be gone, on delete)
    #[serde(rename = "await", default)]
    pub await_ready: bool,

    /// Overrides the configured await timeout
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub await_timeout: Option<Duration>,

    /// Overrides the configured await polling interval
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub await_interval: Option<Duration>,

    #[serde(default)]
    pub await_conditions: Vec<AwaitConditions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_if: Option<Conditions>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_descriptor_type(),
            interpolate: true,
            skip: false,
            await_ready: false,
            await_timeout: None,
            await_interval: None,
            await_conditions: Vec::new(),
            include_if: None,
        }
    }

    /// Await groups that apply to the given command (`apply` or `delete`)
    pub fn awaits_for<'a>(&'a self, command: &'a str) -> impl Iterator<Item = &'a AwaitConditions> {
        self.await_conditions
            .iter()
            .filter(move |group| group.command == command)
    }

    pub fn has_await(&self, command: &str) -> bool {
        self.await_ready || self.awaits_for(command).next().is_some()
    }
}

fn default_descriptor_type() -> String {
    KUBERNETES_TYPE.to_string()
}

fn default_true() -> bool {
    true
}

/// How a group of conditions combines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    #[default]
    All,
    Any,
}

/// Await conditions evaluated after a given command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwaitConditions {
    #[serde(default = "default_command")]
    pub command: String,

    #[serde(default)]
    pub operator: ConditionOperator,

    #[serde(default)]
    pub conditions: Vec<AwaitCondition>,
}

fn default_command() -> String {
    "apply".to_string()
}

/// Kind of check performed by an [`AwaitCondition`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AwaitConditionType {
    /// Compare the value at a JSON pointer
    #[default]
    JsonPointer,
    /// Match an entry of `/status/conditions`
    StatusCondition,
    /// Built-in readiness heuristic
    Ready,
}

/// Comparison used by JSON pointer conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PointerOperator {
    #[default]
    Equals,
    NotEquals,
    EqualsIgnoreCase,
    NotEqualsIgnoreCase,
    Contains,
    Exists,
    Missing,
}

/// Polling predicate over a resource's observed state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwaitCondition {
    #[serde(rename = "type", default)]
    pub kind: AwaitConditionType,

    /// JSON pointer, e.g. `/status/phase`
    #[serde(default)]
    pub pointer: String,

    #[serde(default)]
    pub operator_type: PointerOperator,

    /// Expected value (pointer comparison or condition status)
    #[serde(default)]
    pub value: String,

    /// `type` of the status condition to look up
    #[serde(default)]
    pub condition_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
alveoli:
  - name: "io.acme:web:1.2.0"
    placeholders:
      replicas: "2"
    dependencies:
      - name: db
        version: "15"
        placeholders:
          size: 10Gi
    descriptors:
      - name: web-deployment
        await: true
        awaitTimeout: 30s
        awaitInterval: 500ms
        awaitConditions:
          - operator: any
            conditions:
              - type: statusCondition
                conditionType: Available
                value: "True"
      - name: web-service
        interpolate: false
  - name: db
    version: "15"
    descriptors:
      - name: db-statefulset
"#;

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.alveoli.len(), 2);

        let web = &manifest.alveoli[0];
        assert_eq!(web.placeholders.get("replicas").map(String::as_str), Some("2"));
        assert_eq!(web.dependencies[0].version.as_deref(), Some("15"));
        assert_eq!(web.dependencies[0].placeholders["size"], "10Gi");

        let deployment = &web.descriptors[0];
        assert_eq!(deployment.kind, "kubernetes");
        assert!(deployment.interpolate);
        assert!(deployment.await_ready);
        assert_eq!(deployment.await_timeout, Some(Duration::from_secs(30)));
        assert_eq!(deployment.await_interval, Some(Duration::from_millis(500)));
        let group = &deployment.await_conditions[0];
        assert_eq!(group.command, "apply");
        assert_eq!(group.operator, ConditionOperator::Any);
        assert_eq!(group.conditions[0].kind, AwaitConditionType::StatusCondition);

        assert!(!web.descriptors[1].interpolate);
    }

    #[test]
    fn test_version_derived_from_name() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let web = &manifest.alveoli[0];
        assert_eq!(web.effective_version().as_deref(), Some("1.2.0"));
        assert_eq!(web.id().to_string(), "io.acme:web:1.2.0@1.2.0");

        let plain = Alveolus {
            name: "plain".to_string(),
            ..Default::default()
        };
        assert_eq!(plain.effective_version(), None);
        assert_eq!(plain.id().to_string(), "plain");
    }

    #[test]
    fn test_matches_any_version_when_unset() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let db = &manifest.alveoli[1];
        assert!(db.matches("db", None));
        assert!(db.matches("db", Some("15")));
        assert!(!db.matches("db", Some("16")));
        assert!(!db.matches("web", None));
    }

    #[test]
    fn test_parse_json_manifest() {
        let json = r#"{"alveoli":[{"name":"a","descriptors":[{"name":"a-cm","skip":true}]}]}"#;
        let manifest = Manifest::from_json(json).unwrap();
        assert!(manifest.alveoli[0].descriptors[0].skip);
    }

    #[test]
    fn test_reject_unnamed_alveolus() {
        let err = Manifest::from_yaml("alveoli:\n  - name: ''\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidManifest { .. }));
    }

    #[test]
    fn test_awaits_filtered_by_command() {
        let mut desc = Descriptor::new("x");
        desc.await_conditions.push(AwaitConditions {
            command: "delete".to_string(),
            operator: ConditionOperator::All,
            conditions: vec![],
        });
        assert!(!desc.has_await("apply"));
        assert!(desc.has_await("delete"));
    }

    #[test]
    fn test_reject_unsupported_descriptor_type() {
        let yaml = "alveoli:\n  - name: a\n    descriptors:\n      - name: chart\n        type: helm\n";
        let err = Manifest::from_yaml(yaml).unwrap_err();
        match err {
            CoreError::InvalidManifest { message } => {
                assert!(message.contains("chart"));
                assert!(message.contains("helm"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let upper = "alveoli:\n  - name: a\n    descriptors:\n      - name: cm\n        type: Kubernetes\n";
        assert!(Manifest::from_yaml(upper).is_ok());
    }

    #[test]
    fn test_parse_patches() {
        let yaml = r#"
alveoli:
  - name: a
    excludedDescriptors: ["*"]
    patches:
      - descriptorName: "web-*"
        interpolate: true
        patch:
          - op: replace
            path: /spec/replicas
            value: "{{replicas}}"
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let patch = &manifest.alveoli[0].patches[0];
        assert!(patch.interpolate);
        assert_eq!(patch.operations().len(), 1);
        assert!(patch.applies_to("web-deployment"));
        assert!(!patch.applies_to("db-deployment"));

        let not_array = "alveoli:\n  - name: a\n    patches:\n      - descriptorName: x\n        patch: {op: add}\n";
        assert!(matches!(
            Manifest::from_yaml(not_array).unwrap_err(),
            CoreError::InvalidManifest { .. }
        ));
    }

    #[test]
    fn test_name_selectors() {
        assert!(name_matches("*", "anything"));
        assert!(name_matches("web", "web"));
        assert!(!name_matches("web", "web-svc"));
        assert!(name_matches("web-*", "web-svc"));
        assert!(name_matches("*-svc", "web-svc"));
        assert!(name_matches("w*-*c", "web-svc"));
        assert!(!name_matches("w*-*d", "web-svc"));
        assert!(!name_matches("db-*", "web-svc"));
    }
}
