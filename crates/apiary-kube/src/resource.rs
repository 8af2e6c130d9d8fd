//! Identity of rendered Kubernetes objects and label injection

use serde_json::{Map, Value};
use std::fmt;

use crate::error::{KubeError, Result};

/// Label holding the root alveolus name
pub const ROOT_NAME_LABEL: &str = "apiary.root.alveolus.name";
/// Label holding the root alveolus version
pub const ROOT_VERSION_LABEL: &str = "apiary.root.alveolus.version";
/// Label holding the apply timestamp (epoch millis)
pub const TIMESTAMP_LABEL: &str = "apiary.timestamp";

const MAX_LABEL_VALUE: usize = 63;

/// Group/version/kind plus name and namespace of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn from_object(object: &Value) -> Result<Self> {
        let field = |pointer: &str| object.pointer(pointer).and_then(Value::as_str);

        let kind = field("/kind")
            .ok_or_else(|| KubeError::InvalidResource("missing kind".to_string()))?;
        let api_version = field("/apiVersion").ok_or_else(|| {
            KubeError::InvalidResource(format!("{} is missing apiVersion", kind))
        })?;
        let name = field("/metadata/name").ok_or_else(|| {
            KubeError::InvalidResource(format!("{} is missing metadata.name", kind))
        })?;

        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: field("/metadata/namespace").map(str::to_string),
        })
    }

    /// `(group, version)`; the core group is empty
    pub fn group_version(&self) -> (&str, &str) {
        split_api_version(&self.api_version)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Make a string usable as a label value: `[A-Za-z0-9._-]`, alphanumeric at
/// both ends, at most 63 characters
pub fn sanitize_label_value(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_VALUE)
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Merge labels into `metadata.labels`, creating the maps when absent
pub fn inject_labels(object: &mut Value, labels: &[(String, String)]) -> Result<()> {
    if labels.is_empty() {
        return Ok(());
    }
    let root = object
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidResource("object expected".to_string()))?;
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidResource("metadata must be an object".to_string()))?;
    let target = metadata
        .entry("labels")
        .or_insert_with(|| Value::Object(Map::new()));
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    let existing = target
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidResource("metadata.labels must be an object".to_string()))?;
    for (key, value) in labels {
        existing.insert(key.clone(), Value::String(value.clone()));
    }
    Ok(())
}
