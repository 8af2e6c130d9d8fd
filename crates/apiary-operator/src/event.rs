//! Reconcile events and the arguments they carry

use apiary_core::Placeholders;
use apiary_kube::Command;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::error::{OperatorError, Result};

/// Change reported for a watched resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl EventType {
    /// Pipeline the event triggers
    pub fn command(&self) -> Command {
        match self {
            Self::Added | Self::Modified => Command::Apply,
            Self::Deleted => Command::Delete,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Modified => write!(f, "MODIFIED"),
            Self::Deleted => write!(f, "DELETED"),
        }
    }
}

/// One change of a watched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEvent {
    pub event_type: EventType,
    /// Resource name, the unit of per-resource ordering
    pub name: String,
    pub resource_version: u64,
    /// `spec.args` of the resource
    pub args: Vec<String>,
}

impl ReconcileEvent {
    /// Build an event from a watched object (`metadata.name`,
    /// `metadata.resourceVersion`, `spec.args`)
    pub fn from_object(event_type: EventType, object: &Value) -> Result<Self> {
        let object: WatchedObject = serde_json::from_value(object.clone())
            .map_err(|e| OperatorError::InvalidEvent(e.to_string()))?;

        let name = object
            .metadata
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| OperatorError::InvalidEvent("object without metadata.name".to_string()))?;
        let raw_version = object.metadata.resource_version.unwrap_or_default();
        let resource_version = raw_version.parse::<u64>().map_err(|_| {
            OperatorError::InvalidEvent(format!(
                "{}: non numeric resourceVersion '{}'",
                name, raw_version
            ))
        })?;

        Ok(Self {
            event_type,
            name,
            resource_version,
            args: object.spec.map(|s| s.args).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WatchedObject {
    #[serde(default)]
    metadata: WatchedMetadata,
    #[serde(default)]
    spec: Option<WatchedSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchedMetadata {
    name: Option<String>,
    resource_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WatchedSpec {
    #[serde(default)]
    args: Vec<String>,
}

/// Apply request carried by `spec.args`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Root alveolus; auto mode when absent
    pub alveolus: Option<String>,
    pub version: Option<String>,
    /// Default namespace for objects without one
    pub namespace: Option<String>,
    pub excludes: Vec<String>,
    /// Every other `--key value` pair
    pub placeholders: Placeholders,
}

impl RunArgs {
    /// Parse `--key value` and `--key=value` pairs; a flag followed by
    /// another flag (or nothing) is `true`
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = Self::default();
        let mut iter = args.iter().peekable();

        while let Some(arg) = iter.next() {
            let Some(flag) = arg.strip_prefix("--") else {
                return Err(OperatorError::InvalidArgs(format!(
                    "expected --key, got '{}'",
                    arg
                )));
            };
            let (key, value) = match flag.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => {
                    let value = match iter.peek() {
                        Some(next) if !next.starts_with("--") => iter.next().cloned().unwrap_or_default(),
                        _ => "true".to_string(),
                    };
                    (flag.to_string(), value)
                }
            };
            if key.is_empty() {
                return Err(OperatorError::InvalidArgs("empty flag name".to_string()));
            }

            match key.as_str() {
                "alveolus" => parsed.alveolus = Some(value),
                "version" => parsed.version = Some(value),
                "namespace" => parsed.namespace = Some(value),
                "exclude" => parsed.excludes.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                _ => {
                    parsed.placeholders.insert(key, value);
                }
            }
        }

        Ok(parsed)
    }
}
