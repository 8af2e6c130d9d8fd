//! Descriptor rendering: interpolation, conversion to JSON documents, then patches

use apiary_core::{DescriptorFormat, PlanEntry, RawDescriptor};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::interpolate::Interpolator;
use crate::lookup::{ConfigLookup, LayeredConfig, MapLayer};
use crate::patch;

/// Values shared by every descriptor of a run
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub execution_id: String,
}

impl RenderContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
        }
    }

    /// Built-in placeholders for one plan entry
    pub fn builtins(&self, entry: &PlanEntry) -> MapLayer {
        MapLayer::new()
            .with("executionId", self.execution_id.as_str())
            .with("alveolus.name", entry.alveolus.name.as_str())
            .with("alveolus.version", entry.alveolus.version.as_deref().unwrap_or(""))
            .with("descriptor.name", entry.descriptor.name.as_str())
    }
}

/// Renders plan entries against a global lookup chain
pub struct DescriptorRenderer<'a> {
    context: RenderContext,
    global: &'a dyn ConfigLookup,
}

impl<'a> DescriptorRenderer<'a> {
    /// `global` holds the configuration and environment layers, in that order
    pub fn new(context: RenderContext, global: &'a dyn ConfigLookup) -> Self {
        Self { context, global }
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    /// Render a descriptor into the Kubernetes objects it declares.
    ///
    /// YAML streams may hold several documents; `kind: List` objects are
    /// flattened into their items. The entry's patches then apply to every
    /// object, in order.
    pub fn render(&self, entry: &PlanEntry, raw: &RawDescriptor) -> Result<Vec<Value>> {
        let lookup = LayeredConfig::new()
            .push(self.context.builtins(entry))
            .push(entry.placeholders.iter().collect::<MapLayer>())
            .push(self.global);
        let interpolator = Interpolator::new(&lookup);

        let text = if entry.descriptor.interpolate {
            interpolator.interpolate(&raw.name, &raw.content)?
        } else {
            raw.content.clone()
        };

        let documents = parse_documents(&text, raw.format)?;
        let mut objects = Vec::new();
        for document in documents {
            flatten_into(document, &mut objects);
        }

        for entry_patch in &entry.patches {
            let operations: Value = if entry_patch.interpolate {
                let source = format!("{} (patch {})", raw.name, entry_patch.descriptor_name);
                let text = interpolator.interpolate(&source, &serde_json::to_string(&entry_patch.patch)?)?;
                serde_json::from_str(&text)?
            } else {
                entry_patch.patch.clone()
            };
            let operations = operations.as_array().map(Vec::as_slice).unwrap_or(&[]);
            for object in &mut objects {
                patch::apply(object, operations).map_err(|message| EngineError::InvalidPatch {
                    descriptor: raw.name.clone(),
                    message,
                })?;
            }
        }

        for object in &objects {
            if !object.is_object() || object.get("kind").and_then(Value::as_str).is_none() {
                return Err(EngineError::InvalidDescriptor {
                    descriptor: raw.name.clone(),
                    message: "every document must be an object with a `kind`".to_string(),
                });
            }
        }

        tracing::debug!(descriptor = %raw.name, objects = objects.len(), "rendered descriptor");
        Ok(objects)
    }
}

fn parse_documents(text: &str, format: DescriptorFormat) -> Result<Vec<Value>> {
    match format {
        DescriptorFormat::Json => Ok(vec![serde_json::from_str(text)?]),
        DescriptorFormat::Yaml => {
            let mut documents = Vec::new();
            for document in serde_yaml::Deserializer::from_str(text) {
                let value = Value::deserialize(document)?;
                if !value.is_null() {
                    documents.push(value);
                }
            }
            Ok(documents)
        }
    }
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|v| flatten_into(v, out)),
        Value::Object(mut map)
            if map.get("kind").and_then(Value::as_str) == Some("List") && map.contains_key("items") =>
        {
            if let Some(Value::Array(items)) = map.remove("items") {
                items.into_iter().for_each(|v| flatten_into(v, out));
            }
        }
        other => out.push(other),
    }
}
