//! Layered key/value lookup feeding the interpolator
//!
//! Precedence, first match wins:
//! 1. built-in values of the current render (`alveolus.name`, `executionId`, ...)
//! 2. alveolus placeholders (defaults plus dependency overrides)
//! 3. global configuration placeholders
//! 4. environment variables

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Read-only string lookup
pub trait ConfigLookup: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Known keys, used for suggestions
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A plain in-memory layer
#[derive(Debug, Clone, Default)]
pub struct MapLayer(BTreeMap<String, String>);

impl MapLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for MapLayer
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl ConfigLookup for MapLayer {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }
}

/// Environment variables, captured once.
///
/// A key is looked up verbatim first, then in its `UPPER_SNAKE` form
/// (`db.host` also matches `DB_HOST`).
#[derive(Debug, Clone, Default)]
pub struct EnvLayer {
    vars: HashMap<String, String>,
}

impl EnvLayer {
    /// Snapshot of the process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }
}

fn normalize_env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl ConfigLookup for EnvLayer {
    fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .or_else(|| self.vars.get(&normalize_env_key(key)))
            .cloned()
    }
}

/// Ordered chain of layers
#[derive(Default)]
pub struct LayeredConfig<'a> {
    layers: Vec<Box<dyn ConfigLookup + 'a>>,
}

impl<'a> LayeredConfig<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer with lower precedence than the existing ones
    pub fn push(mut self, layer: impl ConfigLookup + 'a) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigLookup for LayeredConfig<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.layers.iter().flat_map(|l| l.keys()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

impl<T: ConfigLookup + ?Sized> ConfigLookup for &T {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn keys(&self) -> Vec<String> {
        (**self).keys()
    }
}

impl<T: ConfigLookup + ?Sized> ConfigLookup for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn keys(&self) -> Vec<String> {
        (**self).keys()
    }
}
