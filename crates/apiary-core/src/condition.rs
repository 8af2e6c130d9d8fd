//! `includeIf` conditions for dependencies and descriptors

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::manifest::ConditionOperator;

/// Snapshot of the environment conditions are evaluated against
pub type Environment = HashMap<String, String>;

/// Source of a condition value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionKind {
    #[default]
    Env,
}

/// A single `key == value` check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type", default)]
    pub kind: ConditionKind,

    pub key: String,

    #[serde(default = "default_expected")]
    pub value: String,

    #[serde(default)]
    pub negate: bool,
}

fn default_expected() -> String {
    "true".to_string()
}

impl Condition {
    pub fn test(&self, env: &Environment) -> bool {
        let matched = match self.kind {
            ConditionKind::Env => env.get(&self.key).is_some_and(|v| v == &self.value),
        };
        matched != self.negate
    }
}

/// Group of conditions combined with `all` / `any`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conditions {
    #[serde(default)]
    pub operator: ConditionOperator,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Conditions {
    /// Empty groups always pass
    pub fn test(&self, env: &Environment) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.operator {
            ConditionOperator::All => self.conditions.iter().all(|c| c.test(env)),
            ConditionOperator::Any => self.conditions.iter().any(|c| c.test(env)),
        }
    }
}

/// Evaluate an optional `includeIf` block
pub fn is_included(include_if: Option<&Conditions>, env: &Environment) -> bool {
    include_if.is_none_or(|c| c.test(env))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cond(key: &str, value: &str, negate: bool) -> Condition {
        Condition {
            kind: ConditionKind::Env,
            key: key.to_string(),
            value: value.to_string(),
            negate,
        }
    }

    #[test]
    fn test_single_condition() {
        let env = env(&[("MONITORING", "true")]);
        assert!(cond("MONITORING", "true", false).test(&env));
        assert!(!cond("MONITORING", "true", true).test(&env));
        assert!(!cond("MISSING", "true", false).test(&env));
        assert!(cond("MISSING", "true", true).test(&env));
    }

    #[test]
    fn test_all_and_any() {
        let env = env(&[("A", "true"), ("B", "false")]);
        let mut group = Conditions {
            operator: ConditionOperator::All,
            conditions: vec![cond("A", "true", false), cond("B", "true", false)],
        };
        assert!(!group.test(&env));

        group.operator = ConditionOperator::Any;
        assert!(group.test(&env));
    }

    #[test]
    fn test_absent_include_if_passes() {
        assert!(is_included(None, &Environment::new()));
        assert!(is_included(Some(&Conditions::default()), &Environment::new()));
    }

    #[test]
    fn test_parse_default_value() {
        let parsed: Conditions =
            serde_yaml::from_str("conditions:\n  - key: FEATURE_X\n").unwrap();
        assert_eq!(parsed.conditions[0].value, "true");
        assert_eq!(parsed.operator, ConditionOperator::All);
    }
}
