//! Evaluation of await conditions against observed objects

use apiary_core::{AwaitCondition, AwaitConditionType, AwaitConditions, ConditionOperator, PointerOperator};
use serde_json::Value;

/// Evaluate a group against the observed object (`None` when absent)
pub fn group_satisfied(group: &AwaitConditions, object: Option<&Value>) -> bool {
    let Some(object) = object else {
        return false;
    };
    if group.conditions.is_empty() {
        return true;
    }
    match group.operator {
        ConditionOperator::All => group.conditions.iter().all(|c| condition_satisfied(c, object)),
        ConditionOperator::Any => group.conditions.iter().any(|c| condition_satisfied(c, object)),
    }
}

pub fn condition_satisfied(condition: &AwaitCondition, object: &Value) -> bool {
    match condition.kind {
        AwaitConditionType::JsonPointer => {
            pointer_matches(object.pointer(&condition.pointer), condition.operator_type, &condition.value)
        }
        AwaitConditionType::StatusCondition => {
            let expected = if condition.value.is_empty() {
                "True"
            } else {
                condition.value.as_str()
            };
            status_condition(object, &condition.condition_type) == Some(expected)
        }
        AwaitConditionType::Ready => is_ready(object),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pointer_matches(found: Option<&Value>, operator: PointerOperator, expected: &str) -> bool {
    match (operator, found) {
        (PointerOperator::Exists, found) => found.is_some(),
        (PointerOperator::Missing, found) => found.is_none(),
        (PointerOperator::NotEquals | PointerOperator::NotEqualsIgnoreCase, None) => true,
        (_, None) => false,
        (PointerOperator::Equals, Some(v)) => as_text(v) == expected,
        (PointerOperator::NotEquals, Some(v)) => as_text(v) != expected,
        (PointerOperator::EqualsIgnoreCase, Some(v)) => as_text(v).eq_ignore_ascii_case(expected),
        (PointerOperator::NotEqualsIgnoreCase, Some(v)) => !as_text(v).eq_ignore_ascii_case(expected),
        (PointerOperator::Contains, Some(v)) => as_text(v).contains(expected),
    }
}

/// `status` of the `/status/conditions` entry with the given `type`
pub fn status_condition<'a>(object: &'a Value, condition_type: &str) -> Option<&'a str> {
    object
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))?
        .get("status")
        .and_then(Value::as_str)
}

fn int_at(object: &Value, pointer: &str) -> Option<i64> {
    object.pointer(pointer).and_then(Value::as_i64)
}

/// Built-in readiness heuristic per kind
pub fn is_ready(object: &Value) -> bool {
    let kind = object.get("kind").and_then(Value::as_str).unwrap_or_default();
    let generation_observed = match (int_at(object, "/metadata/generation"), int_at(object, "/status/observedGeneration")) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    };

    match kind {
        "Deployment" | "StatefulSet" | "ReplicaSet" => {
            let desired = int_at(object, "/spec/replicas").unwrap_or(1);
            let ready = int_at(object, "/status/readyReplicas").unwrap_or(0);
            generation_observed && ready >= desired
        }
        "DaemonSet" => {
            let desired = int_at(object, "/status/desiredNumberScheduled").unwrap_or(0);
            let ready = int_at(object, "/status/numberReady").unwrap_or(0);
            generation_observed && ready >= desired
        }
        "Job" => int_at(object, "/status/succeeded").unwrap_or(0) >= 1,
        "Pod" => match object.pointer("/status/phase").and_then(Value::as_str) {
            Some("Succeeded") => true,
            Some("Running") => status_condition(object, "Ready") == Some("True"),
            _ => false,
        },
        "PersistentVolumeClaim" => object.pointer("/status/phase").and_then(Value::as_str) == Some("Bound"),
        "CustomResourceDefinition" => status_condition(object, "Established") == Some("True"),
        _ => match status_condition(object, "Ready") {
            Some(status) => status == "True",
            None => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pointer(pointer: &str, operator: PointerOperator, value: &str) -> AwaitCondition {
        AwaitCondition {
            kind: AwaitConditionType::JsonPointer,
            pointer: pointer.to_string(),
            operator_type: operator,
            value: value.to_string(),
            condition_type: String::new(),
        }
    }

    #[test]
    fn test_pointer_operators() {
        let obj = json!({"status": {"phase": "Running", "replicas": 3}});
        assert!(condition_satisfied(&pointer("/status/phase", PointerOperator::Equals, "Running"), &obj));
        assert!(condition_satisfied(&pointer("/status/replicas", PointerOperator::Equals, "3"), &obj));
        assert!(condition_satisfied(&pointer("/status/phase", PointerOperator::EqualsIgnoreCase, "running"), &obj));
        assert!(condition_satisfied(&pointer("/status/phase", PointerOperator::NotEquals, "Pending"), &obj));
        assert!(!condition_satisfied(&pointer("/status/phase", PointerOperator::NotEqualsIgnoreCase, "RUNNING"), &obj));
        assert!(condition_satisfied(&pointer("/status/phase", PointerOperator::Contains, "Run"), &obj));
        assert!(condition_satisfied(&pointer("/status/phase", PointerOperator::Exists, ""), &obj));
        assert!(condition_satisfied(&pointer("/status/ip", PointerOperator::Missing, ""), &obj));
        assert!(!condition_satisfied(&pointer("/status/ip", PointerOperator::Equals, ""), &obj));
        assert!(condition_satisfied(&pointer("/status/ip", PointerOperator::NotEquals, "x"), &obj));
    }

    #[test]
    fn test_status_condition() {
        let obj = json!({"status": {"conditions": [
            {"type": "Available", "status": "True"},
            {"type": "Progressing", "status": "False"}
        ]}});
        let mut cond = AwaitCondition {
            kind: AwaitConditionType::StatusCondition,
            condition_type: "Available".to_string(),
            ..Default::default()
        };
        assert!(condition_satisfied(&cond, &obj));
        cond.condition_type = "Progressing".to_string();
        assert!(!condition_satisfied(&cond, &obj));
        cond.value = "False".to_string();
        assert!(condition_satisfied(&cond, &obj));
    }

    #[test]
    fn test_group_operators() {
        let obj = json!({"status": {"phase": "Running"}});
        let mut group = AwaitConditions {
            command: "apply".to_string(),
            operator: ConditionOperator::All,
            conditions: vec![
                pointer("/status/phase", PointerOperator::Equals, "Running"),
                pointer("/status/phase", PointerOperator::Equals, "Pending"),
            ],
        };
        assert!(!group_satisfied(&group, Some(&obj)));
        group.operator = ConditionOperator::Any;
        assert!(group_satisfied(&group, Some(&obj)));
        assert!(!group_satisfied(&group, None));
    }

    #[test]
    fn test_ready_heuristics() {
        let deploy = json!({
            "kind": "Deployment",
            "metadata": {"generation": 2},
            "spec": {"replicas": 3},
            "status": {"observedGeneration": 2, "readyReplicas": 3}
        });
        assert!(is_ready(&deploy));

        let stale = json!({
            "kind": "Deployment",
            "metadata": {"generation": 3},
            "spec": {"replicas": 3},
            "status": {"observedGeneration": 2, "readyReplicas": 3}
        });
        assert!(!is_ready(&stale));

        let job = json!({"kind": "Job", "status": {"succeeded": 1}});
        assert!(is_ready(&job));

        let pod = json!({"kind": "Pod", "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "False"}]}});
        assert!(!is_ready(&pod));

        let cm = json!({"kind": "ConfigMap"});
        assert!(is_ready(&cm));
    }
}
