use log::{debug, error};
use regex::Regex;
use serde_json::{Map, Value};
use crate::infra::Resource;
use crate::threatdb::types::{display_value, Condition, ConditionOperator, Logic, LogicGroup};

static NULL: Value = Value::Null;

/// Walk a dot path through maps and sequences.
///
/// Sequence segments are integer indexes. A missing key, a bad index, a
/// scalar in the middle of the path, or an explicit null all resolve to `None`.
pub fn resolve_path<'v>(data: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = data;

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(array_index(segment, items.len())?)?,
            _ => return None,
        };
        if current.is_null() {
            return None;
        }
    }

    Some(current)
}

/// Negative indexes count back from the end of the list.
fn array_index(segment: &str, len: usize) -> Option<usize> {
    let index: i64 = segment.parse().ok()?;
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        len.checked_sub(usize::try_from(index.unsigned_abs()).ok()?)
    }
}

/// Equality without coercion between bools, numbers and strings.
/// Numbers compare by value so that `1` and `1.0` are equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm.iter().all(|(k, v)| ym.get(k).map_or(false, |w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Recursive key/value containment: every key of `expected` must be present
/// in `data` with an equal value, nested maps recursing.
pub fn map_contains(data: &Map<String, Value>, expected: &Value) -> bool {
    let expected = match expected {
        Value::Object(map) => map,
        _ => return false,
    };

    expected.iter().all(|(key, want)| match (data.get(key), want) {
        (None, _) => false,
        (Some(Value::Object(inner)), Value::Object(_)) => map_contains(inner, want),
        (Some(have), _) => values_equal(have, want),
    })
}

fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    display_value(value)
}

/// Evaluates conditions and logic groups against a resource document.
///
/// Evaluation is total: unknown operators, bad regexes and type mismatches
/// all yield `false` and are only logged.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        ConditionEvaluator
    }

    pub fn evaluate(&self, condition: &Condition, resource: &Resource) -> bool {
        self.evaluate_document(condition, &resource.document())
    }

    pub fn evaluate_document(&self, condition: &Condition, document: &Value) -> bool {
        let field_value = resolve_path(document, &condition.field);
        let expected = &condition.value;

        let result = match &condition.operator {
            ConditionOperator::Equals => values_equal(field_value.unwrap_or(&NULL), expected),
            ConditionOperator::NotEquals => !values_equal(field_value.unwrap_or(&NULL), expected),
            ConditionOperator::In => self.op_in(field_value, expected),
            ConditionOperator::NotIn => !expected.is_array() || !self.op_in(field_value, expected),
            ConditionOperator::Contains => self.op_contains(field_value, expected),
            ConditionOperator::NotContains => !self.op_contains(field_value, expected),
            ConditionOperator::ContainsAny => match field_value {
                Some(Value::Array(items)) => self.sequence_contains(items, expected),
                _ => false,
            },
            ConditionOperator::MapSuperset => match field_value {
                Some(Value::Object(map)) => map_contains(map, expected),
                _ => false,
            },
            ConditionOperator::Substring => match field_value {
                Some(Value::String(s)) => s.contains(&as_text(expected)),
                _ => false,
            },
            ConditionOperator::Regex => self.op_regex(field_value, expected),
            ConditionOperator::Exists => field_value.is_some(),
            ConditionOperator::NotExists => field_value.is_none(),
            ConditionOperator::GreaterThan => self.compare(field_value, expected, |a, b| a > b),
            ConditionOperator::LessThan => self.compare(field_value, expected, |a, b| a < b),
            ConditionOperator::GreaterOrEqual => self.compare(field_value, expected, |a, b| a >= b),
            ConditionOperator::LessOrEqual => self.compare(field_value, expected, |a, b| a <= b),
            ConditionOperator::Unknown(op) => {
                error!("Unknown operator: {}", op);
                false
            }
        };

        debug!(
            "Condition: {} (actual: {}) = {}",
            condition,
            field_value.map(as_text).unwrap_or_else(|| "<absent>".to_string()),
            result
        );
        result
    }

    /// Evaluate a group, recording every condition that held.
    ///
    /// All children are evaluated even once the outcome is decided, so the
    /// audit trail in `matched` is complete. A group with no children is false
    /// for both `and` and `or`.
    pub fn evaluate_group(&self, group: &LogicGroup, resource: &Resource, matched: &mut Vec<String>) -> bool {
        self.evaluate_group_document(group, &resource.document(), matched)
    }

    pub fn evaluate_group_document(&self, group: &LogicGroup, document: &Value, matched: &mut Vec<String>) -> bool {
        let mut results = Vec::with_capacity(group.conditions.len() + group.groups.len());

        for condition in &group.conditions {
            let held = self.evaluate_document(condition, document);
            if held {
                matched.push(condition.to_string());
            }
            results.push(held);
        }

        for nested in &group.groups {
            results.push(self.evaluate_group_document(nested, document, matched));
        }

        if results.is_empty() {
            return false;
        }

        match group.logic {
            Logic::And => results.iter().all(|r| *r),
            Logic::Or => results.iter().any(|r| *r),
        }
    }

    fn op_in(&self, field_value: Option<&Value>, expected: &Value) -> bool {
        match expected {
            Value::Array(items) => {
                let actual = field_value.unwrap_or(&NULL);
                items.iter().any(|item| values_equal(actual, item))
            }
            _ => false,
        }
    }

    fn sequence_contains(&self, items: &[Value], expected: &Value) -> bool {
        if expected.is_object() {
            items.iter().any(|item| match item {
                Value::Object(map) => map_contains(map, expected),
                _ => false,
            })
        } else {
            items.iter().any(|item| values_equal(item, expected))
        }
    }

    fn op_contains(&self, field_value: Option<&Value>, expected: &Value) -> bool {
        match field_value {
            Some(Value::Array(items)) => self.sequence_contains(items, expected),
            Some(Value::Object(map)) => map_contains(map, expected),
            Some(Value::String(s)) => s.contains(&as_text(expected)),
            _ => false,
        }
    }

    /// Prefix-anchored: the pattern must match starting at the first character.
    fn op_regex(&self, field_value: Option<&Value>, pattern: &Value) -> bool {
        let field_value = match field_value {
            Some(v) => v,
            None => return false,
        };
        let pattern = match pattern {
            Value::String(p) => p,
            other => {
                error!("Regex pattern must be a string, got {}", other);
                return false;
            }
        };

        match Regex::new(&format!("^(?:{})", pattern)) {
            Ok(re) => re.is_match(&as_text(field_value)),
            Err(e) => {
                error!("Invalid regex pattern '{}': {}", pattern, e);
                false
            }
        }
    }

    fn compare(&self, field_value: Option<&Value>, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
        match (as_number(field_value), as_number(Some(expected))) {
            (Some(actual), Some(wanted)) => cmp(actual, wanted),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(field: &str, op: &str, value: Value, doc: Value) -> bool {
        ConditionEvaluator::new().evaluate_document(&Condition::new(field, op, value), &doc)
    }

    #[test]
    fn test_resolve_nested_and_indexed() {
        let doc = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(resolve_path(&doc, "a.b.1.c"), Some(&json!(2)));
        assert_eq!(resolve_path(&doc, "a.b.5.c"), None);
        assert_eq!(resolve_path(&doc, "a.b.x"), None);
        assert_eq!(resolve_path(&doc, "a.b.0.c.d"), None);
        assert_eq!(resolve_path(&json!({"a": null}), "a"), None);
    }

    #[test]
    fn test_negative_index_counts_from_end() {
        let doc = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(resolve_path(&doc, "a.b.-1.c"), Some(&json!(2)));
        assert_eq!(resolve_path(&doc, "a.b.-2.c"), Some(&json!(1)));
        assert_eq!(resolve_path(&doc, "a.b.-3.c"), None);
    }

    #[test]
    fn test_equality_is_type_sensitive() {
        let doc = json!({"properties": {"enabled": true, "port": 5432, "tier": "1"}});
        assert!(eval("properties.enabled", "==", json!(true), doc.clone()));
        assert!(!eval("properties.enabled", "==", json!(1), doc.clone()));
        assert!(!eval("properties.tier", "==", json!(1), doc.clone()));
        assert!(eval("properties.port", "==", json!(5432.0), doc.clone()));
        assert!(eval("properties.tier", "!=", json!("free"), doc));
    }

    #[test]
    fn test_in_operator_region_scenario() {
        let allowed = json!(["us-east-1", "us-west-2"]);
        assert!(eval("properties.region", "in", allowed.clone(), json!({"properties": {"region": "us-east-1"}})));
        assert!(!eval("properties.region", "in", allowed.clone(), json!({"properties": {"region": "eu-west-1"}})));
        assert!(eval("properties.region", "not_in", allowed, json!({"properties": {"region": "eu-west-1"}})));
        assert!(!eval("properties.region", "in", json!("us-east-1"), json!({"properties": {"region": "us-east-1"}})));
    }

    #[test]
    fn test_not_in_with_scalar_expected_holds() {
        let doc = json!({"properties": {"region": "eu-west-1"}});
        assert!(eval("properties.region", "not_in", json!("us-east-1"), doc.clone()));
        assert!(eval("properties.region", "not_in", json!("eu-west-1"), doc.clone()));
        assert!(eval("properties.missing", "not_in", json!(["us-east-1"]), doc));
    }

    #[test]
    fn test_contains_polymorphism() {
        let doc = json!({"properties": {
            "tags": ["production", "web"],
            "authorized_networks": [{"name": "public", "value": "0.0.0.0/0"}],
            "labels": {"env": "prod", "owner": {"team": "core", "oncall": "yes"}},
            "description": "public facing bucket"
        }});

        assert!(eval("properties.tags", "contains", json!("production"), doc.clone()));
        assert!(eval("properties.authorized_networks", "contains", json!({"value": "0.0.0.0/0"}), doc.clone()));
        assert!(eval("properties.labels", "contains", json!({"owner": {"team": "core"}}), doc.clone()));
        assert!(!eval("properties.labels", "contains", json!({"owner": {"team": "edge"}}), doc.clone()));
        assert!(!eval("properties.labels", "contains", json!("env"), doc.clone()));
        assert!(eval("properties.description", "contains", json!("public"), doc.clone()));
        assert!(!eval("properties.missing", "contains", json!("x"), doc.clone()));
        assert!(eval("properties.missing", "not_contains", json!("x"), doc.clone()));
        assert!(eval("properties.tags", "not_contains", json!("staging"), doc));
    }

    #[test]
    fn test_split_contains_operators() {
        let doc = json!({"properties": {"tags": ["a"], "labels": {"env": "prod"}, "name": "prod-db"}});
        assert!(eval("properties.tags", "contains_any", json!("a"), doc.clone()));
        assert!(!eval("properties.name", "contains_any", json!("prod"), doc.clone()));
        assert!(eval("properties.labels", "map_superset", json!({"env": "prod"}), doc.clone()));
        assert!(!eval("properties.tags", "map_superset", json!({"env": "prod"}), doc.clone()));
        assert!(eval("properties.name", "substring", json!("prod"), doc.clone()));
        assert!(!eval("properties.tags", "substring", json!("a"), doc));
    }

    #[test]
    fn test_regex_is_prefix_anchored() {
        let doc = json!({"properties": {"bucket_name": "my-data-public"}});
        assert!(eval("properties.bucket_name", "regex", json!(".*-public$"), doc.clone()));
        assert!(eval("properties.bucket_name", "regex", json!("my-"), doc.clone()));
        assert!(!eval("properties.bucket_name", "regex", json!("data"), doc.clone()));
        assert!(!eval("properties.bucket_name", "regex", json!("(unclosed"), doc));
    }

    #[test]
    fn test_exists_and_not_exists_are_complements() {
        let docs = [
            json!({"properties": {"encryption": true}}),
            json!({"properties": {"encryption": null}}),
            json!({"properties": {}}),
            json!({"properties": "scalar"}),
        ];
        for doc in docs {
            let exists = eval("properties.encryption", "exists", Value::Null, doc.clone());
            let not_exists = eval("properties.encryption", "not_exists", Value::Null, doc.clone());
            assert_ne!(exists, not_exists, "document: {}", doc);
        }
        assert!(eval("properties.encryption", "exists", Value::Null, json!({"properties": {"encryption": false}})));
    }

    #[test]
    fn test_numeric_comparisons_coerce_or_fail() {
        let doc = json!({"properties": {"retention": "30", "size": 100, "name": "x"}});
        assert!(eval("properties.retention", ">", json!(7), doc.clone()));
        assert!(eval("properties.size", "<=", json!("100"), doc.clone()));
        assert!(!eval("properties.name", ">", json!(1), doc.clone()));
        assert!(!eval("properties.missing", "<", json!(1), doc));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        assert!(!eval("properties.a", "approximately", json!(1), json!({"properties": {"a": 1}})));
    }

    #[test]
    fn test_empty_groups_never_hold() {
        let evaluator = ConditionEvaluator::new();
        let doc = json!({"properties": {}});
        let mut matched = Vec::new();
        assert!(!evaluator.evaluate_group_document(&LogicGroup::all(vec![]), &doc, &mut matched));
        assert!(!evaluator.evaluate_group_document(&LogicGroup::any(vec![]), &doc, &mut matched));
    }

    #[test]
    fn test_or_group_records_every_true_condition() {
        let evaluator = ConditionEvaluator::new();
        let doc = json!({"properties": {"a": 1, "b": 2}});
        let group = LogicGroup::any(vec![
            Condition::new("properties.a", "==", json!(1)),
            Condition::new("properties.b", "==", json!(2)),
            Condition::new("properties.c", "exists", Value::Null),
        ]);

        let mut matched = Vec::new();
        assert!(evaluator.evaluate_group_document(&group, &doc, &mut matched));
        assert_eq!(matched, vec!["properties.a == 1", "properties.b == 2"]);
    }

    #[test]
    fn test_nested_groups() {
        let evaluator = ConditionEvaluator::new();
        let doc = json!({"properties": {"ipv4": true, "ssl": false}});
        let group = LogicGroup::all(vec![Condition::new("properties.ipv4", "==", json!(true))])
            .with_group(LogicGroup::any(vec![
                Condition::new("properties.ssl", "==", json!(false)),
                Condition::new("properties.ssl", "not_exists", Value::Null),
            ]));

        let mut matched = Vec::new();
        assert!(evaluator.evaluate_group_document(&group, &doc, &mut matched));
        assert_eq!(matched.len(), 2);

        let strict = group.clone().with_group(LogicGroup::all(vec![]));
        assert!(!evaluator.evaluate_group_document(&strict, &doc, &mut Vec::new()));
    }
}
