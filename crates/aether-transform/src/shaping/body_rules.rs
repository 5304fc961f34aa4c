use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ShapingError;

/// Top-level keys no rule may touch.
pub const PROTECTED_KEYS: &[&str] = &["model", "stream"];

/// One rewrite of a JSON request body. Paths are dot separated; `\.` is a
/// literal dot inside a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BodyRule {
    Set { path: String, value: Value },
    Drop { path: String },
    Rename { from: String, to: String },
}

pub fn parse_body_rules(raw: &Value) -> Result<Vec<BodyRule>, ShapingError> {
    if !raw.is_array() {
        return Err(ShapingError::NotAList);
    }
    Ok(Vec::<BodyRule>::deserialize(raw)?)
}

/// Applies `rules` in order to a copy of `body`.
///
/// Rules with malformed paths or paths rooted at a protected key are
/// skipped. Non-object intermediates on a `set` path are replaced by objects.
pub fn apply_body_rules(body: &Value, rules: &[BodyRule]) -> Value {
    let mut out = body.clone();
    let Some(root) = out.as_object_mut() else {
        return out;
    };

    for rule in rules {
        match rule {
            BodyRule::Set { path, value } => match parse_path(path) {
                Some(segments) => set_path(root, &segments, value.clone()),
                None => skip(rule),
            },
            BodyRule::Drop { path } => match parse_path(path) {
                Some(segments) => {
                    take_path(root, &segments);
                }
                None => skip(rule),
            },
            BodyRule::Rename { from, to } => match (parse_path(from), parse_path(to)) {
                (Some(from), Some(to)) => {
                    if let Some(value) = take_path(root, &from) {
                        set_path(root, &to, value);
                    }
                }
                _ => skip(rule),
            },
        }
    }

    out
}

fn skip(rule: &BodyRule) {
    debug!(?rule, "body rule skipped");
}

/// `None` for empty segments or a protected root key.
fn parse_path(path: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => {
                if current.is_empty() {
                    return None;
                }
                segments.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    if current.is_empty() {
        return None;
    }
    segments.push(current);

    if PROTECTED_KEYS.contains(&segments[0].as_str()) {
        return None;
    }
    Some(segments)
}

fn set_path(root: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut node = root;
    for key in parents {
        let entry = node
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        node = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    node.insert(last.clone(), value);
}

fn take_path(root: &mut Map<String, Value>, segments: &[String]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let mut node = root;
    for key in parents {
        node = node.get_mut(key)?.as_object_mut()?;
    }
    node.remove(last)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rules(raw: Value) -> Vec<BodyRule> {
        parse_body_rules(&raw).unwrap()
    }

    #[test]
    fn set_creates_nested_objects() {
        let out = apply_body_rules(
            &json!({"a": 1}),
            &rules(json!([{"action": "set", "path": "b.c.d", "value": 42}])),
        );
        assert_eq!(out, json!({"a": 1, "b": {"c": {"d": 42}}}));
    }

    #[test]
    fn drop_and_rename_nested_values() {
        let out = apply_body_rules(
            &json!({"a": {"b": {"c": 1, "d": 2}}}),
            &rules(json!([{"action": "drop", "path": "a.b.c"}])),
        );
        assert_eq!(out, json!({"a": {"b": {"d": 2}}}));

        let out = apply_body_rules(
            &json!({"old": {"nested": "value"}}),
            &rules(json!([{"action": "rename", "from": "old.nested", "to": "new.path"}])),
        );
        assert_eq!(out, json!({"old": {}, "new": {"path": "value"}}));
    }

    #[test]
    fn protected_keys_only_apply_at_top_level() {
        let out = apply_body_rules(
            &json!({"model": "gpt-4", "extra": {"model": "ignored"}}),
            &rules(json!([
                {"action": "set", "path": "model.sub", "value": "x"},
                {"action": "drop", "path": "stream"},
                {"action": "set", "path": "extra.model", "value": "y"}
            ])),
        );
        assert_eq!(out, json!({"model": "gpt-4", "extra": {"model": "y"}}));
    }

    #[test]
    fn escaped_dots_stay_in_the_key() {
        let out = apply_body_rules(
            &json!({}),
            &rules(json!([{"action": "set", "path": "config\\.v1.enabled", "value": true}])),
        );
        assert_eq!(out, json!({"config.v1": {"enabled": true}}));
    }

    #[test]
    fn malformed_paths_are_ignored() {
        let out = apply_body_rules(
            &json!({"a": 1}),
            &rules(json!([
                {"action": "set", "path": ".b", "value": 2},
                {"action": "set", "path": "c..d", "value": 3},
                {"action": "drop", "path": "e.", "value": null},
                {"action": "rename", "from": "x..y", "to": "z", "value": null}
            ])),
        );
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn non_object_intermediate_is_overwritten() {
        let out = apply_body_rules(
            &json!({"a": 1}),
            &rules(json!([{"action": "set", "path": "a.b", "value": 2}])),
        );
        assert_eq!(out, json!({"a": {"b": 2}}));
    }

    #[test]
    fn input_body_is_left_alone() {
        let body = json!({"a": {"b": 1}});
        let out = apply_body_rules(
            &body,
            &rules(json!([{"action": "set", "path": "a.c", "value": [1, 2]}])),
        );
        assert_eq!(out, json!({"a": {"b": 1, "c": [1, 2]}}));
        assert_eq!(body, json!({"a": {"b": 1}}));
    }

    #[test]
    fn rejects_non_list_and_unknown_actions() {
        assert!(matches!(
            parse_body_rules(&json!({"action": "set"})),
            Err(ShapingError::NotAList)
        ));
        assert!(matches!(
            parse_body_rules(&json!([{"action": "explode", "path": "a"}])),
            Err(ShapingError::InvalidRule(_))
        ));
    }
}
