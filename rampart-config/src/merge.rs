// Value tree merging

use serde_json::{Map, Value};

/// Merge `overlay` into `base`.
///
/// Tables merge key by key; any other overlay value replaces what was there.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => merge_tables(base_map, overlay_map),
        (base, overlay) => *base = overlay,
    }
}

pub(crate) fn merge_tables(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

/// Set the value at `path`, creating intermediate tables as needed.
///
/// A scalar in the way of a nested key is replaced by a table.
pub(crate) fn insert_path(root: &mut Map<String, Value>, path: &[String], value: Value) {
    match path {
        [] => {}
        [last] => {
            root.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let child = root
                .entry(first.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

/// Look up a dotted path such as `profiles.ai.timeout_ms`.
pub(crate) fn get_path<'a>(root: &'a Map<String, Value>, dotted: &str) -> Option<&'a Value> {
    let mut segments = dotted.split('.');
    let first = root.get(segments.next()?)?;
    segments.try_fold(first, |node, segment| node.as_object()?.get(segment))
}

pub(crate) fn split_path(dotted: &str) -> Vec<String> {
    dotted.split('.').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_tables() {
        let mut base = json!({
            "profiles": {"ai": {"timeout_ms": 30000, "retry": {"max_attempts": 3}}},
            "logging": {"level": "info"}
        });
        deep_merge(
            &mut base,
            json!({"profiles": {"ai": {"retry": {"max_attempts": 5}}, "db": {"timeout_ms": 50}}}),
        );

        assert_eq!(
            base,
            json!({
                "profiles": {
                    "ai": {"timeout_ms": 30000, "retry": {"max_attempts": 5}},
                    "db": {"timeout_ms": 50}
                },
                "logging": {"level": "info"}
            })
        );
    }

    #[test]
    fn test_deep_merge_replaces_non_tables() {
        let mut base = json!({"retry_on": ["transient", "timeout"], "jitter": 0.1});
        deep_merge(&mut base, json!({"retry_on": ["fatal"], "jitter": {"nested": true}}));

        assert_eq!(base, json!({"retry_on": ["fatal"], "jitter": {"nested": true}}));
    }

    #[test]
    fn test_insert_and_get_path() {
        let mut root = Map::new();
        root.insert("profiles".to_string(), json!("scalar"));
        insert_path(&mut root, &split_path("profiles.ai.timeout_ms"), json!(10));

        assert_eq!(get_path(&root, "profiles.ai.timeout_ms"), Some(&json!(10)));
        assert_eq!(get_path(&root, "profiles.ai.missing"), None);
        assert_eq!(get_path(&root, "profiles.ai.timeout_ms.deeper"), None);
    }
}
