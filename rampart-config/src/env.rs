// Environment variable loading

use crate::merge::insert_path;
use serde_json::{Map, Value};
use std::env;

/// Default prefix for Rampart variables.
pub const DEFAULT_PREFIX: &str = "RAMPART";

/// Separator between path segments, and between the prefix and the path.
pub const SEPARATOR: &str = "__";

/// Environment variable loader
///
/// `RAMPART__PROFILES__AI__RETRY__MAX_ATTEMPTS=5` becomes
/// `{"profiles": {"ai": {"retry": {"max_attempts": 5}}}}`. Segments are
/// lowercased; values are parsed as JSON when they parse, and kept as
/// strings otherwise.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Load the matching variables of the process environment
    pub fn load(&self) -> Value {
        self.load_from(env::vars())
    }

    /// Load the matching variables out of `vars`
    pub fn load_from<I, K, V>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut root = Map::new();
        for (key, value) in vars {
            if let Some(path) = self.path_of(key.as_ref()) {
                insert_path(&mut root, &path, parse_value(value.as_ref()));
            }
        }
        Value::Object(root)
    }

    /// Config path for a variable name, or `None` if the variable is not ours.
    fn path_of(&self, key: &str) -> Option<Vec<String>> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix(SEPARATOR)?;
        let path: Vec<String> = rest.split(SEPARATOR).map(str::to_lowercase).collect();

        if path.iter().any(|segment| segment.is_empty()) {
            return None;
        }
        Some(path)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_paths() {
        let loader = EnvLoader::default();
        let value = loader.load_from([
            ("RAMPART__PROFILES__AI__RETRY__MAX_ATTEMPTS", "5"),
            ("RAMPART__PROFILES__AI__TIMEOUT_MS", "1500"),
            ("RAMPART__LOGGING__LEVEL", "debug"),
        ]);

        assert_eq!(
            value,
            json!({
                "profiles": {"ai": {"retry": {"max_attempts": 5}, "timeout_ms": 1500}},
                "logging": {"level": "debug"}
            })
        );
    }

    #[test]
    fn test_value_parsing() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("0.25"), json!(0.25));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value(r#"["transient","timeout"]"#), json!(["transient", "timeout"]));
        assert_eq!(parse_value("fixed"), json!("fixed"));
    }

    #[test]
    fn test_foreign_variables_ignored() {
        let loader = EnvLoader::default();
        let value = loader.load_from([
            ("PATH", "/usr/bin"),
            ("RAMPART_SINGLE", "1"),
            ("RAMPARTX__A", "1"),
            ("RAMPART__", "1"),
            ("RAMPART__A____B", "1"),
        ]);

        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_custom_prefix() {
        let loader = EnvLoader::new("MYAPP");
        assert_eq!(loader.prefix(), "MYAPP");

        let value = loader.load_from([
            ("MYAPP__PROFILES__DB__TIMEOUT_MS", "100"),
            ("RAMPART__PROFILES__DB__TIMEOUT_MS", "200"),
        ]);
        assert_eq!(value["profiles"]["db"]["timeout_ms"], 100);
    }
}
