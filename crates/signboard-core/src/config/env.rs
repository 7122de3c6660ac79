use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

/// Source of environment variable values for `${NAME}` placeholders.
pub trait EnvLookup: Send + Sync {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvLookup for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Replaces placeholders in every string nested anywhere inside `value`.
///
/// Unresolved names are appended to `missing`; their placeholders are left
/// in place.
pub(crate) fn resolve_value(value: &mut Value, env: &dyn EnvLookup, missing: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            if let Some(expanded) = expand(text, env, missing) {
                *text = expanded;
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_value(item, env, missing);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                resolve_value(item, env, missing);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Expands `${NAME}` occurrences. Returns `None` when `input` has none.
///
/// Text that does not form a valid placeholder (`$`, `${`, `${}`, or an
/// invalid name) is copied verbatim.
pub(crate) fn expand(input: &str, env: &dyn EnvLookup, missing: &mut Vec<String>) -> Option<String> {
    if !input.contains("${") {
        return None;
    }

    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if is_variable_name(&after[..end]) => {
                let name = &after[..end];
                match env.lookup(name) {
                    Some(resolved) => output.push_str(&resolved),
                    None => {
                        if !missing.iter().any(|known| known == name) {
                            missing.push(name.to_owned());
                        }
                        output.push_str(&rest[start..start + end + 3]);
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                output.push_str("${");
                rest = after;
            }
        }
    }
    output.push_str(rest);
    Some(output)
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn expands_embedded_placeholders() {
        let env = env(&[("HOST", "example.org"), ("PORT", "8080")]);
        let mut missing = Vec::new();

        let expanded = expand("https://${HOST}:${PORT}/v1", &env, &mut missing);

        assert_eq!(expanded.as_deref(), Some("https://example.org:8080/v1"));
        assert!(missing.is_empty());
    }

    #[test]
    fn leaves_plain_strings_untouched() {
        let mut missing = Vec::new();
        assert_eq!(expand("no placeholders $HOME", &env(&[]), &mut missing), None);
    }

    #[test]
    fn malformed_placeholders_are_copied_verbatim() {
        let mut missing = Vec::new();
        let expanded = expand("cost ${} and ${1X} and ${open", &env(&[]), &mut missing);

        assert_eq!(expanded.as_deref(), Some("cost ${} and ${1X} and ${open"));
        assert!(missing.is_empty());
    }

    #[test]
    fn collects_each_missing_name_once_across_nested_values() {
        let env = env(&[("TOKEN", "t0k")]);
        let mut value = json!({
            "headers": {"auth": "Bearer ${TOKEN}"},
            "stops": ["${STOP_A}", "${STOP_B}", "${STOP_A}"],
            "limit": 5
        });
        let mut missing = Vec::new();

        resolve_value(&mut value, &env, &mut missing);

        assert_eq!(value["headers"]["auth"], "Bearer t0k");
        assert_eq!(missing, vec!["STOP_A".to_owned(), "STOP_B".to_owned()]);
        assert_eq!(value["limit"], 5);
    }
}
