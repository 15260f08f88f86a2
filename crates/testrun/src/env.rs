//! Pass selected process environment variables through to the resource spec

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Default pattern selecting Terraform input variables
pub const DEFAULT_ENV_PATTERN: &str = "^TF_VAR_";

#[derive(Debug, Clone)]
pub struct EnvPassthrough {
    pattern: Regex,
    overrides: BTreeMap<String, String>,
}

impl EnvPassthrough {
    /// `overrides` are `NAME=VALUE` pairs that win over the process environment
    pub fn new(pattern: &str, overrides: &[String]) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Validation(format!("invalid env pattern {pattern:?}: {e}")))?;
        let mut parsed = BTreeMap::new();
        for entry in overrides {
            let Some((name, value)) = entry.split_once('=') else {
                return Err(Error::Validation(format!(
                    "invalid --env {entry:?}, expected NAME=VALUE"
                )));
            };
            if name.trim().is_empty() {
                return Err(Error::Validation(format!("invalid --env {entry:?}, empty name")));
            }
            parsed.insert(name.trim().to_string(), value.to_string());
        }
        Ok(Self {
            pattern,
            overrides: parsed,
        })
    }

    /// Variables from `vars` whose name matches the pattern, plus the overrides
    pub fn collect<I>(&self, vars: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut selected: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(name, _)| self.pattern.is_match(name))
            .collect();
        selected.extend(self.overrides.clone());
        selected
    }

    /// Add `vars` to `spec.env` without touching names the template already sets.
    ///
    /// `spec.env` may be a list of `{name, value}` or a map; a missing one is
    /// created as a list. Returns the names that were added.
    pub fn merge_into(&self, spec: &mut Value, vars: &BTreeMap<String, String>) -> Result<Vec<String>> {
        let Some(spec) = spec.as_object_mut() else {
            return Err(Error::Validation("resource spec is not an object".to_string()));
        };
        let env = spec
            .entry("env")
            .or_insert_with(|| Value::Array(Vec::new()));
        if env.is_null() {
            *env = Value::Array(Vec::new());
        }

        let mut added = Vec::new();
        match env {
            Value::Array(items) => {
                let existing: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                for (name, value) in vars {
                    if existing.contains(name) {
                        debug!(name = %name, "Template already sets variable");
                        continue;
                    }
                    items.push(json!({ "name": name, "value": value }));
                    added.push(name.clone());
                }
            }
            Value::Object(map) => {
                add_to_map(map, vars, &mut added);
            }
            _ => {
                return Err(Error::Validation(
                    "spec.env must be a list or a map".to_string(),
                ))
            }
        }
        Ok(added)
    }
}

fn add_to_map(map: &mut Map<String, Value>, vars: &BTreeMap<String, String>, added: &mut Vec<String>) {
    for (name, value) in vars {
        if map.contains_key(name) {
            continue;
        }
        map.insert(name.clone(), Value::String(value.clone()));
        added.push(name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vec<(String, String)> {
        vec![
            ("TF_VAR_cluster_name".to_string(), "from-env".to_string()),
            ("TF_VAR_region".to_string(), "us-east1".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]
    }

    #[test]
    fn collects_matching_vars_and_overrides() {
        let env = EnvPassthrough::new(DEFAULT_ENV_PATTERN, &["TF_VAR_region=eu-west1".to_string()])
            .unwrap();
        let selected = env.collect(vars());
        assert_eq!(selected.len(), 2);
        assert_eq!(selected["TF_VAR_region"], "eu-west1");
        assert!(!selected.contains_key("HOME"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(EnvPassthrough::new("(", &[]).is_err());
        assert!(EnvPassthrough::new(DEFAULT_ENV_PATTERN, &["NOVALUE".to_string()]).is_err());
        assert!(EnvPassthrough::new(DEFAULT_ENV_PATTERN, &["=x".to_string()]).is_err());
    }

    #[test]
    fn merge_keeps_template_values() {
        let env = EnvPassthrough::new(DEFAULT_ENV_PATTERN, &[]).unwrap();
        let mut spec = json!({
            "env": [{ "name": "TF_VAR_cluster_name", "value": "from-template" }]
        });
        let added = env.merge_into(&mut spec, &env.collect(vars())).unwrap();

        assert_eq!(added, vec!["TF_VAR_region"]);
        assert_eq!(
            spec["env"],
            json!([
                { "name": "TF_VAR_cluster_name", "value": "from-template" },
                { "name": "TF_VAR_region", "value": "us-east1" },
            ])
        );
    }

    #[test]
    fn merge_creates_or_extends_env() {
        let env = EnvPassthrough::new(DEFAULT_ENV_PATTERN, &[]).unwrap();
        let selected = env.collect(vars());

        let mut spec = json!({});
        env.merge_into(&mut spec, &selected).unwrap();
        assert_eq!(spec["env"].as_array().map(Vec::len), Some(2));

        let mut spec = json!({ "env": { "TF_VAR_region": "asia" } });
        env.merge_into(&mut spec, &selected).unwrap();
        assert_eq!(spec["env"]["TF_VAR_region"], "asia");
        assert_eq!(spec["env"]["TF_VAR_cluster_name"], "from-env");

        assert!(env.merge_into(&mut json!("text"), &selected).is_err());
    }
}
