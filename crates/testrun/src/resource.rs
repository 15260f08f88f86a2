//! Typed view over a test resource record stored as a `DynamicObject`

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::warn;

use crate::labels::{
    is_truthy, ANNOTATION_BUILD_NUMBER, ANNOTATION_TEST_SOURCE, LABEL_CONTEXT, LABEL_DELETE,
    LABEL_KEEP, LABEL_OWNER, LABEL_PR, LABEL_REPO,
};

/// Identifies a repeatable test scenario across builds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineageKey {
    pub trigger_source: String,
    pub branch: String,
    pub context: String,
}

impl fmt::Display for LineageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.trigger_source, self.branch, self.context)
    }
}

/// Field-by-field reads of a record `spec`; a mistyped field reads as absent
#[derive(Clone, Copy)]
struct SpecFields<'a>(Option<&'a Value>);

impl<'a> SpecFields<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.and_then(|spec| spec.get(key))
    }

    fn text(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// `{url: ...}` objects such as `testSource`
    fn url(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|source| source.get("url"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Booleans, or strings such as `"true"` and `"yes"`
    fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => is_truthy(s),
            _ => false,
        }
    }

    /// Integers, or numeric strings such as `"159"`
    fn number(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// One instance of provisioned test infrastructure
#[derive(Debug, Clone)]
pub struct TestResource {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub created: Option<DateTime<Utc>>,
    /// `0` means the build number is unknown and never comparable
    pub build_number: i64,
    pub keep: bool,
    pub delete: bool,
    pub lineage: Option<LineageKey>,
    pub test_source_url: Option<String>,
    pub remove_script: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl TestResource {
    #[must_use]
    pub fn from_object(obj: &DynamicObject) -> Self {
        let name = obj.name_any();
        let labels = obj.labels().clone();
        let annotations = obj.annotations();
        let spec_value = obj.data.get("spec");

        let spec = SpecFields(spec_value);
        if spec_value.is_some_and(|v| !v.is_object()) {
            warn!(name = %name, "Ignoring spec that is not a map");
        }

        let label_flag = |key: &str| labels.get(key).is_some_and(|v| is_truthy(v));

        let build_number = spec
            .number("buildNumber")
            .filter(|n| *n > 0)
            .or_else(|| {
                annotations
                    .get(ANNOTATION_BUILD_NUMBER)
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .filter(|n| *n > 0)
            })
            .unwrap_or(0);

        let lineage = match spec.url("triggerSource") {
            Some(trigger_source) => Some(LineageKey {
                trigger_source,
                branch: spec.text("branch").unwrap_or_default(),
                context: spec.text("context").unwrap_or_default(),
            }),
            None => lineage_from_labels(&labels),
        };

        let test_source_url = spec
            .url("testSource")
            .or_else(|| annotations.get(ANNOTATION_TEST_SOURCE).cloned());

        Self {
            keep: spec.flag("keep") || label_flag(LABEL_KEEP),
            delete: spec.flag("delete") || label_flag(LABEL_DELETE),
            namespace: obj.namespace(),
            created: obj.creation_timestamp().map(|t| t.0),
            env: spec_value.map(read_env).unwrap_or_default(),
            remove_script: spec.text("removeScript"),
            name,
            labels,
            build_number,
            lineage,
            test_source_url,
        }
    }

    /// True when both resources carry positive build numbers and this one is newer
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.build_number > 0 && other.build_number > 0 && self.build_number > other.build_number
    }
}

fn lineage_from_labels(labels: &BTreeMap<String, String>) -> Option<LineageKey> {
    let get = |key: &str| labels.get(key).cloned().unwrap_or_default();
    let (repo, pr, context) = (get(LABEL_REPO), get(LABEL_PR), get(LABEL_CONTEXT));
    if repo.is_empty() && pr.is_empty() && context.is_empty() {
        return None;
    }
    let owner = get(LABEL_OWNER);
    let trigger_source = if owner.is_empty() {
        repo
    } else {
        format!("{owner}/{repo}")
    };
    Some(LineageKey {
        trigger_source,
        branch: pr,
        context,
    })
}

/// Read `spec.env` given either as `[{name, value}]` or as a plain map
#[must_use]
pub fn read_env(spec: &Value) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    match spec.get("env") {
        Some(Value::Array(items)) => {
            for item in items {
                let name = item.get("name").and_then(Value::as_str);
                let value = item.get("value").and_then(Value::as_str).unwrap_or_default();
                if let Some(name) = name {
                    env.insert(name.to_string(), value.to_string());
                }
            }
        }
        Some(Value::Object(map)) => {
            for (name, value) in map {
                if let Some(value) = value.as_str() {
                    env.insert(name.clone(), value.to_string());
                }
            }
        }
        _ => {}
    }
    env
}
