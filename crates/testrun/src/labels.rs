//! Canonical labels and deterministic names for test resources.
//!
//! Everything here is a pure function of the lineage inputs so that a
//! re-invoked pipeline step computes the same name and selector it used
//! the first time.

use sha1::{Digest, Sha1};

use crate::selector::LabelSet;

/// Label holding the kind marker shared by every test resource
pub const LABEL_KIND: &str = "kind";
pub const LABEL_OWNER: &str = "owner";
pub const LABEL_REPO: &str = "repo";
pub const LABEL_PR: &str = "pr";
pub const LABEL_CONTEXT: &str = "context";
/// Operator override exempting a resource from every deletion path
pub const LABEL_KEEP: &str = "keep";
/// Marks a resource for removal on the next garbage collection
pub const LABEL_DELETE: &str = "delete";

/// Default value of the kind marker label
pub const DEFAULT_KIND_VALUE: &str = "jx-test";

/// Annotation recording the pipeline build number that produced a resource
pub const ANNOTATION_BUILD_NUMBER: &str = "testrun.dev/build-number";
/// Annotation recording the git URL of the test case
pub const ANNOTATION_TEST_SOURCE: &str = "testrun.dev/test-source-url";

const MAX_NAME_LENGTH: usize = 63;
const MAX_LABEL_VALUE_LENGTH: usize = 63;
const HASH_SUFFIX_LENGTH: usize = 8;

/// Identifiers of one pipeline invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub pull_request: Option<u64>,
    pub context: Option<String>,
    pub build_number: Option<String>,
}

impl Lineage {
    /// Numeric build number, `0` when missing or not a positive integer
    #[must_use]
    pub fn build_number_value(&self) -> i64 {
        self.build_number
            .as_deref()
            .and_then(|b| b.trim().parse::<i64>().ok())
            .filter(|b| *b > 0)
            .unwrap_or(0)
    }
}

/// Name and labels derived for a lineage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub name: String,
    pub labels: LabelSet,
}

/// Derives resource names and label sets from lineage identifiers
#[derive(Debug, Clone)]
pub struct LabelKeyBuilder {
    prefix: String,
    kind_value: String,
}

impl LabelKeyBuilder {
    #[must_use]
    pub fn new(prefix: impl Into<String>, kind_value: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            kind_value: kind_value.into(),
        }
    }

    #[must_use]
    pub fn kind_value(&self) -> &str {
        &self.kind_value
    }

    #[must_use]
    pub fn build(&self, lineage: &Lineage) -> ResourceIdentity {
        ResourceIdentity {
            name: self.resource_name(lineage),
            labels: self.labels(lineage),
        }
    }

    /// Labels identifying the lineage (the build number is never included)
    #[must_use]
    pub fn labels(&self, lineage: &Lineage) -> LabelSet {
        let mut labels = LabelSet::new().with(LABEL_KIND, sanitize_label_value(&self.kind_value));
        let pr = lineage.pull_request.map(|n| format!("pr-{n}"));
        let entries = [
            (LABEL_OWNER, lineage.owner.as_deref()),
            (LABEL_REPO, lineage.repo.as_deref()),
            (LABEL_PR, pr.as_deref()),
            (LABEL_CONTEXT, lineage.context.as_deref()),
        ];
        for (key, value) in entries {
            let value = value.map(sanitize_label_value).unwrap_or_default();
            if !value.is_empty() {
                labels.insert(key, value);
            }
        }
        labels
    }

    /// Format: `{prefix}{repo}-pr{N}-{context}-{build}` with missing parts dropped
    #[must_use]
    pub fn resource_name(&self, lineage: &Lineage) -> String {
        let pr = lineage.pull_request.map(|n| format!("pr{n}"));
        let tokens: Vec<String> = [
            lineage.repo.as_deref(),
            pr.as_deref(),
            lineage.context.as_deref(),
            lineage.build_number.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(sanitize_name_token)
        .filter(|t| !t.is_empty())
        .collect();

        let body = if tokens.is_empty() {
            "adhoc".to_string()
        } else {
            tokens.join("-")
        };
        let prefix: String = self
            .prefix
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        let full = format!("{prefix}{body}");
        let full = full.trim_start_matches('-').to_string();
        truncate_name(&full)
    }
}

/// Lowercase, keep `[a-z0-9]`, turn everything else into single dashes
fn sanitize_name_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_LENGTH {
        return name.to_string();
    }
    let digest = hex::encode(Sha1::digest(name.as_bytes()));
    let keep = MAX_NAME_LENGTH - HASH_SUFFIX_LENGTH - 1;
    let head = name[..keep].trim_end_matches('-');
    format!("{head}-{}", &digest[..HASH_SUFFIX_LENGTH])
}

/// Make a string usable as a Kubernetes label value
#[must_use]
pub fn sanitize_label_value(input: &str) -> String {
    let mut sanitized = input.trim().to_lowercase().replace([' ', '/'], "-");
    sanitized.retain(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');

    let trimmed = sanitized.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let mut sanitized = trimmed.to_string();

    if sanitized.len() > MAX_LABEL_VALUE_LENGTH {
        sanitized.truncate(MAX_LABEL_VALUE_LENGTH);
        let end = sanitized.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()).len();
        sanitized.truncate(end);
    }
    sanitized
}

/// True for the label/flag spellings that switch a boolean marker on
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true")
}
