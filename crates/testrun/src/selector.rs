//! Label sets and their label-selector wire format (`k=v,k=v`)

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// An order-irrelevant set of labels with unique keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a label
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when every label of this set is present with the same value in `labels`
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }

    /// Serialize into the selector query format.
    ///
    /// Keys and values are written verbatim, so any that contain `,` or `=`
    /// are rejected rather than producing an ambiguous selector.
    pub fn to_selector(&self) -> Result<String> {
        let mut parts = Vec::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(invalid(self, "empty label key"));
            }
            for text in [key, value] {
                if text.contains([',', '=']) {
                    return Err(invalid(
                        self,
                        &format!("{text:?} must not contain ',' or '='"),
                    ));
                }
            }
            parts.push(format!("{key}={value}"));
        }
        Ok(parts.join(","))
    }

    /// Parse a selector of the form `k=v,k=v`; an empty string is an empty set
    pub fn parse(selector: &str) -> Result<Self> {
        let mut labels = Self::new();
        for pair in selector.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(Error::InvalidSelector {
                    selector: selector.to_string(),
                    reason: format!("expected key=value but found {pair:?}"),
                });
            };
            let key = key.trim();
            if key.is_empty() || value.contains('=') {
                return Err(Error::InvalidSelector {
                    selector: selector.to_string(),
                    reason: format!("malformed requirement {pair:?}"),
                });
            }
            if labels.contains_key(key) {
                return Err(Error::InvalidSelector {
                    selector: selector.to_string(),
                    reason: format!("duplicate key {key:?}"),
                });
            }
            labels.insert(key, value.trim());
        }
        Ok(labels)
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

fn invalid(labels: &LabelSet, reason: &str) -> Error {
    Error::InvalidSelector {
        selector: labels.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", rendered.join(","))
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
