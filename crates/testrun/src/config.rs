//! Settings shared by every command.
//!
//! Values come from an optional YAML file; command-line flags override the
//! per-invocation parts (namespace, selector, TTL) at the call site.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ResultExt};
use crate::labels::DEFAULT_KIND_VALUE;

/// Group/version/kind of the primary test resource record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKindConfig {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl Default for ResourceKindConfig {
    fn default() -> Self {
        Self {
            group: "tf.isaaguilar.com".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Terraform".to_string(),
            plural: "terraforms".to_string(),
        }
    }
}

/// Auxiliary state sweep settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliaryConfig {
    /// Marker selecting stored provisioning state and coordination leases
    #[serde(default = "default_state_selector")]
    pub state_selector: String,

    /// Name prefix of the versions ConfigMaps written alongside the state
    #[serde(default = "default_config_map_prefix")]
    pub config_map_prefix: String,
}

fn default_state_selector() -> String {
    "tfstate=true".to_string()
}

fn default_config_map_prefix() -> String {
    "tf-jx3-versions-".to_string()
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            state_selector: default_state_selector(),
            config_map_prefix: default_config_map_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub resource: ResourceKindConfig,

    /// Value of the `kind` label shared by all test resources
    #[serde(default = "default_kind_label_value")]
    pub kind_label_value: String,

    /// Strip finalizers before deleting a record
    #[serde(default = "default_clear_finalizers")]
    pub clear_finalizers: bool,

    /// How long `create` waits for the provisioning Job
    #[serde(default = "default_watch_timeout")]
    pub watch_timeout: String,

    /// Script used by `delete` when neither the flag nor the record names one
    #[serde(default = "default_remove_script")]
    pub remove_script: String,

    #[serde(default)]
    pub auxiliary: AuxiliaryConfig,
}

fn default_kind_label_value() -> String {
    DEFAULT_KIND_VALUE.to_string()
}

fn default_clear_finalizers() -> bool {
    true
}

fn default_watch_timeout() -> String {
    "30m".to_string()
}

fn default_remove_script() -> String {
    "bin/destroy.sh".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resource: ResourceKindConfig::default(),
            kind_label_value: default_kind_label_value(),
            clear_finalizers: default_clear_finalizers(),
            watch_timeout: default_watch_timeout(),
            remove_script: default_remove_script(),
            auxiliary: AuxiliaryConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let settings: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let kind = &self.resource;
        if kind.version.is_empty() || kind.kind.is_empty() || kind.plural.is_empty() {
            return Err(Error::Validation(
                "resource.version, resource.kind and resource.plural must be set".to_string(),
            ));
        }
        if self.kind_label_value.trim().is_empty() {
            return Err(Error::Validation(
                "kindLabelValue must not be empty".to_string(),
            ));
        }
        parse_duration(&self.watch_timeout)?;
        Ok(())
    }

    pub fn watch_timeout(&self) -> Result<Duration> {
        parse_duration(&self.watch_timeout)
    }
}

/// Parse durations such as `90s`, `30m`, `2h`, `1h30m` or `1d`; a bare number is minutes
///
/// Negative or out-of-range values are rejected with [`Error::Validation`].
pub fn parse_duration(text: &str) -> Result<Duration> {
    let s = text.trim().to_lowercase();
    let invalid = || Error::Validation(format!("invalid duration {text:?}"));
    if s.is_empty() || s.starts_with('-') {
        return Err(invalid());
    }
    if let Ok(minutes) = s.parse::<i64>() {
        return Duration::try_minutes(minutes).ok_or_else(invalid);
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let part = match c {
            'd' => Duration::try_days(value),
            'h' => Duration::try_hours(value),
            'm' => Duration::try_minutes(value),
            's' => Duration::try_seconds(value),
            _ => return Err(invalid()),
        }
        .ok_or_else(invalid)?;
        total = total.checked_add(&part).ok_or_else(invalid)?;
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(total)
}
