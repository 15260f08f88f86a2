//! `create`: replace the lineage's previous resources with a new one

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Clients;
use crate::checkpoint;
use crate::config::Settings;
use crate::env::EnvPassthrough;
use crate::error::{Error, Result, ResultExt};
use crate::labels::{
    LabelKeyBuilder, Lineage, ResourceIdentity, ANNOTATION_BUILD_NUMBER, ANNOTATION_TEST_SOURCE,
};
use crate::resource::TestResource;
use crate::supersede::SupersessionCleaner;
use crate::template::TemplateContext;
use crate::watch::JobOutcome;

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub file: Option<PathBuf>,
    pub prefix: String,
    pub lineage: Lineage,
    pub env_pattern: String,
    pub env_overrides: Vec<String>,
    /// Wait for the provisioning Job before returning
    pub watch: bool,
    /// Remove the resource once its Job has finished
    pub delete_after: bool,
    /// Fail unless the Job succeeded
    pub verify_result: bool,
    pub test_url: Option<String>,
    pub log_resource: bool,
    pub watch_timeout: Duration,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            file: None,
            prefix: "tf-".to_string(),
            lineage: Lineage::default(),
            env_pattern: crate::env::DEFAULT_ENV_PATTERN.to_string(),
            env_overrides: Vec::new(),
            watch: true,
            delete_after: true,
            verify_result: false,
            test_url: None,
            log_resource: false,
            watch_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl CreateOptions {
    /// Checks that need no cluster access
    pub fn validate(&self) -> Result<&Path> {
        let file = self
            .file
            .as_deref()
            .filter(|f| !f.as_os_str().is_empty())
            .ok_or(Error::MissingOption("file"))?;
        if self.verify_result && !self.watch {
            return Err(Error::Validation(
                "--verify-result needs the Job to be watched, drop --no-watch".to_string(),
            ));
        }
        Ok(file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSummary {
    pub name: String,
    /// Earlier resources of the lineage that were removed first
    pub superseded: Vec<String>,
    pub outcome: Option<JobOutcome>,
    /// Whether the resource was removed again after its Job finished
    pub deleted: bool,
}

/// Create the resource for `options.lineage`.
///
/// `process_env` is the environment the pass-through pattern is applied to.
pub async fn run_create<I>(
    clients: &Clients,
    settings: &Settings,
    options: &CreateOptions,
    process_env: I,
    cancel: &CancellationToken,
) -> Result<CreateSummary>
where
    I: IntoIterator<Item = (String, String)>,
{
    let file = options.validate()?;
    let passthrough = EnvPassthrough::new(&options.env_pattern, &options.env_overrides)?;
    let builder = LabelKeyBuilder::new(&options.prefix, &settings.kind_label_value);
    let identity = builder.build(&options.lineage);

    info!(name = %identity.name, labels = %identity.labels, "Creating test resource");

    let cleaner = SupersessionCleaner::new(clients.resources.clone(), clients.retirer());
    let superseded = cleaner
        .clean(&identity.labels, cancel)
        .await
        .context("failed to remove previous resources")?;

    let vars = passthrough.collect(process_env);
    let context = TemplateContext {
        name: identity.name.clone(),
        namespace: clients.namespace.clone(),
        labels: identity.labels.clone().into_inner(),
        build_number: options.lineage.build_number.clone().unwrap_or_default(),
        env: vars.clone(),
    };
    let mut obj = clients.renderer.render(file, &context)?;
    prepare(&mut obj, &identity, &clients.namespace, options)?;
    let added = passthrough.merge_into(spec_mut(&mut obj), &vars)?;
    if !added.is_empty() {
        info!(names = ?added, "Passing environment variables to the resource");
    }
    if options.log_resource {
        let yaml = serde_yaml::to_string(&obj)?;
        info!(resource = %yaml, "Resource to create");
    }

    checkpoint(cancel)?;
    let created = clients
        .resources
        .create(&obj)
        .await
        .with_context(|| format!("failed to create {}", identity.name))?;
    let name = created.name_any();
    info!(name = %name, namespace = %clients.namespace, "Created test resource");

    let mut summary = CreateSummary {
        name: name.clone(),
        superseded,
        outcome: None,
        deleted: false,
    };
    if !options.watch {
        return Ok(summary);
    }

    let outcome = clients
        .watcher
        .wait(&name, options.watch_timeout, cancel)
        .await
        .with_context(|| format!("failed to watch Job {name}"))?;
    info!(name = %name, outcome = ?outcome, "Provisioning Job finished");
    summary.outcome = Some(outcome.clone());

    if options.delete_after {
        summary.deleted = remove_unless_kept(clients, &name, cancel).await?;
    } else {
        info!(name = %name, "Not deleting the resource as requested");
    }

    if options.verify_result {
        match outcome {
            JobOutcome::Succeeded => {}
            JobOutcome::Failed { reason } => return Err(Error::JobFailed { name, reason }),
            JobOutcome::TimedOut => {
                return Err(Error::JobFailed {
                    name,
                    reason: "timed out waiting for the Job".to_string(),
                })
            }
        }
    }
    Ok(summary)
}

/// Delete the resource after its run unless someone marked it keep meanwhile
async fn remove_unless_kept(clients: &Clients, name: &str, cancel: &CancellationToken) -> Result<bool> {
    checkpoint(cancel)?;
    let Some(current) = clients.resources.get(name).await? else {
        info!(name = %name, "Resource already removed");
        return Ok(false);
    };
    if TestResource::from_object(&current).keep {
        info!(name = %name, "Keeping resource as it is marked keep");
        return Ok(false);
    }
    clients.retirer().retire(name, cancel).await?;
    info!(name = %name, "Deleted test resource after its run");
    Ok(true)
}

/// Stamp identity, namespace and provenance onto a rendered record
fn prepare(
    obj: &mut DynamicObject,
    identity: &ResourceIdentity,
    namespace: &str,
    options: &CreateOptions,
) -> Result<()> {
    obj.metadata.name = Some(identity.name.clone());
    obj.metadata.generate_name = None;
    obj.metadata.namespace = Some(namespace.to_string());

    let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (key, value) in identity.labels.iter() {
        labels.insert(key.to_string(), value.to_string());
    }

    let annotations = obj.metadata.annotations.get_or_insert_with(BTreeMap::new);
    let build = options.lineage.build_number_value();
    if build > 0 {
        annotations.insert(ANNOTATION_BUILD_NUMBER.to_string(), build.to_string());
    }
    if let Some(url) = options.test_url.as_deref().filter(|u| !u.is_empty()) {
        annotations.insert(ANNOTATION_TEST_SOURCE.to_string(), url.to_string());
    }

    match obj.data.get("spec") {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(Error::Validation(format!(
            "spec of {} must be a map",
            identity.name
        ))),
    }
}

fn spec_mut(obj: &mut DynamicObject) -> &mut Value {
    if !obj.data.is_object() {
        obj.data = Value::Object(serde_json::Map::new());
    }
    let spec = &mut obj.data["spec"];
    if spec.is_null() {
        *spec = Value::Object(serde_json::Map::new());
    }
    spec
}
