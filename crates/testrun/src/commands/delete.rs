//! `delete`: tear down a test's cloud resources and flag its record for the next `gc`

use std::path::{Path, PathBuf};

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Clients;
use crate::checkpoint;
use crate::config::Settings;
use crate::error::{Error, Result, ResultExt};
use crate::labels::LABEL_DELETE;
use crate::resource::TestResource;
use crate::runner::{clone_repository, ProcessCommand};
use crate::selector::LabelSet;

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Git URL of the test case whose resources are removed
    pub test_url: Option<String>,
    /// Existing checkout of the test case; cloned to a scratch directory when absent
    pub dir: Option<PathBuf>,
    pub script: Option<String>,
}

impl DeleteOptions {
    /// Checks that need no cluster access
    pub fn validate(&self) -> Result<&str> {
        self.test_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(Error::MissingOption("test-url"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Kept(String),
    AlreadyMarked(String),
    Marked(String),
}

pub async fn run_delete(
    clients: &Clients,
    settings: &Settings,
    options: &DeleteOptions,
    cancel: &CancellationToken,
) -> Result<DeleteOutcome> {
    let test_url = options.validate()?;

    checkpoint(cancel)?;
    let objects = clients
        .resources
        .list(&LabelSet::new())
        .await
        .with_context(|| format!("failed to list test resources in namespace {}", clients.namespace))?;
    let Some(obj) = objects
        .into_iter()
        .find(|o| TestResource::from_object(o).test_source_url.as_deref() == Some(test_url))
    else {
        return Err(Error::NotFound(format!(
            "test resource in namespace {} with test source {test_url}",
            clients.namespace
        )));
    };
    let resource = TestResource::from_object(&obj);
    let name = resource.name.clone();

    if resource.keep {
        info!(name = %name, "Not removing resources as the test resource is marked keep");
        return Ok(DeleteOutcome::Kept(name));
    }
    if resource.delete {
        info!(name = %name, "Test resource is already marked for deletion");
        return Ok(DeleteOutcome::AlreadyMarked(name));
    }

    let script = options
        .script
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| resource.remove_script.clone())
        .unwrap_or_else(|| {
            warn!(name = %name, script = %settings.remove_script, "No removal script set, using the default");
            settings.remove_script.clone()
        });

    // Held until the script has run; dropping it removes the clone.
    let mut scratch = None;
    let dir = match &options.dir {
        Some(dir) => dir.clone(),
        None => {
            let tmp = tempfile::Builder::new().prefix("testrun-").tempdir()?;
            checkpoint(cancel)?;
            clone_repository(clients.runner.as_ref(), test_url, tmp.path())
                .await
                .with_context(|| format!("failed to clone {test_url} for {name}"))?;
            let path = tmp.path().to_path_buf();
            scratch = Some(tmp);
            path
        }
    };

    let command = ProcessCommand::new(script_path(&dir, &script))
        .current_dir(&dir)
        .envs(&resource.env);
    checkpoint(cancel)?;
    clients
        .runner
        .run(&command)
        .await
        .with_context(|| format!("failed to run {script} for {name} in {}", dir.display()))?;
    drop(scratch);
    info!(name = %name, script = %script, "Removed test resources");

    mark_deleted(clients, &name, cancel)
        .await
        .with_context(|| format!("failed to mark {name} for deletion"))?;
    info!(name = %name, namespace = %clients.namespace, "Marked test resource for deletion");
    Ok(DeleteOutcome::Marked(name))
}

/// Relative scripts live inside the checkout
fn script_path(dir: &Path, script: &str) -> String {
    let path = Path::new(script);
    if path.is_absolute() {
        script.to_string()
    } else {
        dir.join(path).display().to_string()
    }
}

async fn mark_deleted(clients: &Clients, name: &str, cancel: &CancellationToken) -> Result<()> {
    checkpoint(cancel)?;
    let Some(mut current) = clients.resources.get(name).await? else {
        return Err(Error::NotFound(format!("test resource {name}")));
    };
    current
        .labels_mut()
        .insert(LABEL_DELETE.to_string(), "true".to_string());
    checkpoint(cancel)?;
    clients.resources.replace(&current).await?;
    Ok(())
}
