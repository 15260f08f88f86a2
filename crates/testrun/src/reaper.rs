//! Termination of in-flight provisioning work before its resource goes away

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::checkpoint;
use crate::error::{Result, ResultExt};
use crate::selector::LabelSet;
use crate::store::{is_job_finished, ResourceStore, WorkloadStore};

/// Label the Job controller puts on the Pods it creates
pub const LABEL_JOB_NAME: &str = "job-name";

/// What the reaper removed for one resource
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapOutcome {
    pub job_deleted: bool,
    pub pods_deleted: Vec<String>,
}

/// Removes the Job (and its Pods) that provisions a resource of the same name
#[derive(Clone)]
pub struct ActiveWorkReaper {
    workloads: Arc<dyn WorkloadStore>,
}

impl ActiveWorkReaper {
    #[must_use]
    pub fn new(workloads: Arc<dyn WorkloadStore>) -> Self {
        Self { workloads }
    }

    /// Delete the Job `name` if it is unfinished, then every Pod labelled `job-name=<name>`
    pub async fn reap(&self, name: &str, cancel: &CancellationToken) -> Result<ReapOutcome> {
        let mut outcome = ReapOutcome::default();

        checkpoint(cancel)?;
        let job = self.workloads.get_job(name).await?;
        match job {
            Some(job) if !is_job_finished(&job) => {
                info!(job = %name, "Deleting unfinished Job as its resource is about to be removed");
                checkpoint(cancel)?;
                self.workloads.delete_job(name).await?;
                outcome.job_deleted = true;
            }
            Some(_) => debug!(job = %name, "Job already finished"),
            None => debug!(job = %name, "No Job found"),
        }

        let selector = LabelSet::new().with(LABEL_JOB_NAME, name);
        checkpoint(cancel)?;
        let pods = self.workloads.list_pods(&selector).await?;
        for pod in pods {
            checkpoint(cancel)?;
            self.workloads
                .delete_pod(&pod)
                .await
                .with_context(|| format!("failed to delete Pod {pod}"))?;
            info!(pod = %pod, job = %name, "Deleted Job Pod");
            outcome.pods_deleted.push(pod);
        }
        Ok(outcome)
    }
}

/// Two-phase removal of a resource record: reap its work, then delete it.
///
/// The record is only deleted once reaping has succeeded, so a record never
/// disappears while its background work may still be running.
#[derive(Clone)]
pub struct Retirer {
    store: Arc<dyn ResourceStore>,
    reaper: ActiveWorkReaper,
}

impl Retirer {
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, reaper: ActiveWorkReaper) -> Self {
        Self { store, reaper }
    }

    pub async fn retire(&self, name: &str, cancel: &CancellationToken) -> Result<ReapOutcome> {
        let outcome = self
            .reaper
            .reap(name, cancel)
            .await
            .with_context(|| format!("failed to delete active Jobs for {name}"))?;
        checkpoint(cancel)?;
        self.store
            .delete(name)
            .await
            .with_context(|| format!("failed to delete {name}"))?;
        Ok(outcome)
    }
}
