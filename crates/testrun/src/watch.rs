//! Waiting for the provisioning Job of a freshly created resource

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::{is_job_finished, is_job_succeeded, WorkloadStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String },
    TimedOut,
}

#[async_trait]
pub trait JobWatcher: Send + Sync {
    /// Block until the Job `name` finishes, the timeout passes or `cancel` fires
    async fn wait(&self, name: &str, timeout: Duration, cancel: &CancellationToken) -> Result<JobOutcome>;
}

/// Polls the Job through a [`WorkloadStore`] until it carries a terminal condition
pub struct PollingJobWatcher {
    workloads: Arc<dyn WorkloadStore>,
    interval: Duration,
}

impl PollingJobWatcher {
    #[must_use]
    pub fn new(workloads: Arc<dyn WorkloadStore>) -> Self {
        Self {
            workloads,
            interval: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn poll(&self, name: &str) -> Result<JobOutcome> {
        let mut reported_missing = false;
        loop {
            match self.workloads.get_job(name).await? {
                Some(job) if is_job_finished(&job) => {
                    if is_job_succeeded(&job) {
                        return Ok(JobOutcome::Succeeded);
                    }
                    return Ok(JobOutcome::Failed {
                        reason: failure_reason(&job),
                    });
                }
                Some(_) => debug!(job = %name, "Job still running"),
                None if !reported_missing => {
                    info!(job = %name, "Waiting for the Job to be created");
                    reported_missing = true;
                }
                None => {}
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

fn failure_reason(job: &Job) -> String {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
        })
        .map(|c| {
            let reason = c.reason.clone().unwrap_or_default();
            match c.message.as_deref() {
                Some(message) if !message.is_empty() => format!("{reason}: {message}"),
                _ => reason,
            }
        })
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "Job failed".to_string())
}

#[async_trait]
impl JobWatcher for PollingJobWatcher {
    async fn wait(&self, name: &str, timeout: Duration, cancel: &CancellationToken) -> Result<JobOutcome> {
        info!(job = %name, timeout_secs = timeout.as_secs(), "Waiting for Job to finish");
        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(timeout, self.poll(name)) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(job = %name, "Timed out waiting for Job");
                    Ok(JobOutcome::TimedOut)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn job(name: &str, condition: Option<(&str, &str)>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            status: Some(JobStatus {
                conditions: condition.map(|(type_, message)| {
                    vec![JobCondition {
                        type_: type_.to_string(),
                        status: "True".to_string(),
                        reason: Some("BackoffLimitExceeded".to_string()),
                        message: Some(message.to_string()),
                        ..JobCondition::default()
                    }]
                }),
                ..JobStatus::default()
            }),
            ..Job::default()
        }
    }

    fn watcher(store: &Arc<InMemoryStore>) -> PollingJobWatcher {
        PollingJobWatcher::new(store.clone()).with_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn reports_terminal_conditions() {
        let store = Arc::new(InMemoryStore::new("jx"));
        store.insert_job(job("ok", Some(("Complete", ""))));
        store.insert_job(job("bad", Some(("Failed", "too many retries"))));
        let cancel = CancellationToken::new();

        let w = watcher(&store);
        assert_eq!(
            w.wait("ok", Duration::from_secs(1), &cancel).await.unwrap(),
            JobOutcome::Succeeded
        );
        assert_eq!(
            w.wait("bad", Duration::from_secs(1), &cancel).await.unwrap(),
            JobOutcome::Failed {
                reason: "BackoffLimitExceeded: too many retries".to_string()
            }
        );
    }

    #[tokio::test]
    async fn running_job_times_out() {
        let store = Arc::new(InMemoryStore::new("jx"));
        store.insert_job(job("slow", None));
        let outcome = watcher(&store)
            .wait("slow", Duration::from_millis(30), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let store = Arc::new(InMemoryStore::new("jx"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = watcher(&store)
            .wait("missing", Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
