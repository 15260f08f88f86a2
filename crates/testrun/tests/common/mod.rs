//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;

use testrun::error::{Error, Result};
use testrun::runner::{CommandOutput, CommandRunner, ProcessCommand};
use testrun::store::InMemoryStore;
use testrun::watch::{JobOutcome, JobWatcher};
use testrun::{Clients, LabelSet};

// =============================================================================
// Fake collaborators
// =============================================================================

/// Records every command instead of running it
#[derive(Default)]
pub struct FakeRunner {
    commands: Mutex<Vec<ProcessCommand>>,
    fail_on: Option<String>,
}

impl FakeRunner {
    /// Fail any command whose program name ends with `suffix`
    pub fn failing_on(suffix: &str) -> Self {
        Self {
            commands: Mutex::default(),
            fail_on: Some(suffix.to_string()),
        }
    }

    pub fn commands(&self) -> Vec<ProcessCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &ProcessCommand) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.clone());
        if let Some(suffix) = &self.fail_on {
            if command.name.ends_with(suffix.as_str()) {
                return Err(Error::Command {
                    command: command.cli(),
                    message: "exit status: 1".to_string(),
                });
            }
        }
        Ok(CommandOutput::default())
    }
}

/// Reports a fixed outcome for every Job it is asked about
pub struct FakeWatcher {
    outcome: JobOutcome,
    watched: Mutex<Vec<String>>,
}

impl FakeWatcher {
    pub fn new(outcome: JobOutcome) -> Self {
        Self {
            outcome,
            watched: Mutex::default(),
        }
    }

    pub fn watched(&self) -> Vec<String> {
        self.watched.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobWatcher for FakeWatcher {
    async fn wait(&self, name: &str, _timeout: Duration, _cancel: &CancellationToken) -> Result<JobOutcome> {
        self.watched.lock().unwrap().push(name.to_string());
        Ok(self.outcome.clone())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub runner: Arc<FakeRunner>,
    pub watcher: Arc<FakeWatcher>,
    pub clients: Clients,
}

pub fn harness() -> Harness {
    harness_with(FakeRunner::default(), JobOutcome::Succeeded)
}

pub fn harness_with(runner: FakeRunner, outcome: JobOutcome) -> Harness {
    let store = Arc::new(InMemoryStore::new(NAMESPACE));
    let runner = Arc::new(runner);
    let watcher = Arc::new(FakeWatcher::new(outcome));
    let clients = Clients::with_store(NAMESPACE, store.clone())
        .with_runner(runner.clone())
        .with_watcher(watcher.clone());
    Harness {
        store,
        runner,
        watcher,
        clients,
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub const NAMESPACE: &str = "jx";

pub fn template_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/test_data/tf.yaml")
}

pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn lineage_labels(pr: u64, context: &str) -> LabelSet {
    LabelSet::new()
        .with("kind", "jx-test")
        .with("owner", "myowner")
        .with("repo", "myrepo")
        .with("pr", format!("pr-{pr}"))
        .with("context", context)
}

/// A Terraform record as `create` would have left it
pub fn record(name: &str, labels: &LabelSet, build: i64, created: DateTime<Utc>) -> DynamicObject {
    let mut obj: DynamicObject = serde_json::from_value(serde_json::json!({
        "apiVersion": "tf.isaaguilar.com/v1alpha1",
        "kind": "Terraform",
        "metadata": { "name": name },
        "spec": {},
    }))
    .unwrap();
    obj.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(labels.clone().into_inner()),
        annotations: Some(BTreeMap::from([(
            "testrun.dev/build-number".to_string(),
            build.to_string(),
        )])),
        creation_timestamp: Some(Time(created)),
        ..ObjectMeta::default()
    };
    obj
}

pub fn running_job(name: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        status: Some(JobStatus {
            active: Some(1),
            ..JobStatus::default()
        }),
        ..Job::default()
    }
}

pub fn finished_job(name: &str) -> Job {
    let mut job = running_job(name);
    job.status = Some(JobStatus {
        conditions: Some(vec![JobCondition {
            type_: "Complete".to_string(),
            status: "True".to_string(),
            ..JobCondition::default()
        }]),
        ..JobStatus::default()
    });
    job
}

pub fn job_pod_labels(job: &str) -> LabelSet {
    LabelSet::new().with("job-name", job)
}
