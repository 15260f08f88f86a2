//! Narrow interfaces to the cluster-style resource store.
//!
//! The lifecycle logic only ever talks to these traits. `kubernetes` provides
//! the production implementation and `memory` an in-process one for tests and
//! dry runs.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use kube::api::DynamicObject;

use crate::error::Result;
use crate::selector::LabelSet;

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeStore;
pub use memory::InMemoryStore;

/// Primary test resource records
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List records matching every label of `selector`; nothing found is an empty list
    async fn list(&self, selector: &LabelSet) -> Result<Vec<DynamicObject>>;

    async fn get(&self, name: &str) -> Result<Option<DynamicObject>>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete a record; a record that is already gone is not an error
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Background work (Jobs and their Pods) started on behalf of a resource
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get_job(&self, name: &str) -> Result<Option<Job>>;

    async fn delete_job(&self, name: &str) -> Result<()>;

    /// Names of the Pods matching `selector`
    async fn list_pods(&self, selector: &LabelSet) -> Result<Vec<String>>;

    async fn delete_pod(&self, name: &str) -> Result<()>;
}

/// Kinds of state objects that accompany a test resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuxiliaryKind {
    Lease,
    Secret,
    ConfigMap,
}

impl fmt::Display for AuxiliaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lease => write!(f, "Lease"),
            Self::Secret => write!(f, "Secret"),
            Self::ConfigMap => write!(f, "ConfigMap"),
        }
    }
}

/// Metadata of an auxiliary state object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryObject {
    pub kind: AuxiliaryKind,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub created: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AuxiliaryStore: Send + Sync {
    async fn list_auxiliary(
        &self,
        kind: AuxiliaryKind,
        selector: &LabelSet,
    ) -> Result<Vec<AuxiliaryObject>>;

    async fn delete_auxiliary(&self, kind: AuxiliaryKind, name: &str) -> Result<()>;
}

/// A Job is finished once it carries a `Complete` or `Failed` condition set to `True`
#[must_use]
pub fn is_job_finished(job: &Job) -> bool {
    job_condition(job, "Complete") || job_condition(job, "Failed")
}

#[must_use]
pub fn is_job_succeeded(job: &Job) -> bool {
    job_condition(job, "Complete")
}

fn job_condition(job: &Job, type_: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == "True")
        })
}
