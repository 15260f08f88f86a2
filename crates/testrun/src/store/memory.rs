//! In-process store used by tests and local dry runs.
//!
//! Records every mutating call in a journal so callers can assert on the
//! order of operations (for example that a Job was removed before its
//! owning resource).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kube::ResourceExt;

use super::{AuxiliaryKind, AuxiliaryObject, AuxiliaryStore, ResourceStore, WorkloadStore};
use crate::error::{Error, Result};
use crate::selector::LabelSet;

#[derive(Default)]
struct State {
    resources: BTreeMap<String, DynamicObject>,
    jobs: BTreeMap<String, Job>,
    pods: BTreeMap<String, BTreeMap<String, String>>,
    auxiliary: BTreeMap<(AuxiliaryKind, String), AuxiliaryObject>,
    failing: BTreeSet<String>,
    journal: Vec<String>,
}

/// A namespace held in memory
#[derive(Default)]
pub struct InMemoryStore {
    namespace: String,
    state: Mutex<State>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not hide the store from the others
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a record as-is, keeping any creation timestamp it already has
    pub fn insert_resource(&self, obj: DynamicObject) {
        self.state().resources.insert(obj.name_any(), obj);
    }

    pub fn insert_job(&self, job: Job) {
        self.state().jobs.insert(job.name_any(), job);
    }

    pub fn insert_pod(&self, name: &str, labels: LabelSet) {
        self.state()
            .pods
            .insert(name.to_string(), labels.into_inner());
    }

    pub fn insert_auxiliary(&self, obj: AuxiliaryObject) {
        self.state()
            .auxiliary
            .insert((obj.kind, obj.name.clone()), obj);
    }

    /// Make every delete of `name` (record, Job, Pod or auxiliary object) fail
    pub fn fail_deletes_of(&self, name: &str) {
        self.state().failing.insert(name.to_string());
    }

    #[must_use]
    pub fn resource_names(&self) -> Vec<String> {
        self.state().resources.keys().cloned().collect()
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<DynamicObject> {
        self.state().resources.get(name).cloned()
    }

    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        self.state().jobs.keys().cloned().collect()
    }

    #[must_use]
    pub fn pod_names(&self) -> Vec<String> {
        self.state().pods.keys().cloned().collect()
    }

    #[must_use]
    pub fn auxiliary_names(&self, kind: AuxiliaryKind) -> Vec<String> {
        self.state()
            .auxiliary
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Mutating calls in the order they were made, e.g. `delete Job tf-a`
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    fn check_failure(state: &State, name: &str) -> Result<()> {
        if state.failing.contains(name) {
            return Err(Error::Store(format!("injected failure deleting {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn list(&self, selector: &LabelSet) -> Result<Vec<DynamicObject>> {
        Ok(self
            .state()
            .resources
            .values()
            .filter(|obj| selector.matches(obj.labels()))
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.resource(name))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj.name_any();
        let mut state = self.state();
        if state.resources.contains_key(&name) {
            return Err(Error::Store(format!("resource {name} already exists")));
        }
        let mut created = obj.clone();
        if created.metadata.namespace.is_none() {
            created.metadata.namespace = Some(self.namespace.clone());
        }
        if created.metadata.creation_timestamp.is_none() {
            created.metadata.creation_timestamp = Some(Time(Utc::now()));
        }
        state.journal.push(format!("create {name}"));
        state.resources.insert(name, created.clone());
        Ok(created)
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj.name_any();
        let mut state = self.state();
        if !state.resources.contains_key(&name) {
            return Err(Error::NotFound(format!("resource {name}")));
        }
        state.journal.push(format!("update {name}"));
        state.resources.insert(name, obj.clone());
        Ok(obj.clone())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_failure(&state, name)?;
        if state.resources.remove(name).is_some() {
            state.journal.push(format!("delete {name}"));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for InMemoryStore {
    async fn get_job(&self, name: &str) -> Result<Option<Job>> {
        Ok(self.state().jobs.get(name).cloned())
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_failure(&state, name)?;
        if state.jobs.remove(name).is_some() {
            state.journal.push(format!("delete Job {name}"));
        }
        Ok(())
    }

    async fn list_pods(&self, selector: &LabelSet) -> Result<Vec<String>> {
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|(_, labels)| selector.matches(labels))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_failure(&state, name)?;
        if state.pods.remove(name).is_some() {
            state.journal.push(format!("delete Pod {name}"));
        }
        Ok(())
    }
}

#[async_trait]
impl AuxiliaryStore for InMemoryStore {
    async fn list_auxiliary(
        &self,
        kind: AuxiliaryKind,
        selector: &LabelSet,
    ) -> Result<Vec<AuxiliaryObject>> {
        Ok(self
            .state()
            .auxiliary
            .values()
            .filter(|obj| obj.kind == kind && selector.matches(&obj.labels))
            .cloned()
            .collect())
    }

    async fn delete_auxiliary(&self, kind: AuxiliaryKind, name: &str) -> Result<()> {
        let mut state = self.state();
        Self::check_failure(&state, name)?;
        if state.auxiliary.remove(&(kind, name.to_string())).is_some() {
            state.journal.push(format!("delete {kind} {name}"));
        }
        Ok(())
    }
}

/// Build an auxiliary object for seeding a store
#[must_use]
pub fn auxiliary(
    kind: AuxiliaryKind,
    name: &str,
    labels: LabelSet,
    created: DateTime<Utc>,
) -> AuxiliaryObject {
    AuxiliaryObject {
        kind,
        name: name.to_string(),
        labels: labels.into_inner(),
        created: Some(created),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let mut obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "tf.isaaguilar.com/v1alpha1",
            "kind": "Terraform",
            "metadata": { "name": name },
        }))
        .unwrap();
        obj.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        obj
    }

    #[tokio::test]
    async fn list_filters_by_selector_and_delete_is_idempotent() {
        let store = InMemoryStore::new("jx");
        store.insert_resource(record("a", &[("kind", "jx-test"), ("pr", "pr-1")]));
        store.insert_resource(record("b", &[("kind", "jx-test"), ("pr", "pr-2")]));
        store.insert_resource(record("c", &[("kind", "other")]));

        let selector = LabelSet::new().with("kind", "jx-test");
        assert_eq!(store.list(&selector).await.unwrap().len(), 2);
        assert_eq!(store.list(&LabelSet::new()).await.unwrap().len(), 3);

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.resource_names(), vec!["b", "c"]);
        assert_eq!(store.journal(), vec!["delete a"]);
    }

    #[tokio::test]
    async fn create_stamps_metadata_and_rejects_duplicates() {
        let store = InMemoryStore::new("jx");
        let created = store.create(&record("a", &[])).await.unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("jx"));
        assert!(created.metadata.creation_timestamp.is_some());
        assert!(store.create(&record("a", &[])).await.is_err());
    }

    #[tokio::test]
    async fn injected_failures_surface_on_delete() {
        let store = InMemoryStore::new("jx");
        store.insert_resource(record("a", &[]));
        store.fail_deletes_of("a");
        assert!(matches!(store.delete("a").await, Err(Error::Store(_))));
        assert_eq!(store.resource_names(), vec!["a"]);
    }
}
