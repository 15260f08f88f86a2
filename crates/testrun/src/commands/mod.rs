//! The `create`, `gc` and `delete` operations, wired to their collaborators

use std::sync::Arc;

use kube::Client;

use crate::config::Settings;
use crate::reaper::{ActiveWorkReaper, Retirer};
use crate::repos::RepositoryReaper;
use crate::runner::{CommandRunner, ProcessRunner};
use crate::store::{AuxiliaryStore, KubeStore, ResourceStore, WorkloadStore};
use crate::template::{HandlebarsRenderer, TemplateRenderer};
use crate::watch::{JobWatcher, PollingJobWatcher};

pub mod create;
pub mod delete;
pub mod gc;

pub use create::{run_create, CreateOptions, CreateSummary};
pub use delete::{run_delete, DeleteOptions, DeleteOutcome};
pub use gc::{run_gc, GcOptions};

/// Everything a command talks to, created once per invocation
#[derive(Clone)]
pub struct Clients {
    pub namespace: String,
    pub resources: Arc<dyn ResourceStore>,
    pub workloads: Arc<dyn WorkloadStore>,
    pub auxiliary: Arc<dyn AuxiliaryStore>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub runner: Arc<dyn CommandRunner>,
    pub watcher: Arc<dyn JobWatcher>,
    pub repositories: Option<Arc<dyn RepositoryReaper>>,
}

impl Clients {
    /// Production clients for one namespace of the cluster
    #[must_use]
    pub fn kubernetes(client: Client, namespace: &str, settings: &Settings) -> Self {
        let store = Arc::new(
            KubeStore::new(client, namespace, &settings.resource)
                .with_clear_finalizers(settings.clear_finalizers),
        );
        Self::with_store(namespace, store)
    }

    /// Clients backed by a single store implementing every store trait
    pub fn with_store<S>(namespace: &str, store: Arc<S>) -> Self
    where
        S: ResourceStore + WorkloadStore + AuxiliaryStore + 'static,
    {
        Self {
            namespace: namespace.to_string(),
            resources: store.clone(),
            workloads: store.clone(),
            auxiliary: store.clone(),
            renderer: Arc::new(HandlebarsRenderer),
            runner: Arc::new(ProcessRunner),
            watcher: Arc::new(PollingJobWatcher::new(store)),
            repositories: None,
        }
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_watcher(mut self, watcher: Arc<dyn JobWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    #[must_use]
    pub fn with_repositories(mut self, repositories: Arc<dyn RepositoryReaper>) -> Self {
        self.repositories = Some(repositories);
        self
    }

    pub(crate) fn retirer(&self) -> Retirer {
        Retirer::new(
            self.resources.clone(),
            ActiveWorkReaper::new(self.workloads.clone()),
        )
    }
}
