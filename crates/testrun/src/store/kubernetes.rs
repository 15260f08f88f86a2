//! Kubernetes implementation of the store traits

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    PropagationPolicy,
};
use kube::core::GroupVersionKind;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use super::{AuxiliaryKind, AuxiliaryObject, AuxiliaryStore, ResourceStore, WorkloadStore};
use crate::config::ResourceKindConfig;
use crate::error::{Result, ResultExt};
use crate::selector::LabelSet;

/// Store backed by a Kubernetes namespace
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: String,
    resource: ApiResource,
    clear_finalizers: bool,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, namespace: &str, kind: &ResourceKindConfig) -> Self {
        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        Self {
            client,
            namespace: namespace.to_string(),
            resource: ApiResource::from_gvk_with_plural(&gvk, &kind.plural),
            clear_finalizers: true,
        }
    }

    /// Whether finalizers are stripped before a record is deleted (default: true)
    #[must_use]
    pub fn with_clear_finalizers(mut self, clear: bool) -> Self {
        self.clear_finalizers = clear;
        self
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn records(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.resource)
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn list_metadata<K>(
        &self,
        kind: AuxiliaryKind,
        params: &ListParams,
    ) -> Result<Vec<AuxiliaryObject>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.api();
        let list = match api.list_metadata(params).await {
            Ok(list) => list,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to list {kind}s in namespace {}", self.namespace)
                })
            }
        };
        Ok(list
            .items
            .into_iter()
            .map(|meta| AuxiliaryObject {
                kind,
                name: meta.name_any(),
                labels: meta.labels().clone(),
                created: meta.creation_timestamp().map(|t| t.0),
            })
            .collect())
    }

    async fn delete_named<K>(&self, kind: &str, name: &str, params: &DeleteParams) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.api();
        match api.delete(name, params).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(kind = %kind, name = %name, "Already deleted");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| {
                format!("failed to delete {kind} {name} in namespace {}", self.namespace)
            }),
        }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

fn list_params(selector: &LabelSet) -> Result<ListParams> {
    let selector = selector.to_selector()?;
    let params = ListParams::default();
    Ok(if selector.is_empty() {
        params
    } else {
        params.labels(&selector)
    })
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list(&self, selector: &LabelSet) -> Result<Vec<DynamicObject>> {
        let params = list_params(selector)?;
        match self.records().list(&params).await {
            Ok(list) => Ok(list.items),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| {
                format!(
                    "failed to list {} resources in namespace {} with selector {selector}",
                    self.resource.kind, self.namespace
                )
            }),
        }
    }

    async fn get(&self, name: &str) -> Result<Option<DynamicObject>> {
        self.records().get_opt(name).await.with_context(|| {
            format!("failed to get {} {name}", self.resource.kind)
        })
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let created = self
            .records()
            .create(&PostParams::default(), obj)
            .await
            .with_context(|| {
                format!(
                    "failed to create {} {} in namespace {}",
                    self.resource.kind,
                    obj.name_any(),
                    self.namespace
                )
            })?;
        info!(kind = %self.resource.kind, name = %created.name_any(), "Created resource");
        Ok(created)
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj.name_any();
        self.records()
            .replace(&name, &PostParams::default(), obj)
            .await
            .with_context(|| format!("failed to update {} {name}", self.resource.kind))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let api = self.records();
        if self.clear_finalizers {
            let patch = json!({ "metadata": { "finalizers": [] } });
            match api
                .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => return Ok(()),
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to clear finalizers of {} {name}", self.resource.kind)
                    })
                }
            }
        }
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!(
                    "failed to delete {} {name} in namespace {}",
                    self.resource.kind, self.namespace
                )
            }),
        }
    }
}

#[async_trait]
impl WorkloadStore for KubeStore {
    async fn get_job(&self, name: &str) -> Result<Option<Job>> {
        let jobs: Api<Job> = self.api();
        jobs.get_opt(name).await.with_context(|| {
            format!("failed to query Job {name} in namespace {}", self.namespace)
        })
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..DeleteParams::default()
        };
        self.delete_named::<Job>("Job", name, &params).await
    }

    async fn list_pods(&self, selector: &LabelSet) -> Result<Vec<String>> {
        let pods: Api<Pod> = self.api();
        let params = list_params(selector)?;
        match pods.list_metadata(&params).await {
            Ok(list) => Ok(list.items.iter().map(ResourceExt::name_any).collect()),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| {
                format!(
                    "failed to query Pods in namespace {} with selector {selector}",
                    self.namespace
                )
            }),
        }
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.delete_named::<Pod>("Pod", name, &DeleteParams::default())
            .await
    }
}

#[async_trait]
impl AuxiliaryStore for KubeStore {
    async fn list_auxiliary(
        &self,
        kind: AuxiliaryKind,
        selector: &LabelSet,
    ) -> Result<Vec<AuxiliaryObject>> {
        let params = list_params(selector)?;
        match kind {
            AuxiliaryKind::Lease => self.list_metadata::<Lease>(kind, &params).await,
            AuxiliaryKind::Secret => self.list_metadata::<Secret>(kind, &params).await,
            AuxiliaryKind::ConfigMap => self.list_metadata::<ConfigMap>(kind, &params).await,
        }
    }

    async fn delete_auxiliary(&self, kind: AuxiliaryKind, name: &str) -> Result<()> {
        let params = DeleteParams::default();
        match kind {
            AuxiliaryKind::Lease => self.delete_named::<Lease>("Lease", name, &params).await,
            AuxiliaryKind::Secret => self.delete_named::<Secret>("Secret", name, &params).await,
            AuxiliaryKind::ConfigMap => {
                self.delete_named::<ConfigMap>("ConfigMap", name, &params)
                    .await
            }
        }
    }
}
