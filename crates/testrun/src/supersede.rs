//! Create-time removal of earlier resources of the same lineage

use std::sync::Arc;

use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint;
use crate::error::{Result, ResultExt};
use crate::labels::LABEL_KIND;
use crate::reaper::Retirer;
use crate::selector::LabelSet;
use crate::store::ResourceStore;

/// Removes every resource matching a lineage selector before a new one is submitted
#[derive(Clone)]
pub struct SupersessionCleaner {
    store: Arc<dyn ResourceStore>,
    retirer: Retirer,
}

impl SupersessionCleaner {
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, retirer: Retirer) -> Self {
        Self { store, retirer }
    }

    /// Retire all resources labelled with `lineage`, returning their names.
    ///
    /// Stops at the first failure. A selector carrying nothing but the kind
    /// marker would match every test resource, so it is refused with a warning.
    pub async fn clean(&self, lineage: &LabelSet, cancel: &CancellationToken) -> Result<Vec<String>> {
        if lineage.iter().all(|(key, _)| key == LABEL_KIND) {
            warn!(selector = %lineage, "No lineage labels, skipping removal of previous resources");
            return Ok(Vec::new());
        }

        checkpoint(cancel)?;
        let previous = self
            .store
            .list(lineage)
            .await
            .with_context(|| format!("failed to find previous resources with selector {lineage}"))?;

        let mut removed = Vec::with_capacity(previous.len());
        for obj in previous {
            let name = obj.name_any();
            self.retirer.retire(&name, cancel).await?;
            info!(name = %name, selector = %lineage, "Removed previous resource of the same lineage");
            removed.push(name);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaper::ActiveWorkReaper;
    use crate::store::InMemoryStore;
    use kube::api::DynamicObject;

    fn record(name: &str, pr: &str) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "tf.isaaguilar.com/v1alpha1",
            "kind": "Terraform",
            "metadata": {
                "name": name,
                "labels": {
                    "kind": "jx-test",
                    "owner": "myowner",
                    "repo": "myrepo",
                    "pr": pr,
                    "context": "myctx",
                },
            },
        }))
        .unwrap()
    }

    fn cleaner(store: &Arc<InMemoryStore>) -> SupersessionCleaner {
        let retirer = Retirer::new(store.clone(), ActiveWorkReaper::new(store.clone()));
        SupersessionCleaner::new(store.clone(), retirer)
    }

    fn lineage(pr: &str) -> LabelSet {
        LabelSet::new()
            .with("kind", "jx-test")
            .with("owner", "myowner")
            .with("repo", "myrepo")
            .with("pr", pr)
            .with("context", "myctx")
    }

    #[tokio::test]
    async fn removes_only_the_matching_lineage() {
        let store = Arc::new(InMemoryStore::new("jx"));
        store.insert_resource(record("tf-myrepo-pr456-myctx-1", "pr-456"));
        store.insert_resource(record("tf-myrepo-pr456-myctx-2", "pr-456"));
        store.insert_resource(record("tf-myrepo-pr457-myctx-1", "pr-457"));

        let removed = cleaner(&store)
            .clean(&lineage("pr-456"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(removed, vec!["tf-myrepo-pr456-myctx-1", "tf-myrepo-pr456-myctx-2"]);
        assert_eq!(store.resource_names(), vec!["tf-myrepo-pr457-myctx-1"]);
    }

    #[tokio::test]
    async fn kind_only_selector_is_refused() {
        let store = Arc::new(InMemoryStore::new("jx"));
        store.insert_resource(record("tf-a", "pr-1"));

        let removed = cleaner(&store)
            .clean(&LabelSet::new().with("kind", "jx-test"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(removed.is_empty());
        assert_eq!(store.resource_names(), vec!["tf-a"]);
    }

    #[tokio::test]
    async fn first_failure_is_fatal() {
        let store = Arc::new(InMemoryStore::new("jx"));
        store.insert_resource(record("tf-a", "pr-1"));
        store.insert_resource(record("tf-b", "pr-1"));
        store.fail_deletes_of("tf-a");

        let err = cleaner(&store)
            .clean(&lineage("pr-1"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("tf-a"));
        assert_eq!(store.resource_names(), vec!["tf-a", "tf-b"]);
    }
}
