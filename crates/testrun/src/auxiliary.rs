//! Age-based sweep of the state objects provisioning leaves behind

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::checkpoint;
use crate::config::AuxiliaryConfig;
use crate::error::{Result, ResultExt};
use crate::labels::{is_truthy, LABEL_KEEP};
use crate::report::SweepReport;
use crate::selector::LabelSet;
use crate::store::{AuxiliaryKind, AuxiliaryObject, AuxiliaryStore};

/// One class of auxiliary objects to sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryTarget {
    pub kind: AuxiliaryKind,
    pub selector: LabelSet,
    pub name_prefix: Option<String>,
}

impl AuxiliaryTarget {
    fn admits(&self, obj: &AuxiliaryObject) -> bool {
        self.name_prefix
            .as_deref()
            .is_none_or(|prefix| obj.name.starts_with(prefix))
    }
}

/// Build the default targets: state leases and secrets by marker, versions ConfigMaps by prefix
pub fn default_targets(config: &AuxiliaryConfig) -> Result<Vec<AuxiliaryTarget>> {
    let marker = LabelSet::parse(&config.state_selector)?;
    let prefix = Some(config.config_map_prefix.clone()).filter(|p| !p.is_empty());
    Ok(vec![
        AuxiliaryTarget {
            kind: AuxiliaryKind::Lease,
            selector: marker.clone(),
            name_prefix: None,
        },
        AuxiliaryTarget {
            kind: AuxiliaryKind::Secret,
            selector: marker,
            name_prefix: None,
        },
        AuxiliaryTarget {
            kind: AuxiliaryKind::ConfigMap,
            selector: LabelSet::new(),
            name_prefix: prefix,
        },
    ])
}

pub struct AuxiliaryStateReaper {
    store: Arc<dyn AuxiliaryStore>,
    targets: Vec<AuxiliaryTarget>,
}

impl AuxiliaryStateReaper {
    #[must_use]
    pub fn new(store: Arc<dyn AuxiliaryStore>, targets: Vec<AuxiliaryTarget>) -> Self {
        Self { store, targets }
    }

    /// Delete every targeted object created strictly before `cutoff` that is not marked keep.
    ///
    /// A failing listing or deletion is recorded and the sweep moves on.
    pub async fn sweep(&self, cutoff: DateTime<Utc>, cancel: &CancellationToken) -> Result<SweepReport> {
        let mut report = SweepReport::new();
        for target in &self.targets {
            checkpoint(cancel)?;
            let objects = match self
                .store
                .list_auxiliary(target.kind, &target.selector)
                .await
                .with_context(|| format!("failed to list {}s", target.kind))
            {
                Ok(objects) => objects,
                Err(e) => {
                    report.failed(format!("{}s", target.kind), e);
                    continue;
                }
            };

            for obj in objects.iter().filter(|o| target.admits(o)) {
                let label = format!("{} {}", obj.kind, obj.name);
                if obj.labels.get(LABEL_KEEP).is_some_and(|v| is_truthy(v)) {
                    debug!(kind = %obj.kind, name = %obj.name, "Keeping object marked keep");
                    report.retained(label);
                    continue;
                }
                if !obj.created.is_some_and(|created| created < cutoff) {
                    report.retained(label);
                    continue;
                }
                checkpoint(cancel)?;
                match self.store.delete_auxiliary(obj.kind, &obj.name).await {
                    Ok(()) => {
                        info!(kind = %obj.kind, name = %obj.name, "Deleted expired state object");
                        report.deleted(label);
                    }
                    Err(e) => report.failed(label, e),
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::auxiliary;
    use crate::store::InMemoryStore;
    use chrono::Duration;

    fn state() -> LabelSet {
        LabelSet::new().with("tfstate", "true")
    }

    fn seeded(now: DateTime<Utc>) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new("jx"));
        let old = now - Duration::hours(5);
        let recent = now - Duration::minutes(5);
        store.insert_auxiliary(auxiliary(AuxiliaryKind::Lease, "lock-old", state(), old));
        store.insert_auxiliary(auxiliary(AuxiliaryKind::Lease, "lock-new", state(), recent));
        store.insert_auxiliary(auxiliary(AuxiliaryKind::Lease, "unrelated", LabelSet::new(), old));
        store.insert_auxiliary(auxiliary(AuxiliaryKind::Secret, "tfstate-old", state(), old));
        store.insert_auxiliary(auxiliary(
            AuxiliaryKind::Secret,
            "tfstate-kept",
            state().with("keep", "yes"),
            old,
        ));
        store.insert_auxiliary(auxiliary(
            AuxiliaryKind::ConfigMap,
            "tf-jx3-versions-abc",
            LabelSet::new(),
            old,
        ));
        store.insert_auxiliary(auxiliary(AuxiliaryKind::ConfigMap, "other-cm", LabelSet::new(), old));
        store
    }

    #[tokio::test]
    async fn sweeps_expired_targets_only() {
        let now = Utc::now();
        let store = seeded(now);
        let targets = default_targets(&AuxiliaryConfig::default()).unwrap();
        let reaper = AuxiliaryStateReaper::new(store.clone(), targets);

        let report = reaper
            .sweep(now - Duration::hours(2), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(
            report.deleted,
            vec!["Lease lock-old", "Secret tfstate-old", "ConfigMap tf-jx3-versions-abc"]
        );
        assert_eq!(store.auxiliary_names(AuxiliaryKind::Lease), vec!["lock-new", "unrelated"]);
        assert_eq!(store.auxiliary_names(AuxiliaryKind::Secret), vec!["tfstate-kept"]);
        assert_eq!(store.auxiliary_names(AuxiliaryKind::ConfigMap), vec!["other-cm"]);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_sweep() {
        let now = Utc::now();
        let store = seeded(now);
        store.fail_deletes_of("lock-old");
        let targets = default_targets(&AuxiliaryConfig::default()).unwrap();
        let reaper = AuxiliaryStateReaper::new(store.clone(), targets);

        let report = reaper
            .sweep(now - Duration::hours(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, "Lease lock-old");
        assert_eq!(report.deleted.len(), 2);
    }

    #[test]
    fn malformed_state_selector_is_rejected() {
        let config = AuxiliaryConfig {
            state_selector: "tfstate".to_string(),
            ..AuxiliaryConfig::default()
        };
        assert!(default_targets(&config).is_err());
    }
}
