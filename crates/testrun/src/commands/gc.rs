//! `gc`: remove expired, flagged and superseded test resources plus stale state

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::Clients;
use crate::auxiliary::{default_targets, AuxiliaryStateReaper};
use crate::checkpoint;
use crate::config::Settings;
use crate::error::{Error, Result, ResultExt};
use crate::labels::LABEL_KIND;
use crate::policy::{GcPolicy, Verdict};
use crate::report::SweepReport;
use crate::resource::TestResource;
use crate::selector::LabelSet;

#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Resources considered; defaults to the kind marker
    pub selector: Option<LabelSet>,
    pub ttl: Duration,
    /// Overrides the configured versions ConfigMap prefix
    pub config_map_prefix: Option<String>,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            selector: None,
            ttl: Duration::hours(2),
            config_map_prefix: None,
        }
    }
}

/// Sweep the namespace as of `now`.
///
/// Per-item failures end up in the returned report rather than stopping the
/// sweep; callers turn them into an error with [`SweepReport::into_result`].
pub async fn run_gc(
    clients: &Clients,
    settings: &Settings,
    options: &GcOptions,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<SweepReport> {
    let selector = options
        .selector
        .clone()
        .unwrap_or_else(|| LabelSet::new().with(LABEL_KIND, &settings.kind_label_value));
    if options.ttl < Duration::zero() {
        return Err(Error::Validation(format!(
            "duration must not be negative, got {}",
            options.ttl
        )));
    }
    let cutoff = now.checked_sub_signed(options.ttl).ok_or_else(|| {
        Error::Validation(format!("duration {} reaches past the earliest time", options.ttl))
    })?;
    let policy = GcPolicy::new(options.ttl);

    checkpoint(cancel)?;
    let objects = clients
        .resources
        .list(&selector)
        .await
        .with_context(|| {
            format!(
                "failed to list test resources in namespace {} with selector {selector}",
                clients.namespace
            )
        })?;
    let resources: Vec<TestResource> = objects.iter().map(TestResource::from_object).collect();
    info!(count = resources.len(), selector = %selector, "Evaluating test resources");

    let retirer = clients.retirer();
    let mut report = SweepReport::new();
    for (resource, verdict) in policy.plan(&resources, now) {
        let name = &resource.name;
        match verdict {
            Verdict::Retain(_) => {
                info!(name = %name, verdict = %verdict, "Retaining test resource");
                report.retained(name.clone());
            }
            Verdict::Delete(_) => {
                info!(name = %name, verdict = %verdict, "Deleting test resource");
                match retirer.retire(name, cancel).await {
                    Ok(_) => report.deleted(name.clone()),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        error!(name = %name, error = %e, "Failed to delete test resource");
                        report.failed(name.clone(), e);
                    }
                }
            }
        }
    }

    let mut auxiliary = settings.auxiliary.clone();
    if let Some(prefix) = &options.config_map_prefix {
        auxiliary.config_map_prefix.clone_from(prefix);
    }
    let sweeper = AuxiliaryStateReaper::new(clients.auxiliary.clone(), default_targets(&auxiliary)?);
    report.merge(sweeper.sweep(cutoff, cancel).await?);

    match &clients.repositories {
        Some(repositories) => match repositories.sweep(cutoff, cancel).await {
            Ok(swept) => report.merge(swept),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => report.failed("repositories", e),
        },
        None => info!("No GitHub organisation configured, not cleaning repositories"),
    }

    Ok(report)
}
