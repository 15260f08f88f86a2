//! Cleanup of test repositories created on the Git host

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::checkpoint;
use crate::error::{Result, ResultExt};
use crate::report::SweepReport;

#[async_trait]
pub trait RepositoryReaper: Send + Sync {
    /// Delete repositories created strictly before `cutoff`
    async fn sweep(&self, cutoff: DateTime<Utc>, cancel: &CancellationToken) -> Result<SweepReport>;
}

/// Deletes old repositories of one GitHub organisation
pub struct GitHubRepositoryReaper {
    client: Octocrab,
    org: String,
}

impl GitHubRepositoryReaper {
    pub fn new(token: &str, org: &str) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .context("failed to create GitHub client")?;
        Ok(Self {
            client,
            org: org.to_string(),
        })
    }
}

#[async_trait]
impl RepositoryReaper for GitHubRepositoryReaper {
    async fn sweep(&self, cutoff: DateTime<Utc>, cancel: &CancellationToken) -> Result<SweepReport> {
        checkpoint(cancel)?;
        let first = self
            .client
            .orgs(&self.org)
            .list_repos()
            .per_page(100)
            .send()
            .await
            .with_context(|| format!("failed to list repositories of {}", self.org))?;
        let repos = self
            .client
            .all_pages(first)
            .await
            .with_context(|| format!("failed to list repositories of {}", self.org))?;
        info!(org = %self.org, count = repos.len(), "Checking repositories");

        let mut report = SweepReport::new();
        for repo in repos {
            let target = format!("repository {}/{}", self.org, repo.name);
            if !is_expired(repo.created_at, cutoff) {
                debug!(repo = %repo.name, created = ?repo.created_at, "Repository is recent");
                report.retained(target);
                continue;
            }
            checkpoint(cancel)?;
            match self.client.repos(&self.org, &repo.name).delete().await {
                Ok(()) => {
                    info!(org = %self.org, repo = %repo.name, "Deleted repository");
                    report.deleted(target);
                }
                Err(e) => report.failed(target, e.into()),
            }
        }
        Ok(report)
    }
}

fn is_expired(created: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    created.is_some_and(|c| c < cutoff)
}
