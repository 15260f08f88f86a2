//! Retain/delete decisions for garbage collection.
//!
//! Rules are applied in order and the first match wins:
//!
//! 1. `keep` retains the resource
//! 2. `delete` removes it
//! 3. older than the TTL removes it (skipped when the creation time is unknown)
//! 4. a newer build of the same lineage removes it (both build numbers must be positive)
//! 5. otherwise it is retained
//!
//! Evaluation never touches the store; the caller acts on the verdicts.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::resource::TestResource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetainReason {
    Keep,
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteReason {
    MarkedForDeletion,
    Expired { age: Duration },
    Superseded { by: String, build: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Retain(RetainReason),
    Delete(DeleteReason),
}

impl Verdict {
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete(_))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain(RetainReason::Keep) => write!(f, "retained: keep flag set"),
            Self::Retain(RetainReason::Current) => write!(f, "retained: current"),
            Self::Delete(DeleteReason::MarkedForDeletion) => {
                write!(f, "delete: marked for deletion")
            }
            Self::Delete(DeleteReason::Expired { age }) => {
                write!(f, "delete: expired after {}m", age.num_minutes())
            }
            Self::Delete(DeleteReason::Superseded { by, build }) => {
                write!(f, "delete: superseded by {by} (build {build})")
            }
        }
    }
}

/// Garbage collection policy for one namespace snapshot
#[derive(Debug, Clone, Copy)]
pub struct GcPolicy {
    ttl: Duration,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(2),
        }
    }
}

impl GcPolicy {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Decide the fate of `resource` given every resource of the snapshot
    #[must_use]
    pub fn evaluate(&self, resource: &TestResource, peers: &[TestResource], now: DateTime<Utc>) -> Verdict {
        if resource.keep {
            return Verdict::Retain(RetainReason::Keep);
        }
        if resource.delete {
            return Verdict::Delete(DeleteReason::MarkedForDeletion);
        }
        if let Some(created) = resource.created {
            let age = now - created;
            if age > self.ttl {
                return Verdict::Delete(DeleteReason::Expired { age });
            }
        }
        if let Some(newer) = self.newest_superseding(resource, peers) {
            return Verdict::Delete(DeleteReason::Superseded {
                by: newer.name.clone(),
                build: newer.build_number,
            });
        }
        Verdict::Retain(RetainReason::Current)
    }

    /// Verdicts for every resource, in input order
    #[must_use]
    pub fn plan<'a>(
        &self,
        resources: &'a [TestResource],
        now: DateTime<Utc>,
    ) -> Vec<(&'a TestResource, Verdict)> {
        resources
            .iter()
            .map(|r| (r, self.evaluate(r, resources, now)))
            .collect()
    }

    fn newest_superseding<'a>(
        &self,
        resource: &TestResource,
        peers: &'a [TestResource],
    ) -> Option<&'a TestResource> {
        let lineage = resource.lineage.as_ref()?;
        if resource.build_number <= 0 {
            return None;
        }
        let mut newest: Option<&TestResource> = None;
        for peer in peers {
            if peer.name == resource.name || peer.lineage.as_ref() != Some(lineage) {
                continue;
            }
            if peer.build_number <= 0 {
                warn!(
                    name = %peer.name,
                    lineage = %lineage,
                    "Resource has no valid build number, not using it to supersede peers"
                );
                continue;
            }
            if peer.supersedes(resource)
                && newest.is_none_or(|n| peer.build_number > n.build_number)
            {
                newest = Some(peer);
            }
        }
        newest
    }
}
