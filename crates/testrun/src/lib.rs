//! Lifecycle management for ephemeral per-build test infrastructure.
//!
//! Test resources are labelled records in a Kubernetes namespace, one per
//! pipeline build. `create` replaces every earlier resource of the same
//! lineage before submitting a new one, and `gc` removes resources that are
//! expired, marked for deletion or superseded by a newer build. Any
//! provisioning Job still running for a resource is terminated before the
//! resource itself is deleted.

pub mod auxiliary;
pub mod commands;
pub mod config;
pub mod env;
pub mod error;
pub mod labels;
pub mod policy;
pub mod reaper;
pub mod repos;
pub mod report;
pub mod resource;
pub mod runner;
pub mod selector;
pub mod store;
pub mod supersede;
pub mod template;
pub mod watch;

pub use commands::Clients;
pub use config::Settings;
pub use error::{Error, Result, ResultExt};
pub use labels::{LabelKeyBuilder, Lineage};
pub use policy::{GcPolicy, Verdict};
pub use report::SweepReport;
pub use resource::TestResource;
pub use selector::LabelSet;

use tokio_util::sync::CancellationToken;

/// Fail with [`Error::Cancelled`] once `cancel` has fired
pub(crate) fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
