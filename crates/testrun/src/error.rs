//! Error types shared by every lifecycle operation.

use thiserror::Error;

/// Errors raised while creating, deleting or garbage collecting test resources
#[derive(Error, Debug)]
pub enum Error {
    #[error("missing required option --{0}")]
    MissingOption(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to render template {path}: {message}")]
    Template { path: String, message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("GitHub API error: {0}")]
    GitHub(#[from] octocrab::Error),

    #[error("job {name} did not succeed: {reason}")]
    JobFailed { name: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{} cleanup operation(s) failed: {}", .failures.len(), .failures.join("; "))]
    Sweep { failures: Vec<String> },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns true when the error (or the error it wraps) is a cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attach operation context to a failing result.
///
/// The wrapped error stays an [`Error`], so variants such as [`Error::Cancelled`]
/// remain matchable through [`Error::is_cancelled`].
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_message() {
        let err: Result<()> = Err(Error::NotFound("Job tf-a".to_string()));
        let wrapped = err.context("failed to reap tf-a").unwrap_err();
        assert_eq!(wrapped.to_string(), "failed to reap tf-a: not found: Job tf-a");
    }

    #[test]
    fn cancellation_is_detected_through_context() {
        let err: Result<()> = Err(Error::Cancelled);
        let wrapped = err.with_context(|| "listing").unwrap_err();
        assert!(wrapped.is_cancelled());
        assert!(!Error::Validation("x".into()).is_cancelled());
    }

    #[test]
    fn sweep_lists_failures() {
        let err = Error::Sweep {
            failures: vec!["a: boom".into(), "b: bang".into()],
        };
        assert_eq!(
            err.to_string(),
            "2 cleanup operation(s) failed: a: boom; b: bang"
        );
    }
}
