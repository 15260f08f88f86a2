//! Outcome of a sweep that keeps going after individual failures

use crate::error::{Error, Result};

/// A single item that could not be cleaned up
#[derive(Debug)]
pub struct SweepFailure {
    pub target: String,
    pub error: Error,
}

/// What a sweep deleted, kept, and failed to delete
#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub retained: Vec<String>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted(&mut self, target: impl Into<String>) {
        self.deleted.push(target.into());
    }

    pub fn retained(&mut self, target: impl Into<String>) {
        self.retained.push(target.into());
    }

    pub fn failed(&mut self, target: impl Into<String>, error: Error) {
        self.failures.push(SweepFailure {
            target: target.into(),
            error,
        });
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: Self) {
        self.deleted.extend(other.deleted);
        self.retained.extend(other.retained);
        self.failures.extend(other.failures);
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn collected failures into one aggregate error
    pub fn into_result(self) -> Result<Self> {
        if self.is_clean() {
            return Ok(self);
        }
        Err(Error::Sweep {
            failures: self
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.target, f.error))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_passes_through() {
        let mut report = SweepReport::new();
        report.deleted("Terraform tf-a");
        report.retained("Terraform tf-b");
        let report = report.into_result().unwrap();
        assert_eq!(report.deleted, vec!["Terraform tf-a"]);
    }

    #[test]
    fn failures_are_aggregated_across_merges() {
        let mut report = SweepReport::new();
        report.failed("Terraform tf-a", Error::Store("boom".into()));
        let mut aux = SweepReport::new();
        aux.deleted("Lease l1");
        aux.failed("Secret s1", Error::Store("bang".into()));
        report.merge(aux);

        assert_eq!(report.deleted.len(), 1);
        match report.into_result() {
            Err(Error::Sweep { failures }) => {
                assert_eq!(
                    failures,
                    vec![
                        "Terraform tf-a: store error: boom".to_string(),
                        "Secret s1: store error: bang".to_string(),
                    ]
                );
            }
            other => panic!("expected sweep error, got {other:?}"),
        }
    }
}
