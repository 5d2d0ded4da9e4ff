/// Applying a plan against the bucket
///
/// Deletes first, then uploads. Every object stands alone: a failure is
/// logged, recorded and the batch moves on. Nothing here retries.
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::plan::ReconciliationPlan;
use crate::artifact::{ArtifactError, DerivedKey};
use crate::store::{ObjectStore, StoreError};

/// Produces the local file to upload for a key
pub trait ArtifactSource {
    fn materialize(&mut self, key: &DerivedKey) -> Result<PathBuf, ArtifactError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Upload => write!(f, "upload"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Why one object was not synced
#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("could not produce artifact: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One object that did not make it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFailure {
    pub key: DerivedKey,
    pub operation: Operation,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failures: Vec<ObjectFailure>,
}

impl ReconcileReport {
    pub fn succeeded(&self) -> usize {
        self.uploaded + self.deleted
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploaded {}, failed {}, skipped {}, deleted {}",
            self.uploaded, self.failed, self.skipped, self.deleted
        )
    }
}

/// Position within the apply phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyProgress {
    pub done: usize,
    pub total: usize,
}

pub struct Reconciler<'a> {
    store: &'a dyn ObjectStore,
    prefix: &'a str,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ObjectStore, prefix: &'a str) -> Self {
        Self { store, prefix }
    }

    /// Apply `plan`. Always runs to the end of both batches.
    pub fn apply(
        &self,
        plan: &ReconciliationPlan,
        aggregate: Option<&DerivedKey>,
        source: &mut dyn ArtifactSource,
        mut progress: impl FnMut(ApplyProgress),
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            skipped: plan.skip.len(),
            ..Default::default()
        };
        let total = plan.delete.len() + plan.upload.len();
        let mut done = 0;

        for key in &plan.delete {
            match self.store.delete(&key.remote(self.prefix)) {
                Ok(()) => {
                    debug!(key = %key, "deleted remote object");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "remote delete failed");
                    record(&mut report, key, Operation::Delete, e.into());
                }
            }
            done += 1;
            progress(ApplyProgress { done, total });
        }

        for key in plan.upload_order(aggregate) {
            match self.upload(key, source) {
                Ok(()) => {
                    debug!(key = %key, "uploaded");
                    report.uploaded += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "upload failed");
                    record(&mut report, key, Operation::Upload, e);
                }
            }
            done += 1;
            progress(ApplyProgress { done, total });
        }

        info!(%report, "reconciliation applied");
        report
    }

    fn upload(&self, key: &DerivedKey, source: &mut dyn ArtifactSource) -> Result<(), ObjectError> {
        let path = source.materialize(key)?;
        self.store
            .put_file(&key.remote(self.prefix), &path, key.content_type())?;
        Ok(())
    }
}

fn record(report: &mut ReconcileReport, key: &DerivedKey, operation: Operation, error: ObjectError) {
    report.failed += 1;
    report.failures.push(ObjectFailure {
        key: key.clone(),
        operation,
        reason: error.to_string(),
    });
}
