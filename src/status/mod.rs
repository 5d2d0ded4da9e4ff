/// Run status for the gallery dashboard
///
/// Each phase of a pass appends entries through a `StatusSink` handed to it;
/// nothing is shared between phases beyond the sink itself.
/// - `sqlite.rs` - the dashboard's `updates` table

pub mod sqlite;

pub use sqlite::SqliteStatusSink;

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("status database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which part of the pass an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Configuration and locking, before any phase starts
    Run,
    DeleteSync,
    MoveSync,
    Scan,
    Listing,
    Upload,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Run => "run",
            Phase::DeleteSync => "delete_sync",
            Phase::MoveSync => "move_sync",
            Phase::Scan => "scan",
            Phase::Listing => "listing",
            Phase::Upload => "upload",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Info,
    Success,
    Warning,
    Error,
    PartialSuccess,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Info => "info",
            Status::Success => "success",
            Status::Warning => "warning",
            Status::Error => "error",
            Status::PartialSuccess => "partial_success",
        }
    }

    /// Outcome of a batch from its success and failure counts
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => Status::Success,
            (0, _) => Status::Error,
            _ => Status::PartialSuccess,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub phase: Phase,
    pub status: Status,
    pub message: String,
    /// Percent complete, 0-100
    pub progress: Option<f64>,
    pub at: DateTime<Utc>,
}

impl StatusEntry {
    pub fn new(phase: Phase, status: Status, message: impl Into<String>) -> Self {
        Self {
            phase,
            status,
            message: message.into(),
            progress: None,
            at: Utc::now(),
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 100.0));
        self
    }
}

/// Append-only destination for status entries
pub trait StatusSink {
    fn record(&self, entry: &StatusEntry) -> Result<(), StatusError>;
}

/// Sends entries to the tracing log; used when no dashboard database is
/// configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn record(&self, entry: &StatusEntry) -> Result<(), StatusError> {
        let phase = entry.phase.as_str();
        let progress = entry.progress.unwrap_or(-1.0);
        match entry.status {
            Status::Error => error!(phase, progress, "{}", entry.message),
            Status::Warning | Status::PartialSuccess => {
                warn!(phase, status = %entry.status, progress, "{}", entry.message)
            }
            Status::Info | Status::Success => {
                info!(phase, status = %entry.status, progress, "{}", entry.message)
            }
        }
        Ok(())
    }
}

/// Thin front over a sink. A sink that fails is logged and otherwise
/// ignored; status reporting never changes the outcome of a pass.
#[derive(Clone, Copy)]
pub struct StatusReporter<'a> {
    sink: &'a dyn StatusSink,
}

impl<'a> StatusReporter<'a> {
    pub fn new(sink: &'a dyn StatusSink) -> Self {
        Self { sink }
    }

    pub fn post(&self, entry: StatusEntry) {
        if let Err(e) = self.sink.record(&entry) {
            warn!(phase = entry.phase.as_str(), error = %e, "could not record status");
        }
    }

    pub fn info(&self, phase: Phase, message: impl Into<String>, progress: f64) {
        self.post(StatusEntry::new(phase, Status::Info, message).with_progress(progress));
    }
}
