/// Mutation logs written by the gallery front end
///
/// The front end records photos removed or moved between albums in two JSON
/// arrays. Each pass replays them onto the watched library before scanning,
/// then empties the log:
/// - `index.rs` - stem and directory lookups over the library, built once
/// - `delete.rs` - deletion records
/// - `moves.rs` - album move records
///
/// A log is truncated only after every record read from it has been
/// attempted, so a crash mid-drain replays the whole batch next time.

pub mod delete;
pub mod index;
pub mod moves;

pub use delete::drain_deletions;
pub use index::LibraryIndex;
pub use moves::drain_moves;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Delete,
    Move,
}

impl IntentKind {
    fn verb(self) -> &'static str {
        match self {
            IntentKind::Delete => "deleted",
            IntentKind::Move => "moved",
        }
    }
}

/// Why a single record was not applied. Never fatal to the drain.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("unusable reference '{0}'")]
    BadReference(String),

    #[error("no local file with stem '{0}'")]
    NoMatch(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("{0} already exists")]
    DestinationExists(PathBuf),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RecordError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RecordError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Outcome of draining one log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub kind: IntentKind,
    /// Records read from the log
    pub records: usize,
    /// Files deleted or moved
    pub applied: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn empty(kind: IntentKind) -> Self {
        Self {
            kind,
            records: 0,
            applied: 0,
            failed: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn fail(&mut self) {
        self.failed += 1;
    }
}

impl fmt::Display for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, failed {} of {} records",
            self.kind.verb(),
            self.applied,
            self.failed,
            self.records
        )
    }
}

/// A JSON array of records on disk
#[derive(Debug, Clone)]
pub struct MutationLog {
    path: PathBuf,
}

impl MutationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw records. An absent or blank file is an empty log; anything that
    /// is not a JSON array is an error and the file is left untouched.
    pub fn read_raw(&self) -> Result<Vec<Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no mutation log");
                return Ok(Vec::new());
            }
            Err(e) => return Err(SyncError::io(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(records)) => Ok(records),
            Ok(other) => Err(self.malformed(format!(
                "expected a JSON array, found {}",
                kind_of(&other)
            ))),
            Err(e) => Err(self.malformed(e.to_string())),
        }
    }

    /// Replace the log with an empty array, atomically
    pub fn truncate(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| SyncError::io(parent, e))?;
        tmp.write_all(b"[]")
            .and_then(|_| tmp.flush())
            .map_err(|e| SyncError::io(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| SyncError::io(&self.path, e.error))?;
        debug!(path = %self.path.display(), "mutation log truncated");
        Ok(())
    }

    fn malformed(&self, reason: String) -> SyncError {
        SyncError::MutationLog {
            path: self.path.clone(),
            reason,
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Shared drain loop: read, apply each typed record, truncate.
///
/// Records that do not deserialize count as failed. Truncation happens
/// only when at least one record was read.
fn drain<T, F>(log: &MutationLog, kind: IntentKind, mut apply: F) -> Result<DrainReport>
where
    T: DeserializeOwned + fmt::Debug,
    F: FnMut(&T) -> std::result::Result<(), RecordError>,
{
    let raw = log.read_raw()?;
    let mut report = DrainReport::empty(kind);
    if raw.is_empty() {
        return Ok(report);
    }

    for (position, value) in raw.into_iter().enumerate() {
        report.records += 1;
        let record: T = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                warn!(position, error = %e, "skipping malformed mutation record");
                report.fail();
                continue;
            }
        };
        match apply(&record) {
            Ok(()) => report.applied += 1,
            Err(e) => {
                warn!(?record, error = %e, "mutation record not applied");
                report.fail();
            }
        }
    }

    log.truncate()?;
    info!(%report, log = %log.path().display(), "mutation log drained");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_absent_and_blank_logs_are_empty() {
        let dir = TempDir::new().unwrap();
        let log = MutationLog::new(dir.path().join("missing.json"));
        assert!(log.read_raw().unwrap().is_empty());

        fs::write(dir.path().join("blank.json"), "  \n").unwrap();
        let log = MutationLog::new(dir.path().join("blank.json"));
        assert!(log.read_raw().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_log_is_an_error_and_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deleted.json");
        fs::write(&path, r#"{"id": 1}"#).unwrap();

        let err = MutationLog::new(&path).read_raw().unwrap_err();
        assert!(matches!(err, SyncError::MutationLog { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"id": 1}"#);
    }

    #[test]
    fn test_truncate_writes_empty_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("moved.json");
        fs::write(&path, r#"[{"filename": "a.webp"}]"#).unwrap();

        let log = MutationLog::new(&path);
        log.truncate().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert!(log.read_raw().unwrap().is_empty());
    }

    #[test]
    fn test_record_errors_are_tallied_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("moved.json");
        fs::write(&path, r#"["a", "b", "c"]"#).unwrap();

        let mut seen = Vec::new();
        let report = drain(&MutationLog::new(&path), IntentKind::Move, |name: &String| {
            seen.push(name.clone());
            match name.as_str() {
                "a" => Ok(()),
                "b" => Err(RecordError::NoMatch(name.clone())),
                _ => Err(RecordError::DestinationExists(dir.path().join(name))),
            }
        })
        .unwrap();

        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!((report.records, report.applied, report.failed), (3, 1, 2));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert_eq!(
            RecordError::NoMatch("img1".into()).to_string(),
            "no local file with stem 'img1'"
        );
    }

    #[test]
    fn test_report_display() {
        let report = DrainReport {
            kind: IntentKind::Move,
            records: 3,
            applied: 2,
            failed: 1,
        };
        assert_eq!(report.to_string(), "moved 2, failed 1 of 3 records");
    }
}
