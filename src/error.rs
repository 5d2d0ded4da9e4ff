/// Run-level errors
///
/// Everything in here aborts the current pass. Per-object problems
/// (a single upload, delete or move going wrong) never surface as a
/// `SyncError`; they are tallied into the phase reports instead.
use std::path::PathBuf;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to list remote objects under '{prefix}': {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StoreError,
    },

    #[error("remote listing under '{prefix}' did not finish within {pages} pages")]
    ListingUnbounded { prefix: String, pages: usize },

    #[error("mutation log {path} is unreadable: {reason}")]
    MutationLog { path: PathBuf, reason: String },

    #[error("staging directory is unusable: {0}")]
    Staging(#[from] ArtifactError),

    #[error("another run holds the lock at {0}")]
    Locked(PathBuf),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Missing or invalid settings, detected before anything is touched
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("watch directory is not configured")]
    MissingWatchDir,

    #[error("watch directory {0} does not exist or is not a directory")]
    WatchDirNotFound(PathBuf),

    #[error("no bucket is configured; set a bucket name or a bucket directory")]
    MissingBucket,

    #[error("bucket directory {0} does not exist or is not a directory")]
    BucketNotFound(PathBuf),

    #[error("bucket '{bucket}' needs {field}")]
    MissingCredential {
        bucket: String,
        field: &'static str,
    },

    #[error("bucket prefix must not be empty")]
    EmptyPrefix,

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
