/// Remote object storage
///
/// The gallery bucket is a flat key space. Everything the reconciler needs
/// from it is paginated listing, uploading a file under a key and deleting a
/// key. Calls are blocking and never retried here.
///
/// - `bucket.rs` - OpenDAL bucket, S3-compatible or a local directory
/// - `memory.rs` - in-memory bucket for tests

pub mod bucket;
#[cfg(test)]
pub mod memory;

pub use bucket::Bucket;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("IO error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Service(#[from] opendal::Error),

    #[error("cannot start the storage runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// One page of a key listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Continuation marker; `None` once the listing is exhausted
    pub marker: Option<String>,
}

pub trait ObjectStore {
    /// List up to `limit` keys starting with `prefix`, in key order, after
    /// `marker` when given. An absent prefix is an empty listing.
    fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError>;

    /// Store the contents of `source` under `key`, replacing any object there
    fn put_file(&self, key: &str, source: &Path, content_type: &str) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Keys are `/`-separated relative paths without empty, `.` or `..` segments
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
