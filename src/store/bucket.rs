/// Bucket served through OpenDAL
///
/// One client for both backends the gallery runs against: an S3-compatible
/// object store, or a local directory mounted where the web server reads.
/// OpenDAL is async; a current-thread runtime owned by the bucket drives
/// every call to completion so the pass stays blocking.
use futures_util::TryStreamExt;
use opendal::{services, ErrorKind, Operator};
use std::cell::RefCell;
use std::path::Path;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::{validate_key, ListPage, ObjectStore, StoreError};
use crate::config::{BucketBackend, S3Settings};

/// Full key listing for one prefix, kept until the next mutation
#[derive(Debug)]
struct CachedListing {
    prefix: String,
    keys: Vec<String>,
}

pub struct Bucket {
    op: Operator,
    runtime: Runtime,
    listing: RefCell<Option<CachedListing>>,
}

impl Bucket {
    pub fn open(backend: &BucketBackend) -> Result<Self, StoreError> {
        match backend {
            BucketBackend::Fs { root } => Self::fs(root),
            BucketBackend::S3(s3) => Self::s3(s3),
        }
    }

    /// Bucket rooted at an existing local directory
    pub fn fs(root: &Path) -> Result<Self, StoreError> {
        if !root.is_dir() {
            return Err(StoreError::Backend(format!(
                "bucket root {} is not a directory",
                root.display()
            )));
        }
        let builder = services::Fs::default().root(&root.to_string_lossy());
        Self::with_operator(Operator::new(builder)?.finish())
    }

    pub fn s3(settings: &S3Settings) -> Result<Self, StoreError> {
        let mut builder = services::S3::default()
            .root("/")
            .bucket(&settings.bucket)
            .region(&settings.region)
            .access_key_id(&settings.access_key)
            .secret_access_key(&settings.secret_key);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint(endpoint);
        }
        Self::with_operator(Operator::new(builder)?.finish())
    }

    fn with_operator(op: Operator) -> Result<Self, StoreError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(StoreError::Runtime)?;
        debug!(scheme = %op.info().scheme(), root = %op.info().root(), "bucket ready");
        Ok(Self {
            op,
            runtime,
            listing: RefCell::new(None),
        })
    }

    /// One page straight from the service, resuming after `marker`
    async fn list_after(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let dir = list_root(prefix);
        let listed = match marker {
            Some(marker) => {
                self.op
                    .lister_with(dir)
                    .recursive(true)
                    .start_after(marker)
                    .await
            }
            None => self.op.lister_with(dir).recursive(true).await,
        };
        let mut lister = match listed {
            Ok(lister) => lister,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ListPage::default()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        let mut more = false;
        while let Some(entry) = lister.try_next().await? {
            let path = entry.path();
            if path.ends_with('/') || !path.starts_with(prefix) {
                continue;
            }
            if keys.len() == limit {
                more = true;
                break;
            }
            keys.push(path.to_string());
        }
        let marker = if more { keys.last().cloned() } else { None };
        Ok(ListPage { keys, marker })
    }

    /// Every key under `prefix`, sorted
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = match self.op.list_with(list_root(prefix)).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys: Vec<String> = entries
            .iter()
            .map(|entry| entry.path())
            .filter(|path| !path.ends_with('/') && path.starts_with(prefix))
            .map(str::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Paginate a listing fetched once per prefix, for services that cannot
    /// resume after a key themselves
    fn list_cached(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        let mut cache = self.listing.borrow_mut();
        let stale = cache.as_ref().map_or(true, |c| c.prefix != prefix);
        if stale {
            let keys = self.runtime.block_on(self.list_all(prefix))?;
            debug!(prefix, keys = keys.len(), "listed bucket");
            *cache = Some(CachedListing {
                prefix: prefix.to_string(),
                keys,
            });
        }
        let keys = cache.as_ref().map(|c| c.keys.as_slice()).unwrap_or_default();

        let start = match marker {
            Some(marker) => keys.partition_point(|k| k.as_str() <= marker),
            None => 0,
        };
        let end = (start + limit.max(1)).min(keys.len());
        let page = keys[start..end].to_vec();
        let marker = if end < keys.len() {
            page.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys: page, marker })
    }

    fn invalidate_listing(&self) {
        self.listing.borrow_mut().take();
    }
}

/// Directory to list for a key prefix; the file-name part only filters
fn list_root(prefix: &str) -> &str {
    match prefix.rfind('/') {
        Some(i) => &prefix[..=i],
        None => "/",
    }
}

impl ObjectStore for Bucket {
    fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        if self.op.info().full_capability().list_with_start_after {
            self.runtime
                .block_on(self.list_after(prefix, marker, limit.max(1)))
        } else {
            self.list_cached(prefix, marker, limit)
        }
    }

    fn put_file(&self, key: &str, source: &Path, content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let bytes = std::fs::read(source).map_err(|e| StoreError::Io {
            key: key.to_string(),
            source: e,
        })?;
        let with_type = self.op.info().full_capability().write_with_content_type;
        self.runtime.block_on(async {
            if with_type {
                self.op
                    .write_with(key, bytes)
                    .content_type(content_type)
                    .await
            } else {
                self.op.write(key, bytes).await
            }
        })?;
        self.invalidate_listing();
        debug!(key, content_type, "stored object");
        Ok(())
    }

    /// Deleting a key that is already gone succeeds
    fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.runtime.block_on(self.op.delete(key))?;
        self.invalidate_listing();
        Ok(())
    }
}
