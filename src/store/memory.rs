/// In-memory bucket with injectable failures
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::{validate_key, ListPage, ObjectStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryBucket {
    objects: RefCell<BTreeMap<String, Vec<u8>>>,
    failing_puts: RefCell<BTreeSet<String>>,
    failing_deletes: RefCell<BTreeSet<String>>,
    failing_listing: Cell<bool>,
    list_calls: Cell<usize>,
}

impl MemoryBucket {
    pub fn with_keys(keys: &[&str]) -> Self {
        let bucket = Self::default();
        for key in keys {
            bucket
                .objects
                .borrow_mut()
                .insert(key.to_string(), Vec::new());
        }
        bucket
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.borrow().keys().cloned().collect()
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.borrow().get(key).cloned()
    }

    pub fn fail_put(&self, key: &str) {
        self.failing_puts.borrow_mut().insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.borrow_mut().insert(key.to_string());
    }

    pub fn fail_listing(&self) {
        self.failing_listing.set(true);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.get()
    }
}

impl ObjectStore for MemoryBucket {
    fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, StoreError> {
        self.list_calls.set(self.list_calls.get() + 1);
        if self.failing_listing.get() {
            return Err(StoreError::Backend("listing unavailable".to_string()));
        }

        let objects = self.objects.borrow();
        let mut matching = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| marker.map_or(true, |m| k.as_str() > m));
        let keys: Vec<String> = matching.by_ref().take(limit.max(1)).cloned().collect();
        let marker = if matching.next().is_some() {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, marker })
    }

    fn put_file(&self, key: &str, source: &Path, _content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        if self.failing_puts.borrow().contains(key) {
            return Err(StoreError::Backend(format!("put rejected for {key}")));
        }
        let bytes = std::fs::read(source).map_err(|e| StoreError::Io {
            key: key.to_string(),
            source: e,
        })?;
        self.objects.borrow_mut().insert(key.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_deletes.borrow().contains(key) {
            return Err(StoreError::Backend(format!("delete rejected for {key}")));
        }
        self.objects
            .borrow_mut()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
