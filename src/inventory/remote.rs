/// Remote inventory: the bucket's key set under the gallery prefix
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::artifact::{is_thumbnail, DerivedKey};
use crate::error::{Result, SyncError};
use crate::store::ObjectStore;

/// Keys requested per listing call
pub const PAGE_LIMIT: usize = 1000;

/// Listing pages allowed before a pass gives up
pub const DEFAULT_MAX_PAGES: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInventory {
    /// Published keys, relative to the prefix
    pub tracked: BTreeSet<DerivedKey>,
    /// Thumbnail keys, deleted whatever the local state
    pub stale_thumbnails: BTreeSet<DerivedKey>,
    pub pages: usize,
}

/// Page through every key under `prefix`.
///
/// A listing error aborts the pass: treating an unreachable bucket as empty
/// would re-upload the whole gallery. So does a listing that is still going
/// after `max_pages` pages or that hands back the marker it was given.
pub fn list_all(
    store: &dyn ObjectStore,
    prefix: &str,
    max_pages: usize,
) -> Result<RemoteInventory> {
    let mut inventory = RemoteInventory::default();
    let mut marker: Option<String> = None;

    loop {
        let page = store
            .list_page(prefix, marker.as_deref(), PAGE_LIMIT)
            .map_err(|source| SyncError::Listing {
                prefix: prefix.to_string(),
                source,
            })?;
        inventory.pages += 1;

        for key in page.keys {
            let Some(relative) = key.strip_prefix(prefix) else {
                trace!(%key, "listed key outside prefix");
                continue;
            };
            if relative.is_empty() {
                continue;
            }
            if is_thumbnail(relative) {
                inventory.stale_thumbnails.insert(DerivedKey::new(relative));
            } else {
                inventory.tracked.insert(DerivedKey::new(relative));
            }
        }

        match page.marker {
            None => break,
            Some(next) => {
                if inventory.pages >= max_pages || marker.as_deref() == Some(next.as_str()) {
                    return Err(SyncError::ListingUnbounded {
                        prefix: prefix.to_string(),
                        pages: inventory.pages,
                    });
                }
                marker = Some(next);
            }
        }
    }

    debug!(
        prefix,
        tracked = inventory.tracked.len(),
        thumbnails = inventory.stale_thumbnails.len(),
        pages = inventory.pages,
        "remote inventory listed"
    );
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBucket;
    use crate::store::{ListPage, StoreError};
    use std::path::Path;

    fn keys(set: &BTreeSet<DerivedKey>) -> Vec<&str> {
        set.iter().map(|k| k.as_str()).collect()
    }

    #[test]
    fn test_partitions_thumbnails() {
        let bucket = MemoryBucket::with_keys(&[
            "gallery/AlbumA/img1.webp",
            "gallery/AlbumA/img1_thumbnail.webp",
            "gallery/AlbumB/X_THUMBNAIL.jpg",
            "gallery/exif_data.json",
            "elsewhere/img.webp",
        ]);

        let inventory = list_all(&bucket, "gallery/", DEFAULT_MAX_PAGES).unwrap();
        assert_eq!(
            keys(&inventory.tracked),
            vec!["AlbumA/img1.webp", "exif_data.json"]
        );
        assert_eq!(
            keys(&inventory.stale_thumbnails),
            vec!["AlbumA/img1_thumbnail.webp", "AlbumB/X_THUMBNAIL.jpg"]
        );
    }

    #[test]
    fn test_empty_bucket_is_empty_inventory() {
        let bucket = MemoryBucket::default();
        let inventory = list_all(&bucket, "gallery/", DEFAULT_MAX_PAGES).unwrap();
        assert!(inventory.tracked.is_empty());
        assert!(inventory.stale_thumbnails.is_empty());
        assert_eq!(inventory.pages, 1);
    }

    #[test]
    fn test_follows_markers_across_pages() {
        let names: Vec<String> = (0..2500).map(|i| format!("gallery/A/{i:05}.webp")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let bucket = MemoryBucket::with_keys(&refs);

        let inventory = list_all(&bucket, "gallery/", DEFAULT_MAX_PAGES).unwrap();
        assert_eq!(inventory.tracked.len(), 2500);
        assert_eq!(inventory.pages, 3);
        assert_eq!(bucket.list_calls(), 3);
    }

    #[test]
    fn test_listing_failure_is_fatal() {
        let bucket = MemoryBucket::with_keys(&["gallery/A/1.webp"]);
        bucket.fail_listing();
        let err = list_all(&bucket, "gallery/", DEFAULT_MAX_PAGES).unwrap_err();
        assert!(matches!(err, SyncError::Listing { .. }));
    }

    #[test]
    fn test_page_bound() {
        let names: Vec<String> = (0..1500).map(|i| format!("gallery/A/{i:05}.webp")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let bucket = MemoryBucket::with_keys(&refs);

        let err = list_all(&bucket, "gallery/", 1).unwrap_err();
        assert!(matches!(err, SyncError::ListingUnbounded { pages: 1, .. }));
    }

    /// A backend that keeps returning the same marker
    struct StuckStore;

    impl ObjectStore for StuckStore {
        fn list_page(
            &self,
            _prefix: &str,
            _marker: Option<&str>,
            _limit: usize,
        ) -> std::result::Result<ListPage, StoreError> {
            Ok(ListPage {
                keys: vec!["gallery/A/1.webp".to_string()],
                marker: Some("gallery/A/1.webp".to_string()),
            })
        }

        fn put_file(&self, _: &str, _: &Path, _: &str) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn delete(&self, _: &str) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_repeated_marker_is_rejected() {
        let err = list_all(&StuckStore, "gallery/", DEFAULT_MAX_PAGES).unwrap_err();
        assert!(matches!(err, SyncError::ListingUnbounded { pages: 2, .. }));
    }
}
