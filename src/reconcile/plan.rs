/// Diff of the local key set against the remote inventory
use std::collections::BTreeSet;

use crate::artifact::DerivedKey;
use crate::inventory::RemoteInventory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Upload every local key, present remotely or not
    pub full_upload: bool,
    /// Delete tracked remote keys that have no local counterpart
    pub sync_delete: bool,
    /// Exact keys never deleted
    pub protected: BTreeSet<DerivedKey>,
    /// Key describing the whole published set; re-uploaded whenever
    /// anything else is uploaded or deleted
    pub aggregate: Option<DerivedKey>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            full_upload: false,
            sync_delete: true,
            protected: BTreeSet::from([DerivedKey::index()]),
            aggregate: Some(DerivedKey::index()),
        }
    }
}

/// What one pass will do, computed before anything is touched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub upload: BTreeSet<DerivedKey>,
    pub delete: BTreeSet<DerivedKey>,
    pub skip: BTreeSet<DerivedKey>,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        self.upload.is_empty() && self.delete.is_empty()
    }

    /// Uploads in application order: the aggregate key goes last so it
    /// never describes objects that are not published yet
    pub fn upload_order(&self, aggregate: Option<&DerivedKey>) -> Vec<&DerivedKey> {
        let (last, mut order): (Vec<&DerivedKey>, Vec<&DerivedKey>) =
            self.upload.iter().partition(|k| Some(*k) == aggregate);
        order.extend(last);
        order
    }
}

/// Pure function of the two snapshots.
///
/// Stale thumbnails are deleted whatever `sync_delete` says; a thumbnail
/// key that is also a local key is treated as published. Upload and delete
/// sets are disjoint by construction.
pub fn build_plan(
    local: &BTreeSet<DerivedKey>,
    remote: &RemoteInventory,
    options: &ReconcileOptions,
) -> ReconciliationPlan {
    let published: BTreeSet<&DerivedKey> = remote
        .tracked
        .iter()
        .chain(remote.stale_thumbnails.iter())
        .collect();

    let (mut upload, mut skip): (BTreeSet<DerivedKey>, BTreeSet<DerivedKey>) = if options
        .full_upload
    {
        (local.clone(), BTreeSet::new())
    } else {
        local
            .iter()
            .cloned()
            .partition(|key| !published.contains(key))
    };

    let orphans = remote
        .tracked
        .iter()
        .filter(|_| options.sync_delete)
        .filter(|key| !local.contains(*key));
    let thumbnails = remote
        .stale_thumbnails
        .iter()
        .filter(|key| !local.contains(*key));
    let delete: BTreeSet<DerivedKey> = orphans
        .chain(thumbnails)
        .filter(|key| !options.protected.contains(*key))
        .cloned()
        .collect();

    if let Some(aggregate) = &options.aggregate {
        let changed = upload.iter().any(|k| k != aggregate)
            || delete
                .iter()
                .any(|k| k != aggregate && remote.tracked.contains(k));
        if changed && skip.remove(aggregate) {
            upload.insert(aggregate.clone());
        }
    }

    ReconciliationPlan {
        upload,
        delete,
        skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> BTreeSet<DerivedKey> {
        keys.iter().map(|k| DerivedKey::new(*k)).collect()
    }

    fn remote(tracked: &[&str], thumbnails: &[&str]) -> RemoteInventory {
        RemoteInventory {
            tracked: set(tracked),
            stale_thumbnails: set(thumbnails),
            pages: 1,
        }
    }

    #[test]
    fn test_incremental_with_orphan() {
        let local = set(&["AlbumA/img1.webp"]);
        let remote = remote(&["AlbumA/img1.webp", "AlbumB/stale.webp"], &[]);

        let plan = build_plan(&local, &remote, &ReconcileOptions::default());
        assert!(plan.upload.is_empty());
        assert_eq!(plan.skip, set(&["AlbumA/img1.webp"]));
        assert_eq!(plan.delete, set(&["AlbumB/stale.webp"]));
    }

    #[test]
    fn test_published_sidecar_is_diffed_like_an_image() {
        let local = set(&["A/1.webp", "A/info.yaml"]);
        let published = remote(&["A/1.webp", "A/info.yaml"], &[]);

        let plan = build_plan(&local, &published, &ReconcileOptions::default());
        assert!(plan.is_noop());
        assert_eq!(plan.skip, local);

        let gone = remote(&["A/1.webp"], &[]);
        let plan = build_plan(&local, &gone, &ReconcileOptions::default());
        assert!(plan.upload.contains(&DerivedKey::new("A/info.yaml")));

        let full = ReconcileOptions {
            full_upload: true,
            ..Default::default()
        };
        let plan = build_plan(&local, &published, &full);
        assert!(plan.upload.contains(&DerivedKey::new("A/info.yaml")));
    }

    #[test]
    fn test_full_upload_skips_nothing() {
        let local = set(&["A/1.webp", "A/2.webp"]);
        let remote = remote(&["A/1.webp"], &[]);
        let options = ReconcileOptions {
            full_upload: true,
            ..Default::default()
        };

        let plan = build_plan(&local, &remote, &options);
        assert_eq!(plan.upload, local);
        assert!(plan.skip.is_empty());
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_sync_delete_off_keeps_orphans_but_drops_thumbnails() {
        let local = set(&["A/1.webp"]);
        let remote = remote(&["A/1.webp", "B/orphan.webp"], &["A/1_thumbnail.webp"]);
        let options = ReconcileOptions {
            sync_delete: false,
            ..Default::default()
        };

        let plan = build_plan(&local, &remote, &options);
        assert_eq!(plan.delete, set(&["A/1_thumbnail.webp"]));
    }

    #[test]
    fn test_protected_keys_survive() {
        let local = set(&["A/1.webp"]);
        let remote = remote(&["A/1.webp", "exif_data.json", "keep/me.webp"], &[]);
        let mut options = ReconcileOptions::default();
        options.protected.insert(DerivedKey::new("keep/me.webp"));

        let plan = build_plan(&local, &remote, &options);
        assert!(plan.delete.is_empty());
    }

    #[test]
    fn test_aggregate_follows_changes() {
        let local = set(&["A/1.webp", "A/2.webp", "exif_data.json"]);

        let unchanged = remote(&["A/1.webp", "A/2.webp", "exif_data.json"], &[]);
        let plan = build_plan(&local, &unchanged, &ReconcileOptions::default());
        assert!(plan.is_noop());
        assert!(plan.skip.contains(&DerivedKey::index()));

        let missing_one = remote(&["A/1.webp", "exif_data.json"], &[]);
        let plan = build_plan(&local, &missing_one, &ReconcileOptions::default());
        assert_eq!(plan.upload, set(&["A/2.webp", "exif_data.json"]));

        let with_orphan = remote(&["A/1.webp", "A/2.webp", "A/3.webp", "exif_data.json"], &[]);
        let plan = build_plan(&local, &with_orphan, &ReconcileOptions::default());
        assert_eq!(plan.upload, set(&["exif_data.json"]));
        assert_eq!(plan.delete, set(&["A/3.webp"]));

        // Thumbnail cleanup alone does not change the published set
        let thumbs = remote(&["A/1.webp", "A/2.webp", "exif_data.json"], &["A/1_thumbnail.webp"]);
        let plan = build_plan(&local, &thumbs, &ReconcileOptions::default());
        assert!(plan.upload.is_empty());
    }

    #[test]
    fn test_upload_and_delete_are_disjoint() {
        let local = set(&["A/1.webp", "A/x_thumbnail.webp", "B/2.webp", "exif_data.json"]);
        let remote = remote(
            &["A/1.webp", "C/3.webp", "exif_data.json"],
            &["A/x_thumbnail.webp", "D/y_thumbnail.webp"],
        );
        for full_upload in [false, true] {
            for sync_delete in [false, true] {
                let options = ReconcileOptions {
                    full_upload,
                    sync_delete,
                    ..Default::default()
                };
                let plan = build_plan(&local, &remote, &options);
                assert!(plan.upload.is_disjoint(&plan.delete));
                assert!(plan.skip.is_disjoint(&plan.upload));
            }
        }
    }

    #[test]
    fn test_second_run_is_noop() {
        let local = set(&["A/1.webp", "B/2.webp", "exif_data.json"]);
        let first = build_plan(&local, &remote(&["C/old.webp"], &[]), &ReconcileOptions::default());
        assert_eq!(first.upload, local);
        assert_eq!(first.delete, set(&["C/old.webp"]));

        // Remote after the first run is exactly the local set
        let second = build_plan(
            &local,
            &RemoteInventory {
                tracked: local.clone(),
                ..Default::default()
            },
            &ReconcileOptions::default(),
        );
        assert!(second.upload.is_empty());
        assert!(second.delete.is_empty());
    }

    #[test]
    fn test_upload_order_puts_aggregate_last() {
        let plan = ReconciliationPlan {
            upload: set(&["A/1.webp", "exif_data.json", "Z/2.webp"]),
            ..Default::default()
        };
        let index = DerivedKey::index();
        let order: Vec<&str> = plan
            .upload_order(Some(&index))
            .into_iter()
            .map(DerivedKey::as_str)
            .collect();
        assert_eq!(order, vec!["A/1.webp", "Z/2.webp", "exif_data.json"]);
    }
}
