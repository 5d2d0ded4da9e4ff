/// Deletion records: photos removed from the gallery
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

use super::{drain, DrainReport, IntentKind, LibraryIndex, MutationLog, RecordError};
use crate::artifact::parse_reference;
use crate::error::Result;

/// `{id, url}` as written by the front end; `url` is the published object
/// URL or key
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeletionRecord {
    #[serde(default)]
    pub id: Option<Value>,
    pub url: String,
}

/// Drain the deletion log against `watch_root`
pub fn drain_deletions(log_path: &Path, watch_root: &Path, prefix: &str) -> Result<DrainReport> {
    let mut index = LibraryIndex::new(watch_root);
    drain_deletions_with(&MutationLog::new(log_path), &mut index, prefix)
}

/// Drain the deletion log using an index shared with other consumers
pub fn drain_deletions_with(
    log: &MutationLog,
    index: &mut LibraryIndex,
    prefix: &str,
) -> Result<DrainReport> {
    drain(log, IntentKind::Delete, |record: &DeletionRecord| {
        let reference = parse_reference(&record.url, prefix)
            .ok_or_else(|| RecordError::BadReference(record.url.clone()))?;
        let path = index
            .find_stem(&reference.stem)
            .ok_or_else(|| RecordError::NoMatch(reference.stem.clone()))?;

        fs::remove_file(&path).map_err(|e| RecordError::io(&path, e))?;
        index.forget(&path);
        info!(path = %path.display(), "deleted local file");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for rel in files {
            let path = dir.path().join("watch").join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_deletes_referenced_source() {
        let dir = library(&["AlbumA/img1.raf", "AlbumA/img2.jpg"]);
        let watch = dir.path().join("watch");
        let log = dir.path().join("deleted_photos.json");
        fs::write(
            &log,
            r#"[{"id": 7, "url": "https://cdn.example.com/gallery/AlbumA/img1.webp"}]"#,
        )
        .unwrap();

        let report = drain_deletions(&log, &watch, "gallery/").unwrap();

        assert_eq!((report.applied, report.failed), (1, 0));
        assert!(!watch.join("AlbumA/img1.raf").exists());
        assert!(watch.join("AlbumA/img2.jpg").exists());
        assert_eq!(fs::read_to_string(&log).unwrap(), "[]");
    }

    #[test]
    fn test_failures_still_drain_the_log() {
        let dir = library(&["A/keep.jpg", "A/gone.jpg"]);
        let watch = dir.path().join("watch");
        let log = dir.path().join("deleted_photos.json");
        fs::write(
            &log,
            r#"[
                {"id": "1", "url": "gallery/A/missing.webp"},
                {"id": "2"},
                {"id": "3", "url": ""},
                {"id": "4", "url": "gallery/A/gone.webp"}
            ]"#,
        )
        .unwrap();

        let report = drain_deletions(&log, &watch, "gallery/").unwrap();

        assert_eq!(report.records, 4);
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 3);
        assert!(watch.join("A/keep.jpg").exists());
        assert_eq!(fs::read_to_string(&log).unwrap(), "[]");

        // Draining again is a no-op
        let again = drain_deletions(&log, &watch, "gallery/").unwrap();
        assert_eq!(again, DrainReport::empty(IntentKind::Delete));
    }

    #[test]
    fn test_absent_or_empty_log_is_noop() {
        let dir = library(&["A/img1.jpg"]);
        let watch = dir.path().join("watch");
        let log = dir.path().join("deleted_photos.json");

        let report = drain_deletions(&log, &watch, "gallery/").unwrap();
        assert_eq!(report, DrainReport::empty(IntentKind::Delete));
        assert!(!log.exists());

        fs::write(&log, "[]").unwrap();
        let report = drain_deletions(&log, &watch, "gallery/").unwrap();
        assert_eq!(report.records, 0);
        assert!(watch.join("A/img1.jpg").exists());
    }

    #[test]
    fn test_same_stem_twice_deletes_both_in_walk_order() {
        let dir = library(&["A/img1.jpg", "B/img1.nef"]);
        let watch = dir.path().join("watch");
        let log = dir.path().join("deleted_photos.json");
        fs::write(
            &log,
            r#"[{"id": 1, "url": "gallery/B/img1.webp"}, {"id": 2, "url": "gallery/B/img1.webp"}]"#,
        )
        .unwrap();

        let mut index = LibraryIndex::new(&watch);
        let first = index.candidates("img1").to_vec();
        assert_eq!(first[0], watch.join("A/img1.jpg"));

        let report = drain_deletions_with(&MutationLog::new(&log), &mut index, "gallery/").unwrap();
        assert_eq!(report.applied, 2);
        assert!(!watch.join("A/img1.jpg").exists());
        assert!(!watch.join("B/img1.nef").exists());
    }
}
