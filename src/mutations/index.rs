/// Lookups over the watched library for replaying mutation records
///
/// Records only carry a file stem, so the library is indexed by stem once
/// and every record resolves against the index instead of re-walking the
/// tree. Candidates are kept in depth-first, name-sorted walk order, which
/// is also `Path` ordering; the first candidate wins.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::inventory::{classify, is_pruned, FileClass};

#[derive(Debug, Default)]
struct Entries {
    stems: HashMap<String, Vec<PathBuf>>,
    dirs: HashMap<String, Vec<PathBuf>>,
}

impl Entries {
    fn build(root: &Path) -> Self {
        let mut entries = Entries::default();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_pruned(e));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_dir() {
                entries.dirs.entry(name).or_default().push(entry.into_path());
            } else if classify(entry.path()) == Some(FileClass::Image) {
                if let Some(stem) = stem_of(entry.path()) {
                    entries.stems.entry(stem).or_default().push(entry.into_path());
                }
            }
        }
        debug!(
            stems = entries.stems.len(),
            dirs = entries.dirs.len(),
            "library index built"
        );
        entries
    }
}

fn stem_of(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

fn insert_sorted(list: &mut Vec<PathBuf>, path: PathBuf) {
    if let Err(pos) = list.binary_search(&path) {
        list.insert(pos, path);
    }
}

/// Stem and directory-name index of one library, built on first use
#[derive(Debug)]
pub struct LibraryIndex {
    root: PathBuf,
    entries: Option<Entries>,
}

impl LibraryIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entries(&mut self) -> &mut Entries {
        let root = &self.root;
        self.entries.get_or_insert_with(|| Entries::build(root))
    }

    /// Every image whose stem is `stem`, first match first
    pub fn candidates(&mut self, stem: &str) -> &[PathBuf] {
        self.entries()
            .stems
            .get(stem)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// First image with this stem. Several candidates are a known ambiguity
    /// between albums; all of them are logged.
    pub fn find_stem(&mut self, stem: &str) -> Option<PathBuf> {
        let candidates = self.candidates(stem);
        if candidates.len() > 1 {
            warn!(
                stem,
                chosen = %candidates[0].display(),
                ?candidates,
                "several local files share this stem; using the first"
            );
        }
        candidates.first().cloned()
    }

    /// First directory named `name` anywhere below the root
    pub fn find_dir(&mut self, name: &str) -> Option<PathBuf> {
        self.entries().dirs.get(name).and_then(|d| d.first().cloned())
    }

    /// A file was deleted
    pub fn forget(&mut self, path: &Path) {
        let Some(stem) = stem_of(path) else { return };
        let stems = &mut self.entries().stems;
        if let Some(list) = stems.get_mut(&stem) {
            list.retain(|p| p != path);
            if list.is_empty() {
                stems.remove(&stem);
            }
        }
    }

    /// A file was moved
    pub fn relocate(&mut self, from: &Path, to: &Path) {
        self.forget(from);
        if let Some(stem) = stem_of(to) {
            let list = self.entries().stems.entry(stem).or_default();
            insert_sorted(list, to.to_path_buf());
        }
    }

    /// A directory was created
    pub fn add_dir(&mut self, path: &Path) {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };
        let list = self.entries().dirs.entry(name).or_default();
        insert_sorted(list, path.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn library(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for rel in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_first_match_in_walk_order() {
        let dir = library(&["B/img1.jpg", "A/sub/img1.ARW", "A/img1.png", "A/img1.txt"]);
        let mut index = LibraryIndex::new(dir.path());

        assert_eq!(
            index.candidates("img1"),
            &[
                dir.path().join("A/img1.png"),
                dir.path().join("A/sub/img1.ARW"),
                dir.path().join("B/img1.jpg"),
            ]
        );
        assert_eq!(index.find_stem("img1"), Some(dir.path().join("A/img1.png")));
        assert_eq!(index.find_stem("missing"), None);
    }

    #[test]
    fn test_excluded_subtrees_are_not_indexed() {
        let dir = library(&["Thumbs/img1.jpg", ".trash/img2.jpg", "A/img1_thumbnail.jpg"]);
        let mut index = LibraryIndex::new(dir.path());
        assert_eq!(index.find_stem("img1"), None);
        assert_eq!(index.find_stem("img2"), None);
        assert_eq!(index.find_stem("img1_thumbnail"), None);
        assert_eq!(index.find_dir("Thumbs"), None);
    }

    #[test]
    fn test_updates_track_filesystem_changes() {
        let dir = library(&["A/img1.jpg", "Trips/C/x.jpg"]);
        let mut index = LibraryIndex::new(dir.path());
        assert_eq!(index.find_dir("C"), Some(dir.path().join("Trips/C")));

        let moved = dir.path().join("B/img1.jpg");
        index.relocate(&dir.path().join("A/img1.jpg"), &moved);
        index.add_dir(&dir.path().join("B"));
        assert_eq!(index.find_stem("img1"), Some(moved.clone()));
        assert_eq!(index.find_dir("B"), Some(dir.path().join("B")));

        index.forget(&moved);
        assert_eq!(index.find_stem("img1"), None);
    }
}
