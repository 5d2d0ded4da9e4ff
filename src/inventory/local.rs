/// Local inventory: every publishable file in the watched library, keyed by
/// the derived key it would be published under.
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{classify, scan_roots, walk_files, FileClass};
use crate::album::AlbumResolver;
use crate::artifact::DerivedKey;

/// Where a local artifact comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Source photo, transcoded on demand
    Image(PathBuf),
    /// Companion file, published verbatim
    Sidecar(PathBuf),
    /// The aggregate metadata index, generated from all images
    Index,
}

impl Origin {
    pub fn source(&self) -> Option<&Path> {
        match self {
            Origin::Image(path) | Origin::Sidecar(path) => Some(path),
            Origin::Index => None,
        }
    }
}

/// One accepted file from the walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub key: DerivedKey,
    pub origin: Origin,
}

/// Lazy walk over the scan roots of one library
pub struct Scanner<'r> {
    roots: Vec<PathBuf>,
    resolver: &'r mut AlbumResolver,
}

impl<'r> Scanner<'r> {
    pub fn new(resolver: &'r mut AlbumResolver) -> Self {
        let roots = scan_roots(resolver.library_root());
        Self { roots, resolver }
    }

    /// Accepted files, one entry at a time. Nothing is read up front, and a
    /// new scanner re-walks from scratch.
    pub fn entries(self) -> impl Iterator<Item = ScanEntry> + 'r {
        let resolver = self.resolver;
        self.roots
            .into_iter()
            .flat_map(walk_files)
            .filter_map(move |entry| {
                let path = entry.into_path();
                let class = classify(&path)?;
                let album = resolver.resolve(&path);
                let entry = match class {
                    FileClass::Image => ScanEntry {
                        key: DerivedKey::for_source(&path, &album),
                        origin: Origin::Image(path),
                    },
                    // Sidecars join the diffed key set: an edited sidecar is
                    // republished only by a full upload or once its remote
                    // copy is gone.
                    FileClass::Sidecar => ScanEntry {
                        key: DerivedKey::for_sidecar(&path, &album),
                        origin: Origin::Sidecar(path),
                    },
                };
                Some(entry)
            })
    }
}

/// Snapshot of the local key set for one pass
#[derive(Debug, Clone, Default)]
pub struct LocalInventory {
    artifacts: BTreeMap<DerivedKey, Origin>,
    collisions: usize,
}

impl LocalInventory {
    /// Walk the library behind `resolver`
    pub fn scan(resolver: &mut AlbumResolver) -> Self {
        let scanner = Scanner::new(resolver);
        debug!(roots = ?scanner.roots, "scanning library");
        Self::collect(scanner.entries())
    }

    /// Build from scan entries; the metadata index is always part of the set.
    /// Two sources on one key keep the later one.
    pub fn collect(entries: impl IntoIterator<Item = ScanEntry>) -> Self {
        let mut artifacts = BTreeMap::new();
        let mut collisions = 0;

        for ScanEntry { key, origin } in entries {
            match artifacts.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(origin);
                }
                Entry::Occupied(mut slot) => {
                    if *slot.get() != origin {
                        warn!(
                            key = %slot.key(),
                            replaced = ?slot.get().source(),
                            kept = ?origin.source(),
                            "two local files map to the same derived key"
                        );
                        collisions += 1;
                    }
                    slot.insert(origin);
                }
            }
        }
        artifacts.insert(DerivedKey::index(), Origin::Index);

        let inventory = Self {
            artifacts,
            collisions,
        };
        debug!(
            keys = inventory.len(),
            images = inventory.image_count(),
            collisions,
            "local inventory built"
        );
        inventory
    }

    pub fn keys(&self) -> BTreeSet<DerivedKey> {
        self.artifacts.keys().cloned().collect()
    }

    pub fn get(&self, key: &DerivedKey) -> Option<&Origin> {
        self.artifacts.get(key)
    }

    /// Image sources with their keys, in key order
    pub fn images(&self) -> impl Iterator<Item = (&DerivedKey, &Path)> {
        self.artifacts.iter().filter_map(|(key, origin)| match origin {
            Origin::Image(path) => Some((key, path.as_path())),
            _ => None,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images().count()
    }

    /// Keys that had more than one local source
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
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

    fn key_strings(inventory: &LocalInventory) -> Vec<String> {
        inventory.keys().iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_scan_maps_files_to_keys() {
        let dir = library(&[
            "AlbumA/img1.ARW",
            "AlbumA/img1_thumbnail.jpg",
            "AlbumA/notes.txt",
            "AlbumA/info.yaml",
            "AlbumB/Cache/cached.jpg",
            "loose.png",
        ]);
        let mut resolver = AlbumResolver::new(dir.path());
        let inventory = LocalInventory::scan(&mut resolver);

        assert_eq!(
            key_strings(&inventory),
            vec![
                "AlbumA/img1.webp",
                "AlbumA/info.yaml",
                "default/loose.webp",
                "exif_data.json",
            ]
        );
        assert_eq!(inventory.image_count(), 2);
        assert_eq!(
            inventory.get(&DerivedKey::new("AlbumA/info.yaml")),
            Some(&Origin::Sidecar(dir.path().join("AlbumA/info.yaml")))
        );
    }

    #[test]
    fn test_scan_is_lazy_and_restartable() {
        let dir = library(&["A/1.jpg", "A/2.jpg", "B/3.jpg"]);
        let mut resolver = AlbumResolver::new(dir.path());

        let first: Vec<_> = Scanner::new(&mut resolver).entries().take(1).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].key.as_str(), "A/1.webp");

        let all: Vec<_> = Scanner::new(&mut resolver).entries().collect();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_duplicate_keys_keep_the_last_source() {
        let dir = library(&["A/img1.jpg", "A/img1.png"]);
        let mut resolver = AlbumResolver::new(dir.path());
        let inventory = LocalInventory::scan(&mut resolver);

        assert_eq!(inventory.collisions(), 1);
        assert_eq!(
            inventory.get(&DerivedKey::new("A/img1.webp")),
            Some(&Origin::Image(dir.path().join("A/img1.png")))
        );
    }

    #[test]
    fn test_empty_library_still_has_index() {
        let dir = library(&[]);
        let mut resolver = AlbumResolver::new(dir.path());
        let inventory = LocalInventory::scan(&mut resolver);
        assert_eq!(key_strings(&inventory), vec!["exif_data.json"]);
        assert_eq!(inventory.image_count(), 0);
    }
}
