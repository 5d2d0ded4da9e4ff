/// Local and remote inventories
///
/// Both sides of a reconciliation are snapshotted fresh each pass:
/// - `local.rs` - walks the watched library and maps files to derived keys
/// - `remote.rs` - paginates the bucket listing under the gallery prefix
///
/// The walk policy below is shared with the mutation-log consumers so that a
/// delete or move intent can only ever touch a file the scanner would have
/// published.

pub mod local;
pub mod remote;

pub use local::{LocalInventory, Origin};
pub use remote::{list_all, RemoteInventory};

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::artifact::{is_thumbnail, SIDECAR_EXT};

/// Raster and RAW extensions accepted as source photos (any case)
pub const IMAGE_EXTENSIONS: [&str; 14] = [
    "png", "jpg", "jpeg", "heic", "heif", "tif", "tiff", "arw", "cr2", "nef", "dng", "raf", "orf",
    "rw2",
];

/// Library-internal directories never descended into (any case)
pub const EXCLUDED_DIRS: [&str; 8] = [
    "resources",
    "private",
    "database",
    "caches",
    "cache",
    "thumbs",
    "thumbnails",
    "previews",
];

/// Names starting with this are hidden and skipped
pub const HIDDEN_PREFIX: char = '.';

const LIBRARY_SUFFIX: &str = ".library";
const LIBRARY_IMAGES_DIR: &str = "images";
const LIBRARY_ORIGINALS_DIRS: [&str; 4] = ["Originals", "Masters", "originals", "masters"];

/// What the scanner does with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Image,
    Sidecar,
}

/// Directories to walk for a watched library root.
///
/// A `*.library` bundle keeps its photos in `images/`, or in the older
/// `Originals`/`Masters` layout. Anything else is scanned as is.
pub fn scan_roots(library_root: &Path) -> Vec<PathBuf> {
    let is_bundle = library_root.is_dir()
        && library_root
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(LIBRARY_SUFFIX))
            .unwrap_or(false);
    if !is_bundle {
        return vec![library_root.to_path_buf()];
    }

    let images = library_root.join(LIBRARY_IMAGES_DIR);
    if images.is_dir() {
        return vec![images];
    }

    let mut roots: Vec<PathBuf> = Vec::new();
    let mut seen: Vec<PathBuf> = Vec::new();
    for name in LIBRARY_ORIGINALS_DIRS {
        let candidate = library_root.join(name);
        if !candidate.is_dir() {
            continue;
        }
        // Case-insensitive filesystems report both spellings
        let canonical = candidate.canonicalize().unwrap_or_else(|_| candidate.clone());
        if !seen.contains(&canonical) {
            seen.push(canonical);
            roots.push(candidate);
        }
    }

    if roots.is_empty() {
        vec![library_root.to_path_buf()]
    } else {
        debug!(?roots, "library bundle scan roots");
        roots
    }
}

/// Whether a walk entry is skipped together with everything below it
pub fn is_pruned(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with(HIDDEN_PREFIX) {
        return true;
    }
    entry.file_type().is_dir() && EXCLUDED_DIRS.contains(&name.to_lowercase().as_str())
}

/// Files below `root` in depth-first, name-sorted order, with excluded
/// subtrees pruned. Unreadable entries are logged and skipped.
pub fn walk_files(root: impl AsRef<Path>) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root.as_ref())
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_pruned(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
}

/// Classify a file by name; `None` means it is ignored
pub fn classify(path: &Path) -> Option<FileClass> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with(HIDDEN_PREFIX) || is_thumbnail(name) {
        return None;
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileClass::Image)
    } else if ext == SIDECAR_EXT {
        Some(FileClass::Sidecar)
    } else {
        None
    }
}
