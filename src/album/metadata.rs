/// Folder metadata records
///
/// Photo libraries keep a `metadata.json` at the root describing the folder
/// tree (`{"folders": [{"id", "name", "children"}]}`) and, optionally, one per
/// directory listing which folders the directory's files belong to. Entries in
/// a directory record are either bare folder ids or `{id, name}` objects.
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of a metadata record, both at the root and per directory
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Default, Deserialize)]
struct RootRecord {
    #[serde(default)]
    folders: Vec<RootFolder>,
}

#[derive(Debug, Deserialize)]
struct RootFolder {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    children: Vec<RootFolder>,
}

/// One entry of a directory-local record
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FolderRef {
    /// Bare folder id, named through the root record
    Id(String),
    /// Folder carrying its own name
    Named {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
    /// Anything else; ignored
    Other(serde_json::Value),
}

impl FolderRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            FolderRef::Id(id) => Some(id),
            FolderRef::Named { id, .. } => id.as_deref(),
            FolderRef::Other(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            FolderRef::Named { name, .. } => name.as_deref(),
            _ => None,
        }
    }
}

/// Directory-local metadata record
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DirectoryRecord {
    #[serde(default)]
    pub folders: Vec<FolderRef>,
}

/// Folder id -> folder name, flattened from the root record
#[derive(Debug, Clone, Default)]
pub struct FolderMap {
    names: HashMap<String, String>,
}

impl FolderMap {
    /// Load the root record of a library. Absent or malformed records give an
    /// empty map.
    pub fn load(library_root: &Path) -> Self {
        let path = library_root.join(METADATA_FILE);
        let Some(record) = read_record::<RootRecord>(&path) else {
            return Self::default();
        };

        let mut names = HashMap::new();
        flatten(&record.folders, &mut names);
        debug!(folders = names.len(), path = %path.display(), "loaded root folder map");
        Self { names }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            names: pairs
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
        }
    }
}

fn flatten(folders: &[RootFolder], names: &mut HashMap<String, String>) {
    for folder in folders {
        if let (Some(id), Some(name)) = (&folder.id, &folder.name) {
            if !id.is_empty() && !name.is_empty() {
                names.insert(id.clone(), name.clone());
            }
        }
        flatten(&folder.children, names);
    }
}

/// Per-run cache of directory records, keyed by directory path
#[derive(Debug, Default)]
pub struct RecordCache {
    records: HashMap<PathBuf, Option<DirectoryRecord>>,
}

impl RecordCache {
    pub fn get(&mut self, dir: &Path) -> Option<&DirectoryRecord> {
        self.records
            .entry(dir.to_path_buf())
            .or_insert_with(|| read_record(&dir.join(METADATA_FILE)))
            .as_ref()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

fn read_record<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable folder metadata");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed folder metadata");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_root_map_flattens_children() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            r#"{"folders": [
                {"id": "A1", "name": "Travel", "children": [
                    {"id": "A2", "name": "Kyoto"}
                ]},
                {"id": "", "name": "ignored"},
                {"name": "no id"}
            ]}"#,
        )
        .unwrap();

        let map = FolderMap::load(dir.path());
        assert_eq!(map.get("A1"), Some("Travel"));
        assert_eq!(map.get("A2"), Some("Kyoto"));
        assert_eq!(map.get(""), None);
    }

    #[test]
    fn test_malformed_root_record_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "{not json").unwrap();
        assert!(FolderMap::load(dir.path()).is_empty());
    }

    #[test]
    fn test_directory_record_mixed_entries() {
        let record: DirectoryRecord = serde_json::from_str(
            r#"{"folders": ["A1", {"id": "B2", "name": "Harbour"}, 42]}"#,
        )
        .unwrap();

        assert_eq!(record.folders.len(), 3);
        assert_eq!(record.folders[0].id(), Some("A1"));
        assert_eq!(record.folders[0].name(), None);
        assert_eq!(record.folders[1].name(), Some("Harbour"));
        assert_eq!(record.folders[2].id(), None);
    }

    #[test]
    fn test_cache_remembers_absent_records() {
        let dir = TempDir::new().unwrap();
        let mut cache = RecordCache::default();
        assert!(cache.get(dir.path()).is_none());

        // Written after the first lookup: the run keeps its snapshot
        std::fs::write(dir.path().join(METADATA_FILE), r#"{"folders": ["X"]}"#).unwrap();
        assert!(cache.get(dir.path()).is_none());
        assert_eq!(cache.len(), 1);
    }
}
