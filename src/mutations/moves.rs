/// Move records: photos reassigned to another album in the gallery
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{drain, DrainReport, IntentKind, LibraryIndex, MutationLog, RecordError};
use crate::artifact::parse_reference;
use crate::error::Result;
use crate::inventory::{EXCLUDED_DIRS, HIDDEN_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    /// Published file name, e.g. `img1.webp`
    pub filename: String,
    pub old_album_id: String,
    pub new_album_id: String,
}

impl MoveRecord {
    fn validate(&self) -> std::result::Result<(), RecordError> {
        if self.filename.trim().is_empty() || self.old_album_id.trim().is_empty() {
            return Err(RecordError::Invalid(
                "record is missing its file name or old album".to_string(),
            ));
        }
        if !is_plain_album_dir(&self.new_album_id) {
            return Err(RecordError::Invalid(format!(
                "'{}' is not a usable album directory",
                self.new_album_id
            )));
        }
        Ok(())
    }
}

/// A single visible path segment the scanner would descend into
fn is_plain_album_dir(name: &str) -> bool {
    !name.trim().is_empty()
        && name == name.trim()
        && !name.contains(['/', '\\'])
        && !name.starts_with(HIDDEN_PREFIX)
        && !EXCLUDED_DIRS.contains(&name.to_lowercase().as_str())
}

/// Drain the move log against `watch_root`
pub fn drain_moves(log_path: &Path, watch_root: &Path, prefix: &str) -> Result<DrainReport> {
    let mut index = LibraryIndex::new(watch_root);
    drain_moves_with(&MutationLog::new(log_path), &mut index, prefix)
}

/// Drain the move log using an index shared with other consumers
pub fn drain_moves_with(
    log: &MutationLog,
    index: &mut LibraryIndex,
    prefix: &str,
) -> Result<DrainReport> {
    drain(log, IntentKind::Move, |record: &MoveRecord| {
        record.validate()?;
        let reference = parse_reference(&record.filename, prefix)
            .ok_or_else(|| RecordError::BadReference(record.filename.clone()))?;
        let source = index
            .find_stem(&reference.stem)
            .ok_or_else(|| RecordError::NoMatch(reference.stem.clone()))?;

        let album_dir = destination_dir(index, &source, &record.new_album_id)?;
        let file_name = source
            .file_name()
            .ok_or_else(|| RecordError::Invalid(format!("{} has no file name", source.display())))?;
        let dest = album_dir.join(file_name);
        if dest == source {
            return Ok(());
        }
        if dest.exists() {
            return Err(RecordError::DestinationExists(dest));
        }

        fs::rename(&source, &dest).map_err(|e| RecordError::io(&source, e))?;
        index.relocate(&source, &dest);
        info!(
            from = %source.display(),
            to = %dest.display(),
            old_album = %record.old_album_id,
            "moved local file"
        );
        Ok(())
    })
}

/// Album directory for a moved file, in order: a sibling of the file's
/// directory named after the album, the first directory of that name
/// anywhere in the library, or a newly created sibling. Files sitting
/// directly in the root get their album directory in the root.
fn destination_dir(
    index: &mut LibraryIndex,
    source: &Path,
    album: &str,
) -> std::result::Result<PathBuf, RecordError> {
    let root = index.root().to_path_buf();
    let containing = source.parent().unwrap_or(&root);
    let base = if containing == root {
        root.as_path()
    } else {
        containing.parent().unwrap_or(&root)
    };

    let sibling = base.join(album);
    if sibling.is_dir() {
        return Ok(sibling);
    }
    if let Some(found) = index.find_dir(album) {
        return Ok(found);
    }

    fs::create_dir_all(&sibling).map_err(|e| RecordError::io(&sibling, e))?;
    index.add_dir(&sibling);
    info!(dir = %sibling.display(), "created album directory");
    Ok(sibling)
}
