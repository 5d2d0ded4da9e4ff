/// Staging area for artifacts about to be uploaded
///
/// Artifacts are produced only when the reconciler asks for them, so an
/// incremental pass transcodes nothing that is already published.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::exif::ExifSummary;
use super::transcode::{write_atomically, Transcoder};
use super::{ArtifactError, DerivedKey};
use crate::inventory::{LocalInventory, Origin};
use crate::reconcile::ArtifactSource;

pub struct Stager<'a> {
    output_dir: PathBuf,
    inventory: &'a LocalInventory,
    transcoder: &'a dyn Transcoder,
}

impl<'a> Stager<'a> {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        inventory: &'a LocalInventory,
        transcoder: &'a dyn Transcoder,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            inventory,
            transcoder,
        }
    }

    /// Where `key` is staged
    pub fn path_for(&self, key: &DerivedKey) -> PathBuf {
        key.as_str()
            .split('/')
            .fold(self.output_dir.clone(), |path, seg| path.join(seg))
    }

    fn copy_verbatim(&self, source: &Path, dest: &Path) -> Result<(), ArtifactError> {
        let mut input = File::open(source).map_err(|e| ArtifactError::io(source, e))?;
        write_atomically(dest, |out| {
            io::copy(&mut input, out)
                .map(|_| ())
                .map_err(|e| ArtifactError::io(source, e))
        })
    }

    fn write_index(&self, dest: &Path) -> Result<(), ArtifactError> {
        let index: BTreeMap<&str, ExifSummary> = self
            .inventory
            .images()
            .map(|(key, source)| (key.as_str(), ExifSummary::read(source)))
            .collect();
        write_atomically(dest, |out| {
            serde_json::to_writer_pretty(out, &index).map_err(ArtifactError::from)
        })?;
        debug!(entries = index.len(), dest = %dest.display(), "wrote metadata index");
        Ok(())
    }
}

impl ArtifactSource for Stager<'_> {
    fn materialize(&mut self, key: &DerivedKey) -> Result<PathBuf, ArtifactError> {
        let dest = self.path_for(key);
        match self.inventory.get(key) {
            Some(Origin::Image(source)) => self.transcoder.transcode(source, &dest)?,
            Some(Origin::Sidecar(source)) => self.copy_verbatim(source, &dest)?,
            Some(Origin::Index) => self.write_index(&dest)?,
            None => return Err(ArtifactError::UnknownKey(key.to_string())),
        }
        Ok(dest)
    }
}

/// Empty the staging directory before a pass. Hidden entries (the run lock)
/// are left alone.
pub fn clear_output(output_dir: &Path) -> Result<(), ArtifactError> {
    if !output_dir.exists() {
        return fs::create_dir_all(output_dir).map_err(|e| ArtifactError::io(output_dir, e));
    }
    let entries = fs::read_dir(output_dir).map_err(|e| ArtifactError::io(output_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ArtifactError::io(output_dir, e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            warn!(path = %path.display(), error = %e, "could not clear staged artifact");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::transcode::ImageTranscoder;
    use crate::inventory::local::ScanEntry;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn inventory_of(dir: &Path) -> LocalInventory {
        let photo = dir.join("src/A/img1.png");
        fs::create_dir_all(photo.parent().unwrap()).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([9, 9, 9])).save(&photo).unwrap();
        let sidecar = dir.join("src/A/info.yaml");
        fs::write(&sidecar, "title: A\n").unwrap();

        LocalInventory::collect(vec![
            ScanEntry {
                key: DerivedKey::new("A/img1.webp"),
                origin: Origin::Image(photo),
            },
            ScanEntry {
                key: DerivedKey::new("A/info.yaml"),
                origin: Origin::Sidecar(sidecar),
            },
        ])
    }

    #[test]
    fn test_materializes_each_kind() {
        let dir = TempDir::new().unwrap();
        let inventory = inventory_of(dir.path());
        let transcoder = ImageTranscoder::default();
        let out = dir.path().join("out");
        let mut stager = Stager::new(&out, &inventory, &transcoder);

        let webp = stager.materialize(&DerivedKey::new("A/img1.webp")).unwrap();
        assert_eq!(webp, out.join("A").join("img1.webp"));
        assert_eq!(image::open(&webp).unwrap().width(), 4);

        let yaml = stager.materialize(&DerivedKey::new("A/info.yaml")).unwrap();
        assert_eq!(fs::read_to_string(yaml).unwrap(), "title: A\n");

        let index = stager.materialize(&DerivedKey::index()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(index).unwrap()).unwrap();
        assert_eq!(json["A/img1.webp"]["CameraModel"], "Unknown");
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_key() {
        let dir = TempDir::new().unwrap();
        let inventory = LocalInventory::default();
        let transcoder = ImageTranscoder::default();
        let mut stager = Stager::new(dir.path(), &inventory, &transcoder);
        assert!(matches!(
            stager.materialize(&DerivedKey::new("nope/x.webp")),
            Err(ArtifactError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_clear_output_keeps_hidden_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("A")).unwrap();
        fs::write(dir.path().join("A/old.webp"), b"").unwrap();
        fs::write(dir.path().join("exif_data.json"), b"{}").unwrap();
        fs::write(dir.path().join(".gallery-sync.lock"), b"").unwrap();

        clear_output(dir.path()).unwrap();

        let left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left, vec![".gallery-sync.lock"]);
    }
}
