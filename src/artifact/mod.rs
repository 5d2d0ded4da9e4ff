/// Derived artifacts and their keys
///
/// A derived artifact is the web rendition of a source photo, stored under
/// `album/basename.webp` in the artifact namespace. The remote bucket holds
/// the same keys behind a fixed prefix.
///
/// - `transcode.rs` - source photo -> WebP rendition
/// - `exif.rs` - EXIF summary for the gallery metadata index
/// - `stage.rs` - materializes artifacts into the output tree on demand

pub mod exif;
pub mod stage;
pub mod transcode;

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::album::AlbumId;

/// Failure to produce one artifact; never fatal for a run
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no decodable embedded preview in RAW file {0}")]
    NoPreview(PathBuf),

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no local source for artifact key {0}")]
    UnknownKey(String),

    #[error("failed to serialize metadata index: {0}")]
    Index(#[from] serde_json::Error),
}

impl ArtifactError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Extension of every derived image artifact
pub const DERIVED_EXT: &str = "webp";

/// Substring marking thumbnail files, locally and remotely (any case)
pub const THUMBNAIL_PATTERN: &str = "_thumbnail";

/// Aggregate metadata index at the root of the artifact tree
pub const INDEX_KEY: &str = "exif_data.json";

/// Extension of sidecar files published verbatim
pub const SIDECAR_EXT: &str = "yaml";

/// Key of an artifact relative to the bucket prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivedKey(String);

impl DerivedKey {
    pub fn new(relative: impl Into<String>) -> Self {
        DerivedKey(relative.into())
    }

    /// `album/<source stem>.webp`
    pub fn for_source(source: &Path, album: &AlbumId) -> Self {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        DerivedKey(format!("{}/{}.{}", album.as_str(), stem, DERIVED_EXT))
    }

    /// `album/<source file name>`, extension kept
    pub fn for_sidecar(source: &Path, album: &AlbumId) -> Self {
        let name = source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        DerivedKey(format!("{}/{}", album.as_str(), name))
    }

    pub fn index() -> Self {
        DerivedKey(INDEX_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full bucket key under `prefix`
    pub fn remote(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }

    /// MIME type inferred from the key's extension
    pub fn content_type(&self) -> &'static str {
        let ext = self
            .0
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "webp" => "image/webp",
            "json" => "application/json",
            "yaml" | "yml" => "application/x-yaml",
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Display for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for DerivedKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Whether a file name or key names a thumbnail
pub fn is_thumbnail(name: &str) -> bool {
    name.to_lowercase().contains(THUMBNAIL_PATTERN)
}

/// What a mutation intent points at, recovered from a key or public URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Album segment, when the reference carried one
    pub album: Option<String>,
    /// File name without extension
    pub stem: String,
}

/// Parse `https://host/<prefix>album/name.webp`, `<prefix>album/name.webp`,
/// `album/name.webp` or a bare `name.webp` into album and stem.
pub fn parse_reference(reference: &str, prefix: &str) -> Option<ArtifactRef> {
    let reference = reference.split(['?', '#']).next().unwrap_or_default();
    let decoded = urlencoding::decode(reference)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| reference.to_string());

    let marker = prefix.trim_matches('/');
    let relative = if marker.is_empty() {
        decoded.as_str()
    } else {
        let with_slashes = format!("/{}/", marker);
        let with_trailing = format!("{}/", marker);
        if let Some(idx) = decoded.rfind(&with_slashes) {
            &decoded[idx + with_slashes.len()..]
        } else if let Some(rest) = decoded.strip_prefix(&with_trailing) {
            rest
        } else {
            decoded.as_str()
        }
    };

    let relative = relative.trim_matches('/');
    let (album, file) = match relative.rsplit_once('/') {
        Some((dir, file)) => (dir.rsplit('/').next().map(str::to_string), file),
        None => (None, relative),
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    if stem.is_empty() {
        return None;
    }
    Some(ArtifactRef {
        album: album.filter(|a| !a.is_empty()),
        stem: stem.to_string(),
    })
}
