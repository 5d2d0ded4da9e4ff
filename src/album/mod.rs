/// Album identity
///
/// Every source file belongs to exactly one album. The album id becomes the
/// first segment of the file's derived key, so it has to stay stable across
/// runs for an unchanged library:
/// - `metadata.rs` - root and per-directory folder records
/// - `resolver.rs` - the ordered strategy chain

pub mod metadata;
pub mod resolver;

pub use resolver::AlbumResolver;

use std::fmt;

/// Album used when no strategy produces a name
pub const DEFAULT_ALBUM: &str = "default";

/// Directory that marks the start of album folders inside a library bundle
pub const ROOT_MARKER: &str = "images";

/// Short, slash-free album token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlbumId(String);

impl AlbumId {
    /// Normalize a candidate name. Path separators would split the derived
    /// key, so they are replaced; blank names are rejected.
    pub fn sanitize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
            return None;
        }
        Some(AlbumId(trimmed.replace(['/', '\\'], "_")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlbumId {
    fn from(value: &str) -> Self {
        AlbumId::sanitize(value).unwrap_or_else(|| AlbumId(DEFAULT_ALBUM.to_string()))
    }
}

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(AlbumId::sanitize("  Kyoto ").unwrap().as_str(), "Kyoto");
        assert_eq!(AlbumId::sanitize("a/b\\c").unwrap().as_str(), "a_b_c");
        assert!(AlbumId::sanitize("   ").is_none());
        assert!(AlbumId::sanitize("..").is_none());
        assert_eq!(AlbumId::from("").as_str(), DEFAULT_ALBUM);
    }
}
