/// Album resolution as an ordered chain of strategies
///
/// The first strategy returning a usable name wins; when none does the file
/// lands in the `default` album. For a fixed metadata snapshot the result is
/// a pure function of the path.
use std::path::{Path, PathBuf};
use tracing::trace;

use super::metadata::{DirectoryRecord, FolderMap, RecordCache};
use super::{AlbumId, DEFAULT_ALBUM, ROOT_MARKER};

/// Everything a strategy may look at for one file
#[derive(Debug)]
pub struct ResolveContext<'a> {
    /// Directory segments between the library root and the file
    pub segments: Vec<String>,
    /// Name of the directory containing the file
    pub dir_name: Option<&'a str>,
    /// Record stored next to the file, if any
    pub dir_record: Option<&'a DirectoryRecord>,
    /// Root id -> name map
    pub root_map: &'a FolderMap,
}

pub trait AlbumStrategy: std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String>;
}

/// Directory record entries that carry their own name
#[derive(Debug)]
pub struct DirectoryRecordNames;

impl AlbumStrategy for DirectoryRecordNames {
    fn name(&self) -> &'static str {
        "directory-record"
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String> {
        ctx.dir_record?
            .folders
            .iter()
            .filter_map(|f| f.name())
            .find(|name| !name.trim().is_empty())
            .map(str::to_string)
    }
}

/// Folder ids named by the root record: ids referenced from the directory
/// record first, then the containing directory's own name used as an id.
#[derive(Debug)]
pub struct RootRecordLookup;

impl AlbumStrategy for RootRecordLookup {
    fn name(&self) -> &'static str {
        "root-record"
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String> {
        if ctx.root_map.is_empty() {
            return None;
        }
        let referenced = ctx
            .dir_record
            .into_iter()
            .flat_map(|record| record.folders.iter())
            .filter_map(|f| f.id());

        referenced
            .chain(ctx.dir_name)
            .find_map(|id| ctx.root_map.get(id))
            .map(str::to_string)
    }
}

/// First directory below the root marker, else the first directory
#[derive(Debug)]
pub struct PathSegment;

impl AlbumStrategy for PathSegment {
    fn name(&self) -> &'static str {
        "path-segment"
    }

    fn resolve(&self, ctx: &ResolveContext<'_>) -> Option<String> {
        match ctx.segments.as_slice() {
            [marker, album, ..] if marker == ROOT_MARKER => Some(album.clone()),
            [marker] if marker == ROOT_MARKER => None,
            [first, ..] => Some(first.clone()),
            [] => None,
        }
    }
}

/// Maps source files to album ids for one run
#[derive(Debug)]
pub struct AlbumResolver {
    library_root: PathBuf,
    root_map: FolderMap,
    cache: RecordCache,
    strategies: Vec<Box<dyn AlbumStrategy>>,
}

impl AlbumResolver {
    /// Build a resolver with the standard chain, loading the root record
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        let library_root = library_root.into();
        let root_map = FolderMap::load(&library_root);
        Self::with_strategies(
            library_root,
            root_map,
            vec![
                Box::new(DirectoryRecordNames),
                Box::new(RootRecordLookup),
                Box::new(PathSegment),
            ],
        )
    }

    pub fn with_strategies(
        library_root: PathBuf,
        root_map: FolderMap,
        strategies: Vec<Box<dyn AlbumStrategy>>,
    ) -> Self {
        Self {
            library_root,
            root_map,
            cache: RecordCache::default(),
            strategies,
        }
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Resolve the album of a source file. Never fails.
    pub fn resolve(&mut self, source: &Path) -> AlbumId {
        let dir = source.parent().unwrap_or(&self.library_root);
        let segments: Vec<String> = dir
            .strip_prefix(&self.library_root)
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        // The library root itself never names an album
        let dir_name = if segments.is_empty() {
            None
        } else {
            dir.file_name().and_then(|n| n.to_str())
        };

        let ctx = ResolveContext {
            segments,
            dir_name,
            dir_record: self.cache.get(dir),
            root_map: &self.root_map,
        };

        for strategy in &self.strategies {
            if let Some(album) = strategy.resolve(&ctx).and_then(|n| AlbumId::sanitize(&n)) {
                trace!(path = %source.display(), strategy = strategy.name(), album = %album, "resolved album");
                return album;
            }
        }
        AlbumId::from(DEFAULT_ALBUM)
    }
}
