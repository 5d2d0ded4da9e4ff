/// Command line and environment configuration
///
/// Every option can also come from the environment (or a `.env` file loaded
/// before parsing). `SettingsArgs` is what clap fills in; `Settings` is the
/// validated form the rest of the crate works with.
use clap::{Args, Parser, Subcommand};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::transcode::DEFAULT_MAX_EDGE;
use crate::error::ConfigError;
use crate::inventory::remote::DEFAULT_MAX_PAGES;

pub const DEFAULT_PREFIX: &str = "gallery/";
pub const DEFAULT_POLL_INTERVAL: &str = "1s";
/// S3-compatible providers outside AWS accept any region name
pub const DEFAULT_REGION: &str = "auto";
const APP_DIR: &str = "gallery-sync";

#[derive(Parser, Debug)]
#[command(name = "gallery-sync", version)]
#[command(about = "Keeps a public photo gallery bucket in step with a local photo library")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run one full reconciliation pass (the default)
    Run,
    /// Apply pending gallery deletions and moves to the library, nothing else
    Drain,
    /// Print what a pass would upload and delete without touching anything
    Plan,
    /// Wait for `run.txt` to appear in the watch directory, then run once
    Watch,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Local photo library to publish
    #[arg(long, env = "WATCH_DIR", global = true)]
    pub watch_dir: Option<PathBuf>,

    /// S3-compatible bucket to publish into
    #[arg(long, env = "GALLERY_BUCKET", global = true)]
    pub bucket: Option<String>,

    /// Service endpoint for non-AWS providers
    #[arg(long, env = "GALLERY_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    #[arg(long, env = "GALLERY_REGION", global = true)]
    pub region: Option<String>,

    #[arg(long, env = "GALLERY_ACCESS_KEY", global = true, hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long, env = "GALLERY_SECRET_KEY", global = true, hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Local directory standing in for the bucket, e.g. the web server root
    #[arg(long, env = "GALLERY_BUCKET_DIR", global = true)]
    pub bucket_dir: Option<PathBuf>,

    /// Key prefix under which the gallery is published
    #[arg(long, env = "GALLERY_PREFIX", global = true)]
    pub prefix: Option<String>,

    /// Staging directory for derived artifacts
    #[arg(long, env = "GALLERY_OUTPUT_DIR", global = true)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, env = "GALLERY_DELETED_LOG", global = true)]
    pub deleted_log: Option<PathBuf>,

    #[arg(long, env = "GALLERY_MOVED_LOG", global = true)]
    pub moved_log: Option<PathBuf>,

    /// Dashboard SQLite database; status goes to the log when unset
    #[arg(long, env = "DB_PATH", global = true)]
    pub status_db: Option<PathBuf>,

    /// URL to POST to after a pass with no failures
    #[arg(long, env = "WEBHOOK_URL", global = true)]
    pub webhook_url: Option<String>,

    /// Upload every local artifact regardless of what is published
    #[arg(long, env = "FULL_UPLOAD", global = true)]
    pub full_upload: bool,

    /// Keep published objects whose source is gone
    #[arg(long, env = "GALLERY_NO_SYNC_DELETE", global = true)]
    pub no_sync_delete: bool,

    /// PNG composited onto every rendered image
    #[arg(long, env = "GALLERY_WATERMARK", global = true)]
    pub watermark: Option<PathBuf>,

    /// Longest edge of rendered images, in pixels
    #[arg(long, env = "GALLERY_MAX_EDGE", global = true)]
    pub max_edge: Option<u32>,

    /// Give up listing the bucket after this many pages
    #[arg(long, env = "GALLERY_MAX_LIST_PAGES", global = true)]
    pub max_list_pages: Option<usize>,

    /// How often `watch` looks for the trigger file, e.g. `1s` or `500ms`
    #[arg(long, env = "GALLERY_POLL_INTERVAL", global = true)]
    pub poll_interval: Option<String>,
}

/// Where published objects live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketBackend {
    S3(S3Settings),
    Fs { root: PathBuf },
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Validated settings for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub watch_dir: PathBuf,
    pub bucket: BucketBackend,
    /// Always ends with `/`
    pub prefix: String,
    pub output_dir: PathBuf,
    pub deleted_log: PathBuf,
    pub moved_log: PathBuf,
    pub status_db: Option<PathBuf>,
    pub webhook_url: Option<String>,
    pub full_upload: bool,
    pub sync_delete: bool,
    pub watermark: Option<PathBuf>,
    pub max_edge: u32,
    pub max_list_pages: usize,
    pub poll_interval: Duration,
}

/// Per-user data directory for defaults, falling back to the working
/// directory on platforms without one
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
}

impl SettingsArgs {
    /// Check everything a pass depends on before anything is touched
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        self.validate_in(&data_dir())
    }

    fn validate_in(&self, data_dir: &Path) -> Result<Settings, ConfigError> {
        let watch_dir = self
            .watch_dir
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingWatchDir)?;
        if !watch_dir.is_dir() {
            return Err(ConfigError::WatchDirNotFound(watch_dir));
        }

        let bucket = self.bucket_backend()?;
        let prefix = normalize_prefix(self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX))?;

        let max_edge = self.max_edge.unwrap_or(DEFAULT_MAX_EDGE);
        if max_edge == 0 {
            return Err(ConfigError::Invalid {
                field: "max-edge",
                reason: "must be at least 1 pixel".to_string(),
            });
        }
        let max_list_pages = self.max_list_pages.unwrap_or(DEFAULT_MAX_PAGES);
        if max_list_pages == 0 {
            return Err(ConfigError::Invalid {
                field: "max-list-pages",
                reason: "must be at least 1".to_string(),
            });
        }

        let poll_interval = humantime::parse_duration(
            self.poll_interval.as_deref().unwrap_or(DEFAULT_POLL_INTERVAL),
        )
        .map_err(|e| ConfigError::Invalid {
            field: "poll-interval",
            reason: e.to_string(),
        })?;
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "poll-interval",
                reason: "must be longer than zero".to_string(),
            });
        }

        if let Some(url) = self.webhook_url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "webhook-url",
                    reason: format!("'{}' is not an http(s) URL", url),
                });
            }
        }

        Ok(Settings {
            watch_dir,
            bucket,
            prefix,
            output_dir: self
                .output_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("output")),
            deleted_log: self
                .deleted_log
                .clone()
                .unwrap_or_else(|| data_dir.join("deleted_photos.json")),
            moved_log: self
                .moved_log
                .clone()
                .unwrap_or_else(|| data_dir.join("moved_photos.json")),
            status_db: self.status_db.clone(),
            webhook_url: self.webhook_url.clone().filter(|u| !u.is_empty()),
            full_upload: self.full_upload,
            sync_delete: !self.no_sync_delete,
            watermark: self.watermark.clone(),
            max_edge,
            max_list_pages,
            poll_interval,
        })
    }
}

impl SettingsArgs {
    /// A named bucket wins; otherwise the bucket directory must exist
    fn bucket_backend(&self) -> Result<BucketBackend, ConfigError> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        if let Some(bucket) = non_empty(&self.bucket) {
            if self.bucket_dir.is_some() {
                return Err(ConfigError::Invalid {
                    field: "bucket",
                    reason: "set either a bucket name or a bucket directory, not both".to_string(),
                });
            }
            let access_key = non_empty(&self.access_key).ok_or(ConfigError::MissingCredential {
                bucket: bucket.clone(),
                field: "an access key",
            })?;
            let secret_key = non_empty(&self.secret_key).ok_or(ConfigError::MissingCredential {
                bucket: bucket.clone(),
                field: "a secret key",
            })?;
            let endpoint = non_empty(&self.endpoint);
            if let Some(url) = endpoint.as_deref() {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid {
                        field: "endpoint",
                        reason: format!("'{}' is not an http(s) URL", url),
                    });
                }
            }
            return Ok(BucketBackend::S3(S3Settings {
                bucket,
                endpoint,
                region: non_empty(&self.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
                access_key,
                secret_key,
            }));
        }

        let root = self
            .bucket_dir
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingBucket)?;
        if !root.is_dir() {
            return Err(ConfigError::BucketNotFound(root));
        }
        Ok(BucketBackend::Fs { root })
    }
}

/// Strip surrounding whitespace and slashes, then end with exactly one `/`
fn normalize_prefix(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyPrefix);
    }
    Ok(format!("{}/", trimmed))
}
