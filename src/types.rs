//! Data structures for mirror operations.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};

/// Default snapshot index endpoint.
pub const DEFAULT_CDX_ENDPOINT: &str = "http://web.archive.org/cdx/search/cdx";

/// Default endpoint serving archived content.
pub const DEFAULT_WEB_ENDPOINT: &str = "http://web.archive.org/web";

/// Name of the cached raw index inside the destination directory.
pub const SNAPSHOTS_CACHE_FILE: &str = "snapshots.json";

/// One archived capture: a 14-digit timestamp and the URL captured at that time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotRecord {
    /// Capture time, `yyyyMMddHHmmss`.
    pub timestamp: String,
    /// URL as it was originally crawled.
    pub original_url: String,
}

impl SnapshotRecord {
    pub fn new(timestamp: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            original_url: original_url.into(),
        }
    }
}

/// Filesystem naming rules used when deriving local paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// Only control characters are escaped; `/` separates components.
    Posix,
    /// Windows-reserved characters are escaped too, `?` becomes `@`, `\` separates components.
    Windows,
}

impl PathStyle {
    /// The style of the platform this binary was built for.
    pub fn native() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Posix
        }
    }

    pub fn separator(self) -> char {
        match self {
            PathStyle::Posix => '/',
            PathStyle::Windows => '\\',
        }
    }
}

/// Configuration for mirroring a domain.
///
/// Built once at startup and shared read-only with every component.
///
/// # Example
///
/// ```
/// use waybacksync::MirrorConfig;
/// use std::time::Duration;
///
/// let config = MirrorConfig {
///     domain: "example.com".to_string(),
///     destination: "./example.com".into(),
///     max_retries: 3,
///     delay: Duration::from_secs(2),
///     no_fail: true,
///     ..MirrorConfig::default()
/// };
/// assert!(config.cache_path().ends_with("snapshots.json"));
/// ```
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Host whose captures are mirrored (e.g., `"example.com"`).
    pub domain: String,
    /// Root of the local mirror; also holds the index cache and the run log.
    pub destination: PathBuf,
    /// Lower timestamp bound, up to 14 digits, right-padded with `0`.
    pub from: Option<String>,
    /// Upper timestamp bound, up to 14 digits, right-padded with `0`.
    pub to: Option<String>,
    /// Per-request timeout (default: 10 seconds).
    pub timeout: Duration,
    /// Report what would be downloaded without fetching content.
    pub dry_run: bool,
    /// Base backoff unit; retry `n` waits `delay * 2 * n` (default: 1 second).
    pub delay: Duration,
    /// Additional attempts after the first failure (default: 0).
    pub max_retries: u32,
    /// Continue with the next record when a content fetch keeps failing.
    pub no_fail: bool,
    /// Timestamps that are never downloaded.
    pub skip_timestamps: HashSet<String>,
    /// Keep only the most recent capture of every URL.
    pub latest_only: bool,
    /// Snapshot index endpoint.
    pub cdx_endpoint: String,
    /// Archived content endpoint; content lives at `<web_endpoint>/<timestamp>id_/<url>`.
    pub web_endpoint: String,
    /// Naming rules for derived paths.
    pub path_style: PathStyle,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            destination: PathBuf::from("."),
            from: None,
            to: None,
            timeout: Duration::from_secs(10),
            dry_run: false,
            delay: Duration::from_secs(1),
            max_retries: 0,
            no_fail: false,
            skip_timestamps: HashSet::new(),
            latest_only: false,
            cdx_endpoint: DEFAULT_CDX_ENDPOINT.to_string(),
            web_endpoint: DEFAULT_WEB_ENDPOINT.to_string(),
            path_style: PathStyle::native(),
        }
    }
}

impl MirrorConfig {
    /// Location of the cached raw snapshot index.
    pub fn cache_path(&self) -> PathBuf {
        self.destination.join(SNAPSHOTS_CACHE_FILE)
    }

    /// Directory holding every file captured at `timestamp`.
    pub fn timestamp_dir(&self, timestamp: &str) -> PathBuf {
        self.destination.join(timestamp)
    }

    /// URL returning the unmodified bytes of a capture.
    pub fn content_url(&self, record: &SnapshotRecord) -> String {
        format!(
            "{}/{}id_/{}",
            self.web_endpoint.trim_end_matches('/'),
            record.timestamp,
            record.original_url
        )
    }
}

/// Position of a record within the run, used only to render status lines.
#[derive(Debug, Clone, Copy)]
pub struct DownloadContext<'a> {
    /// 1-based position.
    pub current: usize,
    pub total: usize,
    pub timestamp: &'a str,
    pub original_url: &'a str,
}

impl<'a> DownloadContext<'a> {
    pub fn new(current: usize, total: usize, record: &'a SnapshotRecord) -> Self {
        Self {
            current,
            total,
            timestamp: &record.timestamp,
            original_url: &record.original_url,
        }
    }

    /// Renders `(current/total) timestamp url status`.
    ///
    /// URLs carrying control characters would corrupt the console and the log
    /// file, so they are replaced with a placeholder.
    pub fn status_line(&self, status: &str) -> String {
        if self.original_url.chars().any(char::is_control) {
            format!(
                "({}/{}) {} [url malformed] {}",
                self.current, self.total, self.timestamp, status
            )
        } else {
            format!(
                "({}/{}) {} {} {}",
                self.current, self.total, self.timestamp, self.original_url, status
            )
        }
    }

    /// Emits the status line at `level`.
    pub fn log(&self, level: Level, status: &str) {
        let line = self.status_line(status);
        match level {
            Level::ERROR => error!("{}", line),
            Level::WARN => warn!("{}", line),
            _ => info!("{}", line),
        }
    }
}
