//! WaybackSync - Mirror every archived capture of a domain from the Wayback Machine
//!
//! This library retrieves the snapshot index of a domain from the archive's
//! index API and saves each capture under `<dest>/<timestamp>/`, rebuilding a
//! directory tree that follows the original site layout.
//!
//! # Features
//!
//! - **Resumable Runs**: Captures already on disk (under their derived or hashed name) are skipped
//! - **Index Cache**: The raw index is kept in `snapshots.json` and reused on later runs
//! - **Filesystem-Safe Paths**: URLs are escaped for POSIX or Windows naming rules
//! - **Hashed Fallback**: Content whose derived path cannot be created is saved under a SHA-1 name
//! - **Automatic Retry**: Linear backoff for transient network failures
//!
//! # Example
//!
//! ```no_run
//! use waybacksync::{mirror_domain, MirrorConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MirrorConfig {
//!     domain: "example.com".to_string(),
//!     destination: "./example.com".into(),
//!     latest_only: true,
//!     ..MirrorConfig::default()
//! };
//!
//! mirror_domain(&config).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fetch;
pub mod index;
pub mod orchestrator;
pub mod sanitize;
pub mod types;
pub mod writer;

pub use error::{ArchiveError, FetchError};
pub use fetch::{FetchedResponse, RetryPolicy, RetryingFetcher};
pub use index::{latest_only, SnapshotIndex, TimeRange};
pub use orchestrator::{
    mirror_domain, Downloader, FailReason, RecordOutcome, RunSummary, SkipReason,
};
pub use sanitize::{derive_path, fallback_file_name};
pub use types::{DownloadContext, MirrorConfig, PathStyle, SnapshotRecord};
pub use writer::{save, SaveOutcome};
