//! Main orchestration logic for mirroring a domain.

use crate::error::ArchiveError;
use crate::fetch::RetryingFetcher;
use crate::index::SnapshotIndex;
use crate::sanitize::derive_path;
use crate::types::{DownloadContext, MirrorConfig, SnapshotRecord};
use crate::writer::{fallback_path, save, SaveOutcome};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};

/// Why a record was not fetched or not saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed in the configured skip timestamps.
    Timestamp,
    /// The derived path already holds a file.
    AlreadyOnDisk,
    /// A previous run saved this record under its fallback name.
    FallbackOnDisk { file_name: String },
    DryRun,
    /// The archive answered 200 with no content.
    EmptyBody,
}

/// Why a record could not be mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    HttpStatus(u16),
    /// The fetch kept failing and no-fail mode let the run continue.
    Unreachable,
    Collision { directory: PathBuf },
    Unwritable {
        file_name: String,
        fallback_error: String,
    },
}

/// Terminal state of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Skipped(SkipReason),
    Saved,
    SavedFallback {
        file_name: String,
        primary_error: String,
    },
    Failed(FailReason),
}

impl RecordOutcome {
    /// Tag appended to the record's status line.
    pub fn status(&self) -> String {
        match self {
            RecordOutcome::Skipped(SkipReason::Timestamp) => {
                "[SKIP: by timestamp command line option]".to_string()
            }
            RecordOutcome::Skipped(SkipReason::AlreadyOnDisk) => {
                "[SKIP: already on disk]".to_string()
            }
            RecordOutcome::Skipped(SkipReason::FallbackOnDisk { file_name }) => {
                format!("[SKIP: hashed filename {} already on disk]", file_name)
            }
            RecordOutcome::Skipped(SkipReason::DryRun) => "[DRY RUN]".to_string(),
            RecordOutcome::Skipped(SkipReason::EmptyBody) => "[SKIP: file size is 0]".to_string(),
            RecordOutcome::Saved => "[OK]".to_string(),
            RecordOutcome::SavedFallback {
                file_name,
                primary_error,
            } => format!(
                "[OK: could not save to original path ({}), used hashed filename {}]",
                primary_error, file_name
            ),
            RecordOutcome::Failed(FailReason::HttpStatus(code)) => {
                format!("[HTTP code: {}]", code)
            }
            RecordOutcome::Failed(FailReason::Unreachable) => {
                "[Failed to download, proceeding to next file]".to_string()
            }
            RecordOutcome::Failed(FailReason::Collision { directory }) => format!(
                "[SKIP: could not save] File {} already exists, can't create directory with the same name",
                directory.display()
            ),
            RecordOutcome::Failed(FailReason::Unwritable {
                file_name,
                fallback_error,
            }) => format!(
                "[SKIP: could not save - hashed filename {} also failed ({})]",
                file_name, fallback_error
            ),
        }
    }

    pub fn level(&self) -> Level {
        match self {
            RecordOutcome::Failed(FailReason::Unreachable) => Level::WARN,
            RecordOutcome::Failed(_) => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

impl From<SaveOutcome> for RecordOutcome {
    fn from(outcome: SaveOutcome) -> Self {
        match outcome {
            SaveOutcome::Saved => RecordOutcome::Saved,
            SaveOutcome::SavedFallback {
                file_name,
                primary_error,
            } => RecordOutcome::SavedFallback {
                file_name,
                primary_error: primary_error.to_string(),
            },
            SaveOutcome::Collision { directory } => {
                RecordOutcome::Failed(FailReason::Collision { directory })
            }
            SaveOutcome::Failed {
                file_name,
                fallback_error,
                ..
            } => RecordOutcome::Failed(FailReason::Unwritable {
                file_name,
                fallback_error: fallback_error.to_string(),
            }),
        }
    }
}

/// Per-outcome counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub saved: usize,
    pub saved_fallback: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Saved => self.saved += 1,
            RecordOutcome::SavedFallback { .. } => self.saved_fallback += 1,
            RecordOutcome::Skipped(_) => self.skipped += 1,
            RecordOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Drives every record of an index through skip checks, fetch and save,
/// strictly one after another.
pub struct Downloader<'a> {
    config: &'a MirrorConfig,
    fetcher: &'a RetryingFetcher,
}

impl<'a> Downloader<'a> {
    pub fn new(config: &'a MirrorConfig, fetcher: &'a RetryingFetcher) -> Self {
        Self { config, fetcher }
    }

    /// Processes every record in order and reports one status line each.
    ///
    /// # Returns
    ///
    /// Outcome counts, or the error that aborted the run (exhausted retries
    /// outside no-fail mode).
    pub async fn download_all(&self, index: &SnapshotIndex) -> Result<RunSummary, ArchiveError> {
        let total = index.len();
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };

        for (position, record) in index.records().iter().enumerate() {
            let ctx = DownloadContext::new(position + 1, total, record);
            let outcome = self.download_record(record, &ctx).await?;
            ctx.log(outcome.level(), &outcome.status());
            summary.record(&outcome);
        }

        Ok(summary)
    }

    /// Resolves a single record.
    ///
    /// The caller reports the returned outcome. Lines emitted here are limited
    /// to retry notices and the abort notice preceding an error.
    pub async fn download_record(
        &self,
        record: &SnapshotRecord,
        ctx: &DownloadContext<'_>,
    ) -> Result<RecordOutcome, ArchiveError> {
        if let Some(reason) = self.skip_reason(record).await {
            return Ok(RecordOutcome::Skipped(reason));
        }

        let url = self.config.content_url(record);
        let response = match self.fetcher.get_or_skip(&url, Some(ctx)).await {
            Ok(Some(response)) => response,
            Ok(None) => return Ok(RecordOutcome::Failed(FailReason::Unreachable)),
            Err(e) => {
                let status = match &e {
                    ArchiveError::RetriesExhausted { retries, .. } => {
                        format!("[{} retries failed, aborted]", retries)
                    }
                    other => format!("[Failed to download ({}), aborted]", other),
                };
                ctx.log(Level::ERROR, &status);
                return Err(e);
            }
        };

        if response.status.as_u16() != 200 {
            return Ok(RecordOutcome::Failed(FailReason::HttpStatus(
                response.status.as_u16(),
            )));
        }
        if response.body.is_empty() {
            return Ok(RecordOutcome::Skipped(SkipReason::EmptyBody));
        }

        let timestamp_dir = self.config.timestamp_dir(&record.timestamp);
        let outcome = save(
            &self.primary_path(record),
            &response.body,
            &timestamp_dir,
            &record.original_url,
        )
        .await;
        Ok(outcome.into())
    }

    /// `<dest>/<timestamp>/<derived path>`.
    pub fn primary_path(&self, record: &SnapshotRecord) -> PathBuf {
        self.config
            .timestamp_dir(&record.timestamp)
            .join(derive_path(&record.original_url, self.config.path_style))
    }

    async fn skip_reason(&self, record: &SnapshotRecord) -> Option<SkipReason> {
        if self.config.skip_timestamps.contains(&record.timestamp) {
            return Some(SkipReason::Timestamp);
        }

        if is_file(&self.primary_path(record)).await {
            return Some(SkipReason::AlreadyOnDisk);
        }

        let timestamp_dir = self.config.timestamp_dir(&record.timestamp);
        let fallback = fallback_path(&timestamp_dir, &record.original_url);
        if is_file(&fallback).await {
            let file_name = fallback
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Some(SkipReason::FallbackOnDisk { file_name });
        }

        if self.config.dry_run {
            return Some(SkipReason::DryRun);
        }

        None
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Mirrors every archived capture of the configured domain.
///
/// This is the main entry point. It performs the following steps:
///
/// 1. Loads the snapshot index (cached `snapshots.json` or the index API)
/// 2. Filters and orders it
/// 3. Downloads each capture in turn, skipping what is already on disk
///
/// # Arguments
///
/// * `config` - Mirror configuration
///
/// # Returns
///
/// Outcome counts on completion (including "no snapshots found"), or an error
/// when the index cannot be retrieved or a fetch exhausts its retries outside
/// no-fail mode.
///
/// # Example
///
/// ```no_run
/// use waybacksync::{mirror_domain, MirrorConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = MirrorConfig {
///     domain: "example.com".to_string(),
///     destination: "./example.com".into(),
///     ..MirrorConfig::default()
/// };
/// let summary = mirror_domain(&config).await?;
/// println!("{} files saved", summary.saved + summary.saved_fallback);
/// # Ok(())
/// # }
/// ```
pub async fn mirror_domain(config: &MirrorConfig) -> Result<RunSummary, ArchiveError> {
    let started = Instant::now();
    tokio::fs::create_dir_all(&config.destination).await?;

    let fetcher = RetryingFetcher::new(config)?;
    let index = SnapshotIndex::load(config, &fetcher).await?;

    let summary = Downloader::new(config, &fetcher)
        .download_all(&index)
        .await?;

    if config.dry_run {
        info!("Dry run completed.");
    }
    info!(
        "Done: {} saved, {} saved under hashed names, {} skipped, {} failed of {} snapshots in {}",
        summary.saved,
        summary.saved_fallback,
        summary.skipped,
        summary.failed,
        summary.total,
        humantime::format_duration(std::time::Duration::from_secs(started.elapsed().as_secs()))
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::fallback_file_name;
    use crate::types::PathStyle;

    fn config(dest: &std::path::Path) -> MirrorConfig {
        MirrorConfig {
            domain: "x.test".to_string(),
            destination: dest.to_path_buf(),
            // Nothing listens here; a fetch attempt shows up as Unreachable.
            web_endpoint: "http://127.0.0.1:9/web".to_string(),
            cdx_endpoint: "http://127.0.0.1:9/cdx".to_string(),
            no_fail: true,
            path_style: PathStyle::Posix,
            ..MirrorConfig::default()
        }
    }

    async fn outcome_for(config: &MirrorConfig, record: &SnapshotRecord) -> RecordOutcome {
        let fetcher = RetryingFetcher::new(config).unwrap();
        let downloader = Downloader::new(config, &fetcher);
        let ctx = DownloadContext::new(1, 1, record);
        downloader.download_record(record, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn listed_timestamps_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.skip_timestamps.insert("20200101000000".to_string());
        let record = SnapshotRecord::new("20200101000000", "http://x.test/");

        assert_eq!(
            outcome_for(&config, &record).await,
            RecordOutcome::Skipped(SkipReason::Timestamp)
        );
    }

    #[tokio::test]
    async fn existing_primary_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let record = SnapshotRecord::new("20200101000000", "http://x.test/a/");
        let existing = dir.path().join("20200101000000").join("a").join("index.html");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"old").unwrap();

        assert_eq!(
            outcome_for(&config, &record).await,
            RecordOutcome::Skipped(SkipReason::AlreadyOnDisk)
        );
    }

    #[tokio::test]
    async fn existing_fallback_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let url = "http://x.test/some/page.php";
        let record = SnapshotRecord::new("20200101000000", url);
        let ts_dir = dir.path().join("20200101000000");
        std::fs::create_dir_all(&ts_dir).unwrap();
        std::fs::write(ts_dir.join(fallback_file_name(url)), b"old").unwrap();

        assert_eq!(
            outcome_for(&config, &record).await,
            RecordOutcome::Skipped(SkipReason::FallbackOnDisk {
                file_name: fallback_file_name(url)
            })
        );
    }

    #[tokio::test]
    async fn dry_run_never_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.dry_run = true;
        let record = SnapshotRecord::new("20200101000000", "http://x.test/");

        assert_eq!(
            outcome_for(&config, &record).await,
            RecordOutcome::Skipped(SkipReason::DryRun)
        );
        assert!(!dir.path().join("20200101000000").exists());
    }

    #[tokio::test]
    async fn unreachable_archive_degrades_in_no_fail_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let record = SnapshotRecord::new("20200101000000", "http://x.test/");

        assert_eq!(
            outcome_for(&config, &record).await,
            RecordOutcome::Failed(FailReason::Unreachable)
        );
    }

    #[tokio::test]
    async fn unreachable_archive_aborts_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.no_fail = false;
        let fetcher = RetryingFetcher::new(&config).unwrap();
        let downloader = Downloader::new(&config, &fetcher);
        let record = SnapshotRecord::new("20200101000000", "http://x.test/");
        let ctx = DownloadContext::new(1, 1, &record);

        let err = downloader.download_record(&record, &ctx).await.unwrap_err();
        assert!(matches!(err, ArchiveError::RetriesExhausted { .. }));
    }

    #[test]
    fn status_tags() {
        assert_eq!(RecordOutcome::Saved.status(), "[OK]");
        assert_eq!(
            RecordOutcome::Failed(FailReason::HttpStatus(404)).status(),
            "[HTTP code: 404]"
        );
        assert_eq!(
            RecordOutcome::Failed(FailReason::HttpStatus(404)).level(),
            Level::ERROR
        );
        assert_eq!(
            RecordOutcome::Skipped(SkipReason::EmptyBody).status(),
            "[SKIP: file size is 0]"
        );
    }
}
