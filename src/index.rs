//! Snapshot index retrieval, caching and filtering.

use crate::error::ArchiveError;
use crate::fetch::RetryingFetcher;
use crate::types::{MirrorConfig, SnapshotRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info, warn};

/// Width of a full capture timestamp.
pub const TIMESTAMP_WIDTH: usize = 14;

/// Builds the index query for every 200-status capture on `domain`.
///
/// Date bounds are deliberately absent: they are applied locally so that one
/// cached index serves any range.
pub fn cdx_query_url(endpoint: &str, domain: &str) -> Result<reqwest::Url, ArchiveError> {
    reqwest::Url::parse_with_params(
        endpoint,
        &[
            ("output", "json"),
            ("url", domain),
            ("matchType", "host"),
            ("filter", "statuscode:200"),
            ("fl", "timestamp,original"),
        ],
    )
    .map_err(|e| ArchiveError::MalformedIndex(format!("invalid index endpoint {}: {}", endpoint, e)))
}

/// Inclusive timestamp bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeRange {
    from: Option<String>,
    to: Option<String>,
}

impl TimeRange {
    /// Bounds shorter than 14 digits are right-padded with `0`.
    pub fn new(from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            from: from.map(pad_timestamp),
            to: to.map(pad_timestamp),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, timestamp: &str) -> bool {
        self.from.as_deref().map_or(true, |from| timestamp >= from)
            && self.to.as_deref().map_or(true, |to| timestamp <= to)
    }
}

fn pad_timestamp(bound: &str) -> String {
    format!("{:0<width$}", bound, width = TIMESTAMP_WIDTH)
}

/// Keeps, for every URL, only its most recent capture.
///
/// Input must be sorted by timestamp; output stays sorted.
pub fn latest_only(records: Vec<SnapshotRecord>) -> Vec<SnapshotRecord> {
    let mut latest: HashMap<&str, usize> = HashMap::new();
    for (position, record) in records.iter().enumerate() {
        latest.insert(record.original_url.as_str(), position);
    }

    let keep: Vec<bool> = records
        .iter()
        .enumerate()
        .map(|(position, record)| latest.get(record.original_url.as_str()) == Some(&position))
        .collect();

    let mut reduced: Vec<SnapshotRecord> = records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect();
    reduced.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    reduced
}

/// Ordered list of captures to mirror, built once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotIndex {
    records: Vec<SnapshotRecord>,
}

impl SnapshotIndex {
    /// Loads the index from the cache, or from the network when no usable
    /// cache exists, then filters and orders it.
    ///
    /// # Arguments
    ///
    /// * `config` - Mirror configuration (domain, bounds, cache location)
    /// * `fetcher` - Fetcher used when the cache is missing
    ///
    /// # Returns
    ///
    /// The ordered index, or an error if the index could not be retrieved.
    /// Index retrieval is never subject to no-fail mode.
    pub async fn load(
        config: &MirrorConfig,
        fetcher: &RetryingFetcher,
    ) -> Result<Self, ArchiveError> {
        info!("Getting snapshot list...");

        let cache_path = config.cache_path();
        let raw = match read_cache(&cache_path).await {
            Some(raw) => {
                info!("Found cached {}", crate::types::SNAPSHOTS_CACHE_FILE);
                raw
            }
            None => fetch_raw_index(config, fetcher, &cache_path).await?,
        };

        let index = Self::from_raw(
            raw,
            &TimeRange::new(config.from.as_deref(), config.to.as_deref()),
            config.latest_only,
        )?;
        info!("Got snapshot list!");
        Ok(index)
    }

    /// Builds the index from the raw index JSON (header row included).
    pub fn from_raw(
        raw: Value,
        range: &TimeRange,
        latest: bool,
    ) -> Result<Self, ArchiveError> {
        let rows = match raw {
            Value::Array(rows) => rows,
            other => {
                return Err(ArchiveError::MalformedIndex(format!(
                    "expected a JSON array, got {}",
                    other
                )))
            }
        };

        // First row is the field header.
        let mut records = Vec::with_capacity(rows.len().saturating_sub(1));
        for row in rows.into_iter().skip(1) {
            let record = parse_row(row)?;
            if is_valid_timestamp(&record.timestamp) {
                records.push(record);
            } else {
                warn!(
                    "Ignoring snapshot {} with invalid timestamp {:?}",
                    record.original_url, record.timestamp
                );
            }
        }

        if records.is_empty() {
            warn!("Sorry, no snapshots found!");
            return Ok(Self::default());
        }

        if !range.is_unbounded() {
            let original_count = records.len();
            records.retain(|record| range.contains(&record.timestamp));
            info!(
                "Applied timestamp filters: {} -> {} snapshots",
                original_count,
                records.len()
            );
        }

        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        if latest {
            let original_count = records.len();
            records = latest_only(records);
            info!(
                "Filtered to latest versions only: {} -> {} snapshots",
                original_count,
                records.len()
            );
        }

        Ok(Self { records })
    }

    pub fn records(&self) -> &[SnapshotRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_row(row: Value) -> Result<SnapshotRecord, ArchiveError> {
    match row {
        Value::Array(cells) if cells.len() >= 2 => Ok(SnapshotRecord::new(
            cell_text(&cells[0]),
            cell_text(&cells[1]),
        )),
        other => Err(ArchiveError::MalformedIndex(format!(
            "expected a [timestamp, original] row, got {}",
            other
        ))),
    }
}

/// Timestamps name a directory under the destination, so only digits pass.
fn is_valid_timestamp(timestamp: &str) -> bool {
    !timestamp.is_empty()
        && timestamp.len() <= TIMESTAMP_WIDTH
        && timestamp.bytes().all(|b| b.is_ascii_digit())
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads the cached raw index. Any failure means "no cache".
async fn read_cache(cache_path: &Path) -> Option<Value> {
    let content = tokio::fs::read(cache_path).await.ok()?;
    match serde_json::from_slice(&content) {
        Ok(raw) => Some(raw),
        Err(e) => {
            warn!(
                "Ignoring unreadable cache {}: {}",
                cache_path.display(),
                e
            );
            None
        }
    }
}

/// Downloads the raw index and persists it verbatim before any filtering.
async fn fetch_raw_index(
    config: &MirrorConfig,
    fetcher: &RetryingFetcher,
    cache_path: &Path,
) -> Result<Value, ArchiveError> {
    let url = cdx_query_url(&config.cdx_endpoint, &config.domain)?;
    info!("Retrieving snapshot index from {}", url);

    let response = match fetcher.get(url.as_str(), None).await {
        Ok(response) => response,
        Err(e) => {
            error!("{}", e);
            error!("    failed to get snapshot list, aborting!");
            return Err(e);
        }
    };

    if !response.status.is_success() {
        error!("[HTTP status code: {}]", response.status.as_u16());
        error!("    failed to get snapshot list, aborting!");
        return Err(ArchiveError::IndexRejected {
            status: response.status.as_u16(),
        });
    }

    let raw: Value = if response.body.iter().all(u8::is_ascii_whitespace) {
        Value::Array(Vec::new())
    } else {
        serde_json::from_slice(&response.body)?
    };

    if let Some(parent) = cache_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(cache_path, serde_json::to_vec(&raw)?).await?;
    info!("Persisted snapshot index to {}", cache_path.display());

    Ok(raw)
}
