//! Persisting downloaded content, with a hashed-name fallback.

use crate::sanitize::fallback_file_name;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Result of a save attempt. Filesystem failures never escape as errors.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Written at the derived path.
    Saved,
    /// The derived path failed; content is under the timestamp directory as `file_name`.
    SavedFallback {
        file_name: String,
        primary_error: io::Error,
    },
    /// A regular file occupies the directory the derived path needs.
    Collision { directory: PathBuf },
    /// Both the derived path and the fallback failed.
    Failed {
        file_name: String,
        primary_error: io::Error,
        fallback_error: io::Error,
    },
}

/// Full path of the fallback file for `original_url` under `timestamp_dir`.
pub fn fallback_path(timestamp_dir: &Path, original_url: &str) -> PathBuf {
    timestamp_dir.join(fallback_file_name(original_url))
}

/// Writes `content` to `target_path`, falling back to a hashed file name
/// directly under `timestamp_dir` if the derived path cannot be created.
///
/// # Arguments
///
/// * `target_path` - Derived location, somewhere below `timestamp_dir`
/// * `content` - Bytes to persist
/// * `timestamp_dir` - `<dest>/<timestamp>`
/// * `original_url` - URL the fallback name is derived from
///
/// # Returns
///
/// What happened; see [`SaveOutcome`].
pub async fn save(
    target_path: &Path,
    content: &[u8],
    timestamp_dir: &Path,
    original_url: &str,
) -> SaveOutcome {
    let directory = target_path.parent().unwrap_or(timestamp_dir);

    if tokio::fs::metadata(directory)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
    {
        return SaveOutcome::Collision {
            directory: directory.to_path_buf(),
        };
    }

    let primary_error = match write_primary(target_path, directory, content).await {
        Ok(()) => return SaveOutcome::Saved,
        Err(e) => e,
    };
    debug!(
        "Could not write {}: {}",
        target_path.display(),
        primary_error
    );

    remove_empty_subtree(directory, timestamp_dir).await;

    let file_name = fallback_file_name(original_url);
    match write_fallback(timestamp_dir, &file_name, content).await {
        Ok(()) => SaveOutcome::SavedFallback {
            file_name,
            primary_error,
        },
        Err(fallback_error) => SaveOutcome::Failed {
            file_name,
            primary_error,
            fallback_error,
        },
    }
}

async fn write_primary(target_path: &Path, directory: &Path, content: &[u8]) -> io::Result<()> {
    tokio::fs::create_dir_all(directory).await?;
    tokio::fs::write(target_path, content).await
}

async fn write_fallback(timestamp_dir: &Path, file_name: &str, content: &[u8]) -> io::Result<()> {
    tokio::fs::create_dir_all(timestamp_dir).await?;
    tokio::fs::write(timestamp_dir.join(file_name), content).await
}

/// Removes the first-level directory under `timestamp_dir` on the way to
/// `directory`, but only when its whole subtree holds no files. Errors are
/// ignored.
async fn remove_empty_subtree(directory: &Path, timestamp_dir: &Path) {
    let relative = match directory.strip_prefix(timestamp_dir) {
        Ok(relative) => relative,
        Err(_) => return,
    };
    let first = match relative.components().next() {
        Some(Component::Normal(first)) => first,
        _ => return,
    };

    let candidate = timestamp_dir.join(first);
    let is_dir = tokio::fs::metadata(&candidate)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return;
    }

    let scan_root = candidate.clone();
    let holds_files = tokio::task::spawn_blocking(move || {
        WalkDir::new(&scan_root)
            .into_iter()
            .filter_map(Result::ok)
            .any(|entry| !entry.file_type().is_dir())
    })
    .await
    // A failed scan counts as "not empty": never delete what was not checked.
    .unwrap_or(true);
    if holds_files {
        return;
    }

    if let Err(e) = tokio::fs::remove_dir_all(&candidate).await {
        debug!("Cleanup of {} failed: {}", candidate.display(), e);
    }
}
