//! Retrying HTTP GET shared by index and content retrieval.

use crate::error::{ArchiveError, FetchError};
use crate::types::{DownloadContext, MirrorConfig};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn, Level};

/// Linear backoff: retry `n` waits `base_delay * 2 * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.delay,
        }
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2 * retry
    }

    /// Every wait the policy allows, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> {
        let policy = *self;
        (1..=policy.max_retries).map(move |retry| policy.delay_for(retry))
    }
}

/// A completed request. Non-2xx statuses are data here, not errors.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// HTTP GET with a per-call retry budget.
///
/// Every call starts with a fresh budget; nothing is remembered between calls.
pub struct RetryingFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    no_fail: bool,
}

impl RetryingFetcher {
    /// Builds a fetcher whose client honors the configured timeout.
    pub fn new(config: &MirrorConfig) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("waybacksync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            policy: RetryPolicy::from_config(config),
            no_fail: config.no_fail,
        })
    }

    /// Runs `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    ///
    /// Each scheduled retry is reported, as a status line when `ctx` is given.
    ///
    /// # Returns
    ///
    /// The operation's value, `ArchiveError::RetriesExhausted` when a
    /// retryable failure outlasted the budget, or `ArchiveError::Fetch` for a
    /// failure that was not retried.
    pub async fn retry<T, F, Fut>(
        &self,
        url: &str,
        ctx: Option<&DownloadContext<'_>>,
        mut operation: F,
    ) -> Result<T, ArchiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let policy = self.policy;
        let mut attempt = 0u32;

        let result = Retry::spawn(policy.schedule(), || {
            attempt += 1;
            let current = attempt;
            let pending = operation();

            async move {
                match pending.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() => {
                        if current <= policy.max_retries {
                            report_retry(ctx, &e, policy.delay_for(current));
                        }
                        RetryError::to_transient(e)
                    }
                    Err(e) => RetryError::to_permanent(e),
                }
            }
        })
        .await;

        result.map_err(|source| {
            if source.is_retryable() {
                ArchiveError::RetriesExhausted {
                    url: url.to_string(),
                    retries: policy.max_retries,
                    source,
                }
            } else {
                ArchiveError::Fetch {
                    url: url.to_string(),
                    source,
                }
            }
        })
    }

    /// GETs `url` and reads the whole body, retrying transport failures.
    pub async fn get(
        &self,
        url: &str,
        ctx: Option<&DownloadContext<'_>>,
    ) -> Result<FetchedResponse, ArchiveError> {
        self.retry(url, ctx, || {
            let request = self.client.get(url);
            async move {
                let response = request.send().await?;
                let status = response.status();
                let body = response.bytes().await?;
                debug!("GET {} -> {} ({} bytes)", url, status, body.len());
                Ok::<_, FetchError>(FetchedResponse {
                    status,
                    body: body.to_vec(),
                })
            }
        })
        .await
    }

    /// Like [`get`](Self::get), but in no-fail mode a failed fetch yields
    /// `Ok(None)` so the caller can move on to the next unit of work.
    pub async fn get_or_skip(
        &self,
        url: &str,
        ctx: Option<&DownloadContext<'_>>,
    ) -> Result<Option<FetchedResponse>, ArchiveError> {
        match self.get(url, ctx).await {
            Ok(response) => Ok(Some(response)),
            Err(e) if self.no_fail && is_fetch_failure(&e) => {
                debug!("Giving up on {}: {}", url, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn is_fetch_failure(err: &ArchiveError) -> bool {
    matches!(
        err,
        ArchiveError::RetriesExhausted { .. } | ArchiveError::Fetch { .. }
    )
}

fn report_retry(ctx: Option<&DownloadContext<'_>>, err: &FetchError, delay: Duration) {
    let wait = humantime::format_duration(delay);
    match ctx {
        Some(ctx) => ctx.log(
            Level::WARN,
            &format!("[Failed to download ({}), retrying after {}...]", err, wait),
        ),
        None => warn!("Failed to download ({}), retrying after {}...", err, wait),
    }
}
