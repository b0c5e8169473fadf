//! Feed retrieval (HTTP or local path) and description snapshot persistence.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use flate2::read::GzDecoder;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

pub mod snapshot;

pub use snapshot::{SnapshotError, SnapshotStore, WrittenSnapshot};

pub const CRATE_NAME: &str = "epgdesc-storage";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Where a feed or snapshot lives: a remote URL or a local filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Remote(String),
    Local(PathBuf),
}

impl Locator {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Remote(raw.to_string())
        } else {
            Self::Local(PathBuf::from(raw))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(url) => f.write_str(url),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raw bytes of one retrieved document, already gunzipped when applicable.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub locator: Locator,
    pub body: Vec<u8>,
    pub was_gzip: bool,
}

/// Shared retriever; cheap to clone, concurrency is bounded across all clones.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl FeedFetcher {
    pub fn new(config: FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    /// Fetch a document; `compressed` asks for a gunzip attempt, which silently
    /// falls back to the raw bytes when the payload is not gzip.
    pub async fn fetch(&self, locator: &Locator, compressed: bool) -> Result<FetchedDocument, FetchError> {
        let span = info_span!("feed_fetch", locator = %locator);
        async {
            let raw = match locator {
                Locator::Remote(url) => self.fetch_remote(url).await?,
                Locator::Local(path) => fs::read(path).await.map_err(|source| FetchError::Io {
                    path: path.clone(),
                    source,
                })?,
            };
            let (body, was_gzip) = maybe_gunzip(raw, compressed);
            debug!(bytes = body.len(), was_gzip, "feed retrieved");
            Ok::<_, FetchError>(FetchedDocument {
                locator: locator.clone(),
                body,
                was_gzip,
            })
        }
        .instrument(span)
        .await
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let _permit = self.limit.acquire().await.expect("semaphore not closed");

        for attempt in 0..=self.backoff.max_retries {
            let retries_left = attempt < self.backoff.max_retries;
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.bytes().await.map_err(|source| FetchError::Request {
                            url: url.to_string(),
                            source,
                        })?;
                        return Ok(body.to_vec());
                    }
                    if classify_status(status) == RetryDisposition::Retryable && retries_left {
                        warn!(%status, attempt, "retrying feed fetch");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && retries_left {
                        warn!(error = %err, attempt, "retrying feed fetch");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request {
                        url: url.to_string(),
                        source: err,
                    });
                }
            }
        }

        unreachable!("final attempt always returns")
    }
}

/// Gunzip when asked to or when the gzip magic header is present; keep the raw
/// bytes if decompression fails.
pub fn maybe_gunzip(raw: Vec<u8>, compressed: bool) -> (Vec<u8>, bool) {
    if !compressed && !raw.starts_with(&GZIP_MAGIC) {
        return (raw, false);
    }
    let mut out = Vec::new();
    match GzDecoder::new(raw.as_slice()).read_to_end(&mut out) {
        Ok(_) => (out, true),
        Err(_) => (raw, false),
    }
}

/// Sibling path used for atomic replace-by-rename.
pub(crate) fn temp_sibling(path: &Path, len: usize) -> PathBuf {
    let name = format!(".{}.{}.tmp", uuid::Uuid::new_v4(), len);
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.join(&name))
        .unwrap_or_else(|| PathBuf::from(name))
}
