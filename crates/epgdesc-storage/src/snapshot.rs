//! Load / persist lifecycle of the description store snapshot.

use std::path::{Path, PathBuf};

use epgdesc_core::DescriptionStore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::{temp_sibling, FeedFetcher, FetchError, Locator};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot json from {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone)]
pub struct WrittenSnapshot {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// The on-disk home of a [`DescriptionStore`].
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn decode(bytes: &[u8], origin: &str) -> Result<DescriptionStore, SnapshotError> {
        serde_json::from_slice(bytes).map_err(|source| SnapshotError::Json {
            origin: origin.to_string(),
            source,
        })
    }

    pub async fn read_local(&self) -> Result<Option<DescriptionStore>, SnapshotError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Self::decode(&bytes, &self.path.display().to_string()).map(Some)
    }

    pub async fn read_remote(
        fetcher: &FeedFetcher,
        locator: &Locator,
    ) -> Result<DescriptionStore, SnapshotError> {
        let doc = fetcher.fetch(locator, false).await?;
        Self::decode(&doc.body, &locator.to_string())
    }

    /// Accumulation start point: remote snapshot, then the local file, then empty.
    /// Never fails; every fallback is logged.
    pub async fn load_or_empty(
        &self,
        fetcher: &FeedFetcher,
        remote: Option<&Locator>,
    ) -> DescriptionStore {
        if let Some(locator) = remote {
            match Self::read_remote(fetcher, locator).await {
                Ok(store) => {
                    info!(records = store.record_count(), origin = %locator, "loaded prior snapshot");
                    return store;
                }
                Err(err) => warn!(error = %err, "prior snapshot unavailable, trying local file"),
            }
        }

        match self.read_local().await {
            Ok(Some(store)) => {
                info!(
                    records = store.record_count(),
                    path = %self.path.display(),
                    "loaded local snapshot"
                );
                store
            }
            Ok(None) => {
                info!(path = %self.path.display(), "no prior snapshot, starting empty");
                DescriptionStore::new()
            }
            Err(err) => {
                warn!(error = %err, "local snapshot unreadable, starting empty");
                DescriptionStore::new()
            }
        }
    }

    /// Write compact JSON via temp file + rename so readers never see a torn file.
    pub async fn persist(&self, store: &DescriptionStore) -> Result<WrittenSnapshot, SnapshotError> {
        let bytes = serde_json::to_vec(store).map_err(|source| SnapshotError::Json {
            origin: self.path.display().to_string(),
            source,
        })?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| SnapshotError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }

        let temp_path = temp_sibling(&self.path, bytes.len());
        let mut file = fs::File::create(&temp_path).await.map_err(io_err(&temp_path))?;
        file.write_all(&bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(SnapshotError::Io {
                path: self.path.clone(),
                source,
            });
        }

        Ok(WrittenSnapshot {
            path: self.path.clone(),
            bytes: bytes.len() as u64,
            sha256: Self::sha256_hex(&bytes),
        })
    }
}
