//! Snapshot persistence collaborator: the engine hands over a
//! `PipelineSnapshot` and gets the same shape back on load. The stored
//! JSON is opaque to the engine; no schema migration happens here.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use spt_engine::PipelineSnapshot;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "spt-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Receipt for one persisted snapshot.
#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
    pub saved_at: DateTime<Utc>,
}

/// Persists snapshots verbatim as pretty JSON at a fixed path, using an
/// atomic temp-file write plus rename so readers never observe a torn
/// snapshot.
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

    pub async fn save(&self, snapshot: &PipelineSnapshot) -> Result<SavedSnapshot, StorageError> {
        let span = info_span!("snapshot_save", path = %self.path.display());
        let _guard = span.enter();

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let content_hash = Self::sha256_hex(&bytes);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|source| StorageError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4()));
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StorageError::Io { path, source }
        };

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;
        file.write_all(&bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io {
                path: self.path.clone(),
                source,
            });
        }

        Ok(SavedSnapshot {
            path: self.path.clone(),
            content_hash,
            byte_size: bytes.len(),
            saved_at: Utc::now(),
        })
    }

    pub async fn load(&self) -> Result<PipelineSnapshot, StorageError> {
        let bytes = fs::read(&self.path).await.map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Loads the current snapshot, treating a missing file as the empty
    /// dataset. Used by read-only callers that should work before the
    /// first import ever commits.
    pub async fn load_or_default(&self) -> Result<PipelineSnapshot, StorageError> {
        match self.load().await {
            Ok(snapshot) => Ok(snapshot),
            Err(StorageError::Io { ref source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(PipelineSnapshot::default())
            }
            Err(err) => Err(err),
        }
    }
}
