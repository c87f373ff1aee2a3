//! Local filesystem snapshot storage.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── {destination}_{leaderboard}_{year}.json        # SnapshotRecord
//! └── {destination}_{leaderboard}_{year}.json.tmp    # only during a save
//! ```
//!
//! Key components made only of ASCII letters, digits and `-` (and not
//! starting with `x`) are used verbatim; anything else is hex-encoded with
//! an `x` prefix, so distinct keys never share a file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AppError, Result};
use crate::models::{EntityKey, Snapshot};
use crate::storage::{SnapshotRecord, SnapshotStore};
use crate::utils::fs;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Create the state directory and prove it is writable.
    ///
    /// Called once at startup; failure here is fatal.
    pub async fn ensure_writable(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        let marker = self.root_dir.join(".write-check");
        tokio::fs::write(&marker, b"ok").await.map_err(|e| {
            AppError::config(format!(
                "State directory {} is not writable: {}",
                self.root_dir.display(),
                e
            ))
        })?;
        tokio::fs::remove_file(&marker).await?;
        Ok(())
    }

    /// File name of an entity's record.
    pub fn file_name(key: &EntityKey) -> String {
        format!(
            "{}_{}_{}.json",
            encode_component(&key.destination),
            encode_component(&key.leaderboard),
            key.year
        )
    }

    /// Get the full path for an entity's record.
    fn path(&self, key: &EntityKey) -> PathBuf {
        self.root_dir.join(Self::file_name(key))
    }

    /// Write bytes atomically (write to temp, sync, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::write_atomic(path, bytes).await
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(path, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match self.read_bytes(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every readable record in the state directory, ordered by key.
    pub async fn list_records(&self) -> Result<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(AppError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read_json::<SnapshotRecord>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}

#[async_trait]
impl SnapshotStore for LocalStorage {
    async fn load(&self, key: &EntityKey) -> Result<Option<Snapshot>> {
        let path = self.path(key);
        match self.read_json::<SnapshotRecord>(&path).await {
            Ok(Some(record)) => {
                log::debug!("Loaded snapshot for {} from {}", key, path.display());
                Ok(Some(record.snapshot))
            }
            Ok(None) => {
                log::debug!("No stored snapshot for {}", key);
                Ok(None)
            }
            Err(AppError::Json(e)) => {
                log::warn!(
                    "Stored snapshot for {} at {} is unreadable ({}); starting fresh",
                    key,
                    path.display(),
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<()> {
        let path = self.path(key);
        let record = SnapshotRecord::new(key.clone(), snapshot.clone());
        self.write_json(&path, &record)
            .await
            .map_err(|e| AppError::storage(key.to_string(), e))?;
        log::debug!(
            "Saved snapshot for {} ({} members) to {}",
            key,
            snapshot.members.len(),
            path.display()
        );
        Ok(())
    }
}

fn encode_component(component: &str) -> String {
    let verbatim = !component.is_empty()
        && !component.starts_with('x')
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if verbatim {
        component.to_string()
    } else {
        format!("x{}", hex::encode(component.as_bytes()))
    }
}
