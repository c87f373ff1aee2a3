//! TOML-file entity source.
//!
//! ```toml
//! [[entities]]
//! destination = "-1001234567890"
//! leaderboard = "424242"
//! year = 2024
//! credential = "session=53616c7465645f5f..."
//! poll_interval_secs = 900
//! ```
//!
//! Disabling an entity rewrites the file atomically with `enabled = false`
//! and the reason, so an operator can see why it stopped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Credential, EntityKey, MAX_POLL_INTERVAL_SECS, MonitoredEntity};
use crate::services::EntitySource;
use crate::utils::fs;

/// One `[[entities]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    pub destination: String,
    pub leaderboard: String,
    pub year: u16,
    pub credential: Credential,

    #[serde(default = "defaults::poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
}

impl EntityEntry {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.destination, &self.leaderboard, self.year)
    }

    pub fn to_entity(&self) -> MonitoredEntity {
        MonitoredEntity {
            key: self.key(),
            poll_interval_secs: self.poll_interval_secs,
            enabled: self.enabled,
            credential: self.credential.clone(),
        }
    }

    /// Problems that make this entry unusable.
    pub fn validate(&self) -> Result<()> {
        if self.destination.trim().is_empty() {
            return Err(AppError::validation("destination is empty"));
        }
        if self.leaderboard.trim().is_empty() {
            return Err(AppError::validation("leaderboard is empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(AppError::validation("poll_interval_secs must be > 0"));
        }
        if self.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            return Err(AppError::validation(format!(
                "poll_interval_secs must be at most {MAX_POLL_INTERVAL_SECS}"
            )));
        }
        if self.credential.is_empty() {
            return Err(AppError::validation("credential is empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EntityDocument {
    #[serde(default)]
    entities: Vec<EntityEntry>,
}

/// Entity source backed by a TOML file.
#[derive(Debug)]
pub struct EntityFile {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl EntityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<EntityDocument> {
        match fs::load_toml(&self.path).await {
            Ok(document) => Ok(document),
            Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Entity file {} not found; nothing to monitor", self.path.display());
                Ok(EntityDocument::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Every entry in file order, enabled or not.
    pub async fn entries(&self) -> Result<Vec<EntityEntry>> {
        Ok(self.read_document().await?.entities)
    }

    /// Check every entry and reject duplicate keys.
    pub async fn validate(&self) -> Result<usize> {
        let entries = self.entries().await?;
        let mut seen = HashSet::new();
        for entry in &entries {
            entry
                .validate()
                .map_err(|e| AppError::validation(format!("entity {}: {}", entry.key(), e)))?;
            if !seen.insert(entry.key()) {
                return Err(AppError::validation(format!(
                    "entity {} is listed more than once",
                    entry.key()
                )));
            }
        }
        Ok(entries.len())
    }
}

#[async_trait]
impl EntitySource for EntityFile {
    async fn list_enabled_entities(&self) -> Result<Vec<MonitoredEntity>> {
        let mut seen = HashSet::new();
        let mut entities = Vec::new();

        for entry in self.entries().await? {
            if !entry.enabled {
                continue;
            }
            if let Err(e) = entry.validate() {
                log::warn!("Skipping entity {}: {}", entry.key(), e);
                continue;
            }
            if !seen.insert(entry.key()) {
                log::warn!("Skipping duplicate entity {}", entry.key());
                continue;
            }
            entities.push(entry.to_entity());
        }

        Ok(entities)
    }

    async fn disable_entity(&self, key: &EntityKey, reason: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut document = self.read_document().await?;
        let mut found = false;
        for entry in document.entities.iter_mut().filter(|e| &e.key() == key) {
            entry.enabled = false;
            entry.disabled_reason = Some(reason.to_string());
            entry.disabled_at = Some(Utc::now());
            found = true;
        }
        if !found {
            return Err(AppError::config(format!(
                "Cannot disable {}: not in {}",
                key,
                self.path.display()
            )));
        }

        let content = toml::to_string_pretty(&document)?;
        fs::write_atomic(&self.path, content.as_bytes()).await?;
        log::info!("Disabled entity {} in {}: {}", key, self.path.display(), reason);
        Ok(())
    }
}

mod defaults {
    pub fn poll_interval() -> u64 {
        900
    }
    pub fn enabled() -> bool {
        true
    }
}
