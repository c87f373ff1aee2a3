//! Durable storage of the last snapshot per entity.
//!
//! One record per entity key; records are independent of each other, so
//! saves for different entities never contend. Saves replace the record
//! atomically: a reader sees either the previous snapshot or the new one.
//!
//! ## Directory Structure
//!
//! ```text
//! state/
//! ├── -100123_424242_2024.json
//! └── x6368617420313233_424242_2023.json   # hex-encoded component
//! ```

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{EntityKey, Snapshot};

// Re-export for convenience
pub use local::LocalStorage;

/// Current on-disk record format.
pub const RECORD_FORMAT: u32 = 1;

/// Envelope written for each entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Record format version
    pub format: u32,
    /// Entity the snapshot belongs to
    pub key: EntityKey,
    /// When the record was written
    pub saved_at: DateTime<Utc>,
    pub snapshot: Snapshot,
}

impl SnapshotRecord {
    pub fn new(key: EntityKey, snapshot: Snapshot) -> Self {
        Self {
            format: RECORD_FORMAT,
            key,
            saved_at: Utc::now(),
            snapshot,
        }
    }
}

/// Trait for snapshot storage backends.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Last saved snapshot, or `None` before the first successful save.
    async fn load(&self, key: &EntityKey) -> Result<Option<Snapshot>>;

    /// Atomically replace the stored snapshot.
    async fn save(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<()>;
}
