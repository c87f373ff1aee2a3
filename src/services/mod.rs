// src/services/mod.rs

//! External collaborators of the polling core.
//!
//! The scheduler only sees the traits below; the concrete clients talk to
//! the leaderboard site, the messaging API and the entity file.

pub mod aoc;
pub mod entities;
pub mod telegram;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DeliveryError, FetchError, Result};
use crate::models::{Credential, EntityKey, MonitoredEntity, Snapshot};

pub use aoc::AocClient;
pub use entities::EntityFile;
pub use telegram::TelegramNotifier;

/// Retrieves a fresh snapshot of one leaderboard.
///
/// Implementations must honor `timeout` and must not retry internally.
#[async_trait]
pub trait LeaderboardClient: Send + Sync {
    async fn fetch(
        &self,
        leaderboard: &str,
        year: u16,
        credential: &Credential,
        timeout: Duration,
    ) -> std::result::Result<Snapshot, FetchError>;
}

/// Delivers a formatted message to one destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> std::result::Result<(), DeliveryError>;
}

/// Source of truth for which entities are monitored.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Enabled entities, in the source's order.
    async fn list_enabled_entities(&self) -> Result<Vec<MonitoredEntity>>;

    /// Mark an entity disabled after a terminal failure.
    async fn disable_entity(&self, key: &EntityKey, reason: &str) -> Result<()>;
}
