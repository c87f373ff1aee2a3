// src/pipeline/poll.rs

//! One poll cycle for one entity: fetch → diff → notify → persist.
//!
//! The store is written last. A cycle interrupted before the write leaves the
//! previous snapshot in place, so the next cycle recomputes the same diff
//! instead of losing it. A delivery failure does not stop the write: each
//! detected change gets one send attempt.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::error::{AppError, FailureKind, FetchError};
use crate::models::{ChangeSet, Config, MonitoredEntity};
use crate::pipeline::diff::calculate_diff;
use crate::services::{LeaderboardClient, Notifier};
use crate::storage::SnapshotStore;
use crate::utils::message;

/// Collaborators and settings shared by every cycle.
#[derive(Clone)]
pub struct PollContext {
    pub client: Arc<dyn LeaderboardClient>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn SnapshotStore>,
    pub fetch_timeout: Duration,
    pub message_delay: Duration,
    pub operator_destination: Option<String>,
}

impl PollContext {
    pub fn new(
        config: &Config,
        client: Arc<dyn LeaderboardClient>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            client,
            notifier,
            store,
            fetch_timeout: config.fetch.timeout(),
            message_delay: config.notifier.message_delay(),
            operator_destination: config.notifier.operator_destination.clone(),
        }
    }

    /// Send message parts in order; returns whether every part was delivered.
    pub async fn deliver(&self, destination: &str, messages: &[String]) -> bool {
        let mut delivered = true;
        for (i, text) in messages.iter().enumerate() {
            if let Err(e) = self.notifier.send(destination, text).await {
                log::error!(
                    "Failed to send message {}/{} to {}: {}",
                    i + 1,
                    messages.len(),
                    destination,
                    e
                );
                delivered = false;
            }
            if i + 1 < messages.len() && !self.message_delay.is_zero() {
                tokio::time::sleep(self.message_delay).await;
            }
        }
        delivered
    }

    /// Log an operator-facing alert and forward it when an operator destination is set.
    pub async fn alert(&self, text: &str) {
        log::error!("ALERT: {}", text);
        if let Some(operator) = &self.operator_destination {
            if let Err(e) = self.notifier.send(operator, text).await {
                log::error!("Failed to deliver operator alert: {}", e);
            }
        }
    }
}

/// What a successful cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub changes: ChangeSet,
    /// No snapshot was stored before this cycle
    pub first_run: bool,
    /// `Some(all parts delivered)` when a notification was attempted
    pub delivered: Option<bool>,
    /// The stored snapshot was replaced
    pub saved: bool,
}

/// Why a cycle failed.
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Loading or saving the snapshot failed
    #[error("snapshot store: {0}")]
    Store(AppError),
}

impl PollError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PollError::Fetch(e) => e.kind(),
            PollError::Store(_) => FailureKind::Storage,
        }
    }

    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            PollError::Fetch(e) => Some(e),
            PollError::Store(_) => None,
        }
    }
}

/// Run one cycle for `entity`.
pub async fn poll_entity(
    ctx: &PollContext,
    entity: &MonitoredEntity,
) -> Result<PollReport, PollError> {
    let key = &entity.key;

    let snapshot = ctx
        .client
        .fetch(&key.leaderboard, key.year, &entity.credential, ctx.fetch_timeout)
        .await?;
    let previous = ctx.store.load(key).await.map_err(PollError::Store)?;

    let changes = calculate_diff(previous.as_ref(), &snapshot);

    if changes.has_anomalies() {
        ctx.alert(&message::format_anomalies(key, &changes.anomalies)).await;
    }

    let delivered = if changes.is_empty() {
        log::debug!("No changes for {}", key);
        None
    } else {
        log::info!("Changes detected for {}: {} event(s)", key, changes.change_count());
        let messages = message::format_changes(&changes, key);
        Some(ctx.deliver(&key.destination, &messages).await)
    };

    let saved = previous.as_ref() != Some(&snapshot);
    if saved {
        ctx.store.save(key, &snapshot).await.map_err(PollError::Store)?;
    }

    Ok(PollReport {
        changes,
        first_run: previous.is_none(),
        delivered,
        saved,
    })
}
