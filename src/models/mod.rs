// src/models/mod.rs

//! Domain models for the leaderboard watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod changes;
mod config;
mod entity;
mod snapshot;

// Re-export all public types
pub use changes::{Anomaly, ChangeSet, MemberRef, NewStar, RankChange, ScoreChange};
pub use config::{
    Config, FetchConfig, LoggingConfig, NotifierConfig, SchedulerConfig, StorageConfig,
};
pub use entity::{Credential, EntityKey, MAX_POLL_INTERVAL_SECS, MonitoredEntity};
pub use snapshot::{DayCompletion, MAX_DAY, MemberState, Part, Rank, Snapshot};
