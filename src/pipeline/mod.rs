//! Polling pipeline.
//!
//! - `calculate_diff`: Compare two snapshots of one leaderboard
//! - `poll_entity`: One fetch → diff → notify → persist cycle
//! - `Scheduler`: Decide when each entity is polled and track its health

pub mod backoff;
pub mod diff;
pub mod poll;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::BackoffPolicy;
pub use diff::calculate_diff;
pub use poll::{PollContext, PollError, PollReport, poll_entity};
pub use scheduler::{
    Collaborators, CycleOutcome, EntityPhase, EntityRuntimeState, EntityStatus, RefreshSummary,
    Scheduler,
};
