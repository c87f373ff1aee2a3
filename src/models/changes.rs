//! Structured differences between two snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::snapshot::{Part, Rank};

/// Member identity as carried by change entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub id: String,
    pub name: String,
}

impl MemberRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A day/part completed since the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStar {
    pub member: MemberRef,
    pub day: u8,
    pub part: Part,
    /// Both parts of the day are done as of the new snapshot
    pub completes_day: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChange {
    pub member: MemberRef,
    pub old: Rank,
    pub new: Rank,
}

impl RankChange {
    /// Places gained (positive) or lost (negative); `None` when either side is unranked.
    pub fn places_gained(&self) -> Option<i64> {
        match (self.old, self.new) {
            (Rank::Ranked(old), Rank::Ranked(new)) => Some(old as i64 - new as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub member: MemberRef,
    pub old: i64,
    pub new: i64,
}

impl ScoreChange {
    pub fn delta(&self) -> i64 {
        self.new - self.old
    }
}

/// A monotonicity violation between two snapshots of the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anomaly {
    /// Star total went down
    StarsDecreased { member: MemberRef, old: u32, new: u32 },
    /// A previously completed part is no longer completed
    CompletionRevoked { member: MemberRef, day: u8, part: Part },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::StarsDecreased { member, old, new } => write!(
                f,
                "{} ({}) star total dropped from {} to {}",
                member.name, member.id, old, new
            ),
            Anomaly::CompletionRevoked { member, day, part } => write!(
                f,
                "{} ({}) lost day {} part {}",
                member.name, member.id, day, part
            ),
        }
    }
}

/// Everything that changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub new_stars: Vec<NewStar>,
    pub rank_changes: Vec<RankChange>,
    pub score_changes: Vec<ScoreChange>,
    pub new_members: Vec<MemberRef>,
    /// Not part of `is_empty`; reported to the operator instead of the destination
    pub anomalies: Vec<Anomaly>,
}

impl ChangeSet {
    /// True iff there is nothing to notify.
    pub fn is_empty(&self) -> bool {
        self.new_stars.is_empty()
            && self.rank_changes.is_empty()
            && self.score_changes.is_empty()
            && self.new_members.is_empty()
    }

    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }

    /// Number of notifiable events.
    pub fn change_count(&self) -> usize {
        self.new_stars.len()
            + self.rank_changes.len()
            + self.score_changes.len()
            + self.new_members.len()
    }
}
