//! Leaderboard snapshot data structures.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Days in an event.
pub const MAX_DAY: u8 = 25;

/// A leaderboard as seen by one fetch.
///
/// Equality compares members only; two fetches of an unchanged leaderboard
/// are equal even though they were taken at different times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the leaderboard was fetched
    pub fetched_at: DateTime<Utc>,

    /// Members keyed by provider member id
    #[serde(default)]
    pub members: BTreeMap<String, MemberState>,
}

impl Snapshot {
    pub fn new(fetched_at: DateTime<Utc>, members: BTreeMap<String, MemberState>) -> Self {
        Self {
            fetched_at,
            members,
        }
    }

    /// Members in display order: name case-insensitively, then id.
    pub fn members_in_display_order(&self) -> Vec<(&str, &MemberState)> {
        let mut members: Vec<_> = self
            .members
            .iter()
            .map(|(id, member)| (id.as_str(), member))
            .collect();
        members.sort_by(|(a_id, a), (b_id, b)| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a_id.cmp(b_id))
        });
        members
    }

    /// Members in standings order: ranked first by rank, then unranked.
    pub fn standings(&self) -> Vec<(&str, &MemberState)> {
        let mut members = self.members_in_display_order();
        members.sort_by_key(|(_, member)| match member.rank {
            Rank::Ranked(rank) => (0, rank),
            Rank::Unranked => (1, 0),
        });
        members
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl Eq for Snapshot {}

/// State of one member at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberState {
    pub display_name: String,

    #[serde(default)]
    pub total_stars: u32,

    #[serde(default)]
    pub local_score: i64,

    #[serde(default)]
    pub rank: Rank,

    /// Day number (1-25) to completion record
    #[serde(default)]
    pub completion: BTreeMap<u8, DayCompletion>,
}

impl MemberState {
    /// Whether the given day/part has been completed.
    pub fn has_completed(&self, day: u8, part: Part) -> bool {
        self.completion
            .get(&day)
            .is_some_and(|completion| completion.is_completed(part))
    }

    /// Every completed (day, part) pair, in day then part order.
    pub fn completed_parts(&self) -> impl Iterator<Item = (u8, Part)> + '_ {
        self.completion.iter().flat_map(|(day, completion)| {
            Part::ALL
                .into_iter()
                .filter(|part| completion.is_completed(*part))
                .map(|part| (*day, part))
        })
    }
}

/// Completion record for one day.
///
/// A part is completed exactly when its timestamp is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayCompletion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part1: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part2: Option<DateTime<Utc>>,
}

impl DayCompletion {
    pub fn is_completed(&self, part: Part) -> bool {
        self.completed_at(part).is_some()
    }

    pub fn completed_at(&self, part: Part) -> Option<DateTime<Utc>> {
        match part {
            Part::One => self.part1,
            Part::Two => self.part2,
        }
    }

    /// Both parts done.
    pub fn is_full(&self) -> bool {
        self.part1.is_some() && self.part2.is_some()
    }
}

/// Puzzle part within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Part {
    One,
    Two,
}

impl Part {
    pub const ALL: [Part; 2] = [Part::One, Part::Two];

    pub fn number(self) -> u8 {
        match self {
            Part::One => 1,
            Part::Two => 2,
        }
    }
}

impl From<Part> for u8 {
    fn from(part: Part) -> Self {
        part.number()
    }
}

impl TryFrom<u8> for Part {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Part::One),
            2 => Ok(Part::Two),
            other => Err(format!("invalid part {other}")),
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Position on the leaderboard.
///
/// `Unranked` never compares equal to a numeric rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum Rank {
    #[default]
    Unranked,
    Ranked(u32),
}

impl From<Option<u32>> for Rank {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Rank::Unranked, Rank::Ranked)
    }
}

impl From<Rank> for Option<u32> {
    fn from(rank: Rank) -> Self {
        match rank {
            Rank::Ranked(n) => Some(n),
            Rank::Unranked => None,
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Ranked(n) => write!(f, "#{n}"),
            Rank::Unranked => f.write_str("unranked"),
        }
    }
}
