//! Change detection between leaderboard snapshots.
//!
//! Computes the difference between the stored snapshot and a fresh fetch:
//! new stars, rank and score movement, and members who joined. Output is
//! ordered by member display name (case-insensitive, then member id) so the
//! same inputs always produce the same `ChangeSet`.
//!
//! Stars are never revoked. When a member appears to lose stars the detector
//! reports an [`Anomaly`] and suppresses every entry for that member rather
//! than guessing which snapshot is wrong.

use crate::models::{
    Anomaly, ChangeSet, MemberRef, MemberState, NewStar, RankChange, ScoreChange, Snapshot,
};

/// Calculate the changes from `previous` to `current`.
///
/// With no previous snapshot every member is reported as new and nothing
/// else is, so the first poll of a leaderboard does not replay its history.
pub fn calculate_diff(previous: Option<&Snapshot>, current: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    let Some(previous) = previous else {
        changes.new_members = current
            .members_in_display_order()
            .into_iter()
            .map(|(id, member)| MemberRef::new(id, &member.display_name))
            .collect();
        return changes;
    };

    for (id, member) in current.members_in_display_order() {
        let member_ref = MemberRef::new(id, &member.display_name);

        let Some(old) = previous.members.get(id) else {
            changes.new_members.push(member_ref);
            continue;
        };

        let anomalies = regressions(&member_ref, old, member);
        if !anomalies.is_empty() {
            log::warn!(
                "Suppressing changes for {} ({}): {} monotonicity violation(s)",
                member.display_name,
                id,
                anomalies.len()
            );
            changes.anomalies.extend(anomalies);
            continue;
        }

        for (day, part) in member.completed_parts() {
            if !old.has_completed(day, part) {
                changes.new_stars.push(NewStar {
                    member: member_ref.clone(),
                    day,
                    part,
                    completes_day: member
                        .completion
                        .get(&day)
                        .is_some_and(|completion| completion.is_full()),
                });
            }
        }

        if old.rank != member.rank {
            changes.rank_changes.push(RankChange {
                member: member_ref.clone(),
                old: old.rank,
                new: member.rank,
            });
        }

        if old.local_score != member.local_score {
            changes.score_changes.push(ScoreChange {
                member: member_ref,
                old: old.local_score,
                new: member.local_score,
            });
        }
    }

    changes
}

/// Monotonicity violations for one member.
fn regressions(member_ref: &MemberRef, old: &MemberState, new: &MemberState) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if new.total_stars < old.total_stars {
        anomalies.push(Anomaly::StarsDecreased {
            member: member_ref.clone(),
            old: old.total_stars,
            new: new.total_stars,
        });
    }

    for (day, part) in old.completed_parts() {
        if !new.has_completed(day, part) {
            anomalies.push(Anomaly::CompletionRevoked {
                member: member_ref.clone(),
                day,
                part,
            });
        }
    }

    anomalies
}
