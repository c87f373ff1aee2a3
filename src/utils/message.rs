//! Notification text rendering.
//!
//! Messages use Telegram's HTML parse mode, so every member-supplied string
//! is escaped. Anything longer than [`MESSAGE_LIMIT`] characters is split on
//! line boundaries; a single over-long line is split on grapheme boundaries,
//! keeping HTML tags and entities intact.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::FetchError;
use crate::models::{Anomaly, ChangeSet, EntityKey, Part, Rank, Snapshot};

/// Telegram message character limit.
pub const MESSAGE_LIMIT: usize = 4096;

/// Render a change set as one or more messages.
pub fn format_changes(changes: &ChangeSet, key: &EntityKey) -> Vec<String> {
    if changes.is_empty() {
        return Vec::new();
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        "📊 <b>Leaderboard Update</b> ({} · {})",
        escape(&key.leaderboard),
        key.year
    ));
    lines.push(String::new());

    if !changes.new_stars.is_empty() {
        lines.push("⭐ New Stars:".into());
        for star in &changes.new_stars {
            let name = escape(&star.member.name);
            if star.completes_day && star.part == Part::Two {
                lines.push(format!("  🌟 {} - Day {} (Complete!)", name, star.day));
            } else {
                lines.push(format!("  ⭐ {} - Day {} Part {}", name, star.day, star.part));
            }
        }
        lines.push(String::new());
    }

    if !changes.rank_changes.is_empty() {
        lines.push("📈 Rank Changes:".into());
        for change in &changes.rank_changes {
            let movement = match change.places_gained() {
                Some(gained) if gained > 0 => format!(" (↑ {gained})"),
                Some(gained) if gained < 0 => format!(" (↓ {})", -gained),
                _ => String::new(),
            };
            lines.push(format!(
                "  {}: {} → {}{}",
                escape(&change.member.name),
                change.old,
                change.new,
                movement
            ));
        }
        lines.push(String::new());
    }

    // Score movement of members who just earned stars is implied by the star lines.
    let score_changes: Vec<_> = changes
        .score_changes
        .iter()
        .filter(|change| !changes.new_stars.iter().any(|s| s.member.id == change.member.id))
        .collect();
    if !score_changes.is_empty() {
        lines.push("💰 Score Changes:".into());
        for change in score_changes {
            let delta = change.delta();
            let sign = if delta > 0 { "+" } else { "" };
            lines.push(format!(
                "  {}: {} → {} ({}{})",
                escape(&change.member.name),
                change.old,
                change.new,
                sign,
                delta
            ));
        }
        lines.push(String::new());
    }

    if !changes.new_members.is_empty() {
        lines.push("👥 New Members:".into());
        for member in &changes.new_members {
            lines.push(format!("  • {}", escape(&member.name)));
        }
        lines.push(String::new());
    }

    split_message(lines.join("\n").trim())
}

/// One-time notice sent when an entity stops being monitored.
pub fn format_disabled(key: &EntityKey, error: &FetchError) -> String {
    format!(
        "❌ Stopped monitoring leaderboard {} ({}) after repeated failures: {}.\n\
         Update the session cookie and re-enable it to resume.",
        escape(&key.leaderboard),
        key.year,
        escape(&error.to_string())
    )
}

/// Operator alert for monotonicity violations.
pub fn format_anomalies(key: &EntityKey, anomalies: &[Anomaly]) -> String {
    let mut lines = vec![format!(
        "⚠️ Leaderboard anomaly for {}: {} member change(s) suppressed",
        escape(&key.to_string()),
        anomalies.len()
    )];
    for anomaly in anomalies {
        lines.push(format!("  • {}", escape(&anomaly.to_string())));
    }
    lines.join("\n")
}

/// Operator alert for a streak of undecodable responses.
pub fn format_parse_alert(key: &EntityKey, streak: u32, error: &FetchError) -> String {
    format!(
        "⚠️ {} consecutive unreadable responses for {}: {}",
        streak,
        escape(&key.to_string()),
        escape(&error.to_string())
    )
}

/// Current standings of a stored snapshot; members without stars are omitted.
pub fn format_standings(snapshot: &Snapshot, year: u16) -> Vec<String> {
    let mut lines = vec![format!("🏆 <b>Leaderboard Rankings ({year})</b>"), String::new()];

    if snapshot.members.is_empty() {
        lines.push("No members on this leaderboard yet.".into());
        return split_message(&lines.join("\n"));
    }

    let ranked: Vec<_> = snapshot
        .standings()
        .into_iter()
        .filter(|(_, member)| member.total_stars > 0)
        .collect();
    if ranked.is_empty() {
        lines.push("No members have earned any stars yet.".into());
        return split_message(&lines.join("\n"));
    }

    for (_, member) in ranked {
        let position = match member.rank {
            Rank::Ranked(n) => n.to_string(),
            Rank::Unranked => "-".into(),
        };
        lines.push(format!(
            "{}. {}: {} points ({}⭐)",
            position,
            escape(&member.display_name),
            member.local_score,
            member.total_stars
        ));
    }

    split_message(&lines.join("\n"))
}

/// Escape text for HTML parse mode.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Split a message into chunks of at most [`MESSAGE_LIMIT`] characters.
pub fn split_message(message: &str) -> Vec<String> {
    split_with_limit(message, MESSAGE_LIMIT)
}

fn split_with_limit(message: &str, limit: usize) -> Vec<String> {
    if message.chars().count() <= limit {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in message.split('\n') {
        let line_len = line.chars().count();

        if line_len > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let mut pieces = split_long_line(line, limit);
            current = pieces.pop().unwrap_or_default();
            current_len = current.chars().count();
            chunks.extend(pieces);
            continue;
        }

        let separator = usize::from(!current.is_empty());
        if current_len + separator + line_len <= limit {
            if separator == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += separator + line_len;
        } else {
            chunks.push(std::mem::replace(&mut current, line.to_string()));
            current_len = line_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split one line on grapheme boundaries without cutting an HTML tag or
/// entity. Tags still open at a cut are closed and reopened in the next piece.
fn split_long_line(line: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut piece_len = 0;
    let mut has_text = false;
    // (tag name, opening tag)
    let mut open: Vec<(&str, &str)> = Vec::new();

    let mut rest = line;
    while !rest.is_empty() {
        let len = markup_len(rest)
            .unwrap_or_else(|| rest.graphemes(true).next().map_or(rest.len(), str::len));
        let (atom, tail) = rest.split_at(len);
        rest = tail;

        let atom_len = atom.chars().count();
        let closing = atom.starts_with("</");
        // Closing tags for `open` are already counted in `closing_len`.
        let closing_len: usize = open.iter().map(|(name, _)| name.chars().count() + 3).sum();
        if has_text && !closing && piece_len + atom_len + closing_len > limit {
            for (name, _) in open.iter().rev() {
                piece.push_str(&format!("</{name}>"));
            }
            pieces.push(std::mem::take(&mut piece));
            for (_, tag) in &open {
                piece.push_str(tag);
            }
            piece_len = piece.chars().count();
            has_text = false;
        }

        if closing {
            let name = atom[2..].trim_end_matches('>').trim();
            if let Some(pos) = open.iter().rposition(|(n, _)| *n == name) {
                open.truncate(pos);
            }
        } else if let Some(name) = tag_name(atom) {
            open.push((name, atom));
        } else {
            has_text = true;
        }
        piece.push_str(atom);
        piece_len += atom_len;
    }

    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

/// Byte length of the tag or entity at the start of `text`, if any.
fn markup_len(text: &str) -> Option<usize> {
    if text.starts_with('<') {
        return text.find('>').map(|end| end + 1);
    }
    if text.starts_with('&') {
        let end = text.find(';')?;
        let name = &text[1..end];
        let valid = !name.is_empty()
            && name.len() <= 8
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '#');
        return valid.then_some(end + 1);
    }
    None
}

/// Name of an opening tag such as `<b>` or `<a href="...">`.
fn tag_name(atom: &str) -> Option<&str> {
    let inner = atom.strip_prefix('<')?.strip_suffix('>')?;
    if inner.starts_with('/') || inner.ends_with('/') {
        return None;
    }
    inner.split_whitespace().next().filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::models::{MemberRef, MemberState, NewStar, RankChange, ScoreChange};

    fn key() -> EntityKey {
        EntityKey::new("-100123", "424242", 2024)
    }

    #[test]
    fn test_empty_changes_produce_no_messages() {
        assert!(format_changes(&ChangeSet::default(), &key()).is_empty());
    }

    #[test]
    fn test_format_changes_sections() {
        let ann = MemberRef::new("1", "Ann <3");
        let bob = MemberRef::new("2", "Bob");
        let changes = ChangeSet {
            new_stars: vec![
                NewStar {
                    member: ann.clone(),
                    day: 1,
                    part: Part::One,
                    completes_day: true,
                },
                NewStar {
                    member: ann.clone(),
                    day: 1,
                    part: Part::Two,
                    completes_day: true,
                },
            ],
            rank_changes: vec![RankChange {
                member: bob.clone(),
                old: Rank::Ranked(8),
                new: Rank::Ranked(6),
            }],
            score_changes: vec![
                ScoreChange {
                    member: ann.clone(),
                    old: 0,
                    new: 20,
                },
                ScoreChange {
                    member: bob.clone(),
                    old: 12,
                    new: 10,
                },
            ],
            new_members: vec![MemberRef::new("3", "Cy")],
            anomalies: Vec::new(),
        };

        let messages = format_changes(&changes, &key());
        assert_eq!(messages.len(), 1);
        let text = &messages[0];
        assert!(text.starts_with("📊 <b>Leaderboard Update</b> (424242 · 2024)"));
        assert!(text.contains("  ⭐ Ann &lt;3 - Day 1 Part 1"));
        assert!(text.contains("  🌟 Ann &lt;3 - Day 1 (Complete!)"));
        assert!(text.contains("  Bob: #8 → #6 (↑ 2)"));
        assert!(text.contains("  Bob: 12 → 10 (-2)"));
        assert!(!text.contains("0 → 20"));
        assert!(text.contains("  • Cy"));
        assert!(!text.ends_with('\n'));
    }

    #[test]
    fn test_unranked_rank_change() {
        let changes = ChangeSet {
            rank_changes: vec![RankChange {
                member: MemberRef::new("2", "Bob"),
                old: Rank::Unranked,
                new: Rank::Ranked(3),
            }],
            ..ChangeSet::default()
        };
        let text = &format_changes(&changes, &key())[0];
        assert!(text.contains("  Bob: unranked → #3"));
    }

    #[test]
    fn test_split_on_lines() {
        let message = "aaaa\nbbbb\ncccc";
        assert_eq!(split_with_limit(message, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_with_limit(message, 100), vec![message]);
    }

    #[test]
    fn test_split_long_line_on_graphemes() {
        let line = "🌟".repeat(5);
        let chunks = split_with_limit(&format!("head\n{line}"), 4);
        assert_eq!(chunks, vec!["head", "🌟🌟🌟🌟", "🌟"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn test_split_long_line_keeps_entities_whole() {
        let line = "&amp;".repeat(10);
        let chunks = split_with_limit(&line, 12);
        assert_eq!(chunks, vec!["&amp;&amp;"; 5]);
        assert_eq!(chunks.concat(), line);
    }

    #[test]
    fn test_split_long_line_rebalances_tags() {
        let line = format!("<b>{}</b>", "x".repeat(10));
        let chunks = split_with_limit(&line, 12);
        assert_eq!(chunks, vec!["<b>xxxxx</b>", "<b>xxxxx</b>"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
    }

    #[test]
    fn test_split_respects_telegram_limit() {
        let lines: Vec<String> = (0..600).map(|i| format!("  ⭐ Member {i} - Day 1 Part 1")).collect();
        let chunks = split_message(&lines.join("\n"));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= MESSAGE_LIMIT));
        assert_eq!(chunks.join("\n"), lines.join("\n"));
    }

    #[test]
    fn test_format_standings() {
        let mut members = BTreeMap::new();
        for (id, name, stars, score, rank) in [
            ("1", "Ann", 3, 12, Rank::Ranked(1)),
            ("2", "Bob", 2, 12, Rank::Ranked(1)),
            ("3", "Cy", 0, 0, Rank::Unranked),
        ] {
            members.insert(
                id.to_string(),
                MemberState {
                    display_name: name.into(),
                    total_stars: stars,
                    local_score: score,
                    rank,
                    completion: BTreeMap::new(),
                },
            );
        }
        let snapshot = Snapshot::new(Utc::now(), members);
        let text = format_standings(&snapshot, 2024).join("\n");
        assert!(text.contains("1. Ann: 12 points (3⭐)"));
        assert!(text.contains("1. Bob: 12 points (2⭐)"));
        assert!(!text.contains("Cy"));
    }

    #[test]
    fn test_format_disabled_escapes() {
        let text = format_disabled(&key(), &FetchError::auth("HTTP 401 <Unauthorized>"));
        assert!(text.contains("424242 (2024)"));
        assert!(text.contains("&lt;Unauthorized&gt;"));
    }
}
