// src/services/aoc.rs

//! Advent of Code private leaderboard client.
//!
//! Fetches `{base}/{year}/leaderboard/private/view/{id}.json` with the
//! entity's session cookie and converts the response into a [`Snapshot`].
//! Ranks are computed locally from the local score using competition
//! ranking (1, 2, 2, 4); members without stars are unranked.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::{Credential, DayCompletion, FetchConfig, MAX_DAY, MemberState, Rank, Snapshot};
use crate::services::LeaderboardClient;

/// HTTP client for the leaderboard JSON API.
#[derive(Debug, Clone)]
pub struct AocClient {
    client: Client,
    base_url: Url,
}

impl AocClient {
    /// Create a client from the fetch settings.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()?;
        let base_url = Url::parse(&config.base_url)?;

        Ok(Self { client, base_url })
    }

    /// JSON endpoint of one leaderboard.
    pub fn leaderboard_url(&self, leaderboard: &str, year: u16) -> std::result::Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::network(format!("base URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push(&year.to_string())
            .push("leaderboard")
            .push("private")
            .push("view")
            .push(&format!("{leaderboard}.json"));
        Ok(url)
    }
}

#[async_trait]
impl LeaderboardClient for AocClient {
    async fn fetch(
        &self,
        leaderboard: &str,
        year: u16,
        credential: &Credential,
        timeout: Duration,
    ) -> std::result::Result<Snapshot, FetchError> {
        let url = self.leaderboard_url(leaderboard, year)?;
        log::debug!("Fetching leaderboard {} ({})", leaderboard, year);

        let response = self
            .client
            .get(url)
            .header(header::COOKIE, cookie_header(credential))
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::auth(format!("HTTP {status}")));
            }
            StatusCode::NOT_FOUND => {
                return Err(FetchError::NotFound {
                    leaderboard: leaderboard.to_string(),
                    year,
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(FetchError::RateLimited {
                    retry_after: retry_after(response.headers()),
                });
            }
            s if s.is_server_error() => {
                return Err(FetchError::network(format!("server error: HTTP {s}")));
            }
            s if !s.is_success() => {
                return Err(FetchError::network(format!("unexpected status: HTTP {s}")));
            }
            _ => {}
        }

        // An expired session is redirected to a login page rather than refused.
        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"));
        if is_html {
            return Err(FetchError::auth("session rejected (received an HTML page)"));
        }

        let body = response.bytes().await.map_err(classify_transport_error)?;
        parse_leaderboard(&body, Utc::now())
    }
}

fn cookie_header(credential: &Credential) -> String {
    let secret = credential.expose().trim();
    if secret.starts_with("session=") {
        secret.to_string()
    } else {
        format!("session={secret}")
    }
}

fn classify_transport_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::network("request timed out")
    } else if error.is_decode() {
        FetchError::parse(error)
    } else {
        FetchError::network(error)
    }
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Deserialize)]
struct RawLeaderboard {
    #[serde(default)]
    members: HashMap<String, RawMember>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    stars: u32,
    #[serde(default)]
    local_score: i64,
    #[serde(default)]
    completion_day_level: HashMap<String, HashMap<String, RawStar>>,
}

#[derive(Debug, Deserialize)]
struct RawStar {
    get_star_ts: i64,
}

/// Decode a leaderboard response body.
pub fn parse_leaderboard(body: &[u8], fetched_at: DateTime<Utc>) -> std::result::Result<Snapshot, FetchError> {
    let raw: RawLeaderboard = serde_json::from_slice(body).map_err(FetchError::parse)?;

    let mut members = BTreeMap::new();
    for (id, raw_member) in raw.members {
        let mut completion = BTreeMap::new();
        for (day_key, parts) in &raw_member.completion_day_level {
            let day = day_key
                .parse::<u8>()
                .ok()
                .filter(|day| (1..=MAX_DAY).contains(day))
                .ok_or_else(|| FetchError::parse(format!("member {id}: invalid day {day_key:?}")))?;

            let mut day_completion = DayCompletion::default();
            for (part_key, star) in parts {
                let at = Utc
                    .timestamp_opt(star.get_star_ts, 0)
                    .single()
                    .ok_or_else(|| {
                        FetchError::parse(format!("member {id}: invalid timestamp {}", star.get_star_ts))
                    })?;
                match part_key.as_str() {
                    "1" => day_completion.part1 = Some(at),
                    "2" => day_completion.part2 = Some(at),
                    other => {
                        return Err(FetchError::parse(format!(
                            "member {id}: invalid part {other:?} on day {day}"
                        )));
                    }
                }
            }
            completion.insert(day, day_completion);
        }

        let display_name = raw_member
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("(anonymous user #{id})"));

        members.insert(
            id,
            MemberState {
                display_name,
                total_stars: raw_member.stars,
                local_score: raw_member.local_score,
                rank: Rank::Unranked,
                completion,
            },
        );
    }

    assign_ranks(&mut members);
    Ok(Snapshot::new(fetched_at, members))
}

/// Competition ranking by local score; members without stars stay unranked.
fn assign_ranks(members: &mut BTreeMap<String, MemberState>) {
    let mut scores: Vec<i64> = members
        .values()
        .filter(|m| m.total_stars > 0)
        .map(|m| m.local_score)
        .collect();
    scores.sort_unstable_by(|a, b| b.cmp(a));

    for member in members.values_mut() {
        if member.total_stars == 0 {
            member.rank = Rank::Unranked;
            continue;
        }
        let higher = scores.partition_point(|score| *score > member.local_score);
        member.rank = Rank::Ranked(higher as u32 + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Part;

    const SAMPLE: &str = r#"{
        "event": "2024",
        "owner_id": 101,
        "members": {
            "101": {
                "id": 101, "name": "Ann", "stars": 3, "local_score": 12,
                "global_score": 0, "last_star_ts": 1733035000,
                "completion_day_level": {
                    "1": {"1": {"get_star_ts": 1733030000, "star_index": 1},
                          "2": {"get_star_ts": 1733031000, "star_index": 7}},
                    "2": {"1": {"get_star_ts": 1733120000, "star_index": 40}}
                }
            },
            "102": {
                "id": 102, "name": null, "stars": 1, "local_score": 12,
                "completion_day_level": {
                    "1": {"1": {"get_star_ts": 1733032000}}
                }
            },
            "103": {
                "id": 103, "name": "Cy", "stars": 1, "local_score": 5,
                "completion_day_level": {"1": {"1": {"get_star_ts": 1733033000}}}
            },
            "104": {"id": 104, "name": "Dee", "stars": 0, "local_score": 0,
                    "completion_day_level": {}}
        }
    }"#;

    #[test]
    fn test_parse_members_and_completion() {
        let snapshot = parse_leaderboard(SAMPLE.as_bytes(), Utc::now()).unwrap();
        assert_eq!(snapshot.members.len(), 4);

        let ann = &snapshot.members["101"];
        assert_eq!(ann.display_name, "Ann");
        assert_eq!(ann.total_stars, 3);
        assert!(ann.has_completed(1, Part::One));
        assert!(ann.has_completed(1, Part::Two));
        assert!(ann.has_completed(2, Part::One));
        assert!(!ann.has_completed(2, Part::Two));
        assert_eq!(
            ann.completion[&1].part1,
            Utc.timestamp_opt(1733030000, 0).single()
        );

        assert_eq!(snapshot.members["102"].display_name, "(anonymous user #102)");
    }

    #[test]
    fn test_competition_ranking() {
        let snapshot = parse_leaderboard(SAMPLE.as_bytes(), Utc::now()).unwrap();
        assert_eq!(snapshot.members["101"].rank, Rank::Ranked(1));
        assert_eq!(snapshot.members["102"].rank, Rank::Ranked(1));
        assert_eq!(snapshot.members["103"].rank, Rank::Ranked(3));
        assert_eq!(snapshot.members["104"].rank, Rank::Unranked);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_leaderboard(b"<html>login</html>", Utc::now()),
            Err(FetchError::Parse(_))
        ));

        let bad_day = r#"{"members": {"1": {"name": "A", "stars": 1,
            "completion_day_level": {"26": {"1": {"get_star_ts": 1}}}}}}"#;
        assert!(matches!(
            parse_leaderboard(bad_day.as_bytes(), Utc::now()),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn test_leaderboard_url() {
        let client = AocClient::new(&FetchConfig::default()).unwrap();
        assert_eq!(
            client.leaderboard_url("424242", 2024).unwrap().as_str(),
            "https://adventofcode.com/2024/leaderboard/private/view/424242.json"
        );
        // Path separators in ids cannot escape the endpoint.
        assert_eq!(
            client.leaderboard_url("1/../2", 2024).unwrap().as_str(),
            "https://adventofcode.com/2024/leaderboard/private/view/1%2F..%2F2.json"
        );
    }

    #[test]
    fn test_cookie_header() {
        assert_eq!(cookie_header(&Credential::new("abc")), "session=abc");
        assert_eq!(cookie_header(&Credential::new("session=abc")), "session=abc");
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::RETRY_AFTER, "120".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(120)));

        headers.insert(header::RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }
}
