//! Monitored entity definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique key of a monitored entity: where to report, what to watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub destination: String,
    pub leaderboard: String,
    pub year: u16,
}

impl EntityKey {
    pub fn new(destination: impl Into<String>, leaderboard: impl Into<String>, year: u16) -> Self {
        Self {
            destination: destination.into(),
            leaderboard: leaderboard.into(),
            year,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.destination, self.leaderboard, self.year)
    }
}

/// Opaque credential handed to the fetch client.
///
/// Never printed; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Longest accepted poll interval (one week).
pub const MAX_POLL_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// One (destination, leaderboard, year) to poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredEntity {
    pub key: EntityKey,
    pub poll_interval_secs: u64,
    pub enabled: bool,
    pub credential: Credential,
}

impl MonitoredEntity {
    pub fn new(key: EntityKey, credential: Credential, poll_interval_secs: u64) -> Self {
        Self {
            key,
            poll_interval_secs,
            enabled: true,
            credential,
        }
    }

    /// Poll interval clamped to `1s..=MAX_POLL_INTERVAL_SECS`.
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs.clamp(1, MAX_POLL_INTERVAL_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("session=53616c7465645f5f");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.expose(), "session=53616c7465645f5f");
    }

    #[test]
    fn test_key_display() {
        let key = EntityKey::new("-100123", "424242", 2024);
        assert_eq!(key.to_string(), "-100123/424242/2024");
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let key = EntityKey::new("chat", "1", 2024);
        let credential = Credential::new("session=abc");
        let huge = MonitoredEntity::new(key.clone(), credential.clone(), u64::MAX);
        assert_eq!(huge.poll_interval().as_secs(), MAX_POLL_INTERVAL_SECS);
        let zero = MonitoredEntity::new(key, credential, 0);
        assert_eq!(zero.poll_interval().as_secs(), 1);
    }
}
