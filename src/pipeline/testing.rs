//! In-memory collaborators for pipeline tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use crate::error::{AppError, DeliveryError, FetchError, Result};
use crate::models::{
    Credential, DayCompletion, EntityKey, MemberState, MonitoredEntity, Rank, Snapshot,
};
use crate::services::{EntitySource, LeaderboardClient, Notifier};
use crate::storage::SnapshotStore;

pub fn entity(destination: &str, leaderboard: &str, interval_secs: u64) -> MonitoredEntity {
    MonitoredEntity::new(
        EntityKey::new(destination, leaderboard, 2024),
        Credential::new("session=abc"),
        interval_secs,
    )
}

pub fn member(name: &str, stars: u32, score: i64, rank: Rank, days: &[(u8, u8)]) -> MemberState {
    let ts = Utc.with_ymd_and_hms(2024, 12, 1, 5, 30, 0).unwrap();
    let mut completion: BTreeMap<u8, DayCompletion> = BTreeMap::new();
    for (day, part) in days {
        let entry = completion.entry(*day).or_default();
        match part {
            1 => entry.part1 = Some(ts),
            _ => entry.part2 = Some(ts),
        }
    }
    MemberState {
        display_name: name.into(),
        total_stars: stars,
        local_score: score,
        rank,
        completion,
    }
}

pub fn snapshot(members: Vec<(&str, MemberState)>) -> Snapshot {
    Snapshot::new(
        Utc.with_ymd_and_hms(2024, 12, 2, 6, 0, 0).unwrap(),
        members.into_iter().map(|(id, m)| (id.to_string(), m)).collect(),
    )
}

type FetchResult = std::result::Result<Snapshot, FetchError>;

/// Client that replays queued responses, then repeats the last one.
///
/// Responses pushed for a specific leaderboard are served to that
/// leaderboard first and bypass the shared queue.
#[derive(Default)]
pub struct ScriptedClient {
    queue: Mutex<VecDeque<FetchResult>>,
    last: Mutex<Option<FetchResult>>,
    scripts: Mutex<HashMap<String, VecDeque<FetchResult>>>,
    calls: Mutex<HashMap<String, usize>>,
    gate: Option<Semaphore>,
    /// Gate only this leaderboard; `None` gates every fetch
    gated_leaderboard: Option<String>,
    pub started: Notify,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch blocks until [`ScriptedClient::release`] is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Only fetches of `leaderboard` block until released.
    pub fn gated_for(leaderboard: &str) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            gated_leaderboard: Some(leaderboard.to_string()),
            ..Self::default()
        }
    }

    pub fn push_err_for(&self, leaderboard: &str, error: FetchError) {
        self.scripts
            .lock()
            .unwrap()
            .entry(leaderboard.to_string())
            .or_default()
            .push_back(Err(error));
    }

    pub fn push_ok(&self, snapshot: Snapshot) {
        self.queue.lock().unwrap().push_back(Ok(snapshot));
    }

    pub fn push_err(&self, error: FetchError) {
        self.queue.lock().unwrap().push_back(Err(error));
    }

    pub fn release(&self, fetches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(fetches);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn calls_for(&self, leaderboard: &str) -> usize {
        self.calls.lock().unwrap().get(leaderboard).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LeaderboardClient for ScriptedClient {
    async fn fetch(
        &self,
        leaderboard: &str,
        _year: u16,
        _credential: &Credential,
        _timeout: Duration,
    ) -> FetchResult {
        *self.calls.lock().unwrap().entry(leaderboard.to_string()).or_default() += 1;
        self.started.notify_one();
        let held = self
            .gated_leaderboard
            .as_deref()
            .is_none_or(|gated| gated == leaderboard);
        if let (Some(gate), true) = (&self.gate, held) {
            gate.acquire().await.unwrap().forget();
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(leaderboard)
            .and_then(VecDeque::pop_front);
        if let Some(scripted) = scripted {
            return scripted;
        }

        let next = self.queue.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone()
            .unwrap_or_else(|| Err(FetchError::network("no scripted response")))
    }
}

/// Notifier that records every send attempt.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, destination: &str, message: &str) -> std::result::Result<(), DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), message.to_string()));
        if self.fail {
            return Err(DeliveryError::new(destination, "chat not found"));
        }
        Ok(())
    }
}

/// Snapshot store kept in a map, with injectable save failures.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<EntityKey, Snapshot>>,
    saves: AtomicUsize,
    failing_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &EntityKey, snapshot: Snapshot) {
        self.records.lock().unwrap().insert(key.clone(), snapshot);
    }

    pub fn get(&self, key: &EntityKey) -> Option<Snapshot> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Successful saves through the store trait.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self, key: &EntityKey) -> Result<Option<Snapshot>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &EntityKey, snapshot: &Snapshot) -> Result<()> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::storage(key.to_string(), "disk full"));
        }
        self.put(key, snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Entity source over a mutable list; disabling removes the entity.
#[derive(Default)]
pub struct StaticSource {
    entities: Mutex<Vec<MonitoredEntity>>,
    disabled: Mutex<Vec<(EntityKey, String)>>,
}

impl StaticSource {
    pub fn new(entities: Vec<MonitoredEntity>) -> Self {
        Self {
            entities: Mutex::new(entities),
            ..Self::default()
        }
    }

    pub fn set(&self, entities: Vec<MonitoredEntity>) {
        *self.entities.lock().unwrap() = entities;
    }

    pub fn disabled(&self) -> Vec<(EntityKey, String)> {
        self.disabled.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitySource for StaticSource {
    async fn list_enabled_entities(&self) -> Result<Vec<MonitoredEntity>> {
        Ok(self.entities.lock().unwrap().clone())
    }

    async fn disable_entity(&self, key: &EntityKey, reason: &str) -> Result<()> {
        self.entities.lock().unwrap().retain(|e| &e.key != key);
        self.disabled
            .lock()
            .unwrap()
            .push((key.clone(), reason.to_string()));
        Ok(())
    }
}
