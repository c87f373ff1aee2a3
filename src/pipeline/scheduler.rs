// src/pipeline/scheduler.rs

//! Polling scheduler.
//!
//! Every monitored entity owns a slot in the registry with its runtime state:
//!
//! ```text
//!   Idle ──due──▶ Fetching ──done──▶ Idle
//!                    │
//!                    └── auth/not-found past threshold ──▶ Disabled
//! ```
//!
//! A slot is claimed under its own lock before a cycle starts, so an entity
//! never has two cycles in flight no matter who asks (the dispatch loop or a
//! manual [`Scheduler::poll_now`]). Successful cycles schedule the next poll
//! one interval later. Failures double the backoff up to the configured cap
//! and retry after a full-jitter delay, or after the provider's
//! `Retry-After` when one was given.
//!
//! Lock order is registry, then slot. A finished cycle releases its slot
//! before touching the registry.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{FailureKind, FetchError, Result};
use crate::models::{Config, EntityKey, MAX_POLL_INTERVAL_SECS, MonitoredEntity, SchedulerConfig};
use crate::pipeline::backoff::BackoffPolicy;
use crate::pipeline::poll::{PollContext, PollError, PollReport, poll_entity};
use crate::services::{EntitySource, LeaderboardClient, Notifier};
use crate::storage::SnapshotStore;
use crate::utils::message;

type Registry = HashMap<EntityKey, Arc<Mutex<EntitySlot>>>;

/// Lifecycle phase of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityPhase {
    Idle,
    Fetching,
    Disabled,
}

impl fmt::Display for EntityPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityPhase::Idle => "idle",
            EntityPhase::Fetching => "fetching",
            EntityPhase::Disabled => "disabled",
        })
    }
}

/// Scheduling state kept per entity for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct EntityRuntimeState {
    pub next_poll_at: Instant,
    pub consecutive_failures: u32,
    pub in_flight: bool,
    pub backoff: Duration,
    pub last_failure: Option<FailureKind>,
    pub consecutive_parse_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl EntityRuntimeState {
    fn new(next_poll_at: Instant, interval: Duration) -> Self {
        Self {
            next_poll_at,
            consecutive_failures: 0,
            in_flight: false,
            backoff: interval,
            last_failure: None,
            consecutive_parse_failures: 0,
            last_success_at: None,
            last_error: None,
        }
    }
}

struct EntitySlot {
    entity: MonitoredEntity,
    state: EntityRuntimeState,
    phase: EntityPhase,
    /// Dropped from the entity list while a cycle was running
    retired: bool,
}

/// Point-in-time view of one registered entity.
#[derive(Debug, Clone)]
pub struct EntityStatus {
    pub key: EntityKey,
    pub phase: EntityPhase,
    pub poll_interval: Duration,
    pub state: EntityRuntimeState,
}

/// What a registry refresh changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub updated: usize,
    pub reenabled: usize,
    pub removed: usize,
    pub retired: usize,
}

impl RefreshSummary {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of one completed cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    Succeeded(PollReport),
    Failed { kind: FailureKind, retry_in: Duration },
    Disabled { kind: FailureKind },
}

/// The four collaborators the scheduler drives.
pub struct Collaborators {
    pub client: Arc<dyn LeaderboardClient>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn SnapshotStore>,
    pub source: Arc<dyn EntitySource>,
}

#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

struct Shared {
    config: SchedulerConfig,
    ctx: PollContext,
    source: Arc<dyn EntitySource>,
    backoff: BackoffPolicy,
    rng: Mutex<StdRng>,
    registry: RwLock<Registry>,
}

impl Scheduler {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        Self::with_rng(config, collaborators, StdRng::from_entropy())
    }

    fn with_rng(config: &Config, collaborators: Collaborators, rng: StdRng) -> Self {
        let Collaborators {
            client,
            notifier,
            store,
            source,
        } = collaborators;
        Self {
            shared: Arc::new(Shared {
                config: config.scheduler.clone(),
                ctx: PollContext::new(config, client, notifier, store),
                source,
                backoff: BackoffPolicy::new(config.scheduler.max_backoff()),
                rng: Mutex::new(rng),
                registry: RwLock::new(HashMap::new()),
            }),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Reconcile the registry with the entity source.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let entities = self.shared.source.list_enabled_entities().await?;
        let summary = self.shared.reconcile(entities, Instant::now());
        if summary.is_noop() {
            log::debug!("Entity refresh: no changes");
        } else {
            log::info!(
                "Entity refresh: {} added, {} updated, {} re-enabled, {} removed, {} retiring",
                summary.added,
                summary.updated,
                summary.reenabled,
                summary.removed,
                summary.retired
            );
        }
        Ok(summary)
    }

    /// Start a cycle for every idle entity due at `now`; returns how many started.
    pub fn dispatch_due(&self, now: Instant) -> usize {
        let slots: Vec<_> = read(&self.shared.registry).values().cloned().collect();

        let mut started = 0;
        for slot in slots {
            if let Some(claim) = try_claim(&slot, now, false) {
                let shared = self.shared.clone();
                lock(&self.tasks).spawn(async move {
                    shared.run_cycle(claim).await;
                });
                started += 1;
            }
        }
        if started > 0 {
            log::debug!("Dispatched {} poll(s)", started);
        }
        started
    }

    /// Poll one entity right away, ignoring its schedule.
    ///
    /// Returns `None` when the entity is unknown, disabled, or already in flight.
    pub async fn poll_now(&self, key: &EntityKey) -> Option<CycleOutcome> {
        let slot = read(&self.shared.registry).get(key).cloned()?;
        let claim = try_claim(&slot, Instant::now(), true)?;
        Some(self.shared.run_cycle(claim).await)
    }

    /// Registered entities ordered by key.
    pub fn status(&self) -> Vec<EntityStatus> {
        let registry = read(&self.shared.registry);
        let mut statuses: Vec<_> = registry
            .iter()
            .map(|(key, slot)| {
                let slot = lock(slot);
                EntityStatus {
                    key: key.clone(),
                    phase: slot.phase,
                    poll_interval: slot.entity.poll_interval(),
                    state: slot.state.clone(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Run the dispatch loop until `shutdown` resolves.
    ///
    /// The initial refresh must succeed; later refresh failures keep the
    /// current registry and are retried on the next refresh tick.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let summary = self.refresh().await?;
        log::info!(
            "Scheduler started with {} entit{}",
            summary.added,
            if summary.added == 1 { "y" } else { "ies" }
        );

        let mut tick = tokio::time::interval(self.shared.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let refresh_every = self.shared.config.refresh_interval();
        let mut refresh = tokio::time::interval_at(Instant::now() + refresh_every, refresh_every);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    break;
                }
                _ = tick.tick() => {
                    self.reap_finished();
                    self.dispatch_due(Instant::now());
                }
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh().await {
                        log::warn!("Entity refresh failed, keeping current entities: {}", e);
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Wait for in-flight cycles up to the grace period, then abort the rest.
    pub async fn shutdown(&self) {
        let mut tasks = std::mem::take(&mut *lock(&self.tasks));
        if tasks.is_empty() {
            return;
        }

        let grace = self.shared.config.shutdown_grace();
        log::info!(
            "Waiting up to {}s for {} in-flight poll(s)",
            grace.as_secs(),
            tasks.len()
        );
        if tokio::time::timeout(grace, drain(&mut tasks)).await.is_err() {
            log::warn!("Grace period elapsed; aborting {} poll(s)", tasks.len());
            tasks.abort_all();
            drain(&mut tasks).await;
        }
    }

    /// Wait for every cycle started by the dispatch loop to finish.
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.tasks));
            if tasks.is_empty() {
                return;
            }
            drain(&mut tasks).await;
        }
    }

    fn reap_finished(&self) {
        let mut tasks = lock(&self.tasks);
        while let Some(result) = tasks.try_join_next() {
            report_join(result);
        }
    }
}

impl Shared {
    async fn run_cycle(self: &Arc<Self>, claim: Claim) -> CycleOutcome {
        let key = claim.entity.key.clone();
        let mut guard = InFlightGuard {
            shared: self.clone(),
            slot: claim.slot.clone(),
            armed: true,
        };

        log::debug!("Polling {}", key);
        let result = poll_entity(&self.ctx, &claim.entity).await;
        let completion = self.complete(&claim, result, Instant::now());
        guard.armed = false;

        if completion.retired {
            self.remove_if_retired(&key);
        }

        match completion.follow_up {
            FollowUp::None => {}
            FollowUp::ParseAlert(text) => self.ctx.alert(&text).await,
            FollowUp::Disable { notice, reason } => {
                if let Err(e) = self.ctx.notifier.send(&key.destination, &notice).await {
                    log::error!("Failed to send disable notice for {}: {}", key, e);
                }
                if let Err(e) = self.source.disable_entity(&key, &reason).await {
                    log::error!("Failed to record disablement of {}: {}", key, e);
                }
            }
        }

        completion.outcome
    }

    /// Apply a cycle's result to the entity's slot.
    fn complete(
        &self,
        claim: &Claim,
        result: std::result::Result<PollReport, PollError>,
        now: Instant,
    ) -> Completion {
        let mut slot = lock(&claim.slot);
        let key = slot.entity.key.clone();
        let interval = slot.entity.poll_interval();
        let retired = slot.retired;
        let EntitySlot { state, phase, .. } = &mut *slot;
        state.in_flight = false;

        let err = match result {
            Ok(report) => {
                if state.consecutive_failures > 0 {
                    log::info!(
                        "{} recovered after {} failure(s)",
                        key,
                        state.consecutive_failures
                    );
                }
                state.consecutive_failures = 0;
                state.consecutive_parse_failures = 0;
                state.backoff = interval;
                state.last_failure = None;
                state.last_error = None;
                state.last_success_at = Some(Utc::now());
                state.next_poll_at = deadline(now, interval);
                *phase = EntityPhase::Idle;
                return Completion {
                    outcome: CycleOutcome::Succeeded(report),
                    follow_up: FollowUp::None,
                    retired,
                };
            }
            Err(err) => err,
        };

        let kind = err.kind();
        state.consecutive_failures += 1;
        state.backoff = self.backoff.escalate(state.backoff);
        state.last_failure = Some(kind);
        state.last_error = Some(err.to_string());

        let mut follow_up = FollowUp::None;
        if kind == FailureKind::Parse {
            state.consecutive_parse_failures += 1;
            if state.consecutive_parse_failures == self.config.parse_alert_threshold {
                if let Some(fetch_err) = err.fetch_error() {
                    follow_up = FollowUp::ParseAlert(message::format_parse_alert(
                        &key,
                        state.consecutive_parse_failures,
                        fetch_err,
                    ));
                }
            }
        } else {
            state.consecutive_parse_failures = 0;
        }

        if kind.is_terminal_candidate() && state.consecutive_failures > self.config.disable_threshold {
            if let Some(fetch_err) = err.fetch_error() {
                log::error!(
                    "Disabling {} after {} consecutive failures: {}",
                    key,
                    state.consecutive_failures,
                    err
                );
                *phase = EntityPhase::Disabled;
                return Completion {
                    outcome: CycleOutcome::Disabled { kind },
                    follow_up: FollowUp::Disable {
                        notice: message::format_disabled(&key, fetch_err),
                        reason: format!(
                            "{} consecutive failures; last: {}",
                            state.consecutive_failures, err
                        ),
                    },
                    retired,
                };
            }
        }

        let retry_in = match err.fetch_error() {
            Some(FetchError::RateLimited {
                retry_after: Some(after),
            }) => (*after).min(self.backoff.max()),
            _ => self.jitter(state.backoff),
        };
        state.next_poll_at = deadline(now, retry_in);
        *phase = EntityPhase::Idle;
        log::warn!(
            "Poll of {} failed ({} in a row): {}; retrying in {:.1}s",
            key,
            state.consecutive_failures,
            err,
            retry_in.as_secs_f64()
        );

        Completion {
            outcome: CycleOutcome::Failed { kind, retry_in },
            follow_up,
            retired,
        }
    }

    fn jitter(&self, backoff: Duration) -> Duration {
        let mut rng = lock(&self.rng);
        self.backoff.jittered(backoff, &mut *rng)
    }

    fn reconcile(&self, entities: Vec<MonitoredEntity>, now: Instant) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let mut registry = write(&self.registry);
        let mut listed = HashSet::new();

        for entity in entities {
            if !entity.enabled {
                continue;
            }
            if !listed.insert(entity.key.clone()) {
                log::warn!("Ignoring duplicate entity {}", entity.key);
                continue;
            }

            if let Some(slot) = registry.get(&entity.key).cloned() {
                let mut slot = lock(&slot);
                slot.retired = false;
                match update_slot(&mut slot, entity, now) {
                    SlotUpdate::Unchanged => {}
                    SlotUpdate::Updated => summary.updated += 1,
                    SlotUpdate::Reenabled => summary.reenabled += 1,
                }
            } else {
                let interval = entity.poll_interval();
                let first_poll = if self.config.poll_on_start {
                    now
                } else {
                    deadline(now, interval)
                };
                log::info!("Monitoring {} every {}s", entity.key, interval.as_secs());
                registry.insert(
                    entity.key.clone(),
                    Arc::new(Mutex::new(EntitySlot {
                        entity,
                        state: EntityRuntimeState::new(first_poll, interval),
                        phase: EntityPhase::Idle,
                        retired: false,
                    })),
                );
                summary.added += 1;
            }
        }

        let stale: Vec<EntityKey> = registry
            .keys()
            .filter(|key| !listed.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            let in_flight = registry.get(&key).is_some_and(|slot| {
                let mut slot = lock(slot);
                slot.retired = slot.state.in_flight;
                slot.retired
            });
            if in_flight {
                log::info!("{} removed from entity list; retiring after current poll", key);
                summary.retired += 1;
            } else {
                registry.remove(&key);
                log::info!("Stopped monitoring {}", key);
                summary.removed += 1;
            }
        }

        summary
    }

    fn remove_if_retired(&self, key: &EntityKey) {
        let mut registry = write(&self.registry);
        let retired = registry.get(key).is_some_and(|slot| {
            let slot = lock(slot);
            slot.retired && !slot.state.in_flight
        });
        if retired {
            registry.remove(key);
            log::info!("Stopped monitoring {}", key);
        }
    }
}

enum SlotUpdate {
    Unchanged,
    Updated,
    Reenabled,
}

/// Apply a re-listed entity's definition to its existing slot.
fn update_slot(slot: &mut EntitySlot, entity: MonitoredEntity, now: Instant) -> SlotUpdate {
    if slot.phase == EntityPhase::Disabled {
        // Only a new credential is worth another try.
        if entity.credential == slot.entity.credential {
            return SlotUpdate::Unchanged;
        }
        log::info!("Credential for {} changed; re-enabling", entity.key);
        slot.state = EntityRuntimeState::new(now, entity.poll_interval());
        slot.phase = EntityPhase::Idle;
        slot.entity = entity;
        return SlotUpdate::Reenabled;
    }

    if slot.entity == entity {
        return SlotUpdate::Unchanged;
    }

    let interval_changed = slot.entity.poll_interval_secs != entity.poll_interval_secs;
    slot.entity = entity;
    if interval_changed && slot.state.consecutive_failures == 0 {
        let interval = slot.entity.poll_interval();
        slot.state.backoff = interval;
        if !slot.state.in_flight {
            slot.state.next_poll_at = slot.state.next_poll_at.min(deadline(now, interval));
        }
    }
    SlotUpdate::Updated
}

/// `now + delay`, saturating at the longest poll interval.
fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(Duration::from_secs(MAX_POLL_INTERVAL_SECS)))
        .unwrap_or(now)
}

struct Claim {
    slot: Arc<Mutex<EntitySlot>>,
    entity: MonitoredEntity,
}

/// Move an idle slot to `Fetching`. `force` ignores `next_poll_at`.
fn try_claim(slot: &Arc<Mutex<EntitySlot>>, now: Instant, force: bool) -> Option<Claim> {
    let mut guard = lock(slot);
    if guard.phase != EntityPhase::Idle || guard.state.in_flight || guard.retired {
        return None;
    }
    if !force && guard.state.next_poll_at > now {
        return None;
    }
    guard.state.in_flight = true;
    guard.phase = EntityPhase::Fetching;
    Some(Claim {
        slot: slot.clone(),
        entity: guard.entity.clone(),
    })
}

struct Completion {
    outcome: CycleOutcome,
    follow_up: FollowUp,
    retired: bool,
}

enum FollowUp {
    None,
    ParseAlert(String),
    Disable { notice: String, reason: String },
}

/// Releases a slot whose cycle was cancelled before it completed.
struct InFlightGuard {
    shared: Arc<Shared>,
    slot: Arc<Mutex<EntitySlot>>,
    armed: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (key, retired) = {
            let mut slot = lock(&self.slot);
            slot.state.in_flight = false;
            if slot.phase == EntityPhase::Fetching {
                slot.phase = EntityPhase::Idle;
            }
            slot.state.next_poll_at = deadline(Instant::now(), slot.entity.poll_interval());
            (slot.entity.key.clone(), slot.retired)
        };
        log::warn!("Poll of {} was interrupted", key);
        if retired {
            self.shared.remove_if_retired(&key);
        }
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        report_join(result);
    }
}

fn report_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            log::error!("Poll task panicked: {}", e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
