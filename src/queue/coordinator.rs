//! Queue and ready-check coordinator
//!
//! Owns one [`FormatQueue`] per offered format plus the player → format side
//! table. Every mutation of a format's state happens under that format's
//! mutex, and the mutex is never held across an `.await`; notifications and
//! match assembly run after the lock is released. Lock order is always
//! format state, then assignments.

use crate::error::{MatchmakingError, Result};
use crate::format::FormatProvider;
use crate::maps::MapCatalog;
use crate::metrics::MetricsCollector;
use crate::notify::Notifier;
use crate::queue::assembler::{MatchAssembler, RandomMatchAssembler};
use crate::queue::pool::{FormatQueue, PoolSnapshot, Resolution};
use crate::types::{BestOf, FormedMatch, MapId, Notification, PlayerId, QueueEvent};
use crate::utils::{current_timestamp, generate_match_id};
use crate::veto::{VetoCaptains, VetoRegistry};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default time players get to confirm a ready check
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts at inserting a player before giving up on a racing re-join
const MAX_JOIN_ATTEMPTS: usize = 3;

/// What happens to a batch member whose ready-check prompt cannot be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Keep them in the batch; they are evicted at the deadline if unready
    #[default]
    EvictAtTimeout,
    /// Remove them from the pool as soon as delivery fails
    EvictImmediately,
}

impl FromStr for UnreachablePolicy {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "evict_at_timeout" | "timeout" => Ok(UnreachablePolicy::EvictAtTimeout),
            "evict_immediately" | "immediate" => Ok(UnreachablePolicy::EvictImmediately),
            other => Err(MatchmakingError::ConfigurationError {
                message: format!("Unknown unreachable policy: {}", other),
            }),
        }
    }
}

/// Runtime settings for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub ready_timeout: Duration,
    pub unreachable_policy: UnreachablePolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
            unreachable_policy: UnreachablePolicy::default(),
        }
    }
}

/// Counters kept by the coordinator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub players_joined: u64,
    pub players_left: u64,
    pub ready_checks_issued: u64,
    pub ready_checks_succeeded: u64,
    pub ready_checks_retried: u64,
    pub players_evicted: u64,
    pub matches_formed: u64,
    pub notification_failures: u64,
    /// Current pool size per format
    pub players_waiting: BTreeMap<String, usize>,
}

/// A ready check captured under the format lock, delivered after release
#[derive(Debug, Clone)]
struct IssuedCheck {
    best_of: BestOf,
    generation: u64,
    members: Vec<PlayerId>,
    deadline: DateTime<Utc>,
}

/// Coordinates pools, ready checks and match hand-off for all formats
#[derive(Clone)]
pub struct QueueCoordinator {
    /// Format state, fixed at construction
    formats: Arc<HashMap<BestOf, Mutex<FormatQueue>>>,
    /// Which format each queued player is waiting for
    assignments: Arc<Mutex<HashMap<PlayerId, BestOf>>>,
    settings: CoordinatorSettings,
    format_provider: Arc<dyn FormatProvider>,
    assembler: Arc<dyn MatchAssembler>,
    notifier: Arc<dyn Notifier>,
    /// Maps drawn for formats without a veto
    map_catalog: Arc<dyn MapCatalog>,
    veto_registry: VetoRegistry,
    events: mpsc::UnboundedSender<QueueEvent>,
    stats: Arc<RwLock<QueueStats>>,
    metrics_collector: Arc<MetricsCollector>,
}

impl QueueCoordinator {
    /// Create a coordinator for every format the provider offers.
    ///
    /// Returns the receiving end of the lifecycle event stream.
    pub fn new(
        settings: CoordinatorSettings,
        format_provider: Arc<dyn FormatProvider>,
        notifier: Arc<dyn Notifier>,
        veto_registry: VetoRegistry,
    ) -> Result<(Self, mpsc::UnboundedReceiver<QueueEvent>)> {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(
            settings,
            format_provider,
            notifier,
            veto_registry,
            metrics_collector,
        )
    }

    /// Create a coordinator recording into an existing metrics collector
    pub fn with_metrics(
        settings: CoordinatorSettings,
        format_provider: Arc<dyn FormatProvider>,
        notifier: Arc<dyn Notifier>,
        veto_registry: VetoRegistry,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<QueueEvent>)> {
        if settings.ready_timeout.is_zero() {
            return Err(MatchmakingError::ConfigurationError {
                message: "Ready timeout must be greater than 0".to_string(),
            }
            .into());
        }

        let mut formats = HashMap::new();
        for best_of in format_provider.available_formats() {
            let config = format_provider.get_format_config(best_of)?;
            format_provider.validate_config(&config)?;
            formats.insert(
                best_of,
                Mutex::new(FormatQueue::new(best_of, config.required_count)),
            );
        }

        info!(
            "Queue coordinator ready for {} formats (ready timeout {}s, {:?})",
            formats.len(),
            settings.ready_timeout.as_secs(),
            settings.unreachable_policy
        );

        let (events, receiver) = mpsc::unbounded_channel();

        Ok((
            Self {
                formats: Arc::new(formats),
                assignments: Arc::new(Mutex::new(HashMap::new())),
                settings,
                format_provider,
                assembler: Arc::new(RandomMatchAssembler::new()),
                notifier,
                map_catalog: veto_registry.map_catalog(),
                veto_registry,
                events,
                stats: Arc::new(RwLock::new(QueueStats::default())),
                metrics_collector,
            },
            receiver,
        ))
    }

    /// Replace the match assembler
    pub fn with_assembler(mut self, assembler: Arc<dyn MatchAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    /// Draw veto-less maps from another catalog than the veto registry's
    pub fn with_map_catalog(mut self, map_catalog: Arc<dyn MapCatalog>) -> Self {
        self.map_catalog = map_catalog;
        self
    }

    pub fn veto_registry(&self) -> &VetoRegistry {
        &self.veto_registry
    }

    pub fn formats(&self) -> Vec<BestOf> {
        let mut formats: Vec<BestOf> = self.formats.keys().copied().collect();
        formats.sort();
        formats
    }

    fn format_queue(&self, best_of: BestOf) -> Result<&Mutex<FormatQueue>> {
        self.formats.get(&best_of).ok_or_else(|| {
            MatchmakingError::InvalidFormat {
                value: best_of.value(),
            }
            .into()
        })
    }

    fn lock_format<'a>(&self, queue: &'a Mutex<FormatQueue>) -> Result<MutexGuard<'a, FormatQueue>> {
        queue.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire format queue lock".to_string(),
            }
            .into()
        })
    }

    fn lock_assignments(&self) -> Result<MutexGuard<'_, HashMap<PlayerId, BestOf>>> {
        self.assignments.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire assignments lock".to_string(),
            }
            .into()
        })
    }

    fn update_stats(&self, update: impl FnOnce(&mut QueueStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Failed to acquire queue stats lock"),
        }
    }

    fn emit(&self, event: QueueEvent) {
        if self.events.send(event).is_err() {
            debug!("Queue event receiver dropped");
        }
    }

    /// Join with a raw best-of value as typed by a user
    pub async fn join_raw(&self, player_id: &str, best_of: u8) -> Result<usize> {
        let best_of = BestOf::try_from(best_of)?;
        self.join(player_id, best_of).await
    }

    /// Add a player to a format's pool and return the new pool size.
    ///
    /// If this join fills the pool, a ready check is issued and its prompts
    /// are delivered before returning. Delivery failures are reported as
    /// `UserUnreachable`, but the join itself stands.
    pub async fn join(&self, player_id: &str, best_of: BestOf) -> Result<usize> {
        let timer = self.metrics_collector.start_timer();
        let queue = self.format_queue(best_of)?;

        let mut attempt = 0;
        let (pool_size, issued) = loop {
            attempt += 1;
            if attempt > MAX_JOIN_ATTEMPTS {
                return Err(MatchmakingError::InternalError {
                    message: format!("Player {} keeps switching formats", player_id),
                }
                .into());
            }

            match self.status(player_id)? {
                Some(current) if current == best_of => {
                    return Err(MatchmakingError::AlreadyQueued {
                        player_id: player_id.to_string(),
                        best_of,
                    }
                    .into());
                }
                Some(previous) => {
                    info!(
                        "Player {} switching from {} to {}",
                        player_id, previous, best_of
                    );
                    self.leave_format(player_id, previous)?;
                }
                None => {}
            }

            let mut state = self.lock_format(queue)?;
            {
                let mut assignments = self.lock_assignments()?;
                match assignments.get(player_id) {
                    Some(current) if *current == best_of => {
                        return Err(MatchmakingError::AlreadyQueued {
                            player_id: player_id.to_string(),
                            best_of,
                        }
                        .into());
                    }
                    // a concurrent join moved the player elsewhere
                    Some(_) => continue,
                    None => {}
                }

                state.push(player_id)?;
                assignments.insert(player_id.to_string(), best_of);
            }

            let pool_size = state.len();
            let issued = if state.should_form() {
                self.open_batch(&mut state)
            } else {
                None
            };
            break (pool_size, issued);
        };

        info!(
            "Player {} joined {} queue ({} waiting)",
            player_id, best_of, pool_size
        );
        self.update_stats(|stats| {
            stats.players_joined += 1;
            stats
                .players_waiting
                .insert(best_of.to_string(), pool_size);
        });

        let delivery = match issued {
            Some(check) => self.deliver_ready_check(check).await,
            None => Ok(()),
        };

        self.metrics_collector
            .record_join(best_of, pool_size, timer.stop());

        delivery.map(|_| pool_size)
    }

    /// Remove a player from whichever pool they are in.
    ///
    /// Returns the format they left, `None` if they were not queued.
    pub fn leave(&self, player_id: &str) -> Result<Option<BestOf>> {
        let Some(best_of) = self.status(player_id)? else {
            debug!("Leave for unqueued player {}", player_id);
            return Ok(None);
        };

        if self.leave_format(player_id, best_of)? {
            Ok(Some(best_of))
        } else {
            Ok(None)
        }
    }

    fn leave_format(&self, player_id: &str, best_of: BestOf) -> Result<bool> {
        let queue = self.format_queue(best_of)?;

        let (removed, pool_size) = {
            let mut state = self.lock_format(queue)?;
            let removed = state.remove(player_id);

            let mut assignments = self.lock_assignments()?;
            if assignments.get(player_id) == Some(&best_of) {
                assignments.remove(player_id);
            }
            (removed, state.len())
        };

        if removed {
            info!(
                "Player {} left {} queue ({} waiting)",
                player_id, best_of, pool_size
            );
            self.metrics_collector.record_leave(best_of, pool_size);
            self.update_stats(|stats| {
                stats.players_left += 1;
                stats
                    .players_waiting
                    .insert(best_of.to_string(), pool_size);
            });
        }

        Ok(removed)
    }

    /// Confirm the active ready check for the player's format.
    ///
    /// Returns the ready count. Completion is decided when the timer fires.
    pub fn mark_ready(&self, player_id: &str) -> Result<usize> {
        let best_of = self
            .status(player_id)?
            .ok_or_else(|| MatchmakingError::NotQueued {
                player_id: player_id.to_string(),
            })?;

        let queue = self.format_queue(best_of)?;
        let ready_count = self.lock_format(queue)?.mark_ready(player_id)?;

        info!(
            "Player {} is ready for {} ({} ready)",
            player_id, best_of, ready_count
        );
        Ok(ready_count)
    }

    /// Format the player is queued for, if any
    pub fn status(&self, player_id: &str) -> Result<Option<BestOf>> {
        Ok(self.lock_assignments()?.get(player_id).copied())
    }

    pub fn pool_snapshot(&self, best_of: BestOf) -> Result<PoolSnapshot> {
        let queue = self.format_queue(best_of)?;
        Ok(self.lock_format(queue)?.snapshot())
    }

    /// Ready members of the active batch, in batch order
    pub fn ready_players(&self, best_of: BestOf) -> Result<Vec<PlayerId>> {
        let queue = self.format_queue(best_of)?;
        let state = self.lock_format(queue)?;
        Ok(state
            .batch()
            .map(|batch| batch.ready_members())
            .unwrap_or_default())
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire queue stats lock".to_string(),
            })?;
        Ok(stats.clone())
    }

    /// Abort every pending ready-check timer. Pools are kept.
    pub fn shutdown(&self) -> Result<usize> {
        let mut cancelled = 0;
        for queue in self.formats.values() {
            if self.lock_format(queue)?.cancel_batch() {
                cancelled += 1;
            }
        }

        info!("Queue coordinator shut down ({} ready checks cancelled)", cancelled);
        Ok(cancelled)
    }

    /// Capture a batch and start its timer. Called with the format locked.
    ///
    /// The batch resolves on the tokio clock. The wall-clock deadline is read
    /// at the same moment and only tells players when to expect it; the two
    /// drift apart when the runtime clock is paused or skewed.
    fn open_batch(&self, state: &mut FormatQueue) -> Option<IssuedCheck> {
        let timeout = self.settings.ready_timeout;
        let expires_at = tokio::time::Instant::now() + timeout;
        let deadline = current_timestamp() + chrono::Duration::milliseconds(timeout.as_millis() as i64);
        let best_of = state.best_of();

        let (generation, members) = state.form_batch(deadline)?;

        let coordinator = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            if let Err(e) = coordinator.resolve_ready_check(best_of, generation).await {
                error!(
                    "Failed to resolve {} ready check {}: {}",
                    best_of, generation, e
                );
            }
        });
        state.attach_timer(generation, timer);

        Some(IssuedCheck {
            best_of,
            generation,
            members,
            deadline,
        })
    }

    /// Announce a captured batch and prompt each member
    async fn deliver_ready_check(&self, check: IssuedCheck) -> Result<()> {
        info!(
            "Ready check {} issued for {} to {} players",
            check.generation,
            check.best_of,
            check.members.len()
        );
        self.metrics_collector
            .record_ready_check(check.best_of, "issued");
        self.update_stats(|stats| stats.ready_checks_issued += 1);
        self.emit(QueueEvent::ReadyCheckIssued {
            best_of: check.best_of,
            generation: check.generation,
            members: check.members.clone(),
            deadline: check.deadline,
        });

        let notification = Notification::ReadyCheck {
            best_of: check.best_of,
            deadline: check.deadline,
        };

        let mut unreachable = Vec::new();
        for player_id in &check.members {
            if let Err(e) = self.notifier.notify(player_id, &notification).await {
                warn!("Ready check prompt to {} failed: {}", player_id, e);
                unreachable.push(player_id.clone());
            }
        }

        if unreachable.is_empty() {
            return Ok(());
        }

        self.metrics_collector.record_notification_failure();
        self.update_stats(|stats| stats.notification_failures += unreachable.len() as u64);

        if self.settings.unreachable_policy == UnreachablePolicy::EvictImmediately {
            let mut evicted = Vec::new();
            for player_id in &unreachable {
                if self.leave_format(player_id, check.best_of)? {
                    evicted.push(player_id.clone());
                }
            }

            if !evicted.is_empty() {
                info!(
                    "Evicted {} unreachable players from {} ready check",
                    evicted.len(),
                    check.best_of
                );
                self.emit(QueueEvent::PlayersEvicted {
                    best_of: check.best_of,
                    player_ids: evicted,
                });
            }
        }

        Err(MatchmakingError::UserUnreachable {
            player_ids: unreachable,
        }
        .into())
    }

    /// Timer body: settle the batch with `generation` and act on the result
    async fn resolve_ready_check(&self, best_of: BestOf, generation: u64) -> Result<()> {
        let queue = self.format_queue(best_of)?;

        let (resolution, reissued, pool_size) = {
            let mut state = self.lock_format(queue)?;
            let resolution = state.resolve(generation);

            let released = match &resolution {
                Resolution::Stale => None,
                Resolution::Success { members } => Some(members),
                Resolution::Retry { evicted } => Some(evicted),
            };
            if let Some(players) = released {
                let mut assignments = self.lock_assignments()?;
                for player_id in players {
                    if assignments.get(player_id) == Some(&best_of) {
                        assignments.remove(player_id);
                    }
                }
            }

            let reissued = match &resolution {
                Resolution::Stale => None,
                _ if state.should_form() => self.open_batch(&mut state),
                _ => None,
            };
            (resolution, reissued, state.len())
        };

        self.update_stats(|stats| {
            stats
                .players_waiting
                .insert(best_of.to_string(), pool_size);
        });

        match resolution {
            Resolution::Stale => {
                debug!(
                    "Ignoring stale {} ready check timer {}",
                    best_of, generation
                );
                self.metrics_collector.record_ready_check(best_of, "stale");
            }
            Resolution::Success { members } => {
                info!(
                    "All {} players ready for {}, forming match",
                    members.len(),
                    best_of
                );
                self.metrics_collector
                    .record_ready_check(best_of, "success");
                self.update_stats(|stats| stats.ready_checks_succeeded += 1);
                self.hand_off(best_of, members, pool_size).await?;
            }
            Resolution::Retry { evicted } => {
                info!(
                    "Ready check {} for {} timed out, evicting {} players",
                    generation,
                    best_of,
                    evicted.len()
                );
                self.metrics_collector.record_ready_check(best_of, "retry");
                self.metrics_collector
                    .record_evictions(best_of, evicted.len(), pool_size);
                self.update_stats(|stats| {
                    stats.ready_checks_retried += 1;
                    stats.players_evicted += evicted.len() as u64;
                });
                self.evict_not_ready(best_of, evicted).await;
            }
        }

        if let Some(check) = reissued {
            info!("Retriggering {} ready check with remaining players", best_of);
            if let Err(e) = self.deliver_ready_check(check).await {
                warn!("Retriggered {} ready check had delivery failures: {}", best_of, e);
            }
        }

        Ok(())
    }

    async fn evict_not_ready(&self, best_of: BestOf, evicted: Vec<PlayerId>) {
        if evicted.is_empty() {
            return;
        }

        let notification = Notification::RemovedNotReady { best_of };
        for player_id in &evicted {
            if let Err(e) = self.notifier.notify(player_id, &notification).await {
                debug!("Could not tell {} about eviction: {}", player_id, e);
            }
        }

        self.emit(QueueEvent::PlayersEvicted {
            best_of,
            player_ids: evicted,
        });
    }

    /// Pick one active map at random.
    ///
    /// An empty catalog is logged and the match goes ahead without a map.
    fn draw_map(&self, best_of: BestOf) -> Option<MapId> {
        let maps = self.map_catalog.active_maps();
        let drawn = maps
            .choose(&mut rand::thread_rng())
            .map(|map| map.id.clone());

        match &drawn {
            Some(map_id) => info!("Drew map {} for {} match", map_id, best_of),
            None => error!("No active maps to draw for {} match", best_of),
        }
        drawn
    }

    /// Assemble teams, open the veto and tell everyone
    async fn hand_off(&self, best_of: BestOf, members: Vec<PlayerId>, pool_size: usize) -> Result<()> {
        let assembled = self.assembler.assemble(&members)?;
        let match_id = generate_match_id();

        let has_veto = self
            .format_provider
            .get_format_config(best_of)
            .map(|config| config.veto_sequence.is_some())
            .unwrap_or(false);

        let veto_opened = if has_veto {
            let (first, second) = assembled.captains_by_pick_order();
            match self
                .veto_registry
                .open(match_id, best_of, VetoCaptains::new(first.clone(), second.clone()))
            {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to open veto for match {}: {}", match_id, e);
                    false
                }
            }
        } else {
            debug!("{} has no veto, match {} skips it", best_of, match_id);
            false
        };
        let map_id = if has_veto { None } else { self.draw_map(best_of) };

        let formed = FormedMatch {
            match_id,
            best_of,
            team1: assembled.team1.clone(),
            team2: assembled.team2.clone(),
            captain1: assembled.captain1.clone(),
            captain2: assembled.captain2.clone(),
            team1_first_pick: assembled.team1_first_pick,
            veto_opened,
            map_id: map_id.clone(),
            timestamp: current_timestamp(),
        };

        info!(
            "Match {} formed for {}: captains {} and {}",
            match_id, best_of, formed.captain1, formed.captain2
        );
        self.metrics_collector.record_match_formed(best_of, pool_size);
        self.update_stats(|stats| stats.matches_formed += 1);
        self.emit(QueueEvent::MatchFormed(formed));

        let teams = [
            (1u8, &assembled.team1, &assembled.captain1),
            (2u8, &assembled.team2, &assembled.captain2),
        ];
        for (team, players, captain) in teams {
            let notification = Notification::MatchFormed {
                match_id,
                best_of,
                team,
                captain: captain.clone(),
                map_id: map_id.clone(),
            };
            for player_id in players {
                if let Err(e) = self.notifier.notify(player_id, &notification).await {
                    warn!("Could not tell {} about match {}: {}", player_id, match_id, e);
                    self.metrics_collector.record_notification_failure();
                }
            }
        }

        Ok(())
    }
}
