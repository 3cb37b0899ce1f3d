//! The outbox service: cache, action queue and governance log behind one lock,
//! persisted as a single versioned blob after every mutation.
//!
//! All state transitions happen synchronously while the state lock is held.
//! The only suspension points are the remote dispatch calls inside a drain
//! pass, which run with the lock released so producers are never blocked by
//! a slow remote.

use crate::cache::{CacheLookup, CacheStore};
use crate::config::OutboxConfig;
use crate::connectivity::Connectivity;
use crate::dispatch::ActionDispatcher;
use crate::error::{DispatchError, OutboxError, OutboxResult};
use crate::governance::{GovernanceLog, governance_action};
use crate::queue::{ActionQueue, FailureOutcome};
use crate::telemetry::{Telemetry, TracingTelemetry};
use outbox_store::{MemoryStateStore, PersistedState, StateStore, load_state};
use outbox_types::{
    ActionId, CacheEntry, Clock, DeadLetter, DeferredAction, GovernanceEvent,
    GovernanceEventDraft, OfflineSyncStatus, SystemClock, Timestamp,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

/// Save attempts before a conflicting write is given up.
const PERSIST_ATTEMPTS: usize = 3;

/// How a tracked action left the queue successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCompletion {
    /// The remote accepted the action.
    Delivered,
    /// The replay key was already marked processed; the remote was not called.
    Skipped,
}

/// Resolves once a tracked action leaves the queue.
pub struct ActionReceipt {
    id: ActionId,
    rx: oneshot::Receiver<OutboxResult<ActionCompletion>>,
}

impl ActionReceipt {
    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Waits for the action to be delivered, skipped, cancelled or abandoned.
    pub async fn wait(self) -> OutboxResult<ActionCompletion> {
        self.rx.await.map_err(|_| OutboxError::ChannelClosed)?
    }
}

/// Counters for one or more drain passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSummary {
    /// Actions taken from the ready batch.
    pub attempted: usize,
    pub delivered: usize,
    /// Short-circuited by the replay marker.
    pub skipped: usize,
    pub rescheduled: usize,
    /// Moved to the dead-letter list.
    pub exhausted: usize,
}

impl DrainSummary {
    pub fn merge(&mut self, other: &DrainSummary) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.skipped += other.skipped;
        self.rescheduled += other.rescheduled;
        self.exhausted += other.exhausted;
    }
}

/// A change to re-apply on top of a newer blob after a lost save.
#[derive(Debug, Clone)]
enum Mutation {
    Enqueued(DeferredAction),
    Updated(DeferredAction),
    Removed(ActionId),
    CacheWritten(CacheEntry),
    CacheRemoved(String),
    CacheCleared,
    EventRecorded(GovernanceEvent),
    DeadLettered(DeadLetter),
    DeadLetterRemoved(ActionId),
    DeadLettersCleared,
}

struct OutboxState {
    cache: CacheStore,
    queue: ActionQueue,
    log: GovernanceLog,
    dead_letters: Vec<DeadLetter>,
    /// Version of the blob this state was last saved as or loaded from.
    version: Option<u64>,
    blob_bytes: usize,
    last_sync_at: Option<Timestamp>,
    receipts: HashMap<ActionId, Vec<oneshot::Sender<OutboxResult<ActionCompletion>>>>,
}

impl OutboxState {
    fn empty(config: &OutboxConfig) -> Self {
        Self {
            cache: CacheStore::new(config.cache.clone()),
            queue: ActionQueue::new(config.queue.max_actions),
            log: GovernanceLog::new(config.governance.max_events),
            dead_letters: Vec::new(),
            version: None,
            blob_bytes: 0,
            last_sync_at: None,
            receipts: HashMap::new(),
        }
    }

    /// Swaps in a loaded blob. Returns the queue it replaced.
    fn replace_persisted(&mut self, config: &OutboxConfig, state: PersistedState) -> ActionQueue {
        self.cache = CacheStore::from_entries(config.cache.clone(), state.cache);
        let previous = std::mem::replace(
            &mut self.queue,
            ActionQueue::from_actions(config.queue.max_actions, state.action_queue),
        );
        self.log = GovernanceLog::restore(
            config.governance.max_events,
            state.governance_log,
            state.sequence_counter,
        );
        self.dead_letters = state.dead_letters;
        previous
    }

    fn snapshot(&self, now: Timestamp) -> PersistedState {
        PersistedState {
            cache: self.cache.to_persisted(),
            action_queue: self.queue.iter().cloned().collect(),
            governance_log: self.log.events().to_vec(),
            sequence_counter: self.log.sequence(),
            last_persisted: now,
            dead_letters: self.dead_letters.clone(),
        }
    }

    fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Enqueued(action) => {
                if !self.queue.contains(&action.id) {
                    self.queue.upsert(action.clone());
                }
            }
            Mutation::Updated(action) => {
                self.queue.replace(action.clone());
            }
            Mutation::Removed(id) => {
                self.queue.remove(id);
            }
            Mutation::CacheWritten(entry) => self.cache.upsert(entry.clone()),
            Mutation::CacheRemoved(key) => {
                self.cache.remove(key);
            }
            Mutation::CacheCleared => {
                self.cache.clear();
            }
            Mutation::EventRecorded(event) => self.log.append_existing(event.clone()),
            Mutation::DeadLettered(letter) => {
                if !self.dead_letters.iter().any(|d| d.action.id == letter.action.id) {
                    self.dead_letters.push(letter.clone());
                }
            }
            Mutation::DeadLetterRemoved(id) => self.dead_letters.retain(|d| d.action.id != *id),
            Mutation::DeadLettersCleared => self.dead_letters.clear(),
        }
    }

    fn resolve(&mut self, id: &ActionId, completion: ActionCompletion) {
        for tx in self.receipts.remove(id).unwrap_or_default() {
            let _ = tx.send(Ok(completion));
        }
    }

    fn reject(&mut self, id: &ActionId, make_error: impl Fn() -> OutboxError) {
        for tx in self.receipts.remove(id).unwrap_or_default() {
            let _ = tx.send(Err(make_error()));
        }
    }
}

/// Builder for [`Outbox`].
pub struct OutboxBuilder {
    config: OutboxConfig,
    store: Option<Arc<dyn StateStore>>,
    dispatcher: Option<Arc<dyn ActionDispatcher>>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn Telemetry>,
    connectivity: Connectivity,
}

impl OutboxBuilder {
    /// Durable store. Defaults to a fresh [`MemoryStateStore`].
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Remote dispatch collaborator. Required.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Connectivity signal. Defaults to online.
    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Restores persisted state and returns the outbox.
    pub fn build(self) -> OutboxResult<Outbox> {
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| OutboxError::Config("no dispatcher configured".into()))?;
        if self.config.queue.max_actions == 0 || self.config.queue.batch_size == 0 {
            return Err(OutboxError::Config(
                "queue capacity and batch size must be positive".into(),
            ));
        }
        if self.config.sync.flush_interval_ms == 0 {
            return Err(OutboxError::Config("flush interval must be positive".into()));
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));

        let loaded = load_state(store.as_ref(), &self.config.state_key, self.clock.now())?;
        let mut state = OutboxState::empty(&self.config);
        state.replace_persisted(&self.config, loaded.state);
        state.version = loaded.version;
        state.blob_bytes = loaded.bytes;

        info!(
            "Outbox restored: {} actions, {} cache entries, {} events{}",
            state.queue.len(),
            state.cache.len(),
            state.log.len(),
            if loaded.reset { " (state reset)" } else { "" }
        );
        if loaded.reset {
            self.telemetry
                .emit("state.reset", json!({ "key": self.config.state_key }));
        }

        Ok(Outbox {
            config: self.config,
            store,
            dispatcher,
            clock: self.clock,
            telemetry: self.telemetry,
            connectivity: self.connectivity,
            state: Mutex::new(state),
            drain_lock: Mutex::new(()),
        })
    }
}

/// Offline-resilient outbox.
pub struct Outbox {
    config: OutboxConfig,
    store: Arc<dyn StateStore>,
    dispatcher: Arc<dyn ActionDispatcher>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn Telemetry>,
    connectivity: Connectivity,
    state: Mutex<OutboxState>,
    /// Serializes drain passes.
    drain_lock: Mutex<()>,
}

impl Outbox {
    /// Starts building an outbox.
    pub fn builder(config: OutboxConfig) -> OutboxBuilder {
        OutboxBuilder {
            config,
            store: None,
            dispatcher: None,
            clock: Arc::new(SystemClock),
            telemetry: Arc::new(TracingTelemetry),
            connectivity: Connectivity::default(),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn telemetry(&self) -> &Arc<dyn Telemetry> {
        &self.telemetry
    }

    /// Version of the blob the in-memory state corresponds to.
    pub async fn stored_version(&self) -> Option<u64> {
        self.state.lock().await.version
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Saves the state blob. On a version conflict the newer blob is loaded,
    /// `mutations` are re-applied on top of it, and the save is retried.
    fn persist(&self, state: &mut OutboxState, mutations: &[Mutation]) {
        let key = &self.config.state_key;
        for attempt in 1..=PERSIST_ATTEMPTS {
            let data = match state.snapshot(self.clock.now()).encode() {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to encode outbox state: {}", e);
                    return;
                }
            };

            match self.store.save(key, &data, state.version) {
                Ok(version) => {
                    state.version = Some(version);
                    state.blob_bytes = data.len();
                    return;
                }
                Err(e) if e.is_conflict() => {
                    warn!("Persist attempt {} lost a race: {}; merging", attempt, e);
                    self.telemetry
                        .emit("state.conflict", json!({ "attempt": attempt }));
                    if let Err(e) = self.merge_newer(state, mutations) {
                        warn!("Failed to reload state after conflict: {}", e);
                        return;
                    }
                }
                Err(e) => {
                    warn!("Failed to persist outbox state: {}", e);
                    self.telemetry
                        .emit("persistence.failed", json!({ "error": e.to_string() }));
                    return;
                }
            }
        }
        warn!("Gave up persisting after {} conflicting attempts", PERSIST_ATTEMPTS);
    }

    fn merge_newer(&self, state: &mut OutboxState, mutations: &[Mutation]) -> OutboxResult<()> {
        let loaded = load_state(
            self.store.as_ref(),
            &self.config.state_key,
            self.clock.now(),
        )?;
        let previous = state.replace_persisted(&self.config, loaded.state);
        state.version = loaded.version;
        for mutation in mutations {
            state.apply(mutation);
        }
        self.settle_departed(state, &previous);
        Ok(())
    }

    /// Resolves receipts for watched actions that a reload took out of the
    /// queue, i.e. ones another writer delivered, cancelled or abandoned.
    fn settle_departed(&self, state: &mut OutboxState, previous: &ActionQueue) {
        let departed: Vec<ActionId> = state
            .receipts
            .keys()
            .filter(|id| !state.queue.contains(id))
            .copied()
            .collect();

        for id in departed {
            let exhausted = state
                .dead_letters
                .iter()
                .find(|d| d.action.id == id)
                .map(|d| (d.action.retry_count, d.last_error.clone()));
            if let Some((attempts, last_error)) = exhausted {
                state.reject(&id, || OutboxError::RetriesExhausted {
                    id,
                    attempts,
                    last_error: last_error.clone(),
                });
                continue;
            }

            let replay_key = previous.get(&id).and_then(|a| a.replay_key.clone());
            let processed = match replay_key {
                Some(key) => self.store.is_processed(&key).unwrap_or_else(|e| {
                    warn!("Replay check for {} failed: {}", key, e);
                    false
                }),
                None => false,
            };
            if processed {
                state.resolve(&id, ActionCompletion::Skipped);
            } else {
                state.reject(&id, || OutboxError::RemovedElsewhere(id));
            }
            debug!("Watched action {} left the queue through another writer", id);
        }
    }

    /// Replaces in-memory state with the stored blob if another writer has
    /// saved a newer version. Returns true if state changed.
    pub async fn reload_from_store(&self) -> OutboxResult<bool> {
        let mut state = self.state.lock().await;
        let loaded = load_state(
            self.store.as_ref(),
            &self.config.state_key,
            self.clock.now(),
        )?;
        if loaded.version == state.version {
            return Ok(false);
        }

        debug!(
            "Reloading outbox state v{:?} -> v{:?}",
            state.version, loaded.version
        );
        let previous = state.replace_persisted(&self.config, loaded.state);
        state.version = loaded.version;
        state.blob_bytes = loaded.bytes;
        self.settle_departed(&mut state, &previous);
        self.telemetry
            .emit("state.reloaded", json!({ "version": loaded.version }));
        Ok(true)
    }

    // ── Cache ────────────────────────────────────────────────────

    /// Caches `data` under `key` for `ttl` (or the configured default).
    pub async fn cache_data<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> OutboxResult<()> {
        let value = serde_json::to_value(data)?;
        let mut state = self.state.lock().await;
        let (entry, write) = state.cache.insert(key, value, ttl, self.clock.now());

        let mut mutations: Vec<Mutation> = write
            .evicted
            .iter()
            .map(|k| Mutation::CacheRemoved(k.clone()))
            .collect();
        if !write.evicted.is_empty() {
            debug!("Cache over budget, evicted {} entries", write.evicted.len());
            self.telemetry.emit(
                "cache.evicted",
                json!({ "count": write.evicted.len(), "bytes": state.cache.size_bytes() }),
            );
        }
        mutations.push(Mutation::CacheWritten(entry));
        self.persist(&mut state, &mutations);

        self.telemetry.emit("cache.write", json!({ "key": key }));
        Ok(())
    }

    /// Reads a cached value. Missing, expired, corrupt or undecodable entries
    /// are all plain misses.
    pub async fn get_cached_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut state = self.state.lock().await;
        let value = match state.cache.lookup(key, self.clock.now()) {
            CacheLookup::Hit(value) => value,
            CacheLookup::Miss => return None,
            CacheLookup::Corrupt => {
                warn!("Cache entry {} failed its checksum; discarded", key);
                self.telemetry
                    .emit("cache.checksum_mismatch", json!({ "key": key }));
                self.persist(&mut state, &[Mutation::CacheRemoved(key.to_string())]);
                return None;
            }
            CacheLookup::Expired | CacheLookup::StaleSchema => {
                debug!("Cache entry {} is stale; discarded", key);
                self.persist(&mut state, &[Mutation::CacheRemoved(key.to_string())]);
                return None;
            }
        };
        drop(state);

        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!("Cache entry {} does not decode as requested type: {}", key, e);
                None
            }
        }
    }

    /// Removes one cache entry. Returns true if it existed.
    pub async fn remove_cached(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.cache.remove(key).is_none() {
            return false;
        }
        self.persist(&mut state, &[Mutation::CacheRemoved(key.to_string())]);
        true
    }

    /// Empties the cache. Returns the number of entries removed.
    pub async fn clear_cache(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.cache.clear();
        if count > 0 {
            self.persist(&mut state, &[Mutation::CacheCleared]);
        }
        count
    }

    /// Drops expired cache entries. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let expired = state.cache.prune_expired(self.clock.now());
        if !expired.is_empty() {
            let mutations: Vec<Mutation> =
                expired.iter().cloned().map(Mutation::CacheRemoved).collect();
            self.persist(&mut state, &mutations);
        }
        expired.len()
    }

    // ── Queue ────────────────────────────────────────────────────

    /// Queues an action for dispatch.
    ///
    /// Fails with [`OutboxError::CapacityExceeded`] if the queue is full and
    /// holds no low-priority action to evict.
    pub async fn queue_action(&self, action: DeferredAction) -> OutboxResult<ActionId> {
        let mut state = self.state.lock().await;
        let mut mutations = Vec::new();
        let id = self.enqueue_locked(&mut state, action, &mut mutations)?;
        self.persist(&mut state, &mutations);
        Ok(id)
    }

    fn enqueue_locked(
        &self,
        state: &mut OutboxState,
        action: DeferredAction,
        mutations: &mut Vec<Mutation>,
    ) -> OutboxResult<ActionId> {
        let id = action.id;
        let kind = action.kind();
        let priority = action.priority;
        let evicted = state.queue.enqueue(action.clone())?;

        if !evicted.is_empty() {
            warn!(
                "Queue full, evicted {} low-priority actions to admit {}",
                evicted.len(),
                id
            );
            self.telemetry
                .emit("queue.evicted", json!({ "count": evicted.len() }));
        }
        for old in evicted {
            state.reject(&old.id, || OutboxError::Cancelled(old.id));
            mutations.push(Mutation::Removed(old.id));
        }
        mutations.push(Mutation::Enqueued(action));

        debug!("Queued {} action {} ({})", kind, id, priority);
        self.telemetry.emit(
            "action.queued",
            json!({ "id": id.to_string(), "type": kind.as_str(), "priority": priority.as_str() }),
        );
        Ok(id)
    }

    /// Returns a receipt that resolves when the queued action completes.
    pub async fn watch_action(&self, id: ActionId) -> OutboxResult<ActionReceipt> {
        let mut state = self.state.lock().await;
        if !state.queue.contains(&id) {
            return Err(OutboxError::NotFound(format!("action {id}")));
        }
        let (tx, rx) = oneshot::channel();
        state.receipts.entry(id).or_default().push(tx);
        Ok(ActionReceipt { id, rx })
    }

    /// Removes a queued action. An in-flight dispatch is not aborted, but the
    /// action will not be retried. Returns true if the action was queued.
    pub async fn cancel_task(&self, id: ActionId) -> bool {
        let mut state = self.state.lock().await;
        if state.queue.remove(&id).is_none() {
            return false;
        }
        state.reject(&id, || OutboxError::Cancelled(id));
        self.persist(&mut state, &[Mutation::Removed(id)]);
        debug!("Cancelled action {}", id);
        true
    }

    /// Removes every queued action. Returns how many were removed.
    pub async fn cancel_all_tasks(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.queue.drain_all();
        if removed.is_empty() {
            return 0;
        }
        let mut mutations = Vec::with_capacity(removed.len());
        for action in &removed {
            state.reject(&action.id, || OutboxError::Cancelled(action.id));
            mutations.push(Mutation::Removed(action.id));
        }
        self.persist(&mut state, &mutations);
        info!("Cancelled all {} queued actions", removed.len());
        removed.len()
    }

    /// Queued actions in dispatch order.
    pub async fn pending_actions(&self) -> Vec<DeferredAction> {
        self.state.lock().await.queue.iter().cloned().collect()
    }

    // ── Governance ───────────────────────────────────────────────

    /// Appends a governance event and queues its replay action.
    pub async fn record_governance_event(
        &self,
        draft: GovernanceEventDraft,
    ) -> OutboxResult<GovernanceEvent> {
        let mut state = self.state.lock().await;
        let event = state.log.record(draft, self.clock.now());
        let mut mutations = vec![Mutation::EventRecorded(event.clone())];

        let action = governance_action(&event, self.config.governance.max_retries);
        let queued = self.enqueue_locked(&mut state, action, &mut mutations);
        self.persist(&mut state, &mutations);
        queued?;

        debug!(
            "Recorded governance event {} #{} ({})",
            event.id, event.sequence_number, event.event_type
        );
        Ok(event)
    }

    /// The retained governance events, oldest first.
    pub async fn governance_log(&self) -> Vec<GovernanceEvent> {
        self.state.lock().await.log.events().to_vec()
    }

    // ── Dead letters ─────────────────────────────────────────────

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Moves a dead letter back into the queue with a fresh retry budget.
    pub async fn requeue_dead_letter(&self, id: ActionId) -> OutboxResult<ActionId> {
        let mut state = self.state.lock().await;
        let pos = state
            .dead_letters
            .iter()
            .position(|d| d.action.id == id)
            .ok_or_else(|| OutboxError::NotFound(format!("dead letter {id}")))?;

        let mut action = state.dead_letters[pos].action.clone();
        action.retry_count = 0;
        action.next_retry_at = None;

        let mut mutations = Vec::new();
        self.enqueue_locked(&mut state, action, &mut mutations)?;
        state.dead_letters.remove(pos);
        mutations.push(Mutation::DeadLetterRemoved(id));
        self.persist(&mut state, &mutations);
        info!("Requeued dead letter {}", id);
        Ok(id)
    }

    /// Empties the dead-letter list. Returns how many were removed.
    pub async fn clear_dead_letters(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.dead_letters.len();
        if count > 0 {
            state.dead_letters.clear();
            self.persist(&mut state, &[Mutation::DeadLettersCleared]);
        }
        count
    }

    // ── Draining ─────────────────────────────────────────────────

    /// Runs one drain pass if online.
    pub async fn process_queue(&self) -> DrainSummary {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping drain pass");
            return DrainSummary::default();
        }
        let _pass = self.drain_lock.lock().await;
        self.drain_pass().await
    }

    /// Drains until the queue is empty or nothing left is ready.
    pub async fn force_sync(&self) -> OutboxResult<DrainSummary> {
        if !self.connectivity.is_online() {
            return Err(OutboxError::Offline);
        }
        let _pass = self.drain_lock.lock().await;

        let mut total = DrainSummary::default();
        for _ in 0..self.config.sync.max_force_sync_passes {
            if !self.connectivity.is_online() {
                break;
            }
            let pass = self.drain_pass().await;
            total.merge(&pass);
            if pass.attempted == 0 || self.state.lock().await.queue.is_empty() {
                break;
            }
        }
        info!(
            "Forced sync: {} delivered, {} skipped, {} rescheduled, {} abandoned",
            total.delivered, total.skipped, total.rescheduled, total.exhausted
        );
        Ok(total)
    }

    async fn drain_pass(&self) -> DrainSummary {
        let now = self.clock.now();
        let batch = {
            let state = self.state.lock().await;
            state.queue.ready_batch(now, self.config.queue.batch_size)
        };

        let mut summary = DrainSummary::default();
        for action in batch {
            if !self.connectivity.is_online() {
                debug!("Went offline mid-pass, stopping");
                break;
            }
            // Cancelled, or delivered by another writer, since the batch was taken.
            if !self.state.lock().await.queue.contains(&action.id) {
                continue;
            }
            summary.attempted += 1;

            if let Some(key) = &action.replay_key {
                match self.store.is_processed(key) {
                    Ok(true) => {
                        debug!("Action {} already processed ({}), skipping", action.id, key);
                        self.complete(&action, ActionCompletion::Skipped).await;
                        summary.skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        // Without the marker we cannot rule out a duplicate.
                        warn!("Replay check for {} failed, deferring: {}", key, e);
                        continue;
                    }
                }
            }

            match self.dispatcher.dispatch(&action).await {
                Ok(()) => {
                    if let Some(key) = &action.replay_key
                        && let Err(e) = self.store.mark_processed(key, self.clock.now())
                    {
                        warn!("Failed to record replay marker {}: {}", key, e);
                    }
                    self.complete(&action, ActionCompletion::Delivered).await;
                    summary.delivered += 1;
                }
                Err(e) => match self.fail(&action, e).await {
                    FailureOutcome::Rescheduled { .. } => summary.rescheduled += 1,
                    FailureOutcome::Exhausted(_) => summary.exhausted += 1,
                    FailureOutcome::Missing => {}
                },
            }
        }

        self.state.lock().await.last_sync_at = Some(now);
        if summary.attempted > 0 {
            info!(
                "Drain pass: {} attempted, {} delivered, {} skipped, {} rescheduled, {} abandoned",
                summary.attempted,
                summary.delivered,
                summary.skipped,
                summary.rescheduled,
                summary.exhausted
            );
        }
        self.telemetry.emit(
            "drain.completed",
            serde_json::to_value(summary).unwrap_or_default(),
        );
        summary
    }

    async fn complete(&self, action: &DeferredAction, completion: ActionCompletion) {
        let mut state = self.state.lock().await;
        if state.queue.remove(&action.id).is_none() {
            return;
        }
        state.resolve(&action.id, completion);
        self.persist(&mut state, &[Mutation::Removed(action.id)]);
    }

    async fn fail(&self, action: &DeferredAction, err: DispatchError) -> FailureOutcome {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let outcome = state
            .queue
            .record_failure(&action.id, now, &self.config.retry);

        match &outcome {
            FailureOutcome::Rescheduled {
                retry_count,
                next_retry_at,
            } => {
                warn!(
                    "Dispatch of {} failed (attempt {}/{}): {}; retrying at {}",
                    action.id, retry_count, action.max_retries, err, next_retry_at
                );
                if let Some(updated) = state.queue.get(&action.id).cloned() {
                    self.persist(&mut state, &[Mutation::Updated(updated)]);
                }
            }
            FailureOutcome::Exhausted(dropped) => {
                error!(
                    "Action {} ({}) abandoned after {} attempts: {}",
                    dropped.id,
                    dropped.kind(),
                    dropped.retry_count,
                    err
                );
                let letter = DeadLetter {
                    action: dropped.clone(),
                    failed_at: now,
                    last_error: err.to_string(),
                };
                state.dead_letters.push(letter.clone());
                let mut mutations = vec![
                    Mutation::Removed(dropped.id),
                    Mutation::DeadLettered(letter),
                ];
                let max = self.config.queue.max_dead_letters;
                if state.dead_letters.len() > max {
                    let excess = state.dead_letters.len() - max;
                    for old in state.dead_letters.drain(..excess) {
                        mutations.push(Mutation::DeadLetterRemoved(old.action.id));
                    }
                }
                let attempts = dropped.retry_count;
                state.reject(&dropped.id, || OutboxError::RetriesExhausted {
                    id: dropped.id,
                    attempts,
                    last_error: err.to_string(),
                });
                self.persist(&mut state, &mutations);
                self.telemetry.emit(
                    "action.exhausted",
                    json!({ "id": dropped.id.to_string(), "type": dropped.kind().as_str() }),
                );
            }
            FailureOutcome::Missing => {
                debug!("Action {} left the queue while in flight; not retrying", action.id);
            }
        }
        outcome
    }

    // ── Status ───────────────────────────────────────────────────

    /// Current counts for the UI to poll.
    pub async fn status(&self) -> OfflineSyncStatus {
        let state = self.state.lock().await;
        OfflineSyncStatus {
            is_online: self.connectivity.is_online(),
            pending_actions: state.queue.len(),
            failed_actions: state.queue.failed_count() + state.dead_letters.len(),
            dead_letters: state.dead_letters.len(),
            cache_entries: state.cache.len(),
            storage_bytes: state.blob_bytes,
            last_sync_at: state.last_sync_at,
        }
    }

    /// Whether there is anything to drain.
    pub async fn has_pending(&self) -> bool {
        !self.state.lock().await.queue.is_empty()
    }
}
