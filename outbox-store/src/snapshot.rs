//! The persisted state blob and its load path.

use crate::{StateStore, StoreResult};
use outbox_types::{CacheEntry, DeadLetter, DeferredAction, GovernanceEvent, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Everything the outbox needs to survive a restart.
///
/// Serialized as
/// `{cache: [[key, entry], ...], actionQueue, governanceLog, sequenceCounter, lastPersisted, deadLetters}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub cache: Vec<(String, CacheEntry)>,
    pub action_queue: Vec<DeferredAction>,
    pub governance_log: Vec<GovernanceEvent>,
    pub sequence_counter: u64,
    pub last_persisted: Timestamp,
    #[serde(default)]
    pub dead_letters: Vec<DeadLetter>,
}

impl PersistedState {
    /// Serializes the state to its JSON blob.
    pub fn encode(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a JSON blob.
    pub fn decode(data: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// Drops cache entries past their expiry. Returns how many were removed.
    pub fn prune_expired(&mut self, now: Timestamp) -> usize {
        let before = self.cache.len();
        self.cache.retain(|(_, entry)| !entry.is_expired(now));
        before - self.cache.len()
    }

    /// Repairs invariants a hand-edited or foreign blob may violate:
    /// duplicate action ids (first wins) and `retryCount > maxRetries`.
    /// Returns the number of actions dropped.
    pub fn sanitize(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.action_queue.len();
        self.action_queue.retain(|action| seen.insert(action.id));
        for action in &mut self.action_queue {
            action.retry_count = action.retry_count.min(action.max_retries);
        }
        self.sequence_counter = self
            .governance_log
            .iter()
            .map(|e| e.sequence_number)
            .fold(self.sequence_counter, u64::max);
        before - self.action_queue.len()
    }
}

/// Result of [`load_state`].
#[derive(Debug, Clone, Default)]
pub struct LoadedState {
    pub state: PersistedState,
    /// Version of the blob that was read, `None` if the key was empty.
    pub version: Option<u64>,
    /// Size of the blob that was read.
    pub bytes: usize,
    /// True if the blob existed but could not be parsed.
    pub reset: bool,
}

/// Loads, validates and prunes the state under `key`.
///
/// An unreadable blob is not an error: the state resets to empty and keeps
/// the stored version so the next save replaces the bad blob.
pub fn load_state(store: &dyn StateStore, key: &str, now: Timestamp) -> StoreResult<LoadedState> {
    let Some(blob) = store.load(key)? else {
        debug!("No persisted state under {}", key);
        return Ok(LoadedState::default());
    };

    let mut loaded = LoadedState {
        version: Some(blob.version),
        bytes: blob.data.len(),
        ..Default::default()
    };

    match PersistedState::decode(&blob.data) {
        Ok(mut state) => {
            let dropped = state.sanitize();
            if dropped > 0 {
                warn!("Dropped {} duplicate actions from persisted state", dropped);
            }
            let expired = state.prune_expired(now);
            debug!(
                "Loaded state v{}: {} actions, {} cache entries ({} expired)",
                blob.version,
                state.action_queue.len(),
                state.cache.len(),
                expired
            );
            loaded.state = state;
        }
        Err(e) => {
            warn!("Persisted state under {} is unreadable, resetting: {}", key, e);
            loaded.reset = true;
        }
    }

    Ok(loaded)
}
