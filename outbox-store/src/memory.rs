//! In-process state store.

use crate::{CHANGE_CHANNEL_CAPACITY, StateStore, StoreChange, StoreError, StoreResult, StoredBlob};
use outbox_types::Timestamp;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, StoredBlob>,
    markers: HashMap<String, Timestamp>,
}

/// A state store that lives only as long as the process.
///
/// Share one instance (behind an `Arc`) between outboxes to model several
/// tabs writing to the same origin storage.
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
        }
    }

    fn inner(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of recorded replay markers.
    pub fn processed_count(&self) -> usize {
        self.inner().map(|inner| inner.markers.len()).unwrap_or(0)
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: &str) -> StoreResult<Option<StoredBlob>> {
        Ok(self.inner()?.blobs.get(key).cloned())
    }

    fn save(&self, key: &str, data: &str, expected_version: Option<u64>) -> StoreResult<u64> {
        let version = {
            let mut inner = self.inner()?;
            let found = inner.blobs.get(key).map(|b| b.version);
            if found != expected_version {
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                    expected: expected_version,
                    found,
                });
            }
            let version = found.unwrap_or(0) + 1;
            inner.blobs.insert(
                key.to_string(),
                StoredBlob {
                    version,
                    data: data.to_string(),
                },
            );
            version
        };
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            version,
        });
        Ok(version)
    }

    fn mark_processed(&self, replay_key: &str, at: Timestamp) -> StoreResult<()> {
        self.inner()?
            .markers
            .entry(replay_key.to_string())
            .or_insert(at);
        Ok(())
    }

    fn is_processed(&self, replay_key: &str) -> StoreResult<bool> {
        Ok(self.inner()?.markers.contains_key(replay_key))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
