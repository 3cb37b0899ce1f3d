//! Durable persistence for the offline outbox.
//!
//! The outbox keeps its whole state (cache, queue, governance log, counters)
//! in one JSON blob under a single key. Every write is a compare-and-swap on
//! the blob's version, so two writers sharing a store cannot silently
//! overwrite each other: the loser gets [`StoreError::VersionConflict`] and is
//! expected to reload and re-apply its change.
//!
//! Replay markers ("this replay key was confirmed by the remote") are stored
//! separately from the blob so they can be written ahead of the blob that
//! removes the corresponding action.
//!
//! # Backends
//!
//! - [`SqliteStateStore`]: SQLite file (or in-memory database)
//! - [`MemoryStateStore`]: process-local maps, for tests and ephemeral hosts

mod error;
mod memory;
mod snapshot;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStateStore;
pub use snapshot::{LoadedState, PersistedState, load_state};
pub use sqlite::SqliteStateStore;

use outbox_types::Timestamp;
use tokio::sync::broadcast;

/// Capacity of the change-notification channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A versioned blob as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Incremented on every successful save; starts at 1.
    pub version: u64,
    pub data: String,
}

/// Notification that a key was rewritten.
///
/// Carries only the new version; receivers reload the blob themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub version: u64,
}

/// A durable key/value store for state blobs and replay markers.
pub trait StateStore: Send + Sync {
    /// Reads the current blob under `key`.
    fn load(&self, key: &str) -> StoreResult<Option<StoredBlob>>;

    /// Writes `data` under `key` if the stored version still equals
    /// `expected_version` (`None` meaning "no blob yet"). Returns the new version.
    fn save(&self, key: &str, data: &str, expected_version: Option<u64>) -> StoreResult<u64>;

    /// Records that the action carrying `replay_key` was executed remotely.
    fn mark_processed(&self, replay_key: &str, at: Timestamp) -> StoreResult<()>;

    /// Whether `replay_key` was previously marked processed.
    fn is_processed(&self, replay_key: &str) -> StoreResult<bool>;

    /// Subscribes to change notifications for every key in this store.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}
