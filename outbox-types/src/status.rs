//! Read-only status view polled by the UI layer.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Snapshot of the outbox's health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSyncStatus {
    pub is_online: bool,
    /// Actions still queued.
    pub pending_actions: usize,
    /// Queued actions that have failed at least once, plus dead letters.
    pub failed_actions: usize,
    pub dead_letters: usize,
    pub cache_entries: usize,
    /// Size of the last persisted state blob.
    pub storage_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<Timestamp>,
}
