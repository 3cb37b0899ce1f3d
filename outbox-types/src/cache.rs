//! Cached values kept for offline reads.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// A cached value together with its integrity and expiry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub data: serde_json::Value,
    pub written_at: Timestamp,
    pub expires_at: Timestamp,
    pub schema_version: u32,
    /// Hex SHA-256 of the serialized `data`.
    pub checksum: String,
}

impl CacheEntry {
    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}
