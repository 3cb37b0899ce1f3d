//! Size-bounded cache of remotely sourced values for offline reads.
//!
//! Every entry carries a SHA-256 checksum of its data. Reads recompute it and
//! treat a mismatch as a miss, deleting the entry so the next read does not
//! pay for the same failure.

use crate::config::CacheConfig;
use outbox_types::{CacheEntry, Timestamp};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// Fixed per-entry overhead added to the serialized data length.
const ENTRY_OVERHEAD_BYTES: usize = 96;

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(serde_json::Value),
    Miss,
    /// Past its TTL; removed.
    Expired,
    /// Checksum mismatch; removed.
    Corrupt,
    /// Written under another schema version; removed.
    StaleSchema,
}

/// Result of a cache write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheWrite {
    /// Keys evicted to make room.
    pub evicted: Vec<String>,
}

/// Hex SHA-256 of the canonical JSON encoding of `data`.
pub fn checksum(data: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(data).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

fn estimated_size(entry: &CacheEntry) -> usize {
    let data_len = serde_json::to_string(&entry.data)
        .map(|s| s.len())
        .unwrap_or(0);
    entry.key.len() + data_len + entry.checksum.len() + ENTRY_OVERHEAD_BYTES
}

/// The in-memory cache.
#[derive(Debug, Clone)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    config: CacheConfig,
    bytes: usize,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            bytes: 0,
        }
    }

    /// Rebuilds the cache from persisted entries. Later duplicates win.
    pub fn from_entries(config: CacheConfig, entries: Vec<(String, CacheEntry)>) -> Self {
        let mut cache = Self::new(config);
        for (_, entry) in entries {
            cache.upsert(entry);
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated size of all entries.
    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    /// Peeks at an entry without validating it.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Stores `data` under `key`, evicting the oldest quarter of entries first
    /// if the write would push the cache over its byte budget.
    pub fn insert(
        &mut self,
        key: &str,
        data: serde_json::Value,
        ttl: Option<Duration>,
        now: Timestamp,
    ) -> (CacheEntry, CacheWrite) {
        self.remove(key);

        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let entry = CacheEntry {
            key: key.to_string(),
            checksum: checksum(&data),
            data,
            written_at: now,
            expires_at: now.saturating_add(ttl),
            schema_version: self.config.schema_version,
        };

        let mut write = CacheWrite::default();
        if self.bytes + estimated_size(&entry) > self.config.max_bytes && !self.entries.is_empty() {
            write.evicted = self.evict_oldest_quarter();
        }

        self.upsert(entry.clone());
        (entry, write)
    }

    fn evict_oldest_quarter(&mut self) -> Vec<String> {
        let mut by_age: Vec<(Timestamp, String)> = self
            .entries
            .values()
            .map(|e| (e.written_at, e.key.clone()))
            .collect();
        by_age.sort();

        let count = self.entries.len().div_ceil(4);
        let victims: Vec<String> = by_age.into_iter().take(count).map(|(_, k)| k).collect();
        for key in &victims {
            self.remove(key);
        }
        victims
    }

    /// Inserts or replaces an entry as-is, without checksum or budget checks.
    pub fn upsert(&mut self, entry: CacheEntry) {
        self.bytes += estimated_size(&entry);
        if let Some(old) = self.entries.insert(entry.key.clone(), entry) {
            self.bytes = self.bytes.saturating_sub(estimated_size(&old));
        }
    }

    /// Reads and validates `key`. Invalid entries are removed.
    pub fn lookup(&mut self, key: &str, now: Timestamp) -> CacheLookup {
        let Some(entry) = self.entries.get(key) else {
            return CacheLookup::Miss;
        };

        let verdict = if entry.is_expired(now) {
            CacheLookup::Expired
        } else if entry.schema_version != self.config.schema_version {
            CacheLookup::StaleSchema
        } else if checksum(&entry.data) != entry.checksum {
            CacheLookup::Corrupt
        } else {
            return CacheLookup::Hit(entry.data.clone());
        };

        self.remove(key);
        verdict
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.bytes = self.bytes.saturating_sub(estimated_size(&removed));
        Some(removed)
    }

    /// Removes every entry. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.bytes = 0;
        count
    }

    /// Removes entries past their TTL. Returns their keys.
    pub fn prune_expired(&mut self, now: Timestamp) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired
    }

    /// Entries in key order, for persistence.
    pub fn to_persisted(&self) -> Vec<(String, CacheEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checksum_is_stable_for_equal_values() {
        assert_eq!(checksum(&json!({"a": 1, "b": 2})), checksum(&json!({"b": 2, "a": 1})));
        assert_ne!(checksum(&json!({"a": 1})), checksum(&json!({"a": 2})));
    }

    #[test]
    fn size_accounting_tracks_replacements() {
        let mut cache = CacheStore::new(CacheConfig::default());
        cache.insert("k", json!("short"), None, Timestamp::EPOCH);
        let small = cache.size_bytes();
        cache.insert("k", json!("a much longer value than before"), None, Timestamp::EPOCH);
        assert!(cache.size_bytes() > small);
        cache.remove("k");
        assert_eq!(cache.size_bytes(), 0);
    }
}
