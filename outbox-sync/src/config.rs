//! Outbox configuration.
//!
//! Every section falls back to its defaults field by field, so a config file
//! only needs to name what it overrides.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store key the state blob is written under.
pub const DEFAULT_STATE_KEY: &str = "offline_resilience_state";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub state_key: String,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub retry: RetryPolicy,
    pub sync: SyncConfig,
    pub governance: GovernanceConfig,
    pub http: HttpConfig,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            state_key: DEFAULT_STATE_KEY.to_string(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            sync: SyncConfig::default(),
            governance: GovernanceConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Cache store limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget for the estimated size of all entries.
    pub max_bytes: usize,
    /// TTL used when a write does not name one (ms).
    pub default_ttl_ms: u64,
    /// Entries written under another version read as misses.
    pub schema_version: u32,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024, // 5 MiB
            default_ttl_ms: 24 * 60 * 60 * 1000,
            schema_version: 1,
        }
    }
}

/// Action queue limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued actions.
    pub max_actions: usize,
    /// Maximum actions dispatched per drain pass.
    pub batch_size: usize,
    /// Retries granted to actions built by the outbox itself.
    pub default_max_retries: u32,
    /// Dead letters kept before the oldest is dropped.
    pub max_dead_letters: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_actions: 1000,
            batch_size: 10,
            default_max_retries: 3,
            max_dead_letters: 500,
        }
    }
}

/// Sync loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the background drain (ms).
    pub flush_interval_ms: u64,
    /// Upper bound on drain passes in one forced sync.
    pub max_force_sync_passes: usize,
}

impl SyncConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 30_000,
            max_force_sync_passes: 50,
        }
    }
}

/// Governance log limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Newest events kept in the log.
    pub max_events: usize,
    /// Retries granted to the action carrying each event.
    pub max_retries: u32,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_events: 1000,
            max_retries: 5,
        }
    }
}

/// Remote endpoint for the HTTP dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// API root, e.g. `https://api.example.com/api/v2`.
    pub base_url: String,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v2".to_string(),
            timeout_ms: 30_000,
        }
    }
}
