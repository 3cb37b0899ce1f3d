//! Wiring and formatting helpers for the `outboxctl` binary.

use anyhow::{Context, Result};
use outbox_store::SqliteStateStore;
use outbox_sync::{HttpDispatcher, Outbox, OutboxConfig};
use outbox_types::{
    ActionPayload, AuditLogEntry, DeadLetter, DeferredAction, OfflineSyncStatus, Priority,
};
use std::path::Path;
use std::sync::Arc;

/// Reads an [`OutboxConfig`] from a JSON file, or returns the defaults.
pub fn load_config(path: Option<&Path>) -> Result<OutboxConfig> {
    let Some(path) = path else {
        return Ok(OutboxConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Opens the outbox backed by the SQLite file at `db`, dispatching over HTTP.
pub fn open_outbox(db: &Path, config: OutboxConfig) -> Result<Outbox> {
    let store = SqliteStateStore::open(db)
        .with_context(|| format!("Failed to open state database {}", db.display()))?;
    let dispatcher =
        HttpDispatcher::new(&config.http).context("Failed to create HTTP dispatcher")?;
    Outbox::builder(config)
        .store(Arc::new(store))
        .dispatcher(Arc::new(dispatcher))
        .build()
        .context("Failed to restore outbox state")
}

/// Builds an audit-log action with the configured retry budget.
pub fn audit_action(
    config: &OutboxConfig,
    action: &str,
    actor: &str,
    resource_type: &str,
    resource_id: &str,
    priority: Priority,
) -> DeferredAction {
    DeferredAction::new(ActionPayload::AuditLog(AuditLogEntry {
        action: action.to_string(),
        actor: actor.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        details: serde_json::Value::Null,
    }))
    .with_priority(priority)
    .with_max_retries(config.queue.default_max_retries)
}

pub fn format_status(status: &OfflineSyncStatus) -> String {
    let last_sync = status
        .last_sync_at
        .map_or_else(|| "never".to_string(), |t| t.to_string());
    format!(
        "online:        {}\n\
         pending:       {}\n\
         failed:        {}\n\
         dead letters:  {}\n\
         cache entries: {}\n\
         stored bytes:  {}\n\
         last sync:     {}",
        status.is_online,
        status.pending_actions,
        status.failed_actions,
        status.dead_letters,
        status.cache_entries,
        status.storage_bytes,
        last_sync
    )
}

pub fn format_dead_letter(letter: &DeadLetter) -> String {
    format!(
        "{}  {} attempts={} failed_at={}  {}",
        letter.action.id,
        letter.action.kind(),
        letter.action.retry_count,
        letter.failed_at,
        letter.last_error
    )
}
