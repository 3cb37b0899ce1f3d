//! Core type definitions for the offline outbox.
//!
//! This crate defines the plain data shared by every layer:
//! - Action and event identifiers (UUID v7)
//! - Millisecond timestamps and the injectable [`Clock`]
//! - Deferred actions with their closed set of typed payloads
//! - Governance events, cache entries and the derived sync status view
//!
//! Nothing here performs I/O. Queue policy, persistence and dispatch live in
//! `outbox-store` and `outbox-sync`.

mod action;
mod cache;
mod governance;
mod ids;
mod status;
mod timestamp;

pub use action::{
    ActionKind, ActionPayload, AuditLogEntry, CampaignUpdate, ConfigUpdate, DeadLetter,
    DeferredAction, Priority,
};
pub use cache::CacheEntry;
pub use governance::{GovernanceEvent, GovernanceEventDraft};
pub use ids::{ActionId, EventId};
pub use status::OfflineSyncStatus;
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown priority: {0}")]
    UnknownPriority(String),
}
