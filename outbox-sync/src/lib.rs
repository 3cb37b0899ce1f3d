//! Offline-resilient outbox.
//!
//! Lets a client keep working while disconnected: reads are served from a
//! checksummed TTL cache, writes are queued as deferred actions and
//! dispatched to the remote once connectivity returns, and governance events
//! are recorded locally with replay keys so a restart never replays an event
//! the remote already confirmed.
//!
//! # Architecture
//!
//! - **Cache**: keyed JSON values with TTL, checksum and a byte budget
//! - **Queue**: bounded priority queue with retry backoff and dependency gating
//! - **Governance**: sequenced event log, each event queued for replay
//! - **Outbox**: owns all of the above and persists it as one versioned blob
//! - **Orchestrator**: drains on a timer, on reconnect and on demand
//!
//! # Example
//!
//! ```
//! use outbox_sync::dispatch::mock::ScriptedDispatcher;
//! use outbox_sync::{Outbox, OutboxConfig};
//! use std::sync::Arc;
//!
//! let outbox = Outbox::builder(OutboxConfig::default())
//!     .dispatcher(Arc::new(ScriptedDispatcher::new()))
//!     .build()
//!     .unwrap();
//! assert_eq!(outbox.config().queue.batch_size, 10);
//! ```

mod cache;
mod config;
mod connectivity;
pub mod dispatch;
mod error;
mod governance;
mod orchestrator;
mod outbox;
mod queue;
mod retry;
pub mod telemetry;

pub use cache::{CacheLookup, CacheStore, CacheWrite, checksum};
pub use config::{
    CacheConfig, DEFAULT_STATE_KEY, GovernanceConfig, HttpConfig, OutboxConfig, QueueConfig,
    SyncConfig,
};
pub use connectivity::Connectivity;
pub use dispatch::{ActionDispatcher, HttpDispatcher, IDEMPOTENCY_HEADER};
pub use error::{DispatchError, OutboxError, OutboxResult};
pub use governance::{GovernanceLog, context_hash, governance_action};
pub use orchestrator::{OrchestratorHandle, SyncCommand, SyncEvent, SyncOrchestrator};
pub use outbox::{ActionCompletion, ActionReceipt, DrainSummary, Outbox, OutboxBuilder};
pub use queue::{ActionQueue, FailureOutcome};
pub use retry::RetryPolicy;
pub use telemetry::{NoopTelemetry, Telemetry, TracingTelemetry};
