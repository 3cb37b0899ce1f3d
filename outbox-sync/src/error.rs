//! Error types for the outbox.

use outbox_store::StoreError;
use outbox_types::ActionId;
use thiserror::Error;

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors surfaced to callers of the outbox.
///
/// Dispatch failures never appear here directly: they are retried on the
/// background drain pass and only surface as [`OutboxError::RetriesExhausted`]
/// through an action receipt.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The queue is full and no low-priority action could be evicted.
    #[error("action queue is full ({capacity} actions)")]
    CapacityExceeded { capacity: usize },

    /// The action violates a queue invariant.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// The operation needs connectivity.
    #[error("offline")]
    Offline,

    /// The action was cancelled or evicted before it completed.
    #[error("action {0} was cancelled")]
    Cancelled(ActionId),

    /// Another outbox instance sharing the store removed the action.
    #[error("action {0} was removed by another writer")]
    RemovedElsewhere(ActionId),

    /// The action was abandoned after its final failed attempt.
    #[error("action {id} abandoned after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        id: ActionId,
        attempts: u32,
        last_error: String,
    },

    /// Not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

/// A failed remote dispatch. Every variant is retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The remote answered with a non-2xx status.
    #[error("remote returned HTTP {0}")]
    Status(u16),

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => DispatchError::Status(status.as_u16()),
            None => DispatchError::Transport(e.to_string()),
        }
    }
}
