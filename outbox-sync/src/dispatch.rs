//! Remote dispatch collaborator.
//!
//! The outbox hands each ready action to an [`ActionDispatcher`]. Any error is
//! a retryable failure; the outbox never inspects response bodies.

use crate::config::HttpConfig;
use crate::error::DispatchError;
use async_trait::async_trait;
use outbox_types::{ActionPayload, DeferredAction};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Header carrying the action's deduplication key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Executes deferred actions against the remote system.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Performs the action. `Ok` means the remote accepted it.
    async fn dispatch(&self, action: &DeferredAction) -> Result<(), DispatchError>;
}

/// Dispatches actions as JSON `POST`s to per-kind endpoints.
pub struct HttpDispatcher {
    client: Client,
    base_url: String,
}

impl HttpDispatcher {
    /// Creates a dispatcher for the configured API root.
    pub fn new(config: &HttpConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Endpoint path and JSON body for a payload.
    fn route(payload: &ActionPayload) -> Result<(&'static str, serde_json::Value), DispatchError> {
        let encoded = match payload {
            ActionPayload::GovernanceEvent(event) => ("/governance/events", serde_json::to_value(event)),
            ActionPayload::AuditLog(entry) => ("/audit/logs", serde_json::to_value(entry)),
            ActionPayload::ConfigUpdate(update) => ("/config/updates", serde_json::to_value(update)),
            ActionPayload::CampaignUpdate(update) => {
                ("/campaigns/updates", serde_json::to_value(update))
            }
        };
        let (path, body) = encoded;
        Ok((path, body.map_err(|e| DispatchError::Encode(e.to_string()))?))
    }
}

#[async_trait]
impl ActionDispatcher for HttpDispatcher {
    async fn dispatch(&self, action: &DeferredAction) -> Result<(), DispatchError> {
        let (path, body) = Self::route(&action.payload)?;
        let url = format!("{}{}", self.base_url, path);
        let idempotency_key = action
            .replay_key
            .clone()
            .unwrap_or_else(|| action.id.to_string());

        let resp = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        debug!("POST {} for action {} -> {}", url, action.id, status);
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::Status(status.as_u16()))
        }
    }
}

/// A scripted dispatcher for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use tokio::sync::Notify;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replays queued results, then falls back to a default result.
    /// Records every action it was asked to dispatch.
    #[derive(Default)]
    pub struct ScriptedDispatcher {
        script: Mutex<VecDeque<Result<(), DispatchError>>>,
        fallback: Mutex<Option<DispatchError>>,
        calls: Mutex<Vec<DeferredAction>>,
        gate: Option<Arc<Notify>>,
        started: Arc<Notify>,
    }

    impl ScriptedDispatcher {
        /// A dispatcher where every call succeeds.
        pub fn new() -> Self {
            Self::default()
        }

        /// A dispatcher where every call fails with `error`.
        pub fn failing(error: DispatchError) -> Self {
            let dispatcher = Self::default();
            dispatcher.set_fallback(Some(error));
            dispatcher
        }

        /// Each dispatch waits for a permit on `gate` before returning.
        pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        /// Notified whenever a dispatch begins.
        pub fn started(&self) -> Arc<Notify> {
            self.started.clone()
        }

        /// Queues the result of the next call.
        pub fn push_result(&self, result: Result<(), DispatchError>) {
            lock(&self.script).push_back(result);
        }

        /// Sets the result used once the script runs out (`None` = success).
        pub fn set_fallback(&self, error: Option<DispatchError>) {
            *lock(&self.fallback) = error;
        }

        /// Actions dispatched so far, in call order.
        pub fn calls(&self) -> Vec<DeferredAction> {
            lock(&self.calls).clone()
        }

        pub fn call_count(&self) -> usize {
            lock(&self.calls).len()
        }
    }

    #[async_trait]
    impl ActionDispatcher for ScriptedDispatcher {
        async fn dispatch(&self, action: &DeferredAction) -> Result<(), DispatchError> {
            lock(&self.calls).push(action.clone());
            self.started.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let scripted = lock(&self.script).pop_front();
            match scripted {
                Some(result) => result,
                None => match lock(&self.fallback).clone() {
                    Some(error) => Err(error),
                    None => Ok(()),
                },
            }
        }
    }
}
