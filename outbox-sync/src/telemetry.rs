//! Fire-and-forget telemetry collaborator.
//!
//! The outbox emits a named event with JSON attributes after every
//! significant transition. Implementations must not block.

use std::sync::Mutex;
use tracing::debug;

/// Receives outbox transition events.
pub trait Telemetry: Send + Sync {
    fn emit(&self, name: &str, attributes: serde_json::Value);
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn emit(&self, name: &str, attributes: serde_json::Value) {
        debug!(target: "outbox::telemetry", event = name, %attributes);
    }
}

/// Discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn emit(&self, _name: &str, _attributes: serde_json::Value) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far.
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Names of the recorded events, in order.
    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn emit(&self, name: &str, attributes: serde_json::Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push((name.to_string(), attributes));
        }
    }
}
