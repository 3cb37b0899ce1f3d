//! Governance events: the append-only, sequence-numbered audit record.

use crate::{EventId, Timestamp};
use serde::{Deserialize, Serialize};

/// The caller-supplied part of a governance event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceEventDraft {
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub user_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl GovernanceEventDraft {
    pub fn new(
        event_type: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            user_id: user_id.into(),
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A recorded governance event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceEvent {
    pub id: EventId,
    pub event_type: String,
    pub resource_type: String,
    pub resource_id: String,
    pub user_id: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Hex digest over event type, resource type, resource id and user id.
    pub context_hash: String,
    /// Strictly increasing per log.
    pub sequence_number: u64,
}

impl GovernanceEvent {
    /// Replay key of the action that carries this event to the remote log.
    pub fn replay_key(&self) -> String {
        format!("governance_{}", self.id)
    }
}
