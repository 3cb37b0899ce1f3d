//! Append-only governance log.
//!
//! Each recorded event gets the next sequence number and a context hash, and
//! is paired with a high-priority idempotent action that replays it to the
//! remote governance endpoint.

use outbox_types::{
    ActionPayload, DeferredAction, EventId, GovernanceEvent, GovernanceEventDraft, Priority,
    Timestamp,
};
use sha2::{Digest, Sha256};

/// Hex SHA-256 over `eventType:resourceType:resourceId:userId`.
pub fn context_hash(
    event_type: &str,
    resource_type: &str,
    resource_id: &str,
    user_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in [event_type, resource_type, resource_id, user_id]
        .into_iter()
        .enumerate()
    {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Builds the replay action for a recorded event.
pub fn governance_action(event: &GovernanceEvent, max_retries: u32) -> DeferredAction {
    DeferredAction::new(ActionPayload::GovernanceEvent(event.clone()))
        .with_priority(Priority::High)
        .with_created_at(event.timestamp)
        .with_max_retries(max_retries)
        .with_replay_key(event.replay_key())
}

/// The in-memory governance log.
#[derive(Debug, Clone)]
pub struct GovernanceLog {
    events: Vec<GovernanceEvent>,
    sequence: u64,
    max_events: usize,
}

impl GovernanceLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            sequence: 0,
            max_events,
        }
    }

    /// Rebuilds the log from persisted events and counter.
    pub fn restore(max_events: usize, events: Vec<GovernanceEvent>, sequence: u64) -> Self {
        let sequence = events
            .iter()
            .map(|e| e.sequence_number)
            .fold(sequence, u64::max);
        let mut log = Self {
            events,
            sequence,
            max_events,
        };
        log.trim();
        log
    }

    /// Last assigned sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn events(&self) -> &[GovernanceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Appends a new event stamped at `now`.
    pub fn record(&mut self, draft: GovernanceEventDraft, now: Timestamp) -> GovernanceEvent {
        self.sequence += 1;
        let event = GovernanceEvent {
            id: EventId::new(),
            context_hash: context_hash(
                &draft.event_type,
                &draft.resource_type,
                &draft.resource_id,
                &draft.user_id,
            ),
            event_type: draft.event_type,
            resource_type: draft.resource_type,
            resource_id: draft.resource_id,
            user_id: draft.user_id,
            timestamp: now,
            payload: draft.payload,
            sequence_number: self.sequence,
        };
        self.events.push(event.clone());
        self.trim();
        event
    }

    /// Re-appends an event recorded before a reload, unless already present.
    pub fn append_existing(&mut self, event: GovernanceEvent) {
        if self.events.iter().any(|e| e.id == event.id) {
            return;
        }
        self.sequence = self.sequence.max(event.sequence_number);
        self.events.push(event);
        self.trim();
    }

    fn trim(&mut self) {
        if self.events.len() > self.max_events {
            let excess = self.events.len() - self.max_events;
            self.events.drain(..excess);
        }
    }
}
