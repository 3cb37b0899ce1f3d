//! Bounded, priority-ordered queue of deferred actions.
//!
//! The queue is kept sorted by `(priority desc, createdAt asc)`. Readiness is
//! evaluated fresh on every drain pass: an action is ready when its retry
//! deadline has passed and none of its dependencies are still queued.

use crate::error::{OutboxError, OutboxResult};
use crate::retry::RetryPolicy;
use outbox_types::{ActionId, DeferredAction, Priority, Timestamp};
use std::cmp::Ordering;
use std::collections::HashSet;

/// What happened to an action after a failed dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Still queued, next attempt scheduled.
    Rescheduled {
        retry_count: u32,
        next_retry_at: Timestamp,
    },
    /// Removed from the queue; no further attempts.
    Exhausted(DeferredAction),
    /// The action had already left the queue (cancelled mid-flight).
    Missing,
}

/// The action queue.
#[derive(Debug, Clone)]
pub struct ActionQueue {
    actions: Vec<DeferredAction>,
    capacity: usize,
}

impl ActionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            actions: Vec::new(),
            capacity,
        }
    }

    /// Rebuilds a queue from persisted actions without capacity checks.
    pub fn from_actions(capacity: usize, actions: Vec<DeferredAction>) -> Self {
        let mut queue = Self::new(capacity);
        for action in actions {
            queue.upsert(action);
        }
        queue
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.actions.iter().any(|a| a.id == *id)
    }

    pub fn get(&self, id: &ActionId) -> Option<&DeferredAction> {
        self.actions.iter().find(|a| a.id == *id)
    }

    /// Actions in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &DeferredAction> {
        self.actions.iter()
    }

    /// Queued actions that have failed at least once.
    pub fn failed_count(&self) -> usize {
        self.actions.iter().filter(|a| a.retry_count > 0).count()
    }

    /// Checks an incoming action against the queue's invariants.
    pub fn validate(&self, action: &DeferredAction) -> OutboxResult<()> {
        if action.max_retries == 0 {
            return Err(OutboxError::InvalidAction(format!(
                "action {} allows no attempts",
                action.id
            )));
        }
        if action.retry_count > action.max_retries {
            return Err(OutboxError::InvalidAction(format!(
                "action {} has retryCount {} above maxRetries {}",
                action.id, action.retry_count, action.max_retries
            )));
        }
        if action.dependencies.contains(&action.id) {
            return Err(OutboxError::InvalidAction(format!(
                "action {} depends on itself",
                action.id
            )));
        }
        if self.contains(&action.id) {
            return Err(OutboxError::InvalidAction(format!(
                "action {} is already queued",
                action.id
            )));
        }
        Ok(())
    }

    /// Inserts an action, evicting the oldest half of low-priority actions if
    /// the queue is full. Returns the evicted actions.
    ///
    /// If eviction would not free a slot the queue is left untouched.
    pub fn enqueue(&mut self, action: DeferredAction) -> OutboxResult<Vec<DeferredAction>> {
        self.validate(&action)?;

        let mut evicted = Vec::new();
        if self.actions.len() >= self.capacity {
            let victims = self.low_priority_victims();
            if self.actions.len() - victims.len() >= self.capacity {
                return Err(OutboxError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            evicted = self.take_all(&victims);
        }

        self.insert_sorted(action);
        Ok(evicted)
    }

    /// The oldest half (rounded up) of the low-priority actions.
    fn low_priority_victims(&self) -> HashSet<ActionId> {
        let mut low: Vec<(Timestamp, ActionId)> = self
            .actions
            .iter()
            .filter(|a| a.priority == Priority::Low)
            .map(|a| (a.created_at, a.id))
            .collect();
        low.sort();

        let count = low.len().div_ceil(2);
        low.into_iter().take(count).map(|(_, id)| id).collect()
    }

    fn take_all(&mut self, victims: &HashSet<ActionId>) -> Vec<DeferredAction> {
        if victims.is_empty() {
            return Vec::new();
        }
        let (evicted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.actions)
            .into_iter()
            .partition(|a| victims.contains(&a.id));
        self.actions = kept;
        evicted
    }

    fn insert_sorted(&mut self, action: DeferredAction) {
        // After every action that sorts before or level with it.
        let pos = self
            .actions
            .partition_point(|a| a.dispatch_order(&action) != Ordering::Greater);
        self.actions.insert(pos, action);
    }

    /// Replaces an action with the same id, or inserts it.
    pub fn upsert(&mut self, action: DeferredAction) {
        self.remove(&action.id);
        self.insert_sorted(action);
    }

    /// Replaces an action only if it is still queued.
    pub fn replace(&mut self, action: DeferredAction) -> bool {
        match self.actions.iter_mut().find(|a| a.id == action.id) {
            Some(slot) => {
                *slot = action;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &ActionId) -> Option<DeferredAction> {
        let pos = self.actions.iter().position(|a| a.id == *id)?;
        Some(self.actions.remove(pos))
    }

    /// Empties the queue.
    pub fn drain_all(&mut self) -> Vec<DeferredAction> {
        std::mem::take(&mut self.actions)
    }

    /// Whether `action` may be dispatched at `now`.
    pub fn is_ready(&self, action: &DeferredAction, now: Timestamp) -> bool {
        action.is_due(now) && !action.dependencies.iter().any(|dep| self.contains(dep))
    }

    /// Up to `limit` ready actions, in dispatch order.
    pub fn ready_batch(&self, now: Timestamp, limit: usize) -> Vec<DeferredAction> {
        self.actions
            .iter()
            .filter(|a| self.is_ready(a, now))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Records a failed attempt: bumps the retry count and either schedules
    /// the next attempt or removes the action for good.
    pub fn record_failure(
        &mut self,
        id: &ActionId,
        now: Timestamp,
        policy: &RetryPolicy,
    ) -> FailureOutcome {
        let Some(action) = self.actions.iter_mut().find(|a| a.id == *id) else {
            return FailureOutcome::Missing;
        };

        action.retry_count = action.retry_count.saturating_add(1);
        if action.is_exhausted() {
            return match self.remove(id) {
                Some(action) => FailureOutcome::Exhausted(action),
                None => FailureOutcome::Missing,
            };
        }

        let next_retry_at = policy.next_attempt_at(now, action.retry_count);
        action.next_retry_at = Some(next_retry_at);
        FailureOutcome::Rescheduled {
            retry_count: action.retry_count,
            next_retry_at,
        }
    }
}
