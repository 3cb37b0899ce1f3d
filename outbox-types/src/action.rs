//! Deferred actions: side-effecting work captured while offline.
//!
//! The set of action kinds is closed. Each kind carries its own typed payload
//! and the dispatcher matches on [`ActionPayload`] exhaustively, so adding a
//! kind is a compile error everywhere a route is missing.

use crate::{ActionId, GovernanceEvent, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Dispatch priority. Higher priorities drain first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    const fn rank(self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    /// Lowercase name as it appears in persisted state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(crate::Error::UnknownPriority(other.to_string())),
        }
    }
}

/// An audit trail entry destined for the remote audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub action: String,
    pub actor: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// A configuration change made while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub config_key: String,
    pub value: serde_json::Value,
}

/// A partial update to a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignUpdate {
    pub campaign_id: String,
    pub changes: serde_json::Value,
}

/// The typed body of a deferred action.
///
/// Serialized adjacently tagged so a persisted action reads
/// `{"type": "audit_log", "payload": {...}, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ActionPayload {
    GovernanceEvent(GovernanceEvent),
    AuditLog(AuditLogEntry),
    ConfigUpdate(ConfigUpdate),
    CampaignUpdate(CampaignUpdate),
}

impl ActionPayload {
    /// The kind discriminant of this payload.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::GovernanceEvent(_) => ActionKind::GovernanceEvent,
            Self::AuditLog(_) => ActionKind::AuditLog,
            Self::ConfigUpdate(_) => ActionKind::ConfigUpdate,
            Self::CampaignUpdate(_) => ActionKind::CampaignUpdate,
        }
    }
}

/// Payload-free discriminant of [`ActionPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    GovernanceEvent,
    AuditLog,
    ConfigUpdate,
    CampaignUpdate,
}

impl ActionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GovernanceEvent => "governance_event",
            Self::AuditLog => "audit_log",
            Self::ConfigUpdate => "config_update",
            Self::CampaignUpdate => "campaign_update",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending side-effecting operation waiting to be replayed remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredAction {
    /// Unique identifier.
    pub id: ActionId,

    /// Kind tag and typed payload.
    #[serde(flatten)]
    pub payload: ActionPayload,

    pub priority: Priority,

    /// When the action was captured.
    pub created_at: Timestamp,

    /// Failed dispatch attempts so far.
    #[serde(default)]
    pub retry_count: u32,

    /// Attempts allowed before the action is abandoned.
    pub max_retries: u32,

    /// Earliest time of the next attempt. Unset means "now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<Timestamp>,

    /// Actions that must leave the queue before this one may dispatch.
    #[serde(default)]
    pub dependencies: Vec<ActionId>,

    #[serde(default)]
    pub is_idempotent: bool,

    /// Deduplication key checked against the processed-marker set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_key: Option<String>,
}

impl DeferredAction {
    /// Default number of attempts for a new action.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Creates a medium-priority action stamped with the system time.
    #[must_use]
    pub fn new(payload: ActionPayload) -> Self {
        Self {
            id: ActionId::new(),
            payload,
            priority: Priority::default(),
            created_at: Timestamp::now(),
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            dependencies: Vec::new(),
            is_idempotent: false,
            replay_key: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Adds a dependency on another queued action.
    #[must_use]
    pub fn with_dependency(mut self, dep: ActionId) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Sets the replay key and marks the action idempotent.
    #[must_use]
    pub fn with_replay_key(mut self, key: impl Into<String>) -> Self {
        self.replay_key = Some(key.into());
        self.is_idempotent = true;
        self
    }

    /// The kind tag of the payload.
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    /// Whether the retry deadline has passed at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Whether another failure is no longer allowed.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Queue order: priority descending, then capture time ascending.
    pub fn dispatch_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }
}

/// An action abandoned after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub action: DeferredAction,
    pub failed_at: Timestamp,
    /// Display form of the final dispatch error.
    pub last_error: String,
}
