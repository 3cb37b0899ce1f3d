use outbox_types::{
    ActionId, ActionKind, ActionPayload, AuditLogEntry, ConfigUpdate, DeferredAction,
    GovernanceEvent, EventId, Priority, Timestamp,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::cmp::Ordering;

fn audit() -> ActionPayload {
    ActionPayload::AuditLog(AuditLogEntry {
        action: "campaign.start".into(),
        actor: "user-1".into(),
        resource_type: "campaign".into(),
        resource_id: "c-9".into(),
        details: json!({"reason": "manual"}),
    })
}

// ── Priority ─────────────────────────────────────────────────────

#[test]
fn priority_orders_critical_highest() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Medium);
    assert!(Priority::Medium > Priority::Low);
}

#[test]
fn priority_parses_case_insensitively() {
    assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    assert!("urgent".parse::<Priority>().is_err());
}

#[test]
fn priority_default_is_medium() {
    assert_eq!(Priority::default(), Priority::Medium);
}

// ── DeferredAction ───────────────────────────────────────────────

#[test]
fn new_action_defaults() {
    let action = DeferredAction::new(audit());
    assert_eq!(action.priority, Priority::Medium);
    assert_eq!(action.retry_count, 0);
    assert_eq!(action.max_retries, DeferredAction::DEFAULT_MAX_RETRIES);
    assert!(action.next_retry_at.is_none());
    assert!(!action.is_idempotent);
    assert_eq!(action.kind(), ActionKind::AuditLog);
}

#[test]
fn replay_key_marks_idempotent() {
    let action = DeferredAction::new(audit()).with_replay_key("k-1");
    assert!(action.is_idempotent);
    assert_eq!(action.replay_key.as_deref(), Some("k-1"));
}

#[test]
fn is_due_respects_next_retry_at() {
    let mut action = DeferredAction::new(audit());
    assert!(action.is_due(Timestamp::EPOCH));

    action.next_retry_at = Some(Timestamp::from_millis(500));
    assert!(!action.is_due(Timestamp::from_millis(499)));
    assert!(action.is_due(Timestamp::from_millis(500)));
}

#[test]
fn is_exhausted_at_max_retries() {
    let mut action = DeferredAction::new(audit()).with_max_retries(2);
    action.retry_count = 1;
    assert!(!action.is_exhausted());
    action.retry_count = 2;
    assert!(action.is_exhausted());
}

#[test]
fn dispatch_order_priority_then_age() {
    let old_low = DeferredAction::new(audit())
        .with_priority(Priority::Low)
        .with_created_at(Timestamp::from_millis(0));
    let new_critical = DeferredAction::new(audit())
        .with_priority(Priority::Critical)
        .with_created_at(Timestamp::from_millis(10));
    let newer_critical = DeferredAction::new(audit())
        .with_priority(Priority::Critical)
        .with_created_at(Timestamp::from_millis(20));

    assert_eq!(new_critical.dispatch_order(&old_low), Ordering::Less);
    assert_eq!(new_critical.dispatch_order(&newer_critical), Ordering::Less);
}

#[test]
fn serialized_shape_has_type_and_payload() {
    let dep = ActionId::new();
    let action = DeferredAction::new(ActionPayload::ConfigUpdate(ConfigUpdate {
        config_key: "theme".into(),
        value: json!("dark"),
    }))
    .with_dependency(dep);

    let value = serde_json::to_value(&action).unwrap();
    assert_eq!(value["type"], "config_update");
    assert_eq!(value["payload"]["configKey"], "theme");
    assert_eq!(value["retryCount"], 0);
    assert_eq!(value["dependencies"][0], dep.to_string());
    assert!(value.get("replayKey").is_none());

    let back: DeferredAction = serde_json::from_value(value).unwrap();
    assert_eq!(back, action);
}

#[test]
fn governance_replay_key_uses_event_id() {
    let event = GovernanceEvent {
        id: EventId::new(),
        event_type: "policy.changed".into(),
        resource_type: "persona".into(),
        resource_id: "p-1".into(),
        user_id: "u-1".into(),
        timestamp: Timestamp::from_millis(1),
        payload: json!({}),
        context_hash: String::new(),
        sequence_number: 1,
    };
    assert_eq!(event.replay_key(), format!("governance_{}", event.id));
}

// ── Properties ───────────────────────────────────────────────────

fn priority_strategy() -> impl proptest::strategy::Strategy<Value = Priority> {
    proptest::sample::select(vec![
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ])
}

proptest::proptest! {
    #[test]
    fn dispatch_order_is_antisymmetric(
        (pa, pb) in (priority_strategy(), priority_strategy()),
        (ta, tb) in (0u64..1_000, 0u64..1_000),
    ) {
        let a = DeferredAction::new(audit())
            .with_priority(pa)
            .with_created_at(Timestamp::from_millis(ta));
        let b = DeferredAction::new(audit())
            .with_priority(pb)
            .with_created_at(Timestamp::from_millis(tb));

        proptest::prop_assert_eq!(a.dispatch_order(&b), b.dispatch_order(&a).reverse());
        if pa > pb {
            proptest::prop_assert_eq!(a.dispatch_order(&b), Ordering::Less);
        }
    }

    #[test]
    fn priority_round_trips_through_str(p in priority_strategy()) {
        proptest::prop_assert_eq!(p.as_str().parse::<Priority>().unwrap(), p);
    }
}
