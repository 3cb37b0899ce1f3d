use outbox_sync::{ActionDispatcher, DispatchError, HttpConfig, HttpDispatcher, IDEMPOTENCY_HEADER};
use outbox_types::{
    ActionPayload, AuditLogEntry, CampaignUpdate, ConfigUpdate, DeferredAction, EventId,
    GovernanceEvent, Timestamp,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(server: &MockServer) -> HttpDispatcher {
    HttpDispatcher::new(&HttpConfig {
        base_url: format!("{}/api/v2/", server.uri()),
        timeout_ms: 2_000,
    })
    .unwrap()
}

fn audit_action() -> DeferredAction {
    DeferredAction::new(ActionPayload::AuditLog(AuditLogEntry {
        action: "campaign.paused".into(),
        actor: "user-1".into(),
        resource_type: "campaign".into(),
        resource_id: "c-9".into(),
        details: json!({"reason": "budget"}),
    }))
}

fn governance_action() -> DeferredAction {
    let event = GovernanceEvent {
        id: EventId::new(),
        event_type: "policy.updated".into(),
        resource_type: "policy".into(),
        resource_id: "p-1".into(),
        user_id: "user-1".into(),
        timestamp: Timestamp::from_millis(1_000),
        payload: json!({}),
        context_hash: "ab".repeat(32),
        sequence_number: 4,
    };
    let key = event.replay_key();
    DeferredAction::new(ActionPayload::GovernanceEvent(event)).with_replay_key(key)
}

// ── Routing ─────────────────────────────────────────────────────

#[tokio::test]
async fn audit_entry_posts_to_audit_logs() {
    let server = MockServer::start().await;
    let action = audit_action();

    Mock::given(method("POST"))
        .and(path("/api/v2/audit/logs"))
        .and(header(IDEMPOTENCY_HEADER, action.id.to_string().as_str()))
        .and(body_partial_json(json!({"action": "campaign.paused", "resourceId": "c-9"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    dispatcher(&server).dispatch(&action).await.unwrap();
}

#[tokio::test]
async fn governance_event_uses_replay_key_header() {
    let server = MockServer::start().await;
    let action = governance_action();
    let key = action.replay_key.clone().unwrap();

    Mock::given(method("POST"))
        .and(path("/api/v2/governance/events"))
        .and(header(IDEMPOTENCY_HEADER, key.as_str()))
        .and(body_partial_json(json!({"sequenceNumber": 4})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    dispatcher(&server).dispatch(&action).await.unwrap();
}

#[tokio::test]
async fn config_and_campaign_updates_have_own_endpoints() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/config/updates"))
        .and(header_exists(IDEMPOTENCY_HEADER))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/campaigns/updates"))
        .and(body_partial_json(json!({"campaignId": "c-3"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let d = dispatcher(&server);
    d.dispatch(&DeferredAction::new(ActionPayload::ConfigUpdate(ConfigUpdate {
        config_key: "locale".into(),
        value: json!("de"),
    })))
    .await
    .unwrap();
    d.dispatch(&DeferredAction::new(ActionPayload::CampaignUpdate(
        CampaignUpdate {
            campaign_id: "c-3".into(),
            changes: json!({"budget": 10}),
        },
    )))
    .await
    .unwrap();
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn non_success_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = dispatcher(&server).dispatch(&audit_action()).await.unwrap_err();
    assert_eq!(err, DispatchError::Status(503));
}

#[tokio::test]
async fn unreachable_remote_is_transport_error() {
    let d = HttpDispatcher::new(&HttpConfig {
        base_url: "http://127.0.0.1:9".into(),
        timeout_ms: 500,
    })
    .unwrap();

    let err = d.dispatch(&audit_action()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Transport(_)));
}
