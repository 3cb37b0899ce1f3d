use outbox_store::{MemoryStateStore, StateStore, StoreChange, StoreResult, StoredBlob};
use outbox_sync::dispatch::mock::ScriptedDispatcher;
use outbox_sync::{Connectivity, Outbox, OutboxConfig, SyncEvent, SyncOrchestrator};
use outbox_types::{ActionPayload, ConfigUpdate, DeferredAction, Timestamp};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Counts blob loads on top of a shared in-memory store.
struct CountingStore {
    inner: Arc<MemoryStateStore>,
    loads: AtomicUsize,
}

impl CountingStore {
    fn new(inner: Arc<MemoryStateStore>) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl StateStore for CountingStore {
    fn load(&self, key: &str) -> StoreResult<Option<StoredBlob>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(key)
    }

    fn save(&self, key: &str, data: &str, expected_version: Option<u64>) -> StoreResult<u64> {
        self.inner.save(key, data, expected_version)
    }

    fn mark_processed(&self, replay_key: &str, at: Timestamp) -> StoreResult<()> {
        self.inner.mark_processed(replay_key, at)
    }

    fn is_processed(&self, replay_key: &str) -> StoreResult<bool> {
        self.inner.is_processed(replay_key)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }
}

fn config_action(key: &str) -> DeferredAction {
    DeferredAction::new(ActionPayload::ConfigUpdate(ConfigUpdate {
        config_key: key.to_string(),
        value: json!(true),
    }))
}

fn build(
    store: Arc<MemoryStateStore>,
    dispatcher: Arc<ScriptedDispatcher>,
    connectivity: Connectivity,
) -> Arc<Outbox> {
    Arc::new(
        Outbox::builder(OutboxConfig::default())
            .store(store)
            .dispatcher(dispatcher)
            .connectivity(connectivity)
            .build()
            .unwrap(),
    )
}

async fn next_drain(events: &mut broadcast::Receiver<SyncEvent>) -> outbox_sync::DrainSummary {
    loop {
        match events.recv().await.unwrap() {
            SyncEvent::DrainCompleted(summary) => return summary,
            _ => continue,
        }
    }
}

// ── Ticker ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn drains_on_interval_while_online() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let outbox = build(
        Arc::new(MemoryStateStore::new()),
        dispatcher.clone(),
        Connectivity::new(true),
    );
    outbox.queue_action(config_action("a")).await.unwrap();

    let handle = SyncOrchestrator::start(outbox.clone());
    let mut events = handle.subscribe();

    // Nothing before the first period elapses.
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(dispatcher.call_count(), 0);

    let summary = next_drain(&mut events).await;
    assert_eq!(summary.delivered, 1);
    assert!(!outbox.has_pending().await);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ticker_does_not_drain_while_offline() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let outbox = build(
        Arc::new(MemoryStateStore::new()),
        dispatcher.clone(),
        Connectivity::new(false),
    );
    outbox.queue_action(config_action("a")).await.unwrap();

    let handle = SyncOrchestrator::start(outbox.clone());
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(dispatcher.call_count(), 0);
    assert!(outbox.has_pending().await);
    handle.shutdown().await;
}

// ── Connectivity ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_drain() {
    let connectivity = Connectivity::new(false);
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let outbox = build(
        Arc::new(MemoryStateStore::new()),
        dispatcher.clone(),
        connectivity.clone(),
    );
    outbox.queue_action(config_action("a")).await.unwrap();

    let handle = SyncOrchestrator::start(outbox);
    let mut events = handle.subscribe();

    assert!(connectivity.set_online(true));
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::ConnectivityChanged { online: true }
    );
    assert_eq!(next_drain(&mut events).await.delivered, 1);
    assert_eq!(dispatcher.call_count(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn going_offline_is_reported() {
    let connectivity = Connectivity::new(true);
    let outbox = build(
        Arc::new(MemoryStateStore::new()),
        Arc::new(ScriptedDispatcher::new()),
        connectivity.clone(),
    );

    let handle = SyncOrchestrator::start(outbox);
    let mut events = handle.subscribe();

    connectivity.set_online(false);
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::ConnectivityChanged { online: false }
    );
    handle.shutdown().await;
}

// ── Commands ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sync_now_drains_everything() {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let outbox = build(
        Arc::new(MemoryStateStore::new()),
        dispatcher.clone(),
        Connectivity::new(true),
    );
    for i in 0..25 {
        outbox
            .queue_action(config_action(&format!("k{i}")))
            .await
            .unwrap();
    }

    let handle = SyncOrchestrator::start(outbox.clone());
    let mut events = handle.subscribe();
    handle.sync_now().await.unwrap();

    let summary = next_drain(&mut events).await;
    assert_eq!(summary.delivered, 25);
    assert_eq!(dispatcher.call_count(), 25);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_loop() {
    let outbox = build(
        Arc::new(MemoryStateStore::new()),
        Arc::new(ScriptedDispatcher::new()),
        Connectivity::new(true),
    );
    let handle = SyncOrchestrator::start(outbox);
    let mut events = handle.subscribe();

    handle.shutdown().await;
    assert!(matches!(
        events.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));
}

// ── Cross-instance reload ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reloads_when_another_instance_writes() {
    let store = Arc::new(MemoryStateStore::new());
    let offline = Connectivity::new(false);
    let watcher = build(
        store.clone(),
        Arc::new(ScriptedDispatcher::new()),
        offline.clone(),
    );
    let writer = build(store, Arc::new(ScriptedDispatcher::new()), offline);

    let handle = SyncOrchestrator::start(watcher.clone());
    let mut events = handle.subscribe();

    writer.queue_action(config_action("theme")).await.unwrap();

    match events.recv().await.unwrap() {
        SyncEvent::StateReloaded { version } => assert_eq!(version, Some(1)),
        other => panic!("expected reload, got {other:?}"),
    }
    assert_eq!(watcher.pending_actions().await.len(), 1);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn own_saves_do_not_trigger_reload() {
    let shared = Arc::new(MemoryStateStore::new());
    let counting = Arc::new(CountingStore::new(shared.clone()));
    let offline = Connectivity::new(false);
    let watcher = Arc::new(
        Outbox::builder(OutboxConfig::default())
            .store(counting.clone())
            .dispatcher(Arc::new(ScriptedDispatcher::new()))
            .connectivity(offline.clone())
            .build()
            .unwrap(),
    );
    let writer = build(shared, Arc::new(ScriptedDispatcher::new()), offline);
    let loads_after_restore = counting.loads();

    let handle = SyncOrchestrator::start(watcher.clone());
    let mut events = handle.subscribe();

    watcher.queue_action(config_action("local")).await.unwrap();
    writer.queue_action(config_action("remote")).await.unwrap();

    // Only the foreign write reaches the store again.
    match events.recv().await.unwrap() {
        SyncEvent::StateReloaded { version } => assert_eq!(version, Some(2)),
        other => panic!("expected reload, got {other:?}"),
    }
    assert_eq!(counting.loads(), loads_after_restore + 1);
    assert_eq!(watcher.pending_actions().await.len(), 2);
    handle.shutdown().await;
}
