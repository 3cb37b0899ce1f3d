use outbox_store::{MemoryStateStore, SqliteStateStore, StateStore, StoreError};
use outbox_types::Timestamp;

const KEY: &str = "offline_resilience_state";

fn backends() -> Vec<(&'static str, Box<dyn StateStore>)> {
    vec![
        ("memory", Box::new(MemoryStateStore::new())),
        ("sqlite", Box::new(SqliteStateStore::open_in_memory().unwrap())),
    ]
}

// ── Versioned blobs ──────────────────────────────────────────────

#[test]
fn load_missing_key_is_none() {
    for (name, store) in backends() {
        assert!(store.load(KEY).unwrap().is_none(), "{name}");
    }
}

#[test]
fn first_save_expects_no_version() {
    for (name, store) in backends() {
        let version = store.save(KEY, "{}", None).unwrap();
        assert_eq!(version, 1, "{name}");

        let blob = store.load(KEY).unwrap().unwrap();
        assert_eq!(blob.version, 1, "{name}");
        assert_eq!(blob.data, "{}", "{name}");
    }
}

#[test]
fn save_increments_version() {
    for (name, store) in backends() {
        let v1 = store.save(KEY, "a", None).unwrap();
        let v2 = store.save(KEY, "b", Some(v1)).unwrap();
        assert_eq!(v2, 2, "{name}");
        assert_eq!(store.load(KEY).unwrap().unwrap().data, "b", "{name}");
    }
}

#[test]
fn stale_save_is_rejected() {
    for (name, store) in backends() {
        store.save(KEY, "a", None).unwrap();
        store.save(KEY, "b", Some(1)).unwrap();

        let err = store.save(KEY, "stale", Some(1)).unwrap_err();
        assert!(err.is_conflict(), "{name}");
        match err {
            StoreError::VersionConflict { expected, found, .. } => {
                assert_eq!(expected, Some(1));
                assert_eq!(found, Some(2));
            }
            other => panic!("{name}: unexpected error {other}"),
        }
        assert_eq!(store.load(KEY).unwrap().unwrap().data, "b", "{name}");
    }
}

#[test]
fn create_when_blob_exists_is_rejected() {
    for (name, store) in backends() {
        store.save(KEY, "a", None).unwrap();
        assert!(store.save(KEY, "b", None).unwrap_err().is_conflict(), "{name}");
    }
}

#[test]
fn keys_are_independent() {
    for (name, store) in backends() {
        store.save("one", "1", None).unwrap();
        store.save("two", "2", None).unwrap();
        assert_eq!(store.load("one").unwrap().unwrap().data, "1", "{name}");
        assert_eq!(store.load("two").unwrap().unwrap().version, 1, "{name}");
    }
}

// ── Replay markers ───────────────────────────────────────────────

#[test]
fn processed_markers_roundtrip() {
    for (name, store) in backends() {
        assert!(!store.is_processed("governance_x").unwrap(), "{name}");
        store
            .mark_processed("governance_x", Timestamp::from_millis(5))
            .unwrap();
        assert!(store.is_processed("governance_x").unwrap(), "{name}");
        assert!(!store.is_processed("governance_y").unwrap(), "{name}");
    }
}

#[test]
fn marking_twice_is_harmless() {
    let store = SqliteStateStore::open_in_memory().unwrap();
    store.mark_processed("k", Timestamp::from_millis(1)).unwrap();
    store.mark_processed("k", Timestamp::from_millis(2)).unwrap();
    assert_eq!(store.processed_count().unwrap(), 1);
}

// ── Notifications ────────────────────────────────────────────────

#[tokio::test]
async fn save_notifies_subscribers() {
    for (name, store) in backends() {
        let mut rx = store.subscribe();
        store.save(KEY, "x", None).unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.key, KEY, "{name}");
        assert_eq!(change.version, 1, "{name}");
    }
}

#[tokio::test]
async fn rejected_save_does_not_notify() {
    let store = MemoryStateStore::new();
    store.save(KEY, "x", None).unwrap();
    let mut rx = store.subscribe();
    let _ = store.save(KEY, "y", Some(7));
    assert!(rx.try_recv().is_err());
}

// ── File persistence ─────────────────────────────────────────────

#[test]
fn sqlite_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox.db");

    {
        let store = SqliteStateStore::open(&path).unwrap();
        store.save(KEY, "persisted", None).unwrap();
        store.mark_processed("k", Timestamp::from_millis(1)).unwrap();
    }

    let store = SqliteStateStore::open(&path).unwrap();
    let blob = store.load(KEY).unwrap().unwrap();
    assert_eq!(blob.data, "persisted");
    assert_eq!(blob.version, 1);
    assert!(store.is_processed("k").unwrap());
}
