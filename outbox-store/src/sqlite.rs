//! SQLite-backed state store.

use crate::{CHANGE_CHANNEL_CAPACITY, StateStore, StoreChange, StoreError, StoreResult, StoredBlob};
use outbox_types::Timestamp;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// Persistent state store backed by SQLite.
///
/// Change notifications are delivered to subscribers of this instance only;
/// a second process opening the same file does not see them.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStateStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS state_blobs (
                key TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed_markers (
                replay_key TEXT PRIMARY KEY,
                processed_at INTEGER NOT NULL
            );
            ",
        )?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of recorded replay markers.
    pub fn processed_count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM processed_markers", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl StateStore for SqliteStateStore {
    fn load(&self, key: &str) -> StoreResult<Option<StoredBlob>> {
        let conn = self.conn()?;
        let blob = conn
            .query_row(
                "SELECT version, data FROM state_blobs WHERE key = ?1",
                params![key],
                |row| {
                    let version: i64 = row.get(0)?;
                    Ok(StoredBlob {
                        version: version as u64,
                        data: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(blob)
    }

    fn save(&self, key: &str, data: &str, expected_version: Option<u64>) -> StoreResult<u64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let found: Option<u64> = tx
            .query_row(
                "SELECT version FROM state_blobs WHERE key = ?1",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|v| v as u64);

        if found != expected_version {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                found,
            });
        }

        let version = found.unwrap_or(0) + 1;
        tx.execute(
            "INSERT OR REPLACE INTO state_blobs (key, version, data) VALUES (?1, ?2, ?3)",
            params![key, version as i64, data],
        )?;
        tx.commit()?;
        drop(conn);

        debug!("Saved {} v{} ({} bytes)", key, version, data.len());
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            version,
        });
        Ok(version)
    }

    fn mark_processed(&self, replay_key: &str, at: Timestamp) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO processed_markers (replay_key, processed_at) VALUES (?1, ?2)",
            params![replay_key, at.as_millis() as i64],
        )?;
        Ok(())
    }

    fn is_processed(&self, replay_key: &str) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM processed_markers WHERE replay_key = ?1",
                params![replay_key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
