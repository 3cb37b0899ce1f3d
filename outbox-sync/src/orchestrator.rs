//! Background loop that keeps the outbox flowing.
//!
//! The orchestrator drains the queue on a fixed interval while online, on
//! every offline→online transition, and on demand. It also watches the store
//! for writes from other outbox instances sharing it and reloads when their
//! version differs from ours.

use crate::error::{OutboxError, OutboxResult};
use crate::outbox::{DrainSummary, Outbox};
use outbox_store::StoreChange;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Commands accepted by a running orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Drain until nothing is ready.
    SyncNow,
    /// Stop the loop.
    Shutdown,
}

/// Published by the orchestrator as it works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ConnectivityChanged { online: bool },
    DrainCompleted(DrainSummary),
    /// In-memory state was replaced by a newer stored blob.
    StateReloaded { version: Option<u64> },
}

/// Handle to a running orchestrator.
pub struct OrchestratorHandle {
    commands: mpsc::Sender<SyncCommand>,
    events: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Requests an immediate full drain.
    pub async fn sync_now(&self) -> OutboxResult<()> {
        self.commands
            .send(SyncCommand::SyncNow)
            .await
            .map_err(|_| OutboxError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Orchestrator task ended abnormally: {}", e);
        }
    }
}

/// Drives an [`Outbox`] in the background.
pub struct SyncOrchestrator {
    outbox: Arc<Outbox>,
    events: broadcast::Sender<SyncEvent>,
    ticker: Interval,
    online: watch::Receiver<bool>,
    was_online: bool,
    changes: broadcast::Receiver<StoreChange>,
    changes_open: bool,
    commands: mpsc::Receiver<SyncCommand>,
}

impl SyncOrchestrator {
    /// Spawns the loop on the current runtime.
    pub fn start(outbox: Arc<Outbox>) -> OrchestratorHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut ticker = tokio::time::interval(outbox.config().sync.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut online = outbox.connectivity().subscribe();
        let was_online = *online.borrow_and_update();
        let changes = outbox.store().subscribe();

        let orchestrator = Self {
            outbox,
            events: events.clone(),
            ticker,
            online,
            was_online,
            changes,
            changes_open: true,
            commands: command_rx,
        };
        let task = tokio::spawn(orchestrator.run());

        OrchestratorHandle {
            commands: command_tx,
            events,
            task,
        }
    }

    async fn run(mut self) {
        info!(
            "Sync orchestrator started (flush every {:?})",
            self.outbox.config().sync.flush_interval()
        );
        // The first tick fires immediately.
        self.ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.ticker.tick() => {
                    if self.outbox.connectivity().is_online() && self.outbox.has_pending().await {
                        self.drain_once().await;
                    }
                }

                changed = self.online.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity signal dropped, stopping orchestrator");
                        break;
                    }
                    let online = *self.online.borrow_and_update();
                    self.on_connectivity(online).await;
                }

                change = self.changes.recv(), if self.changes_open => {
                    self.on_store_change(change).await;
                }

                command = self.commands.recv() => {
                    match command {
                        Some(SyncCommand::SyncNow) => self.sync_now().await,
                        Some(SyncCommand::Shutdown) | None => break,
                    }
                }
            }
        }
        info!("Sync orchestrator stopped");
    }

    async fn on_connectivity(&mut self, online: bool) {
        if online == self.was_online {
            return;
        }
        self.was_online = online;
        self.outbox
            .telemetry()
            .emit("connectivity.changed", json!({ "online": online }));
        self.publish(SyncEvent::ConnectivityChanged { online });

        if online {
            info!("Back online, draining queue");
            self.drain_once().await;
        }
    }

    async fn on_store_change(&mut self, change: Result<StoreChange, RecvError>) {
        let state_key = &self.outbox.config().state_key;
        match change {
            Ok(change) if &change.key == state_key => {
                // Our own saves come back through the same channel.
                if self.outbox.stored_version().await == Some(change.version) {
                    return;
                }
                self.reload().await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                debug!("Missed {} store notifications, reloading", missed);
                self.reload().await;
            }
            Err(RecvError::Closed) => {
                debug!("Store notifications closed");
                self.changes_open = false;
            }
        }
    }

    async fn reload(&self) {
        match self.outbox.reload_from_store().await {
            Ok(true) => {
                let version = self.outbox.stored_version().await;
                self.publish(SyncEvent::StateReloaded { version });
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to reload outbox state: {}", e),
        }
    }

    async fn drain_once(&self) {
        let summary = self.outbox.process_queue().await;
        self.publish(SyncEvent::DrainCompleted(summary));
    }

    async fn sync_now(&self) {
        match self.outbox.force_sync().await {
            Ok(summary) => self.publish(SyncEvent::DrainCompleted(summary)),
            Err(OutboxError::Offline) => debug!("Sync requested while offline, ignoring"),
            Err(e) => warn!("Sync failed: {}", e),
        }
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
