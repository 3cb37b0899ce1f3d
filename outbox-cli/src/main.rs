//! Offline outbox command-line client
//!
//! Inspects and drives the outbox state stored in a local SQLite file:
//! 1. Show queue, cache and dead-letter counts
//! 2. Queue audit entries and governance events
//! 3. Drain the queue once, or keep syncing until interrupted
//!
//! Usage:
//!   outboxctl --db outbox.db status
//!   outboxctl --db outbox.db --api https://api.example.com/api/v2 run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use outbox_cli::{audit_action, format_dead_letter, format_status, load_config, open_outbox};
use outbox_sync::{SyncEvent, SyncOrchestrator};
use outbox_types::{ActionId, GovernanceEventDraft, Priority};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "outboxctl")]
#[command(about = "Inspect and drive the offline outbox")]
struct Args {
    /// Path to the state database
    #[arg(long, default_value = "outbox.db")]
    db: PathBuf,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the remote API root
    #[arg(long)]
    api: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show queue, cache and dead-letter counts
    Status,

    /// Drain the queue until nothing is ready
    Sync,

    /// Queue an audit-log entry
    Audit {
        action: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        resource_type: String,
        #[arg(long)]
        resource_id: String,
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },

    /// Record a governance event
    Governance {
        event_type: String,
        #[arg(long)]
        resource_type: String,
        #[arg(long)]
        resource_id: String,
        #[arg(long)]
        user_id: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
    },

    /// List, requeue or clear abandoned actions
    DeadLetters {
        #[arg(long, conflicts_with = "clear")]
        requeue: Option<ActionId>,
        #[arg(long)]
        clear: bool,
    },

    /// Run the sync loop until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(api) = args.api {
        config.http.base_url = api;
    }
    let outbox = Arc::new(open_outbox(&args.db, config)?);

    match args.command {
        Command::Status => {
            println!("{}", format_status(&outbox.status().await));
        }
        Command::Sync => {
            let summary = outbox.force_sync().await.context("Sync failed")?;
            println!(
                "delivered {}, skipped {}, rescheduled {}, abandoned {}",
                summary.delivered, summary.skipped, summary.rescheduled, summary.exhausted
            );
        }
        Command::Audit {
            action,
            actor,
            resource_type,
            resource_id,
            priority,
        } => {
            let action = audit_action(
                outbox.config(),
                &action,
                &actor,
                &resource_type,
                &resource_id,
                priority,
            );
            let id = outbox
                .queue_action(action)
                .await
                .context("Failed to queue audit entry")?;
            println!("{id}");
        }
        Command::Governance {
            event_type,
            resource_type,
            resource_id,
            user_id,
            payload,
        } => {
            let mut draft =
                GovernanceEventDraft::new(event_type, resource_type, resource_id, user_id);
            if let Some(raw) = payload {
                let payload = serde_json::from_str(&raw).context("Payload is not valid JSON")?;
                draft = draft.with_payload(payload);
            }
            let event = outbox
                .record_governance_event(draft)
                .await
                .context("Failed to record governance event")?;
            println!("{} #{}", event.id, event.sequence_number);
        }
        Command::DeadLetters { requeue, clear } => {
            if let Some(id) = requeue {
                outbox
                    .requeue_dead_letter(id)
                    .await
                    .with_context(|| format!("Failed to requeue {id}"))?;
                println!("requeued {id}");
            } else if clear {
                println!("cleared {}", outbox.clear_dead_letters().await);
            } else {
                for letter in outbox.dead_letters().await {
                    println!("{}", format_dead_letter(&letter));
                }
            }
        }
        Command::Run => run(outbox).await?,
    }

    Ok(())
}

async fn run(outbox: Arc<outbox_sync::Outbox>) -> Result<()> {
    info!(
        "Outbox sync running against {} ({} pending)",
        outbox.config().http.base_url,
        outbox.status().await.pending_actions
    );
    let handle = SyncOrchestrator::start(outbox.clone());
    let mut events = handle.subscribe();
    handle.sync_now().await.context("Orchestrator stopped unexpectedly")?;

    let log_events = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::DrainCompleted(summary) if summary.attempted > 0 => {
                    info!(
                        "Drained: {} delivered, {} rescheduled, {} abandoned",
                        summary.delivered, summary.rescheduled, summary.exhausted
                    );
                }
                SyncEvent::ConnectivityChanged { online } => info!("Online: {}", online),
                SyncEvent::StateReloaded { version } => info!("State reloaded (v{:?})", version),
                SyncEvent::DrainCompleted(_) => {}
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    handle.shutdown().await;
    if let Err(e) = log_events.await {
        warn!("Event logger ended abnormally: {}", e);
    }

    let status = outbox.status().await;
    println!("{}", format_status(&status));
    Ok(())
}
