//! Failover coordinator using the Actor pattern.
//!
//! The coordinator is the composition root: it owns the session registry
//! and the heartbeat monitor and delegates to the failover controller and
//! the message relay. Every operation, including the periodic monitor pass,
//! is a command on one mpsc channel, so all registry mutations are
//! serialized through a single task.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   CoordinatorCommand   ┌──────────────────┐
//! │ Connections    │───────(mpsc)──────────▶│ CoordinatorActor │
//! │ Monitor ticker │                        └──────────────────┘
//! └────────────────┘                           │      │      │
//!                                              ▼      ▼      ▼
//!                                      broadcast  notifier  audit
//!                                        events    queues   writer
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::CoordinatorActor;
pub use commands::{CoordinatorCommand, CoordinatorError, CoordinatorEvent, RemovalReason};
pub use handle::CoordinatorHandle;

use crate::audit::AuditHandle;
use crate::config::CoordinatorConfig;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the coordinator actor and its monitor ticker.
///
/// The ticker posts a fire-and-forget `RunMonitorCycle` every
/// `config.monitor_interval` and stops once the actor is gone.
pub fn spawn_coordinator(config: CoordinatorConfig, audit: AuditHandle) -> CoordinatorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = CoordinatorActor::new(cmd_rx, event_tx.clone(), config, audit);
    tokio::spawn(actor.run());

    spawn_monitor_ticker(cmd_tx.clone(), config);

    CoordinatorHandle::new(cmd_tx, event_tx)
}

/// Spawn a background task that triggers periodic monitor passes.
fn spawn_monitor_ticker(sender: mpsc::Sender<CoordinatorCommand>, config: CoordinatorConfig) {
    tokio::spawn(async move {
        let mut ticker = interval(config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if sender
                .send(CoordinatorCommand::RunMonitorCycle { respond_to: None })
                .await
                .is_err()
            {
                debug!("Monitor ticker stopping: coordinator channel closed");
                break;
            }
        }
    });
}
