//! Coordinator actor - owns the registry and processes commands.
//!
//! The CoordinatorActor is the single owner of session state in the system.
//! It receives commands via an mpsc channel, runs monitor passes posted by
//! the ticker through the same channel, and publishes events via broadcast.
//!
//! Nothing in this module performs I/O. Callbacks go to per-session
//! notifier queues and audit records go to the audit writer's queue, so a
//! slow client or a slow disk never holds up heartbeat processing.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller went away)
//! - Event publish failures are ignored (no subscribers)

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use warden_core::{ClientId, ClientStatus};

use crate::audit::{AuditEventType, AuditHandle};
use crate::config::CoordinatorConfig;
use crate::failover::FailoverController;
use crate::monitor::{HeartbeatMonitor, MonitorReport};
use crate::notifier::Notifier;
use crate::registry::{RegisterOutcome, SessionRegistry};
use crate::relay::{MessageRelay, RelayOutcome};

use super::commands::{CoordinatorCommand, CoordinatorEvent, RemovalReason};

// ============================================================================
// Coordinator Actor
// ============================================================================

/// The coordinator actor - owns all session state.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task.
pub struct CoordinatorActor {
    /// Command receiver
    receiver: mpsc::Receiver<CoordinatorCommand>,

    registry: SessionRegistry,
    monitor: HeartbeatMonitor,
    failover: FailoverController,
    relay: MessageRelay,
    audit: AuditHandle,
    config: CoordinatorConfig,

    /// Event publisher for in-process observers
    event_publisher: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorActor {
    pub fn new(
        receiver: mpsc::Receiver<CoordinatorCommand>,
        event_publisher: broadcast::Sender<CoordinatorEvent>,
        config: CoordinatorConfig,
        audit: AuditHandle,
    ) -> Self {
        Self {
            receiver,
            registry: SessionRegistry::new(),
            monitor: HeartbeatMonitor::new(config.heartbeat_timeout),
            failover: FailoverController::new(audit.clone()),
            relay: MessageRelay::new(audit.clone()),
            audit,
            config,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(
            heartbeat_timeout_secs = self.config.heartbeat_timeout.as_secs(),
            monitor_interval_secs = self.config.monitor_interval.as_secs(),
            "Coordinator actor starting"
        );

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            clients = self.registry.len(),
            "Coordinator actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::Register {
                client_id,
                standby,
                notifier,
                respond_to,
            } => {
                let result = self.handle_register(client_id, standby, notifier);
                let _ = respond_to.send(result);
            }
            CoordinatorCommand::Heartbeat {
                client_id,
                respond_to,
            } => {
                let result = self.handle_heartbeat(&client_id);
                let _ = respond_to.send(result);
            }
            CoordinatorCommand::Unregister {
                client_id,
                respond_to,
            } => {
                let result = self.handle_unregister(&client_id);
                let _ = respond_to.send(result);
            }
            CoordinatorCommand::RelayMessage {
                sender_id,
                receiver_id,
                ciphertext,
                respond_to,
            } => {
                let result = self.handle_relay(&sender_id, &receiver_id, ciphertext);
                let _ = respond_to.send(result);
            }
            CoordinatorCommand::ListClients { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }
            CoordinatorCommand::SimulateFailure {
                client_id,
                respond_to,
            } => {
                let result = self.handle_simulate_failure(&client_id);
                let _ = respond_to.send(result);
            }
            CoordinatorCommand::RunMonitorCycle { respond_to } => {
                let report = self.handle_monitor_cycle();
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(report);
                }
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(
        &mut self,
        client_id: ClientId,
        standby: bool,
        notifier: Arc<dyn Notifier>,
    ) -> RegisterOutcome {
        let outcome = self
            .registry
            .register(client_id, standby, notifier, Instant::now());

        if let Some(session) = self.registry.get(&outcome.client_id) {
            let view = session.view();
            self.audit.save_client(view.clone());

            if outcome.reconnected {
                self.audit.log_event(
                    &outcome.client_id,
                    AuditEventType::Reconnected,
                    format!("status {}", outcome.status.label()),
                );
                self.publish(CoordinatorEvent::Reconnected {
                    session: Box::new(view),
                });
            } else {
                self.audit.log_event(
                    &outcome.client_id,
                    AuditEventType::Registered,
                    format!("registered as {}", outcome.status.label()),
                );
                self.publish(CoordinatorEvent::Registered {
                    session: Box::new(view),
                });
            }
        }

        outcome
    }

    fn handle_heartbeat(&mut self, client_id: &ClientId) -> bool {
        if self.registry.touch(client_id, Instant::now()) {
            self.audit.update_heartbeat(client_id, Utc::now());
            true
        } else {
            debug!(client_id = %client_id, "Heartbeat from unknown client ignored");
            false
        }
    }

    /// Removes a session on request.
    ///
    /// A working session is told to stop first. Unregistering never triggers
    /// failover; only the heartbeat monitor does.
    fn handle_unregister(&mut self, client_id: &ClientId) -> bool {
        let Some(session) = self.registry.remove(client_id) else {
            debug!(client_id = %client_id, "Unregister for unknown client ignored");
            return false;
        };

        if session.status() == ClientStatus::Working {
            if let Err(e) = session.notifier().stop_working() {
                debug!(client_id = %client_id, error = %e, "Could not send StopWorking on unregister");
            }
        }

        info!(
            client_id = %client_id,
            status = %session.status(),
            remaining = self.registry.len(),
            "Client unregistered"
        );

        self.audit.update_status(client_id, ClientStatus::Dead);
        self.audit.log_event(
            client_id,
            AuditEventType::Unregistered,
            format!("was {}", session.status().label()),
        );
        self.publish(CoordinatorEvent::Removed {
            client_id: client_id.clone(),
            reason: RemovalReason::Unregistered,
        });

        true
    }

    fn handle_relay(
        &mut self,
        sender_id: &ClientId,
        receiver_id: &ClientId,
        ciphertext: String,
    ) -> RelayOutcome {
        let outcome = self
            .relay
            .relay(&self.registry, sender_id, receiver_id, ciphertext);

        self.publish(CoordinatorEvent::Relayed {
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
            delivered: outcome.delivery.is_delivered(),
        });

        outcome
    }

    fn handle_simulate_failure(&mut self, client_id: &ClientId) -> Option<MonitorReport> {
        if !self
            .registry
            .backdate(client_id, self.config.failure_backdate())
        {
            warn!(client_id = %client_id, "Simulated failure for unknown client ignored");
            return None;
        }

        info!(client_id = %client_id, "Simulating client failure");
        self.audit.log_event(
            client_id,
            AuditEventType::SimulatedFailure,
            "heartbeat backdated past timeout",
        );

        Some(self.handle_monitor_cycle())
    }

    fn handle_monitor_cycle(&mut self) -> MonitorReport {
        let report = self.monitor.run_cycle(
            &mut self.registry,
            &self.failover,
            &self.audit,
            Instant::now(),
        );
        self.publish_report(&report);
        report
    }

    // ========================================================================
    // Events
    // ========================================================================

    fn publish_report(&self, report: &MonitorReport) {
        for dead in &report.dead {
            self.publish(CoordinatorEvent::Died {
                client_id: dead.client_id.clone(),
            });
        }
        for promotion in &report.promotions {
            self.publish(CoordinatorEvent::Promoted {
                client_id: promotion.promoted_id.clone(),
                failed_id: promotion.failed_id.clone(),
            });
        }
        for failed_id in &report.exhausted {
            self.publish(CoordinatorEvent::RedundancyExhausted {
                failed_id: failed_id.clone(),
            });
        }
        for dead in &report.dead {
            self.publish(CoordinatorEvent::Removed {
                client_id: dead.client_id.clone(),
                reason: RemovalReason::HeartbeatTimeout,
            });
        }
    }

    fn publish(&self, event: CoordinatorEvent) {
        // No receivers is fine.
        let _ = self.event_publisher.send(event);
    }

    /// Current sessions, for tests.
    #[cfg(test)]
    fn views(&self) -> Vec<warden_core::ClientView> {
        self.registry.snapshot()
    }
}
