//! Client interface for interacting with the CoordinatorActor.
//!
//! The `CoordinatorHandle` provides a cheap-to-clone interface for sending
//! commands to the coordinator actor and subscribing to its events. This is
//! the transport-agnostic operation surface: the socket server is one
//! caller, tests are another.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors map to `CoordinatorError::ChannelClosed`, or to a
//!   graceful default where the operation has no failure mode

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use warden_core::{ClientId, ClientView};

use crate::monitor::MonitorReport;
use crate::notifier::Notifier;
use crate::registry::RegisterOutcome;
use crate::relay::{Delivery, RelayOutcome};

use super::commands::{CoordinatorCommand, CoordinatorError, CoordinatorEvent};

// ============================================================================
// Coordinator Handle
// ============================================================================

/// Handle for interacting with the coordinator actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<CoordinatorCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    pub fn new(
        sender: mpsc::Sender<CoordinatorCommand>,
        event_sender: broadcast::Sender<CoordinatorEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a client, or refresh the session of a known id.
    ///
    /// `raw_id` is validated here, before anything reaches the actor.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::InvalidClientId` if the id is malformed
    /// - `CoordinatorError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        raw_id: &str,
        standby: bool,
        notifier: Arc<dyn Notifier>,
    ) -> Result<RegisterOutcome, CoordinatorError> {
        let client_id = ClientId::parse(raw_id)?;
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(CoordinatorCommand::Register {
                client_id,
                standby,
                notifier,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;

        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Refresh a client's heartbeat.
    ///
    /// Returns `false` if the id is unknown or the actor has shut down.
    pub async fn heartbeat(&self, client_id: ClientId) -> bool {
        self.request_bool(|respond_to| CoordinatorCommand::Heartbeat {
            client_id,
            respond_to,
        })
        .await
    }

    /// Remove a client gracefully.
    ///
    /// Returns `false` if the id is unknown or the actor has shut down.
    pub async fn unregister(&self, client_id: ClientId) -> bool {
        self.request_bool(|respond_to| CoordinatorCommand::Unregister {
            client_id,
            respond_to,
        })
        .await
    }

    /// Forward `ciphertext` to `receiver_id`.
    ///
    /// Always yields the original ciphertext. If the actor has shut down the
    /// delivery is reported as [`Delivery::ReceiverUnknown`].
    pub async fn relay(
        &self,
        sender_id: ClientId,
        receiver_id: ClientId,
        ciphertext: String,
    ) -> RelayOutcome {
        let (tx, rx) = oneshot::channel();
        let fallback = RelayOutcome {
            ciphertext: ciphertext.clone(),
            delivery: Delivery::ReceiverUnknown,
        };

        if self
            .sender
            .send(CoordinatorCommand::RelayMessage {
                sender_id,
                receiver_id,
                ciphertext,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return fallback;
        }

        rx.await.unwrap_or(fallback)
    }

    /// Ordered snapshot of all sessions.
    ///
    /// Returns an empty vector if the actor has shut down.
    pub async fn list_clients(&self) -> Vec<ClientView> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(CoordinatorCommand::ListClients { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Expire a client's heartbeat and run a monitor pass immediately.
    ///
    /// Returns `None` if the id is unknown or the actor has shut down.
    pub async fn simulate_failure(&self, client_id: ClientId) -> Option<MonitorReport> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(CoordinatorCommand::SimulateFailure {
                client_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Run one monitor pass and wait for its report.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::ChannelClosed` if the actor has shut down
    pub async fn run_monitor_cycle(&self) -> Result<MonitorReport, CoordinatorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(CoordinatorCommand::RunMonitorCycle {
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;

        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Subscribe to coordinator events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn request_bool(
        &self,
        command: impl FnOnce(oneshot::Sender<bool>) -> CoordinatorCommand,
    ) -> bool {
        let (tx, rx) = oneshot::channel();

        if self.sender.send(command(tx)).await.is_err() {
            return false;
        }

        rx.await.unwrap_or(false)
    }
}
