//! Worker client: register, heartbeat, react to callbacks.
//!
//! A [`WorkerClient`] holds one connection for its whole life. After
//! registering it sends a heartbeat every interval the coordinator
//! advertised, and turns coordinator callbacks into [`WorkerEvent`]s for
//! the embedding application. Relayed payloads are decrypted before they
//! are handed over; a payload that does not decrypt is logged and dropped.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_core::{ClientId, ClientStatus, MessageCodec};
use warden_protocol::{ClientMessage, DaemonMessage, Operation};

use crate::connection::Connection;
use crate::error::{ClientError, Result};

/// Lower bound on the heartbeat period, whatever the coordinator advertises.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Events
// ============================================================================

/// Something the worker application should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Registration accepted
    Registered {
        client_id: ClientId,
        status: ClientStatus,
        reconnected: bool,
        message: String,
    },

    /// Begin performing the fleet's task
    StartWorking,

    /// Stand down
    StopWorking,

    /// A decrypted message relayed from another client
    Message { sender_id: ClientId, text: String },

    /// The coordinator no longer knows this session
    SessionLost,
}

// ============================================================================
// Worker Client
// ============================================================================

/// A fleet member connected to the coordinator.
pub struct WorkerClient {
    socket_path: PathBuf,
    client_id: String,
    standby: bool,
    codec: MessageCodec,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel_token: CancellationToken,
}

impl WorkerClient {
    #[must_use]
    pub fn new(
        socket_path: impl Into<PathBuf>,
        client_id: impl Into<String>,
        standby: bool,
        codec: MessageCodec,
        events: mpsc::UnboundedSender<WorkerEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            client_id: client_id.into(),
            standby,
            codec,
            events,
            cancel_token,
        }
    }

    /// Registers and runs until cancelled or disconnected.
    ///
    /// On cancellation the session is unregistered before returning.
    pub async fn run(self) -> Result<()> {
        let mut connection =
            Connection::connect(&self.socket_path, Some(self.client_id.clone())).await?;

        let response = connection
            .request(&ClientMessage::register(self.client_id.as_str(), self.standby))
            .await?;

        let (client_id, heartbeat_every) = match response {
            DaemonMessage::Registered {
                client_id,
                status,
                reconnected,
                message,
                heartbeat_interval_secs,
            } => {
                info!(
                    client_id = %client_id,
                    status = %status,
                    reconnected,
                    "{message}"
                );
                self.emit(WorkerEvent::Registered {
                    client_id: client_id.clone(),
                    status,
                    reconnected,
                    message,
                });
                let every = Duration::from_secs(heartbeat_interval_secs).max(MIN_HEARTBEAT_INTERVAL);
                (client_id, every)
            }
            other => {
                return Err(ClientError::ProtocolError(format!(
                    "Unexpected response to register: {other:?}"
                )))
            }
        };

        while let Some(callback) = connection.take_callback() {
            self.dispatch(callback, &client_id);
        }

        let mut ticker = interval(heartbeat_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; registration was the first beat.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!(client_id = %client_id, "Worker shutting down");
                    let _ = connection.send(&ClientMessage::unregister(client_id.clone())).await;
                    connection.disconnect().await;
                    return Ok(());
                }

                _ = ticker.tick() => {
                    connection.send(&ClientMessage::heartbeat(client_id.clone())).await?;
                }

                message = connection.recv() => {
                    self.handle_message(message?, &client_id);
                }
            }
        }
    }

    fn handle_message(&self, message: DaemonMessage, client_id: &ClientId) {
        match message {
            DaemonMessage::Ack {
                operation: Operation::Heartbeat,
                found: false,
                ..
            } => {
                warn!(client_id = %client_id, "Coordinator no longer knows this session");
                self.emit(WorkerEvent::SessionLost);
            }
            DaemonMessage::Ack { .. } | DaemonMessage::Pong { .. } => {}
            DaemonMessage::Error { message, code } => {
                warn!(error_message = %message, error_code = ?code, "Received error from coordinator");
            }
            msg if msg.is_callback() => self.dispatch(msg, client_id),
            other => {
                debug!(message = ?other, "Ignoring unexpected message");
            }
        }
    }

    fn dispatch(&self, callback: DaemonMessage, client_id: &ClientId) {
        match callback {
            DaemonMessage::StartWorking => {
                info!(client_id = %self.client_id, "Start working");
                self.emit(WorkerEvent::StartWorking);
            }
            DaemonMessage::StopWorking => {
                info!(client_id = %self.client_id, "Stop working");
                self.emit(WorkerEvent::StopWorking);
            }
            DaemonMessage::DeliverMessage { receiver_id, .. } if &receiver_id != client_id => {
                debug!(
                    client_id = %client_id,
                    receiver_id = %receiver_id,
                    "Ignoring message for another session"
                );
            }
            DaemonMessage::DeliverMessage {
                ciphertext,
                sender_id,
                ..
            } => match self.codec.decrypt(&ciphertext) {
                Ok(text) => {
                    debug!(sender_id = %sender_id, "Message received");
                    self.emit(WorkerEvent::Message { sender_id, text });
                }
                Err(e) => {
                    warn!(sender_id = %sender_id, error = %e, "Dropping undecryptable message");
                }
            },
            other => {
                debug!(message = ?other, "Not a callback");
            }
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // The application may have stopped listening.
        let _ = self.events.send(event);
    }
}
