//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Routes requests to the coordinator
//! - Forwards coordinator callbacks for sessions registered on it
//!
//! # Callback channel
//!
//! The first `register` on a connection creates a [`ChannelNotifier`] for
//! it and spawns a forwarder task that drains the notifier queue into the
//! shared writer. Every session registered on the connection uses that
//! notifier. Relayed payloads name their receiver; lifecycle callbacks do
//! not, so a worker should hold its own connection. When the connection
//! ends the forwarder is aborted, so later callbacks to its sessions fail
//! with `DeliveryError::ChannelClosed`. The sessions themselves stay
//! registered until they time out.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use warden_core::ClientId;
use warden_protocol::{ClientMessage, DaemonMessage, ErrorCode, MessageType, Operation, ProtocolVersion};

use crate::coordinator::{CoordinatorError, CoordinatorHandle};
use crate::notifier::{ChannelNotifier, Notifier};

/// Writer half shared between request responses and the callback forwarder.
pub type SharedWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Maximum message size (1 MB)
const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Buffered reader for incoming messages
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer for outgoing messages
    writer: SharedWriter,

    coordinator: CoordinatorHandle,

    /// Advertised in `registered` responses
    heartbeat_interval_secs: u64,

    /// Identifier assigned during the handshake
    connection_id: String,

    /// Callback capability shared by sessions registered here
    notifier: Option<Arc<dyn Notifier>>,

    /// Task draining the notifier queue into `writer`
    forwarder: Option<JoinHandle<()>>,

    /// Sessions registered over this connection, for logging
    registered: Vec<ClientId>,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        coordinator: CoordinatorHandle,
        heartbeat_interval_secs: u64,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            coordinator,
            heartbeat_interval_secs,
            connection_id: format!("conn-{connection_number}"),
            notifier: None,
            forwarder: None,
            registered: Vec::new(),
        }
    }

    /// Runs the connection handler.
    ///
    /// Performs the handshake, then processes messages until the
    /// connection closes.
    pub async fn run(mut self) {
        debug!(connection_id = %self.connection_id, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection_id = %self.connection_id,
                error = %e,
                "Handshake failed"
            );
            return;
        }

        if let Err(e) = self.process_messages().await {
            debug!(
                connection_id = %self.connection_id,
                error = %e,
                "Connection closed"
            );
        }

        info!(
            connection_id = %self.connection_id,
            sessions = ?self.registered,
            "Client disconnected"
        );
    }

    /// Handles the initial protocol handshake.
    ///
    /// Expects a `Connect` message from the client, validates the protocol
    /// version, and responds with `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(DaemonMessage::rejected(&format!(
                "Protocol version {} not compatible with server version {}",
                client_version,
                ProtocolVersion::CURRENT
            )))
            .await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { label } => {
                info!(
                    connection_id = %self.connection_id,
                    label = label.as_deref().unwrap_or("-"),
                    "Client handshake completed"
                );
                self.send_message(DaemonMessage::connected(self.connection_id.clone()))
                    .await
            }
            other => {
                self.send_message(DaemonMessage::error_with_code(
                    "Expected Connect message for handshake",
                    ErrorCode::NotConnected,
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Main message processing loop.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(connection_id = %self.connection_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(e))) => {
                    // A bad line does not end the connection.
                    debug!(connection_id = %self.connection_id, error = %e, "Malformed message");
                    self.send_message(DaemonMessage::error_with_code(
                        &format!("Malformed message: {e}"),
                        ErrorCode::MalformedMessage,
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(connection_id = %self.connection_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            self.handle_message(msg).await?;
        }
    }

    /// Handles a single client message.
    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            MessageType::Register { client_id, standby } => {
                self.handle_register(&client_id, standby).await?;
            }

            MessageType::Heartbeat { client_id } => {
                let found = self.coordinator.heartbeat(client_id.clone()).await;
                self.send_message(DaemonMessage::ack(Operation::Heartbeat, client_id, found))
                    .await?;
            }

            MessageType::Unregister { client_id } => {
                let found = self.coordinator.unregister(client_id.clone()).await;
                self.registered.retain(|id| id != &client_id);
                self.send_message(DaemonMessage::ack(Operation::Unregister, client_id, found))
                    .await?;
            }

            MessageType::RelayMessage {
                sender_id,
                receiver_id,
                ciphertext,
            } => {
                let outcome = self
                    .coordinator
                    .relay(sender_id, receiver_id, ciphertext)
                    .await;
                self.send_message(DaemonMessage::Relayed {
                    ciphertext: outcome.ciphertext,
                })
                .await?;
            }

            MessageType::ListClients => {
                let clients = self.coordinator.list_clients().await;
                self.send_message(DaemonMessage::client_list(clients))
                    .await?;
            }

            MessageType::SimulateFailure { client_id } => {
                let report = self.coordinator.simulate_failure(client_id.clone()).await;
                self.send_message(DaemonMessage::ack(
                    Operation::SimulateFailure,
                    client_id,
                    report.is_some(),
                ))
                .await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(connection_id = %self.connection_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    async fn handle_register(&mut self, raw_id: &str, standby: bool) -> Result<(), ConnectionError> {
        let notifier = self.notifier();

        match self.coordinator.register(raw_id, standby, notifier).await {
            Ok(outcome) => {
                if !self.registered.contains(&outcome.client_id) {
                    self.registered.push(outcome.client_id.clone());
                }
                let message = outcome.message();
                self.send_message(DaemonMessage::Registered {
                    client_id: outcome.client_id,
                    status: outcome.status,
                    reconnected: outcome.reconnected,
                    message,
                    heartbeat_interval_secs: self.heartbeat_interval_secs,
                })
                .await
            }
            Err(CoordinatorError::InvalidClientId(e)) => {
                debug!(connection_id = %self.connection_id, error = %e, "Rejected registration");
                self.send_message(DaemonMessage::error_with_code(
                    &e.to_string(),
                    ErrorCode::InvalidClientId,
                ))
                .await
            }
            Err(CoordinatorError::ChannelClosed) => {
                self.send_message(DaemonMessage::error_with_code(
                    "Coordinator is shutting down",
                    ErrorCode::Unavailable,
                ))
                .await
            }
        }
    }

    /// Returns this connection's notifier, creating it on first use.
    fn notifier(&mut self) -> Arc<dyn Notifier> {
        if let Some(notifier) = &self.notifier {
            return Arc::clone(notifier);
        }

        let (notifier, mut queue) = ChannelNotifier::channel();
        let writer = Arc::clone(&self.writer);
        let connection_id = self.connection_id.clone();

        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = queue.recv().await {
                let msg = DaemonMessage::from(notification);
                if let Err(e) = write_message(&writer, &msg).await {
                    debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to forward callback, closing callback channel"
                    );
                    break;
                }
            }
        }));

        let notifier: Arc<dyn Notifier> = Arc::new(notifier);
        self.notifier = Some(Arc::clone(&notifier));
        notifier
    }

    /// Reads a single message from the client.
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let line = read_bounded_line(&mut self.reader, MAX_MESSAGE_SIZE).await?;

        let msg: ClientMessage = serde_json::from_slice(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            connection_id = %self.connection_id,
            message = ?msg.message,
            "Received message"
        );

        Ok(msg)
    }

    /// Sends a message to the client.
    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Reads one line of at most `max` bytes, newline excluded.
///
/// Never buffers more than `max + 1` bytes: a longer line fails with
/// `MessageTooLarge` as soon as the limit is crossed.
async fn read_bounded_line<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);

    let bytes_read = reader
        .take(limit)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;

    if bytes_read == 0 {
        return Err(ConnectionError::Eof);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
    }

    if line.len() > max {
        return Err(ConnectionError::MessageTooLarge {
            size: line.len(),
            max,
        });
    }

    Ok(line)
}

/// Writes one newline-terminated message to a shared writer.
async fn write_message(writer: &SharedWriter, msg: &DaemonMessage) -> Result<(), ConnectionError> {
    let json = serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
