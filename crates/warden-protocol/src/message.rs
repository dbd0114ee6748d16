//! Protocol message types for coordinator communication.

use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use warden_core::{ClientId, ClientStatus, ClientView};

/// Message types that can be sent by clients to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Connection handshake
    Connect {
        /// Free-form connection label for logs (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },

    /// Register (or reconnect) a client session.
    ///
    /// The connection sending this becomes the session's callback channel.
    Register {
        /// Requested identity, validated by the coordinator
        client_id: String,
        /// Whether the client wants to start as a standby
        standby: bool,
    },

    /// Liveness signal
    Heartbeat { client_id: ClientId },

    /// Graceful removal
    Unregister { client_id: ClientId },

    /// Forward an encrypted payload to another client
    RelayMessage {
        sender_id: ClientId,
        receiver_id: ClientId,
        /// Opaque base64 ciphertext
        ciphertext: String,
    },

    /// Request an ordered snapshot of all sessions
    ListClients,

    /// Admin hook: expire a client's heartbeat and run a monitor pass
    SimulateFailure { client_id: ClientId },

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(label: Option<String>) -> Self {
        Self::new(MessageType::Connect { label })
    }

    pub fn register(client_id: impl Into<String>, standby: bool) -> Self {
        Self::new(MessageType::Register {
            client_id: client_id.into(),
            standby,
        })
    }

    pub fn heartbeat(client_id: ClientId) -> Self {
        Self::new(MessageType::Heartbeat { client_id })
    }

    pub fn unregister(client_id: ClientId) -> Self {
        Self::new(MessageType::Unregister { client_id })
    }

    pub fn relay_message(sender_id: ClientId, receiver_id: ClientId, ciphertext: String) -> Self {
        Self::new(MessageType::RelayMessage {
            sender_id,
            receiver_id,
            ciphertext,
        })
    }

    pub fn list_clients() -> Self {
        Self::new(MessageType::ListClients)
    }

    pub fn simulate_failure(client_id: ClientId) -> Self {
        Self::new(MessageType::SimulateFailure { client_id })
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Request kinds acknowledged with [`DaemonMessage::Ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Heartbeat,
    Unregister,
    SimulateFailure,
}

/// Machine-readable error codes carried by [`DaemonMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// RegisterClient received a malformed id
    InvalidClientId,
    /// Request could not be parsed
    MalformedMessage,
    /// Request sent before the handshake
    NotConnected,
    /// Coordinator is shutting down
    Unavailable,
}

/// Messages sent from the coordinator to clients.
///
/// `StartWorking`, `StopWorking` and `DeliverMessage` are callbacks: they
/// arrive unsolicited on the connection that registered the session.
/// Lifecycle callbacks carry no session id, so a connection that expects
/// them should register a single worker session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Coordinator's protocol version
        protocol_version: ProtocolVersion,
        /// Identifier assigned to this connection
        connection_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Registration accepted
    Registered {
        client_id: ClientId,
        status: ClientStatus,
        /// True if an existing session was refreshed
        reconnected: bool,
        /// Human-readable status message
        message: String,
        /// How often the client should send heartbeats
        heartbeat_interval_secs: u64,
    },

    /// Acknowledgement of a request without a payload
    Ack {
        operation: Operation,
        client_id: ClientId,
        /// False if the id was unknown (request was a no-op)
        found: bool,
    },

    /// Relay acknowledgement: the original ciphertext, unchanged
    Relayed { ciphertext: String },

    /// Ordered session snapshot
    ClientList { clients: Vec<ClientView> },

    /// Callback: begin performing the fleet's task
    StartWorking,

    /// Callback: stand down
    StopWorking,

    /// Callback: a relayed message from another client
    DeliverMessage {
        ciphertext: String,
        sender_id: ClientId,
        /// Session the payload is addressed to
        receiver_id: ClientId,
    },

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl DaemonMessage {
    pub fn connected(connection_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            connection_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn ack(operation: Operation, client_id: ClientId, found: bool) -> Self {
        Self::Ack {
            operation,
            client_id,
            found,
        }
    }

    pub fn client_list(clients: Vec<ClientView>) -> Self {
        Self::ClientList { clients }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: ErrorCode) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code),
        }
    }

    /// Returns true for unsolicited callback messages.
    pub fn is_callback(&self) -> bool {
        matches!(
            self,
            Self::StartWorking | Self::StopWorking | Self::DeliverMessage { .. }
        )
    }
}
