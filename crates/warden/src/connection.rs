//! Line-protocol connection to the coordinator.
//!
//! A [`Connection`] owns one Unix socket, performs the `connect` handshake
//! and exchanges newline-delimited JSON messages. Callbacks
//! (`start_working`, `stop_working`, `deliver_message`) can arrive at any
//! time, including between a request and its response, so
//! [`Connection::request`] sets them aside for [`Connection::take_callback`].
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::collections::VecDeque;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, info};

use warden_protocol::{ClientMessage, DaemonMessage, ProtocolVersion};

use crate::error::{ClientError, Result};

/// An established, handshaken connection to the coordinator.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,

    /// Bytes of the line being read; kept across calls so `recv` is cancel-safe
    line: Vec<u8>,

    /// Callbacks read while waiting for a response
    callbacks: VecDeque<DaemonMessage>,

    /// Identifier assigned by the coordinator
    connection_id: String,
}

impl Connection {
    /// Connects to the coordinator and performs the handshake.
    pub async fn connect(socket_path: &Path, label: Option<String>) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: socket_path.to_path_buf(),
                source,
            })?;

        let (reader, writer) = stream.into_split();
        let mut connection = Self {
            reader: BufReader::new(reader),
            writer,
            line: Vec::new(),
            callbacks: VecDeque::new(),
            connection_id: String::new(),
        };

        connection.send(&ClientMessage::connect(label)).await?;

        match connection.recv().await? {
            DaemonMessage::Connected {
                protocol_version,
                connection_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client_version: ProtocolVersion::CURRENT.to_string(),
                        daemon_version: protocol_version.to_string(),
                    });
                }
                info!(
                    connection_id = %connection_id,
                    protocol_version = %protocol_version,
                    "Handshake complete"
                );
                connection.connection_id = connection_id;
                Ok(connection)
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(ClientError::VersionMismatch {
                client_version: ProtocolVersion::CURRENT.to_string(),
                daemon_version: protocol_version.to_string(),
            }),
            other => Err(ClientError::ProtocolError(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Returns the identifier the coordinator assigned to this connection.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Sends one message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to coordinator");
        Ok(())
    }

    /// Reads the next message of any kind.
    ///
    /// Cancel-safe: bytes of an interrupted line stay buffered in the
    /// connection and the next call completes the line.
    pub async fn recv(&mut self) -> Result<DaemonMessage> {
        loop {
            let n = self.reader.read_until(b'\n', &mut self.line).await?;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            if self.line.last() != Some(&b'\n') {
                continue;
            }

            let line = std::mem::take(&mut self.line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(serde_json::from_slice(&line)?);
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// Callbacks that arrive first are buffered. An `error` response is
    /// returned as [`ClientError::Daemon`].
    pub async fn request(&mut self, message: &ClientMessage) -> Result<DaemonMessage> {
        self.send(message).await?;

        loop {
            match self.recv().await? {
                msg if msg.is_callback() => self.callbacks.push_back(msg),
                DaemonMessage::Error { message, code } => {
                    return Err(ClientError::Daemon { message, code })
                }
                msg => return Ok(msg),
            }
        }
    }

    /// Pops a callback buffered by [`Connection::request`].
    pub fn take_callback(&mut self) -> Option<DaemonMessage> {
        self.callbacks.pop_front()
    }

    /// Says goodbye. Errors are ignored; the socket closes on drop anyway.
    pub async fn disconnect(mut self) {
        let _ = self.send(&ClientMessage::disconnect()).await;
    }
}
