//! One-shot admin requests.
//!
//! Each call opens a fresh connection, sends one request, reads its
//! response and disconnects.

use std::path::PathBuf;

use warden_core::{ClientId, ClientView, MessageCodec};
use warden_protocol::{ClientMessage, DaemonMessage};

use crate::connection::Connection;
use crate::error::{ClientError, Result};

const ADMIN_LABEL: &str = "warden-admin";

/// Request/response access to the coordinator for operators and scripts.
#[derive(Debug, Clone)]
pub struct AdminClient {
    socket_path: PathBuf,
    codec: MessageCodec,
}

impl AdminClient {
    pub fn new(socket_path: impl Into<PathBuf>, codec: MessageCodec) -> Self {
        Self {
            socket_path: socket_path.into(),
            codec,
        }
    }

    /// Returns all sessions in registration order.
    pub async fn list(&self) -> Result<Vec<ClientView>> {
        match self.request(ClientMessage::list_clients()).await? {
            DaemonMessage::ClientList { clients } => Ok(clients),
            other => Err(unexpected("list_clients", &other)),
        }
    }

    /// Encrypts `text` and relays it from `from` to `to`.
    ///
    /// Returns the ciphertext the coordinator echoed back. The echo comes
    /// back whether or not `to` is registered.
    pub async fn send(&self, from: ClientId, to: ClientId, text: &str) -> Result<String> {
        let ciphertext = self.codec.encrypt(text);
        match self
            .request(ClientMessage::relay_message(from, to, ciphertext))
            .await?
        {
            DaemonMessage::Relayed { ciphertext } => Ok(ciphertext),
            other => Err(unexpected("relay_message", &other)),
        }
    }

    /// Forces a heartbeat timeout for `client_id`. Returns false if unknown.
    pub async fn kill(&self, client_id: ClientId) -> Result<bool> {
        self.ack(ClientMessage::simulate_failure(client_id)).await
    }

    /// Removes `client_id`. Returns false if unknown.
    pub async fn unregister(&self, client_id: ClientId) -> Result<bool> {
        self.ack(ClientMessage::unregister(client_id)).await
    }

    async fn ack(&self, message: ClientMessage) -> Result<bool> {
        match self.request(message).await? {
            DaemonMessage::Ack { found, .. } => Ok(found),
            other => Err(unexpected("ack", &other)),
        }
    }

    async fn request(&self, message: ClientMessage) -> Result<DaemonMessage> {
        let mut connection =
            Connection::connect(&self.socket_path, Some(ADMIN_LABEL.to_string())).await?;
        let response = connection.request(&message).await?;
        connection.disconnect().await;
        Ok(response)
    }
}

fn unexpected(request: &str, response: &DaemonMessage) -> ClientError {
    ClientError::ProtocolError(format!("Unexpected response to {request}: {response:?}"))
}
