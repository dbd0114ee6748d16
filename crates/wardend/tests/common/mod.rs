//! Shared helpers for socket-level integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use warden_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};
use wardend::audit::AuditHandle;
use wardend::config::CoordinatorConfig;
use wardend::coordinator::{spawn_coordinator, CoordinatorHandle};
use wardend::server::DaemonServer;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the server socket to accept connections
pub const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between readiness checks
pub const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for server shutdown
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound on waiting for any single message
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Server
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
pub struct TestServer {
    pub socket_path: PathBuf,
    pub coordinator: CoordinatorHandle,
    pub cancel_token: CancellationToken,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    /// Spawns a server with default coordinator timings.
    pub async fn spawn() -> Self {
        Self::spawn_with(CoordinatorConfig::default()).await
    }

    /// Spawns a server whose coordinator uses `config`.
    pub async fn spawn_with(config: CoordinatorConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("warden.sock");

        let coordinator = spawn_coordinator(config, AuditHandle::disabled());
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(
            socket_path.clone(),
            coordinator.clone(),
            config.heartbeat_interval_secs(),
            cancel_token.clone(),
        );

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        wait_for_listener(&socket_path).await;

        TestServer {
            socket_path,
            coordinator,
            cancel_token,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a raw client connection to the server.
    pub async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake.
    pub async fn connect_ready(&self) -> TestClient {
        let mut client = self.connect().await;
        client.handshake(None).await;
        client
    }

    /// Shuts down the server gracefully.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Polls until something accepts connections on `path`.
pub async fn wait_for_listener(path: &PathBuf) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < SOCKET_WAIT_TIMEOUT {
        if UnixStream::connect(path).await.is_ok() {
            return;
        }
        sleep(SOCKET_POLL_INTERVAL).await;
    }
    panic!("Server socket did not accept connections within {SOCKET_WAIT_TIMEOUT:?}");
}

// ============================================================================
// Test Client
// ============================================================================

/// Test client connection with protocol helpers.
///
/// Callbacks read while waiting for a response are buffered and handed
/// out by [`TestClient::recv_callback`].
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    callbacks: VecDeque<DaemonMessage>,
}

impl TestClient {
    pub fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            callbacks: VecDeque::new(),
        }
    }

    /// Sends a message to the server.
    pub async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.writer.write_all(json.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Sends raw bytes without framing.
    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Writes raw bytes, tolerating the server hanging up mid-write.
    pub async fn send_raw_lossy(&mut self, data: &[u8]) {
        if self.writer.write_all(data).await.is_ok() {
            let _ = self.writer.flush().await;
        }
    }

    /// Reads the next message of any kind, or `None` on EOF.
    pub async fn recv_any(&mut self) -> Option<DaemonMessage> {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("message should arrive")
            .unwrap_or(0);
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).expect("valid daemon message"))
    }

    /// Reads the next non-callback message, buffering callbacks.
    pub async fn recv(&mut self) -> DaemonMessage {
        loop {
            let msg = self.recv_any().await.expect("connection closed");
            if msg.is_callback() {
                self.callbacks.push_back(msg);
            } else {
                return msg;
            }
        }
    }

    /// Returns the next callback, reading from the socket if none is buffered.
    pub async fn recv_callback(&mut self) -> DaemonMessage {
        if let Some(msg) = self.callbacks.pop_front() {
            return msg;
        }
        loop {
            let msg = self.recv_any().await.expect("connection closed");
            if msg.is_callback() {
                return msg;
            }
            panic!("Expected callback, got {msg:?}");
        }
    }

    /// Pops a buffered callback without reading from the socket.
    pub fn pending_callback(&mut self) -> Option<DaemonMessage> {
        self.callbacks.pop_front()
    }

    /// Returns true if no callback arrives within `wait`.
    pub async fn no_callback_within(&mut self, wait: Duration) -> bool {
        if !self.callbacks.is_empty() {
            return false;
        }
        let mut line = String::new();
        match timeout(wait, self.reader.read_line(&mut line)).await {
            Err(_) => true,
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) => false,
        }
    }

    /// Performs the handshake, returning the assigned connection id.
    pub async fn handshake(&mut self, label: Option<String>) -> String {
        self.send(ClientMessage::connect(label)).await;

        match self.recv().await {
            DaemonMessage::Connected { connection_id, .. } => connection_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    /// Performs the handshake with a specific protocol version.
    pub async fn handshake_with_version(&mut self, version: ProtocolVersion) -> DaemonMessage {
        let msg = ClientMessage {
            protocol_version: version,
            message: MessageType::Connect { label: None },
        };
        self.send(msg).await;
        self.recv().await
    }

    /// Registers a session and returns the `registered` response.
    pub async fn register(&mut self, client_id: &str, standby: bool) -> DaemonMessage {
        self.send(ClientMessage::register(client_id, standby)).await;
        self.recv().await
    }
}
