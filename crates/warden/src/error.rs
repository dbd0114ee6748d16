//! Error types for the warden client.
//!
//! All error types use `thiserror` and carry enough context to tell the
//! operator whether the coordinator is down, incompatible, or unhappy with
//! a request.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use warden_core::CodecError;
use warden_protocol::ErrorCode;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors from talking to the coordinator.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The coordinator socket could not be reached.
    ///
    /// Usually means `wardend` is not running or listens elsewhere
    /// (check `WARDEN_SOCKET`).
    #[error("Failed to connect to coordinator at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Protocol version mismatch with the coordinator.
    #[error("Protocol version mismatch (client: {client_version}, coordinator: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The coordinator answered a request with an `error` message.
    #[error("Coordinator error: {message}")]
    Daemon {
        message: String,
        code: Option<ErrorCode>,
    },

    /// The coordinator sent something the request did not expect.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The coordinator closed the connection.
    #[error("Connection closed by coordinator")]
    Closed,

    /// Codec configuration or payload error.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON parse error passthrough.
    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl ClientError {
    /// Returns the coordinator's error code, if this is a coordinator error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Daemon { code, .. } => *code,
            _ => None,
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
