//! Coordinator actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `CoordinatorActor`:
//! - `CoordinatorCommand`: Commands sent to the actor
//! - `CoordinatorError`: Errors that can occur during coordinator operations
//! - `CoordinatorEvent`: Events published by the coordinator for observers

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use warden_core::{ClientId, ClientView, DomainError};

use crate::monitor::MonitorReport;
use crate::notifier::Notifier;
use crate::registry::RegisterOutcome;
use crate::relay::RelayOutcome;

// ============================================================================
// Coordinator Commands
// ============================================================================

/// Commands sent to the coordinator actor.
///
/// Each request carries a oneshot channel for its response. The actor
/// processes commands one at a time, which is what serializes every
/// mutation of the registry.
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Register a new session or refresh an existing one.
    Register {
        /// Already validated identity
        client_id: ClientId,
        standby: bool,
        /// Callback capability for this session
        notifier: Arc<dyn Notifier>,
        respond_to: oneshot::Sender<RegisterOutcome>,
    },

    /// Refresh a session's heartbeat. Responds `false` for unknown ids.
    Heartbeat {
        client_id: ClientId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Graceful removal. Responds `false` for unknown ids.
    Unregister {
        client_id: ClientId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Forward an opaque payload to another session.
    RelayMessage {
        sender_id: ClientId,
        receiver_id: ClientId,
        ciphertext: String,
        respond_to: oneshot::Sender<RelayOutcome>,
    },

    /// Ordered snapshot of all sessions.
    ListClients {
        respond_to: oneshot::Sender<Vec<ClientView>>,
    },

    /// Backdate a session past the timeout and run a monitor pass.
    ///
    /// Responds `None` if the id is unknown (no pass is run).
    SimulateFailure {
        client_id: ClientId,
        respond_to: oneshot::Sender<Option<MonitorReport>>,
    },

    /// Run one heartbeat monitor pass.
    ///
    /// The periodic ticker sends this fire-and-forget (`respond_to: None`).
    RunMonitorCycle {
        respond_to: Option<oneshot::Sender<MonitorReport>>,
    },
}

// ============================================================================
// Coordinator Errors
// ============================================================================

/// Errors that can occur during coordinator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// Registration was attempted with a malformed id.
    #[error(transparent)]
    InvalidClientId(#[from] DomainError),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("coordinator channel closed")]
    ChannelClosed,
}

// ============================================================================
// Coordinator Events
// ============================================================================

/// Events published by the coordinator to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A new session was created.
    Registered { session: Box<ClientView> },

    /// A known id registered again; its session was refreshed in place.
    Reconnected { session: Box<ClientView> },

    /// A standby was promoted to replace a failed working session.
    Promoted {
        client_id: ClientId,
        failed_id: ClientId,
    },

    /// A working session failed and no standby was available.
    RedundancyExhausted { failed_id: ClientId },

    /// The monitor declared a session dead.
    Died { client_id: ClientId },

    /// A session left the registry.
    Removed {
        client_id: ClientId,
        reason: RemovalReason,
    },

    /// A relay request was processed.
    Relayed {
        sender_id: ClientId,
        receiver_id: ClientId,
        delivered: bool,
    },
}

/// Reason why a session was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Client explicitly unregistered.
    Unregistered,

    /// Heartbeat timeout detected by the monitor.
    HeartbeatTimeout,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unregistered => write!(f, "unregistered"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
        }
    }
}
