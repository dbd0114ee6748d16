//! Message relay - fire-and-forget forwarding of opaque ciphertext.
//!
//! The relay never inspects or decrypts payloads. The caller always gets
//! its own ciphertext back, whatever happened to the delivery.

use tracing::{debug, warn};

use warden_core::ClientId;

use crate::audit::{AuditEventType, AuditHandle};
use crate::notifier::DeliveryError;
use crate::registry::SessionRegistry;

/// What happened to a relayed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the receiver's notifier.
    Delivered,
    /// No live session with the receiver id.
    ReceiverUnknown,
    /// The receiver's notifier refused the payload.
    Failed(DeliveryError),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Result of [`MessageRelay::relay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// The input payload, unchanged
    pub ciphertext: String,
    pub delivery: Delivery,
}

#[derive(Debug, Clone)]
pub struct MessageRelay {
    audit: AuditHandle,
}

impl MessageRelay {
    pub fn new(audit: AuditHandle) -> Self {
        Self { audit }
    }

    /// Forwards `ciphertext` from `sender_id` to `receiver_id`.
    ///
    /// The sender does not have to be registered.
    pub fn relay(
        &self,
        registry: &SessionRegistry,
        sender_id: &ClientId,
        receiver_id: &ClientId,
        ciphertext: String,
    ) -> RelayOutcome {
        if !registry.contains(sender_id) {
            debug!(sender_id = %sender_id, "Relaying on behalf of an unregistered sender");
        }

        let receiver = match registry.get(receiver_id) {
            Some(session) if session.status().is_live() => session,
            _ => {
                debug!(
                    sender_id = %sender_id,
                    receiver_id = %receiver_id,
                    "Relay miss: receiver not registered"
                );
                self.audit.log_event(
                    sender_id,
                    AuditEventType::RelayMiss,
                    format!("receiver {receiver_id} not registered"),
                );
                return RelayOutcome {
                    ciphertext,
                    delivery: Delivery::ReceiverUnknown,
                };
            }
        };

        let delivery = match receiver.notifier().deliver(&ciphertext, sender_id, receiver_id) {
            Ok(()) => {
                debug!(
                    sender_id = %sender_id,
                    receiver_id = %receiver_id,
                    bytes = ciphertext.len(),
                    "Message relayed"
                );
                self.audit.log_event(
                    sender_id,
                    AuditEventType::MessageSent,
                    format!("to {receiver_id}"),
                );
                self.audit.log_event(
                    receiver_id,
                    AuditEventType::MessageReceived,
                    format!("from {sender_id}"),
                );
                Delivery::Delivered
            }
            Err(e) => {
                warn!(
                    sender_id = %sender_id,
                    receiver_id = %receiver_id,
                    error = %e,
                    "Failed to deliver relayed message"
                );
                self.audit.log_event(
                    receiver_id,
                    AuditEventType::DeliveryFailed,
                    format!("message from {sender_id}: {e}"),
                );
                Delivery::Failed(e)
            }
        };

        RelayOutcome {
            ciphertext,
            delivery,
        }
    }
}
