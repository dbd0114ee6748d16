//! Per-session callback capability.
//!
//! The coordinator never talks to a transport directly. Each registered
//! session carries a [`Notifier`] through which the coordinator pushes the
//! three one-way callbacks. Implementations must not block: the coordinator
//! invokes them from inside its serialization point.

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;

use warden_core::ClientId;
use warden_protocol::DaemonMessage;

/// Failure to push a callback to a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The client's callback channel is gone (connection closed).
    #[error("callback channel closed")]
    ChannelClosed,

    /// The notifier refused the callback.
    #[error("callback rejected: {0}")]
    Rejected(String),
}

/// One-way callbacks from the coordinator to a client.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Tell the client to begin performing the fleet's task.
    fn start_working(&self) -> Result<(), DeliveryError>;

    /// Tell the client to stand down.
    fn stop_working(&self) -> Result<(), DeliveryError>;

    /// Hand the client a relayed payload addressed to `receiver_id`.
    fn deliver(
        &self,
        ciphertext: &str,
        sender_id: &ClientId,
        receiver_id: &ClientId,
    ) -> Result<(), DeliveryError>;
}

/// A callback queued for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StartWorking,
    StopWorking,
    Deliver {
        ciphertext: String,
        sender_id: ClientId,
        receiver_id: ClientId,
    },
}

impl From<Notification> for DaemonMessage {
    fn from(notification: Notification) -> Self {
        match notification {
            Notification::StartWorking => DaemonMessage::StartWorking,
            Notification::StopWorking => DaemonMessage::StopWorking,
            Notification::Deliver {
                ciphertext,
                sender_id,
                receiver_id,
            } => DaemonMessage::DeliverMessage {
                ciphertext,
                sender_id,
                receiver_id,
            },
        }
    }
}

/// Notifier backed by an unbounded channel.
///
/// The receiving half is drained by whoever owns the client's transport
/// (the connection handler in the daemon, a test in unit tests).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<Notification>) -> Self {
        Self { sender }
    }

    /// Creates a notifier together with the receiver of its callbacks.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn push(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.sender
            .send(notification)
            .map_err(|_| DeliveryError::ChannelClosed)
    }
}

impl Notifier for ChannelNotifier {
    fn start_working(&self) -> Result<(), DeliveryError> {
        self.push(Notification::StartWorking)
    }

    fn stop_working(&self) -> Result<(), DeliveryError> {
        self.push(Notification::StopWorking)
    }

    fn deliver(
        &self,
        ciphertext: &str,
        sender_id: &ClientId,
        receiver_id: &ClientId,
    ) -> Result<(), DeliveryError> {
        self.push(Notification::Deliver {
            ciphertext: ciphertext.to_string(),
            sender_id: sender_id.clone(),
            receiver_id: receiver_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_queues_callbacks() {
        let (notifier, mut rx) = ChannelNotifier::channel();

        notifier.start_working().unwrap();
        notifier
            .deliver("abc", &ClientId::new("A"), &ClientId::new("B"))
            .unwrap();
        notifier.stop_working().unwrap();

        assert_eq!(rx.try_recv().unwrap(), Notification::StartWorking);
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Deliver {
                ciphertext: "abc".to_string(),
                sender_id: ClientId::new("A"),
                receiver_id: ClientId::new("B"),
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Notification::StopWorking);
    }

    #[test]
    fn test_closed_channel_is_delivery_error() {
        let (notifier, rx) = ChannelNotifier::channel();
        drop(rx);

        assert_eq!(notifier.start_working(), Err(DeliveryError::ChannelClosed));
    }

    #[test]
    fn test_notification_to_daemon_message() {
        let msg: DaemonMessage = Notification::Deliver {
            ciphertext: "xyz".to_string(),
            sender_id: ClientId::new("B"),
            receiver_id: ClientId::new("C"),
        }
        .into();
        assert_eq!(
            msg,
            DaemonMessage::DeliverMessage {
                ciphertext: "xyz".to_string(),
                sender_id: ClientId::new("B"),
                receiver_id: ClientId::new("C"),
            }
        );
    }
}
