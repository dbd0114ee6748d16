//! Warden Protocol - Wire protocol for coordinator communication
//!
//! This crate provides the message types exchanged between worker
//! clients and the coordinator daemon: requests from workers, responses
//! from the daemon, and the one-way callbacks the daemon pushes to
//! registered workers.
//!
//! Every message is a single JSON object terminated by a newline.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, ErrorCode, MessageType, Operation};
pub use version::{ProtocolVersion, VersionError};
