//! Warden client - worker and admin access to the coordinator.
//!
//! - [`WorkerClient`] is a fleet member: it registers, heartbeats and
//!   reports coordinator callbacks as [`WorkerEvent`]s.
//! - [`AdminClient`] sends one-shot requests (list, send, kill, unregister).
//!
//! Both speak the newline-delimited JSON protocol from `warden-protocol`
//! over the coordinator's Unix socket.

pub mod admin;
pub mod config;
pub mod connection;
pub mod error;
pub mod worker;

pub use admin::AdminClient;
pub use config::{ClientArgs, DEFAULT_SOCKET_PATH};
pub use connection::Connection;
pub use error::{ClientError, Result};
pub use worker::{WorkerClient, WorkerEvent};
