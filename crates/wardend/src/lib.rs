//! Warden coordinator - heartbeat failover for a fleet of workers.
//!
//! This crate provides the coordinator core and its socket server:
//! - `registry` - Session registry, the authoritative map of client sessions
//! - `monitor` - Heartbeat monitor that declares silent sessions dead
//! - `failover` - Standby promotion when a working session dies
//! - `relay` - Fire-and-forget forwarding of encrypted payloads
//! - `notifier` - Per-session callback capability
//! - `audit` - Best-effort persistence sink and its writer task
//! - `coordinator` - Actor owning all of the above, plus its handle
//! - `server` - Unix socket server for worker and admin connections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      wardend daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  DaemonServer   │────▶│     CoordinatorActor        │    │
//! │  │ (Unix Socket)   │     │  registry · monitor ·       │    │
//! │  └────────┬────────┘     │  failover · relay           │    │
//! │           │              └──────┬───────────────┬──────┘    │
//! │           │ connections         │ callbacks     │ records   │
//! │           ▼                     ▼               ▼           │
//! │  ┌─────────────────┐     ┌─────────────┐ ┌─────────────┐    │
//! │  │ConnectionHandler│◀────│  notifier   │ │ audit writer│    │
//! │  │  (per client)   │     │  queues     │ │  (sink)     │    │
//! │  └─────────────────┘     └─────────────┘ └─────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod failover;
pub mod monitor;
pub mod notifier;
pub mod registry;
pub mod relay;
pub mod server;
