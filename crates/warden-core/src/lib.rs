//! Warden Core - Shared types for the failover coordinator
//!
//! This crate provides the core domain types shared between
//! the coordinator daemon (wardend) and worker clients (warden).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod client;
pub mod codec;
pub mod error;

// Re-exports for convenience
pub use client::{ClientId, ClientStatus, ClientView, MAX_CLIENT_ID_LEN};
pub use codec::{CodecError, MessageCodec, DEFAULT_IV, DEFAULT_KEY};
pub use error::{DomainError, DomainResult};
