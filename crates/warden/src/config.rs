//! Client configuration.
//!
//! Every value can come from a flag or from the environment, so a worker
//! launched by a supervisor needs no command line beyond its id.

use std::path::PathBuf;

use clap::Args;
use tracing::warn;
use warden_core::MessageCodec;

use crate::error::Result;

/// Default socket path, shared with `wardend`.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/warden.sock";

/// Connection and codec settings shared by every client subcommand.
#[derive(Debug, Clone, Args)]
pub struct ClientArgs {
    /// Coordinator socket path
    #[arg(long, global = true, env = "WARDEN_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    /// Base64 AES-256 key for message payloads
    #[arg(long, global = true, env = "WARDEN_CODEC_KEY", hide_env_values = true)]
    pub codec_key: Option<String>,

    /// Base64 IV for message payloads
    #[arg(long, global = true, env = "WARDEN_CODEC_IV", hide_env_values = true)]
    pub codec_iv: Option<String>,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET_PATH),
            codec_key: None,
            codec_iv: None,
        }
    }
}

impl ClientArgs {
    /// Builds the message codec, warning when the built-in key is in use.
    pub fn codec(&self) -> Result<MessageCodec> {
        let codec =
            MessageCodec::with_overrides(self.codec_key.as_deref(), self.codec_iv.as_deref())?;

        if codec.is_default() {
            warn!("Using the built-in shared codec key; set WARDEN_CODEC_KEY and WARDEN_CODEC_IV");
        }

        Ok(codec)
    }
}
