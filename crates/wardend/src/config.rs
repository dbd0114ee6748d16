//! Coordinator timing configuration.
//!
//! The three timing constants are configuration, not hardwired: the
//! interval clients are told to heartbeat at, the silence after which a
//! session is declared dead, and how often the monitor scans.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use thiserror::Error;

use crate::server::DEFAULT_SOCKET_PATH;

/// Default heartbeat send interval advertised to clients.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Default silence after which a session is declared dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Default period of the heartbeat monitor.
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 5;

/// Invalid timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error(
        "heartbeat timeout ({timeout:?}) must be greater than the heartbeat interval ({interval:?})"
    )]
    TimeoutNotAboveInterval { timeout: Duration, interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub monitor_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            monitor_interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
        }
    }
}

impl CoordinatorConfig {
    /// Checks that the intervals are usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a zero duration or for a timeout that does
    /// not exceed the heartbeat interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Zero {
                name: "heartbeat interval",
            });
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "heartbeat timeout",
            });
        }
        if self.monitor_interval.is_zero() {
            return Err(ConfigError::Zero {
                name: "monitor interval",
            });
        }
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::TimeoutNotAboveInterval {
                timeout: self.heartbeat_timeout,
                interval: self.heartbeat_interval,
            });
        }
        Ok(())
    }

    /// How far the failure-simulation hook backdates a heartbeat so that
    /// it is past the timeout.
    pub fn failure_backdate(&self) -> Duration {
        self.heartbeat_timeout.saturating_add(Duration::from_secs(1))
    }

    /// Heartbeat interval in whole seconds, as advertised on the wire.
    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval.as_secs().max(1)
    }
}

/// Command-line and environment configuration for the daemon.
#[derive(Args, Debug, Clone)]
pub struct CoordinatorArgs {
    /// Unix socket to listen on
    #[arg(long, env = "WARDEN_SOCKET", default_value = DEFAULT_SOCKET_PATH, value_name = "PATH")]
    pub socket: PathBuf,

    /// Interval clients are told to heartbeat at
    #[arg(
        long,
        env = "WARDEN_HEARTBEAT_INTERVAL_SECS",
        default_value_t = DEFAULT_HEARTBEAT_INTERVAL_SECS,
        value_name = "SECS"
    )]
    pub heartbeat_interval_secs: u64,

    /// Silence after which a client is declared dead
    #[arg(
        long,
        env = "WARDEN_HEARTBEAT_TIMEOUT_SECS",
        default_value_t = DEFAULT_HEARTBEAT_TIMEOUT_SECS,
        value_name = "SECS"
    )]
    pub heartbeat_timeout_secs: u64,

    /// How often the heartbeat monitor scans the registry
    #[arg(
        long,
        env = "WARDEN_MONITOR_INTERVAL_SECS",
        default_value_t = DEFAULT_MONITOR_INTERVAL_SECS,
        value_name = "SECS"
    )]
    pub monitor_interval_secs: u64,

    /// Append audit records to this JSON-lines file (log only if unset)
    #[arg(long, env = "WARDEN_AUDIT_LOG", value_name = "PATH")]
    pub audit_log: Option<PathBuf>,
}

impl CoordinatorArgs {
    /// Builds and validates the timing configuration.
    pub fn coordinator_config(&self) -> Result<CoordinatorConfig, ConfigError> {
        let config = CoordinatorConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            monitor_interval: Duration::from_secs(self.monitor_interval_secs),
        };
        config.validate()?;
        Ok(config)
    }
}
