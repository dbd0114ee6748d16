//! Warden coordinator daemon.
//!
//! Tracks worker sessions by heartbeat, promotes a standby when the
//! working session goes silent, and relays encrypted messages between
//! workers.
//!
//! # Usage
//!
//! ```bash
//! # Start the coordinator (foreground); `start` is the default
//! wardend start
//! wardend
//!
//! # Tighter failure detection, audit trail on disk
//! wardend start --heartbeat-timeout-secs 15 --audit-log /var/log/warden/audit.jsonl
//! ```

use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wardend::audit::{spawn_audit_writer, AuditSink, JsonlSink, LogSink};
use wardend::config::CoordinatorArgs;
use wardend::coordinator::spawn_coordinator;
use wardend::server::DaemonServer;

/// Warden coordinator - heartbeat failover for a worker fleet
#[derive(Parser, Debug)]
#[command(name = "wardend", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

/// Settings for a bare `wardend`, taken from the environment and defaults.
#[derive(Parser, Debug)]
struct ImplicitStart {
    #[command(flatten)]
    args: CoordinatorArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the coordinator
    Start(CoordinatorArgs),
}

fn main() -> Result<()> {
    let args = Args::parse();

    let coordinator_args = match args.command {
        Some(Command::Start(coordinator_args)) => coordinator_args,
        None => ImplicitStart::parse_from(["wardend"]).args,
    };

    run_daemon(coordinator_args)
}

#[tokio::main]
async fn run_daemon(args: CoordinatorArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wardend=info".parse()?)
                .add_directive("warden_core=info".parse()?)
                .add_directive("warden_protocol=info".parse()?),
        )
        .init();

    let config = args
        .coordinator_config()
        .context("Invalid coordinator configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        heartbeat_interval = ?config.heartbeat_interval,
        heartbeat_timeout = ?config.heartbeat_timeout,
        monitor_interval = ?config.monitor_interval,
        "Warden coordinator starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let sink: Box<dyn AuditSink> = match &args.audit_log {
        Some(path) => {
            info!(path = %path.display(), "Writing audit trail");
            Box::new(JsonlSink::new(path))
        }
        None => Box::new(LogSink),
    };
    let audit = spawn_audit_writer(sink);

    let coordinator = spawn_coordinator(config, audit);
    info!("Coordinator started");

    let server = DaemonServer::new(
        &args.socket,
        coordinator,
        config.heartbeat_interval_secs(),
        cancel_token,
    );

    info!(socket = %args.socket.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Warden coordinator stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
