//! Warden CLI - run a fleet worker or administer the coordinator.
//!
//! # Usage
//!
//! ```text
//! warden run --id worker-1              # join as the working instance
//! warden run --id worker-2 --standby    # join as a standby
//! warden send --from ops --to worker-1 "rotate logs"
//! warden list
//! warden kill worker-1                  # simulate a heartbeat timeout
//! warden unregister worker-2
//! ```
//!
//! The socket and codec settings come from `--socket`, `--codec-key`,
//! `--codec-iv` or the matching `WARDEN_*` environment variables.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use warden_client::{AdminClient, ClientArgs, WorkerClient, WorkerEvent};
use warden_core::{ClientId, ClientView};

// ============================================================================
// CLI Arguments
// ============================================================================

/// Warden - heartbeat failover client
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
struct Args {
    #[command(flatten)]
    client: ClientArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the fleet and heartbeat until interrupted
    Run {
        /// Client id to register under
        #[arg(long)]
        id: String,

        /// Start as a standby instead of the working instance
        #[arg(long)]
        standby: bool,
    },
    /// Encrypt a message and relay it to another client
    Send {
        /// Sender id shown to the receiver
        #[arg(long)]
        from: String,

        /// Receiving client id
        #[arg(long)]
        to: String,

        /// Message text
        text: String,
    },
    /// List registered clients
    List,
    /// Simulate a heartbeat timeout for a client
    Kill {
        /// Client id
        id: String,
    },
    /// Remove a client
    Unregister {
        /// Client id
        id: String,
    },
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("warden=info".parse()?)
                .add_directive("warden_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let codec = args.client.codec().context("Invalid codec configuration")?;

    match args.command {
        Command::Run { id, standby } => {
            let cancel_token = CancellationToken::new();
            let (event_tx, event_rx) = mpsc::unbounded_channel();

            let shutdown_token = cancel_token.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Error waiting for Ctrl+C");
                }
                shutdown_token.cancel();
            });

            let printer = tokio::spawn(print_events(event_rx));

            let worker = WorkerClient::new(
                &args.client.socket,
                id,
                standby,
                codec,
                event_tx,
                cancel_token,
            );
            let result = worker.run().await;
            let _ = printer.await;
            result.context("Worker stopped")?;
        }
        Command::Send { from, to, text } => {
            let admin = AdminClient::new(&args.client.socket, codec);
            let echoed = admin
                .send(parse_id(&from)?, parse_id(&to)?, &text)
                .await
                .context("Relay failed")?;
            println!("{echoed}");
        }
        Command::List => {
            let admin = AdminClient::new(&args.client.socket, codec);
            let clients = admin.list().await.context("List failed")?;
            print_clients(&clients);
        }
        Command::Kill { id } => {
            let admin = AdminClient::new(&args.client.socket, codec);
            let found = admin.kill(parse_id(&id)?).await.context("Kill failed")?;
            report(&id, found, "killed");
        }
        Command::Unregister { id } => {
            let admin = AdminClient::new(&args.client.socket, codec);
            let found = admin
                .unregister(parse_id(&id)?)
                .await
                .context("Unregister failed")?;
            report(&id, found, "unregistered");
        }
    }

    Ok(())
}

fn parse_id(raw: &str) -> Result<ClientId> {
    ClientId::parse(raw).with_context(|| format!("Invalid client id {raw:?}"))
}

fn report(id: &str, found: bool, action: &str) {
    if found {
        println!("{id} {action}");
    } else {
        println!("{id} is not registered");
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Registered { message, .. } => println!("{message}"),
            WorkerEvent::StartWorking => println!("start working"),
            WorkerEvent::StopWorking => println!("stop working"),
            WorkerEvent::Message { sender_id, text } => println!("[{sender_id}] {text}"),
            WorkerEvent::SessionLost => {
                info!("Session lost; restart the worker to register again");
                println!("session lost");
            }
        }
    }
}

fn print_clients(clients: &[ClientView]) {
    if clients.is_empty() {
        println!("no clients registered");
        return;
    }

    let now = Utc::now();
    println!(
        "{:<24} {:<8} {:>9} {:<8} {}",
        "ID", "STATUS", "HEARTBEAT", "STANDBY", "REGISTERED"
    );
    for client in clients {
        println!(
            "{:<24} {:<8} {:>8}s {:<8} {}",
            client.id.as_str(),
            client.status.label(),
            client.heartbeat_age_secs(now),
            if client.is_standby { "yes" } else { "no" },
            client.registered_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}
