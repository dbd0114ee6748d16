//! Best-effort audit trail.
//!
//! The coordinator never waits on persistence. It pushes [`AuditRecord`]s
//! into an unbounded queue through an [`AuditHandle`]; a dedicated writer
//! task owns the [`AuditSink`] and drains the queue. A failing sink is
//! logged and the record is dropped. Nothing is retried and nothing is ever
//! read back: the in-memory registry is the source of truth.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - A closed queue turns `record` into a no-op
//! - Sink errors are logged, never propagated

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use warden_core::{ClientId, ClientStatus, ClientView};

// ============================================================================
// Records
// ============================================================================

/// Kind of event recorded by [`AuditRecord::LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Registered,
    Reconnected,
    Unregistered,
    HeartbeatTimeout,
    SimulatedFailure,
    Promoted,
    RedundancyExhausted,
    MessageSent,
    MessageReceived,
    RelayMiss,
    DeliveryFailed,
}

/// One outbound persistence operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AuditRecord {
    /// Upsert of a full session row.
    SaveClient { session: ClientView },

    UpdateHeartbeat {
        client_id: ClientId,
        at: DateTime<Utc>,
    },

    UpdateStatus {
        client_id: ClientId,
        status: ClientStatus,
    },

    /// Free-form audit log line.
    LogEvent {
        client_id: ClientId,
        event: AuditEventType,
        details: String,
        at: DateTime<Utc>,
    },
}

impl AuditRecord {
    /// The client this record is about.
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::SaveClient { session } => &session.id,
            Self::UpdateHeartbeat { client_id, .. }
            | Self::UpdateStatus { client_id, .. }
            | Self::LogEvent { client_id, .. } => client_id,
        }
    }

    /// Returns the event type for `LogEvent` records.
    pub fn event(&self) -> Option<AuditEventType> {
        match self {
            Self::LogEvent { event, .. } => Some(*event),
            _ => None,
        }
    }
}

// ============================================================================
// Sink Trait
// ============================================================================

/// Failure of an [`AuditSink`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("audit log I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination of audit records.
#[async_trait]
pub trait AuditSink: Send {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    async fn persist(&mut self, record: &AuditRecord) -> Result<(), PersistenceError>;
}

// ============================================================================
// Sinks
// ============================================================================

/// Writes records to the tracing log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AuditSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn persist(&mut self, record: &AuditRecord) -> Result<(), PersistenceError> {
        match record {
            AuditRecord::SaveClient { session } => {
                debug!(
                    target: "wardend::audit",
                    client_id = %session.id,
                    status = %session.status,
                    "save_client"
                );
            }
            AuditRecord::UpdateHeartbeat { client_id, at } => {
                debug!(target: "wardend::audit", client_id = %client_id, at = %at, "update_heartbeat");
            }
            AuditRecord::UpdateStatus { client_id, status } => {
                debug!(target: "wardend::audit", client_id = %client_id, status = %status, "update_status");
            }
            AuditRecord::LogEvent {
                client_id,
                event,
                details,
                ..
            } => {
                info!(
                    target: "wardend::audit",
                    client_id = %client_id,
                    event = ?event,
                    details = %details,
                    "audit event"
                );
            }
        }
        Ok(())
    }
}

/// Appends one JSON object per record to a file.
///
/// The file is opened lazily and reopened after a write error.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Option<File>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn file(&mut self) -> Result<&mut File, PersistenceError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|source| PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            self.file = Some(file);
        }

        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(PersistenceError::Io {
                path: self.path.clone(),
                source: std::io::Error::other("audit file unavailable"),
            }),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn persist(&mut self, record: &AuditRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let path = self.path.clone();
        let file = self.file().await?;
        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        if let Err(source) = written {
            self.file = None;
            return Err(PersistenceError::Io { path, source });
        }
        Ok(())
    }
}

/// Keeps records in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything persisted so far.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn persist(&mut self, record: &AuditRecord) -> Result<(), PersistenceError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Audit Handle
// ============================================================================

/// Non-blocking producer side of the audit queue.
#[derive(Debug, Clone)]
pub struct AuditHandle {
    sender: mpsc::UnboundedSender<AuditRecord>,
}

impl AuditHandle {
    pub fn new(sender: mpsc::UnboundedSender<AuditRecord>) -> Self {
        Self { sender }
    }

    /// Creates a handle together with the raw receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A handle whose records go nowhere.
    pub fn disabled() -> Self {
        let (handle, _) = Self::channel();
        handle
    }

    /// Queues a record. Never blocks, never fails.
    pub fn record(&self, record: AuditRecord) {
        if self.sender.send(record).is_err() {
            debug!("Audit writer stopped, dropping record");
        }
    }

    pub fn save_client(&self, session: ClientView) {
        self.record(AuditRecord::SaveClient { session });
    }

    pub fn update_heartbeat(&self, client_id: &ClientId, at: DateTime<Utc>) {
        self.record(AuditRecord::UpdateHeartbeat {
            client_id: client_id.clone(),
            at,
        });
    }

    pub fn update_status(&self, client_id: &ClientId, status: ClientStatus) {
        self.record(AuditRecord::UpdateStatus {
            client_id: client_id.clone(),
            status,
        });
    }

    pub fn log_event(&self, client_id: &ClientId, event: AuditEventType, details: impl Into<String>) {
        self.record(AuditRecord::LogEvent {
            client_id: client_id.clone(),
            event,
            details: details.into(),
            at: Utc::now(),
        });
    }
}

/// Spawns the writer task that owns `sink` and returns the producer handle.
///
/// The task exits once every [`AuditHandle`] clone has been dropped and the
/// queue is drained.
pub fn spawn_audit_writer(mut sink: Box<dyn AuditSink>) -> AuditHandle {
    let (handle, mut receiver) = AuditHandle::channel();

    tokio::spawn(async move {
        let name = sink.name();
        debug!(sink = name, "Audit writer starting");

        let mut failures: u64 = 0;
        while let Some(record) = receiver.recv().await {
            if let Err(e) = sink.persist(&record).await {
                failures += 1;
                warn!(
                    sink = name,
                    client_id = %record.client_id(),
                    error = %e,
                    failures,
                    "Failed to persist audit record, dropping it"
                );
            }
        }

        debug!(sink = name, failures, "Audit writer stopped");
    });

    handle
}
