//! Heartbeat monitor - detection of silent sessions.
//!
//! A monitor pass runs in two phases. The scan marks every session whose
//! heartbeat is older than the timeout as `Dead` and collects it. Only
//! after the whole registry has been scanned does the act phase run:
//! failed `Working` sessions are handed to the failover controller and
//! every dead session is removed. Scanning first means a standby that is
//! itself about to be declared dead is never chosen for promotion.
//!
//! The monitor holds no state between passes. The periodic trigger lives
//! in the coordinator, which runs each pass inside its serialization point.
//! Silence is measured on the monotonic clock.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use warden_core::{ClientId, ClientStatus};

use crate::audit::{AuditEventType, AuditHandle};
use crate::failover::{FailoverController, FailoverOutcome, Promotion};
use crate::registry::SessionRegistry;

/// A session declared dead during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadSession {
    pub client_id: ClientId,
    /// Status the session had before it was marked dead
    pub previous_status: ClientStatus,
    /// Silence observed at scan time
    pub elapsed: Duration,
}

/// Everything one monitor pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    /// Sessions declared dead and removed, in registration order
    pub dead: Vec<DeadSession>,
    pub promotions: Vec<Promotion>,
    /// Failed working sessions for which no standby was available
    pub exhausted: Vec<ClientId>,
}

impl MonitorReport {
    pub fn is_empty(&self) -> bool {
        self.dead.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitor {
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True if `silence` is past the timeout. Exactly the timeout is alive.
    pub fn is_expired(&self, silence: Duration) -> bool {
        silence > self.timeout
    }

    /// Phase one: marks expired sessions dead without removing them.
    pub fn scan(&self, registry: &mut SessionRegistry, now: Instant) -> Vec<DeadSession> {
        let mut dead = Vec::new();

        for id in registry.ordered_ids() {
            let Some(session) = registry.get_mut(&id) else {
                continue;
            };
            if !session.status().is_live() {
                continue;
            }

            let elapsed = session.silence(now);
            if !self.is_expired(elapsed) {
                continue;
            }

            let previous_status = session.mark_dead();

            warn!(
                client_id = %id,
                previous_status = %previous_status,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = self.timeout.as_secs(),
                "Heartbeat timeout, client declared dead"
            );

            dead.push(DeadSession {
                client_id: id,
                previous_status,
                elapsed,
            });
        }

        dead
    }

    /// Runs a full pass: scan, then promote and remove.
    pub fn run_cycle(
        &self,
        registry: &mut SessionRegistry,
        failover: &FailoverController,
        audit: &AuditHandle,
        now: Instant,
    ) -> MonitorReport {
        let dead = self.scan(registry, now);
        let mut report = MonitorReport::default();

        for entry in &dead {
            audit.update_status(&entry.client_id, ClientStatus::Dead);
            audit.log_event(
                &entry.client_id,
                AuditEventType::HeartbeatTimeout,
                format!(
                    "no heartbeat for {}s (was {})",
                    entry.elapsed.as_secs(),
                    entry.previous_status.label()
                ),
            );

            if entry.previous_status == ClientStatus::Working {
                if let Some(session) = registry.get(&entry.client_id) {
                    if let Err(e) = session.notifier().stop_working() {
                        debug!(
                            client_id = %entry.client_id,
                            error = %e,
                            "Could not send StopWorking to dead client"
                        );
                    }
                }

                match failover.promote(registry, &entry.client_id) {
                    FailoverOutcome::Promoted(promotion) => report.promotions.push(promotion),
                    FailoverOutcome::RedundancyExhausted { failed_id } => {
                        report.exhausted.push(failed_id)
                    }
                }
            }

            registry.remove(&entry.client_id);
        }

        if !dead.is_empty() {
            info!(
                dead = dead.len(),
                promoted = report.promotions.len(),
                exhausted = report.exhausted.len(),
                remaining = registry.len(),
                "Monitor pass complete"
            );
        }

        report.dead = dead;
        report
    }
}
