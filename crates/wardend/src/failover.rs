//! Failover controller - standby promotion.
//!
//! Invoked by the heartbeat monitor once per failed `Working` session. The
//! selection policy is FIFO over standbys: the session registered earliest
//! wins, and the registry's insertion counter breaks timestamp ties.

use tracing::{error, info, warn};

use warden_core::{ClientId, ClientStatus};

use crate::audit::{AuditEventType, AuditHandle};
use crate::registry::SessionRegistry;

/// A successful promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    /// The session whose failure caused the promotion
    pub failed_id: ClientId,
    /// The standby that is now working
    pub promoted_id: ClientId,
    /// Whether `StartWorking` reached the promoted client's notifier
    pub delivered: bool,
}

/// Result of one promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    Promoted(Promotion),
    /// No standby was available. Nothing was mutated.
    RedundancyExhausted { failed_id: ClientId },
}

impl FailoverOutcome {
    pub fn promoted_id(&self) -> Option<&ClientId> {
        match self {
            Self::Promoted(promotion) => Some(&promotion.promoted_id),
            Self::RedundancyExhausted { .. } => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RedundancyExhausted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FailoverController {
    audit: AuditHandle,
}

impl FailoverController {
    pub fn new(audit: AuditHandle) -> Self {
        Self { audit }
    }

    /// Promotes the oldest standby to replace `failed_id`.
    ///
    /// A failed `StartWorking` push is logged and recorded but the promotion
    /// stands and is not retried; the heartbeat timeout alone decides
    /// whether the promoted session is dead.
    pub fn promote(&self, registry: &mut SessionRegistry, failed_id: &ClientId) -> FailoverOutcome {
        let Some(candidate) = registry.oldest_standby() else {
            return self.exhausted(registry, failed_id);
        };

        let Some(session) = registry.get_mut(&candidate) else {
            return self.exhausted(registry, failed_id);
        };

        if !session.promote() {
            return self.exhausted(registry, failed_id);
        }

        let delivered = match session.notifier().start_working() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    client_id = %candidate,
                    error = %e,
                    "Promoted client did not receive StartWorking"
                );
                self.audit.log_event(
                    &candidate,
                    AuditEventType::DeliveryFailed,
                    format!("StartWorking after promotion: {e}"),
                );
                false
            }
        };

        info!(
            failed_id = %failed_id,
            promoted_id = %candidate,
            delivered,
            "Standby promoted to working"
        );

        self.audit.update_status(&candidate, ClientStatus::Working);
        self.audit.save_client(session.view());
        self.audit.log_event(
            &candidate,
            AuditEventType::Promoted,
            format!("promoted to working, replacing failed client {failed_id}"),
        );

        FailoverOutcome::Promoted(Promotion {
            failed_id: failed_id.clone(),
            promoted_id: candidate,
            delivered,
        })
    }

    fn exhausted(&self, registry: &SessionRegistry, failed_id: &ClientId) -> FailoverOutcome {
        error!(
            alert = "redundancy_exhausted",
            failed_id = %failed_id,
            working = registry.count(ClientStatus::Working),
            "No standby available to replace failed working client; continuing degraded"
        );
        self.audit.log_event(
            failed_id,
            AuditEventType::RedundancyExhausted,
            "no standby available for promotion",
        );
        FailoverOutcome::RedundancyExhausted {
            failed_id: failed_id.clone(),
        }
    }
}
