//! Session registry - the authoritative map of client identity to session.
//!
//! The registry is plain data with synchronous methods. It is owned by the
//! coordinator actor, which is the only place it is mutated, so every
//! method here runs inside the coordinator's serialization point.
//!
//! # Ordering
//!
//! Sessions are ordered by `(registered, seq)`, where `registered` is the
//! monotonic registration instant and `seq` is a per-registry insertion
//! counter. Two sessions registered within the same clock tick therefore
//! keep their insertion order, which is what makes standby selection and
//! listings deterministic.
//!
//! # Clocks
//!
//! Liveness runs on [`tokio::time::Instant`], so a wall-clock step never
//! kills or revives a session. The `DateTime<Utc>` stamps are only for
//! display and audit.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use warden_core::{ClientId, ClientStatus, ClientView};

use crate::notifier::Notifier;

// ============================================================================
// Client Session
// ============================================================================

/// State of one registered client.
pub struct ClientSession {
    id: ClientId,
    status: ClientStatus,
    standby_intent: bool,
    /// Monotonic time of the last heartbeat
    last_seen: Instant,
    /// Extra silence added by failure simulation
    backdated_by: Duration,
    registered: Instant,
    last_heartbeat: DateTime<Utc>,
    registered_at: DateTime<Utc>,
    seq: u64,
    notifier: Arc<dyn Notifier>,
}

impl ClientSession {
    fn new(id: ClientId, standby: bool, notifier: Arc<dyn Notifier>, now: Instant, seq: u64) -> Self {
        let wall = Utc::now();
        Self {
            id,
            status: ClientStatus::for_registration(standby),
            standby_intent: standby,
            last_seen: now,
            backdated_by: Duration::ZERO,
            registered: now,
            last_heartbeat: wall,
            registered_at: wall,
            seq,
            notifier,
        }
    }

    fn heard_from(&mut self, now: Instant) {
        self.last_seen = now;
        self.backdated_by = Duration::ZERO;
        self.last_heartbeat = Utc::now();
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn is_standby_intent(&self) -> bool {
        self.standby_intent
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time since the last heartbeat as of `now`, including any backdate.
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
            .saturating_add(self.backdated_by)
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Sort key used for listing and standby selection.
    fn order_key(&self) -> (Instant, u64) {
        (self.registered, self.seq)
    }

    /// Flips a standby into a working session.
    ///
    /// Returns false (and changes nothing) unless the session is `Standby`.
    pub(crate) fn promote(&mut self) -> bool {
        if self.status != ClientStatus::Standby {
            return false;
        }
        self.status = ClientStatus::Working;
        self.standby_intent = false;
        true
    }

    /// Marks the session dead and returns its previous status.
    pub(crate) fn mark_dead(&mut self) -> ClientStatus {
        std::mem::replace(&mut self.status, ClientStatus::Dead)
    }

    pub fn view(&self) -> ClientView {
        ClientView {
            id: self.id.clone(),
            status: self.status,
            last_heartbeat: self.last_heartbeat,
            is_standby: self.standby_intent,
            registered_at: self.registered_at,
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("standby_intent", &self.standby_intent)
            .field("last_seen", &self.last_seen)
            .field("backdated_by", &self.backdated_by)
            .field("registered_at", &self.registered_at)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Register Outcome
// ============================================================================

/// Result of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub client_id: ClientId,
    /// Status after registration (preserved on reconnect)
    pub status: ClientStatus,
    /// True if an existing session was refreshed rather than created
    pub reconnected: bool,
}

impl RegisterOutcome {
    /// Human-readable status message returned to the registering client.
    pub fn message(&self) -> String {
        if self.reconnected {
            format!(
                "client {} reconnected (status: {})",
                self.client_id,
                self.status.label()
            )
        } else {
            format!(
                "client {} registered as {}",
                self.client_id,
                self.status.label()
            )
        }
    }
}

// ============================================================================
// Session Registry
// ============================================================================

/// In-memory session store.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ClientId, ClientSession>,
    next_seq: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session or refreshes an existing one.
    ///
    /// A known id keeps its status and `registered_at`; only the notifier
    /// and heartbeat are refreshed. Whenever the resulting session is
    /// `Working`, `StartWorking` is pushed through the (new) notifier. A
    /// failed push is logged and does not undo the registration.
    pub fn register(
        &mut self,
        id: ClientId,
        standby: bool,
        notifier: Arc<dyn Notifier>,
        now: Instant,
    ) -> RegisterOutcome {
        let reconnected = if let Some(session) = self.sessions.get_mut(&id) {
            session.notifier = notifier;
            session.heard_from(now);
            debug!(
                client_id = %id,
                status = %session.status,
                requested_standby = standby,
                "Known client re-registered, session refreshed"
            );
            true
        } else {
            let seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            self.sessions.insert(
                id.clone(),
                ClientSession::new(id.clone(), standby, notifier, now, seq),
            );
            false
        };

        let Some(session) = self.sessions.get(&id) else {
            // Inserted or updated just above.
            return RegisterOutcome {
                client_id: id,
                status: ClientStatus::for_registration(standby),
                reconnected,
            };
        };

        let status = session.status;
        if status == ClientStatus::Working {
            if let Err(e) = session.notifier.start_working() {
                warn!(client_id = %id, error = %e, "Failed to deliver StartWorking");
            }
        }

        info!(
            client_id = %id,
            status = %status,
            reconnected,
            total_clients = self.sessions.len(),
            "Client registered"
        );

        RegisterOutcome {
            client_id: id,
            status,
            reconnected,
        }
    }

    /// Refreshes a session's heartbeat. Returns false for unknown ids.
    pub fn touch(&mut self, id: &ClientId, now: Instant) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) if session.status.is_live() => {
                session.heard_from(now);
                true
            }
            _ => false,
        }
    }

    /// Removes a session, returning it if it existed.
    pub fn remove(&mut self, id: &ClientId) -> Option<ClientSession> {
        self.sessions.remove(id)
    }

    /// Returns all sessions ordered by registration time.
    pub fn snapshot(&self) -> Vec<ClientView> {
        self.ordered().into_iter().map(ClientSession::view).collect()
    }

    /// Ids of all sessions in registration order.
    pub fn ordered_ids(&self) -> Vec<ClientId> {
        self.ordered().into_iter().map(|s| s.id.clone()).collect()
    }

    fn ordered(&self) -> Vec<&ClientSession> {
        let mut sessions: Vec<&ClientSession> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.order_key());
        sessions
    }

    /// The standby that has waited longest, if any.
    pub fn oldest_standby(&self) -> Option<ClientId> {
        self.sessions
            .values()
            .filter(|s| s.status == ClientStatus::Standby)
            .min_by_key(|s| s.order_key())
            .map(|s| s.id.clone())
    }

    /// Moves a session's last heartbeat `by` further into the past.
    ///
    /// The next heartbeat clears the backdate.
    pub fn backdate(&mut self, id: &ClientId, by: Duration) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.backdated_by = session.backdated_by.saturating_add(by);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<&ClientSession> {
        self.sessions.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ClientId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions with the given status.
    pub fn count(&self, status: ClientStatus) -> usize {
        self.sessions.values().filter(|s| s.status == status).count()
    }
}
