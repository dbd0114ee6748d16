//! Client session identifiers, statuses and the read-only view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Maximum length of a client identifier in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Identity of a worker client, unique within the registry.
///
/// Chosen by the client itself (e.g. "worker-eu-1") and stable for the
/// lifetime of its session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a new ClientId without validation.
    ///
    /// Use [`ClientId::parse`] for identifiers received from the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a ClientId after validating it.
    ///
    /// Surrounding whitespace is trimmed. The result must be non-empty,
    /// at most [`MAX_CLIENT_ID_LEN`] bytes and free of control characters.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(DomainError::InvalidClientId {
                value: raw.to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if trimmed.len() > MAX_CLIENT_ID_LEN {
            return Err(DomainError::InvalidClientId {
                value: raw.to_string(),
                reason: format!("longer than {MAX_CLIENT_ID_LEN} bytes"),
            });
        }

        if trimmed.chars().any(char::is_control) {
            return Err(DomainError::InvalidClientId {
                value: raw.to_string(),
                reason: "contains control characters".to_string(),
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Client Status
// ============================================================================

/// Lifecycle status of a client session.
///
/// `Dead` is absorbing: a dead session is removed from the registry and
/// never becomes `Working` or `Standby` again. A client that comes back
/// must register afresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    /// Actively performing the fleet's task.
    Working,

    /// Idle and eligible for promotion.
    Standby,

    /// Missed its heartbeat window or unregistered.
    Dead,
}

impl ClientStatus {
    /// Initial status for a fresh registration.
    #[must_use]
    pub fn for_registration(standby: bool) -> Self {
        if standby {
            Self::Standby
        } else {
            Self::Working
        }
    }

    /// Returns the lowercase label used in logs and audit records.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Standby => "standby",
            Self::Dead => "dead",
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Dead)
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working => write!(f, "Working"),
            Self::Standby => write!(f, "Standby"),
            Self::Dead => write!(f, "Dead"),
        }
    }
}

impl FromStr for ClientStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "working" => Ok(Self::Working),
            "standby" => Ok(Self::Standby),
            "dead" => Ok(Self::Dead),
            _ => Err(DomainError::InvalidFieldValue {
                field: "status".to_string(),
                value: s.to_string(),
                expected: "working, standby or dead".to_string(),
            }),
        }
    }
}

// ============================================================================
// Client View
// ============================================================================

/// Read-only snapshot of a session, as returned by `ListClients`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientView {
    /// Client identifier
    pub id: ClientId,

    /// Current status
    pub status: ClientStatus,

    /// Time of the last heartbeat (or registration)
    pub last_heartbeat: DateTime<Utc>,

    /// Role the client asked for at its last registration
    pub is_standby: bool,

    /// When this logical session was created
    pub registered_at: DateTime<Utc>,
}

impl ClientView {
    /// Seconds since the last heartbeat, relative to `now`.
    #[must_use]
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_heartbeat).num_seconds()
    }
}
