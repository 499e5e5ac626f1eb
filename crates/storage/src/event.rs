//! Event types for the decision log.

use chrono::{DateTime, Utc};
use permitter::{Account, IdentityId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of event that occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A permitter was bound to the identity.
    Bound,
    /// The permitter granted the identity.
    Acquired {
        requested_secs: u64,
        expiry: DateTime<Utc>,
    },
    /// The permitter refused to grant the identity.
    AcquireDenied { reason: String },
    /// The possessor is no longer valid.
    Released,
    /// The permitter kept the possessor valid.
    ReleaseRefused { reason: String },
    /// The request never reached a decision.
    Fault { operation: String, message: String },
}

impl EventKind {
    /// All kind names, in the form stored and accepted by filters.
    pub const NAMES: [&'static str; 6] = [
        "bound",
        "acquired",
        "acquire_denied",
        "released",
        "release_refused",
        "fault",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Bound => "bound",
            EventKind::Acquired { .. } => "acquired",
            EventKind::AcquireDenied { .. } => "acquire_denied",
            EventKind::Released => "released",
            EventKind::ReleaseRefused { .. } => "release_refused",
            EventKind::Fault { .. } => "fault",
        }
    }
}

/// An entry in the decision log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub identity: IdentityId,
    /// The requester or possessor, absent for binding events.
    pub account: Option<Account>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(identity: IdentityId, account: Option<Account>, kind: EventKind) -> Self {
        Self::at(identity, account, Utc::now(), kind)
    }

    /// An event stamped with an explicit time.
    pub fn at(
        identity: IdentityId,
        account: Option<Account>,
        timestamp: DateTime<Utc>,
        kind: EventKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            account,
            timestamp,
            kind,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.to_rfc3339(),
            self.identity,
            self.kind.name()
        )?;
        if let Some(account) = &self.account {
            write!(f, " account={account}")?;
        }
        match &self.kind {
            EventKind::Acquired {
                requested_secs,
                expiry,
            } => write!(f, " requested={requested_secs}s expiry={}", expiry.to_rfc3339()),
            EventKind::AcquireDenied { reason } | EventKind::ReleaseRefused { reason } => {
                write!(f, " reason={reason:?}")
            }
            EventKind::Fault { operation, message } => {
                write!(f, " operation={operation} message={message:?}")
            }
            EventKind::Bound | EventKind::Released => Ok(()),
        }
    }
}
