//! Requests and decisions exchanged between a registry and a permitter.

use crate::{Account, Authorization, Context, IdentityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A request to acquire a permit for an identity.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub identity: IdentityId,
    pub requester: Account,
    /// Requested lifetime, relative to the moment of decision.
    pub duration: Duration,
    pub context: Context,
    pub authorization: Authorization,
}

impl AcquireRequest {
    pub fn new(identity: IdentityId, requester: Account, duration: Duration) -> Self {
        Self {
            identity,
            requester,
            duration,
            context: Context::empty(),
            authorization: Authorization::empty(),
        }
    }

    pub fn with_context(mut self, context: impl Into<Context>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_authorization(mut self, authorization: impl Into<Authorization>) -> Self {
        self.authorization = authorization.into();
        self
    }
}

/// A request to release a permit.
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub identity: IdentityId,
    /// The account currently believed to hold the permit.
    pub possessor: Account,
    pub context: Context,
    pub authorization: Authorization,
}

impl ReleaseRequest {
    pub fn new(identity: IdentityId, possessor: Account) -> Self {
        Self {
            identity,
            possessor,
            context: Context::empty(),
            authorization: Authorization::empty(),
        }
    }

    pub fn with_context(mut self, context: impl Into<Context>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_authorization(mut self, authorization: impl Into<Authorization>) -> Self {
        self.authorization = authorization.into();
        self
    }
}

/// Result of an acquisition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Acquisition {
    /// The permit is granted until `expiry`.
    Granted { expiry: DateTime<Utc> },
    /// The request was validly refused.
    Denied { reason: String },
}

impl Acquisition {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Acquisition::Granted { .. })
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        match self {
            Acquisition::Granted { expiry } => Some(*expiry),
            Acquisition::Denied { .. } => None,
        }
    }

    /// The protocol pair `(allow, expiry)`.
    pub fn into_parts(self) -> (bool, DateTime<Utc>) {
        match self {
            Acquisition::Granted { expiry } => (true, expiry),
            Acquisition::Denied { .. } => (false, denied_expiry()),
        }
    }
}

/// Expiry reported alongside a denial (the Unix epoch). Callers must ignore it.
pub fn denied_expiry() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Result of a release request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Release {
    /// The possessor no longer holds the identity.
    Gone,
    /// The possessor still holds it; nothing changed.
    Retained { reason: String },
}

impl Release {
    pub fn retained(reason: impl Into<String>) -> Self {
        Self::Retained {
            reason: reason.into(),
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Release::Gone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_uses_sentinel_expiry() {
        let (allow, expiry) = Acquisition::denied("nope").into_parts();
        assert!(!allow);
        assert_eq!(expiry.timestamp(), 0);
    }

    #[test]
    fn grant_exposes_expiry() {
        let at = Utc::now();
        let grant = Acquisition::Granted { expiry: at };
        assert!(grant.is_allowed());
        assert_eq!(grant.expiry(), Some(at));
        assert_eq!(grant.into_parts(), (true, at));
    }

    #[test]
    fn release_outcomes() {
        assert!(Release::Gone.is_gone());
        assert!(!Release::retained("bad signature").is_gone());
    }
}
