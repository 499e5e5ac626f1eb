//! Pre-approval policy.
//!
//! A trusted approver (typically an off-chain service that has already
//! checked whatever the policy requires) submits batches of approved
//! requests. An acquisition succeeds only by consuming a matching pending
//! approval; a release succeeds only by consuming a pending release
//! approval, or after the approver revoked the grant outright.

use super::{Grant, PairKey};
use crate::{
    AcquireRequest, Acquisition, Account, Capabilities, CapabilityId, Clock, IdentityId,
    Negotiation, Permitter, Release, ReleaseRequest, Result, SystemClock, capability,
    negotiation::add_saturating,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// One approved acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Approval {
    pub identity: IdentityId,
    pub requester: Account,
    /// Longest lifetime the approver agreed to.
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct State {
    acquisitions: HashMap<PairKey, Duration>,
    releases: HashSet<PairKey>,
    grants: HashMap<PairKey, Grant<()>>,
}

impl State {
    fn active(&mut self, key: &PairKey, now: DateTime<Utc>) -> bool {
        match self.grants.get(key) {
            Some(grant) if grant.expiry > now => true,
            Some(_) => {
                self.grants.remove(key);
                false
            }
            None => false,
        }
    }
}

/// Grants only what an approver approved beforehand.
///
/// Negotiation: [`Negotiation::Capped`] at the configured maximum, further
/// bounded by the approved duration.
pub struct ApprovalPermitter {
    max_secs: u64,
    clock: Arc<dyn Clock>,
    // Every decision is one short critical section with no awaits.
    state: Mutex<State>,
}

impl ApprovalPermitter {
    pub fn new(max_secs: u64) -> Self {
        Self::with_clock(max_secs, Arc::new(SystemClock))
    }

    pub fn with_clock(max_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_secs,
            clock,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue approved acquisitions. A later approval for the same pair
    /// replaces an unconsumed earlier one.
    pub fn approve_requests(&self, approvals: &[Approval]) {
        let mut state = self.state();
        for a in approvals {
            state
                .acquisitions
                .insert((a.identity, a.requester), a.duration);
        }
        info!(count = approvals.len(), "acquisitions approved");
    }

    /// Queue approved releases.
    pub fn approve_releases(&self, pairs: &[(IdentityId, Account)]) {
        let mut state = self.state();
        state.releases.extend(pairs.iter().copied());
        info!(count = pairs.len(), "releases approved");
    }

    /// Revoke a grant without waiting for a release request. Returns whether
    /// a live grant was removed.
    pub fn revoke(&self, identity: IdentityId, account: Account) -> bool {
        let now = self.clock.now();
        let mut state = self.state();
        let key = (identity, account);
        let live = state.active(&key, now);
        state.grants.remove(&key);
        state.acquisitions.remove(&key);
        if live {
            info!(%identity, %account, "grant revoked");
        }
        live
    }
}

impl Capabilities for ApprovalPermitter {
    fn implemented(&self) -> Vec<CapabilityId> {
        vec![*capability::PERMITTER, *capability::APPROVER]
    }
}

impl Permitter for ApprovalPermitter {
    fn negotiation(&self) -> Negotiation {
        Negotiation::Capped {
            max_secs: self.max_secs,
        }
    }

    async fn acquire_identity(&self, request: &AcquireRequest) -> Result<Acquisition> {
        let now = self.clock.now();
        let key = (request.identity, request.requester);
        let mut state = self.state();

        let Some(approved) = state.acquisitions.remove(&key) else {
            return Ok(Acquisition::denied("no pending approval"));
        };
        let expiry =
            self.negotiation()
                .expiry(now, request.duration, Some(add_saturating(now, approved)));
        state.grants.insert(key, Grant { expiry, proof: () });
        Ok(Acquisition::Granted { expiry })
    }

    async fn release_identity(&self, request: &ReleaseRequest) -> Result<Release> {
        let now = self.clock.now();
        let key = (request.identity, request.possessor);
        let mut state = self.state();

        if !state.active(&key, now) {
            state.releases.remove(&key);
            return Ok(Release::Gone);
        }
        if !state.releases.remove(&key) {
            return Ok(Release::retained("release not approved"));
        }
        state.grants.remove(&key);
        Ok(Release::Gone)
    }
}
