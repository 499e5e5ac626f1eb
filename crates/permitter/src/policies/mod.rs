//! Concrete permitter policies.
//!
//! Each policy implements the same acquire/release contract with its own
//! private state. None of them is a ledger: they remember only what they
//! need to refuse replays and to judge whether a possessor is still valid.

mod approval;
mod remote;
mod signature;
mod token;

pub use approval::{Approval, ApprovalPermitter};
pub use remote::{
    BackendQuery, BackendVerdict, DEFAULT_BACKEND_TIMEOUT, DecisionBackend, Operation,
    RemotePermitter,
};
pub use signature::{
    SignaturePermitter, authorize_acquire, authorize_release, acquire_message, release_message,
};
pub use token::TokenPermitter;

use crate::{Account, IdentityId};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

pub(crate) type PairKey = (IdentityId, Account);

pub(crate) fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// A grant a policy remembers so it can judge later releases.
#[derive(Debug, Clone)]
pub(crate) struct Grant<T> {
    pub expiry: DateTime<Utc>,
    pub proof: T,
}

/// Grants keyed by `(identity, account)`; expired entries are pruned lazily.
#[derive(Debug)]
pub(crate) struct Grants<T> {
    inner: Mutex<HashMap<PairKey, Grant<T>>>,
}

impl<T> Default for Grants<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> Grants<T> {
    /// The grant for `key` if it is still in force at `now`.
    pub fn active(&self, key: &PairKey, now: DateTime<Utc>) -> Option<Grant<T>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(key) {
            Some(grant) if grant.expiry > now => Some(grant.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: PairKey, grant: Grant<T>) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, grant);
    }

    /// Every grant still in force at `now`.
    pub fn live(&self, now: DateTime<Utc>) -> Vec<(PairKey, Grant<T>)> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, grant)| grant.expiry > now)
            .map(|(key, grant)| (*key, grant.clone()))
            .collect()
    }

    pub fn remove(&self, key: &PairKey) -> Option<Grant<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }
}
