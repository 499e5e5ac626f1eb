//! Exportable policy state.
//!
//! A policy's replay and release bookkeeping lives in memory. A process that
//! makes one decision and exits (a CLI invocation) must carry that state to
//! the next one, or a consumed token would be accepted again. [`Persistent`]
//! exports it as a [`PolicyState`] and restores it later.

use crate::{Account, Error, IdentityId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single-use proof a policy has already accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Spent {
    /// A token digest consumed for an identity.
    Token { identity: IdentityId, digest: String },
    /// A signature nonce used by an account.
    Nonce {
        identity: IdentityId,
        account: Account,
        nonce: u64,
    },
    /// The digest of an authorization a backend accepted.
    Authorization {
        identity: IdentityId,
        account: Account,
        digest: String,
    },
}

/// A grant the policy still needs to judge releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub identity: IdentityId,
    pub account: Account,
    pub expiry: DateTime<Utc>,
    /// Hex digest the release must match, for token grants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

/// Everything a policy must remember between decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState {
    #[serde(default)]
    pub spent: Vec<Spent>,
    #[serde(default)]
    pub grants: Vec<GrantRecord>,
}

impl PolicyState {
    pub fn is_empty(&self) -> bool {
        self.spent.is_empty() && self.grants.is_empty()
    }
}

/// A policy whose state can be exported and restored.
pub trait Persistent {
    fn snapshot(&self) -> PolicyState;

    /// Merge `state` into the policy. State of another policy's shape is
    /// rejected with [`Error::MalformedConfig`].
    fn restore(&self, state: PolicyState) -> Result<()>;
}

pub(crate) fn encode_digest(digest: &[u8; 32]) -> String {
    hex::encode(digest)
}

pub(crate) fn decode_digest(s: &str) -> Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes)
        .map_err(|e| Error::Parse(format!("digest: expected 32 hex bytes: {e}")))?;
    Ok(bytes)
}

pub(crate) fn foreign(policy: &str, spent: &Spent) -> Error {
    Error::MalformedConfig(format!("{policy} policy cannot restore {spent:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_hex_is_checked() {
        let digest = [7u8; 32];
        assert_eq!(decode_digest(&encode_digest(&digest)).unwrap(), digest);
        assert!(matches!(decode_digest("abcd"), Err(Error::Parse(_))));
    }

    #[test]
    fn spent_entries_are_tagged() {
        let spent = Spent::Nonce {
            identity: IdentityId([1; 32]),
            account: Account([2; 20]),
            nonce: 9,
        };
        let json = serde_json::to_value(&spent).unwrap();
        assert_eq!(json["kind"], "nonce");
        assert_eq!(json["nonce"], 9);
        let back: Spent = serde_json::from_value(json).unwrap();
        assert_eq!(back, spent);
    }
}
