//! Ed25519 signature policy.
//!
//! Each identity is configured with the verifying key of the authority that
//! may hand it out. An authorization is an 8-byte big-endian nonce followed
//! by a 64-byte signature over a domain-separated message that binds the
//! identity, the account, the nonce and a digest of the context (plus the
//! requested duration for acquisitions). Nonces are single use per
//! `(identity, account)` across both operations.

use super::{Grant, Grants, PairKey, digest};
use crate::state::foreign;
use crate::{
    AcquireRequest, Acquisition, Account, Authorization, Capabilities, CapabilityId, Clock,
    Configurable, Context, Error, GrantRecord, IdentityId, KeyedLocks, Negotiation, Permitter,
    Persistent, PolicyState, Release, ReleaseRequest, Result, Spent, SystemClock, capability,
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const ACQUIRE_DOMAIN: &[u8] = b"permitter:acquire:v1\0";
const RELEASE_DOMAIN: &[u8] = b"permitter:release:v1\0";

const NONCE_LEN: usize = 8;
const AUTHORIZATION_LEN: usize = NONCE_LEN + Signature::BYTE_SIZE;

/// Bytes an authority signs to authorize an acquisition.
pub fn acquire_message(
    identity: &IdentityId,
    requester: &Account,
    duration: Duration,
    nonce: u64,
    context: &Context,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(ACQUIRE_DOMAIN.len() + 32 + 20 + 8 + 8 + 32);
    msg.extend_from_slice(ACQUIRE_DOMAIN);
    msg.extend_from_slice(identity.as_bytes());
    msg.extend_from_slice(requester.as_bytes());
    msg.extend_from_slice(&duration.as_secs().to_be_bytes());
    msg.extend_from_slice(&nonce.to_be_bytes());
    msg.extend_from_slice(&digest(context.as_bytes()));
    msg
}

/// Bytes an authority signs to authorize a release.
pub fn release_message(
    identity: &IdentityId,
    possessor: &Account,
    nonce: u64,
    context: &Context,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(RELEASE_DOMAIN.len() + 32 + 20 + 8 + 32);
    msg.extend_from_slice(RELEASE_DOMAIN);
    msg.extend_from_slice(identity.as_bytes());
    msg.extend_from_slice(possessor.as_bytes());
    msg.extend_from_slice(&nonce.to_be_bytes());
    msg.extend_from_slice(&digest(context.as_bytes()));
    msg
}

fn encode(nonce: u64, signature: Signature) -> Authorization {
    let mut bytes = Vec::with_capacity(AUTHORIZATION_LEN);
    bytes.extend_from_slice(&nonce.to_be_bytes());
    bytes.extend_from_slice(&signature.to_bytes());
    Authorization::new(bytes)
}

/// Sign an acquisition authorization.
pub fn authorize_acquire(
    key: &SigningKey,
    identity: &IdentityId,
    requester: &Account,
    duration: Duration,
    nonce: u64,
    context: &Context,
) -> Authorization {
    let msg = acquire_message(identity, requester, duration, nonce, context);
    encode(nonce, key.sign(&msg))
}

/// Sign a release authorization.
pub fn authorize_release(
    key: &SigningKey,
    identity: &IdentityId,
    possessor: &Account,
    nonce: u64,
    context: &Context,
) -> Authorization {
    let msg = release_message(identity, possessor, nonce, context);
    encode(nonce, key.sign(&msg))
}

fn decode(authorization: &Authorization) -> Result<(u64, Signature)> {
    let bytes = authorization.as_bytes();
    if bytes.len() != AUTHORIZATION_LEN {
        return Err(Error::MalformedAuthorization(format!(
            "expected {AUTHORIZATION_LEN} bytes (nonce || signature), got {}",
            bytes.len()
        )));
    }
    let (nonce, sig) = bytes.split_at(NONCE_LEN);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce);
    let signature = Signature::from_slice(sig)
        .map_err(|e| Error::MalformedAuthorization(e.to_string()))?;
    Ok((u64::from_be_bytes(nonce_bytes), signature))
}

/// Grants an identity to holders of a signature from its configured key.
///
/// Negotiation: [`Negotiation::Capped`] at the configured maximum. The
/// signed duration is the requested one, so an authority cannot be made to
/// sign for one lifetime and be charged for another.
pub struct SignaturePermitter {
    max_secs: u64,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<PairKey>,
    keys: Mutex<HashMap<IdentityId, VerifyingKey>>,
    nonces: Mutex<HashMap<PairKey, HashSet<u64>>>,
    grants: Grants<()>,
}

impl SignaturePermitter {
    pub fn new(max_secs: u64) -> Self {
        Self::with_clock(max_secs, Arc::new(SystemClock))
    }

    pub fn with_clock(max_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_secs,
            clock,
            locks: KeyedLocks::new(),
            keys: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            grants: Grants::default(),
        }
    }

    /// Set the authority key for `identity`, replacing any previous one.
    pub fn set_key(&self, identity: IdentityId, key: VerifyingKey) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity, key);
    }

    fn key(&self, identity: &IdentityId) -> Option<VerifyingKey> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .copied()
    }

    fn nonce_used(&self, key: &PairKey, nonce: u64) -> bool {
        self.nonces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|used| used.contains(&nonce))
    }

    fn record_nonce(&self, key: PairKey, nonce: u64) {
        self.nonces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .insert(nonce);
    }
}

impl Capabilities for SignaturePermitter {
    fn implemented(&self) -> Vec<CapabilityId> {
        vec![*capability::PERMITTER, *capability::CONFIGURABLE]
    }
}

impl Permitter for SignaturePermitter {
    fn negotiation(&self) -> Negotiation {
        Negotiation::Capped {
            max_secs: self.max_secs,
        }
    }

    async fn acquire_identity(&self, request: &AcquireRequest) -> Result<Acquisition> {
        let (nonce, signature) = decode(&request.authorization)?;
        let Some(authority) = self.key(&request.identity) else {
            return Ok(Acquisition::denied("identity has no configured authority"));
        };

        let msg = acquire_message(
            &request.identity,
            &request.requester,
            request.duration,
            nonce,
            &request.context,
        );
        if authority.verify_strict(&msg, &signature).is_err() {
            debug!(identity = %request.identity, "acquire signature rejected");
            return Ok(Acquisition::denied("invalid signature"));
        }

        let key = (request.identity, request.requester);
        let _guard = self.locks.lock(key).await;
        if self.nonce_used(&key, nonce) {
            debug!(identity = %request.identity, nonce, "nonce replay refused");
            return Ok(Acquisition::denied("nonce already used"));
        }
        self.record_nonce(key, nonce);

        let expiry = self
            .negotiation()
            .expiry(self.clock.now(), request.duration, None);
        self.grants.insert(key, Grant { expiry, proof: () });
        info!(identity = %request.identity, requester = %request.requester, %expiry, "signature accepted");
        Ok(Acquisition::Granted { expiry })
    }

    async fn release_identity(&self, request: &ReleaseRequest) -> Result<Release> {
        let key = (request.identity, request.possessor);
        let _guard = self.locks.lock(key).await;
        if self.grants.active(&key, self.clock.now()).is_none() {
            return Ok(Release::Gone);
        }

        let (nonce, signature) = decode(&request.authorization)?;
        let Some(authority) = self.key(&request.identity) else {
            return Ok(Release::retained("identity has no configured authority"));
        };
        let msg = release_message(&request.identity, &request.possessor, nonce, &request.context);
        if authority.verify_strict(&msg, &signature).is_err() {
            return Ok(Release::retained("invalid signature"));
        }
        if self.nonce_used(&key, nonce) {
            return Ok(Release::retained("nonce already used"));
        }

        self.record_nonce(key, nonce);
        self.grants.remove(&key);
        Ok(Release::Gone)
    }
}

impl Configurable for SignaturePermitter {
    /// `config` is the 32-byte Ed25519 verifying key of the authority.
    async fn configure_identity(&self, identity: IdentityId, config: &[u8]) -> Result<()> {
        let bytes: [u8; 32] = config.try_into().map_err(|_| {
            Error::MalformedConfig(format!(
                "expected a 32-byte verifying key, got {} bytes",
                config.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| Error::MalformedConfig(format!("invalid verifying key: {e}")))?;
        self.set_key(identity, key);
        Ok(())
    }
}

impl Persistent for SignaturePermitter {
    fn snapshot(&self) -> PolicyState {
        let spent = self
            .nonces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .flat_map(|((identity, account), nonces)| {
                nonces.iter().map(|nonce| Spent::Nonce {
                    identity: *identity,
                    account: *account,
                    nonce: *nonce,
                })
            })
            .collect();
        let grants = self
            .grants
            .live(self.clock.now())
            .into_iter()
            .map(|((identity, account), grant)| GrantRecord {
                identity,
                account,
                expiry: grant.expiry,
                proof: None,
            })
            .collect();
        PolicyState { spent, grants }
    }

    fn restore(&self, state: PolicyState) -> Result<()> {
        let mut nonces = Vec::with_capacity(state.spent.len());
        for spent in &state.spent {
            match spent {
                Spent::Nonce {
                    identity,
                    account,
                    nonce,
                } => nonces.push(((*identity, *account), *nonce)),
                other => return Err(foreign("signature", other)),
            }
        }
        for (key, nonce) in nonces {
            self.record_nonce(key, nonce);
        }
        for record in state.grants {
            self.grants.insert(
                (record.identity, record.account),
                Grant {
                    expiry: record.expiry,
                    proof: (),
                },
            );
        }
        Ok(())
    }
}
