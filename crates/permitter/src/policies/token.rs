//! One-time token policy.
//!
//! An identity is configured with the SHA-256 digests of the tokens that may
//! acquire it. Presenting a token consumes it for that identity; the same
//! token must be presented again to release the resulting permit.

use super::{Grant, Grants, digest};
use crate::state::{decode_digest, encode_digest, foreign};
use crate::{
    AcquireRequest, Acquisition, Capabilities, CapabilityId, Clock, Configurable, Error,
    GrantRecord, IdentityId, KeyedLocks, Negotiation, Permitter, Persistent, PolicyState, Release,
    ReleaseRequest, Result, Spent, SystemClock, capability,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

type TokenDigest = [u8; 32];

/// Grants an identity to whoever presents one of its unused tokens.
///
/// Negotiation: [`Negotiation::Capped`] at the configured maximum.
pub struct TokenPermitter {
    max_secs: u64,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<IdentityId>,
    issued: Mutex<HashMap<IdentityId, HashSet<TokenDigest>>>,
    consumed: Mutex<HashSet<(IdentityId, TokenDigest)>>,
    grants: Grants<TokenDigest>,
}

impl TokenPermitter {
    pub fn new(max_secs: u64) -> Self {
        Self::with_clock(max_secs, Arc::new(SystemClock))
    }

    pub fn with_clock(max_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_secs,
            clock,
            locks: KeyedLocks::new(),
            issued: Mutex::new(HashMap::new()),
            consumed: Mutex::new(HashSet::new()),
            grants: Grants::default(),
        }
    }

    /// Register a plaintext token for `identity`.
    pub fn issue(&self, identity: IdentityId, token: &[u8]) {
        self.add_digests(identity, [digest(token)]);
    }

    fn add_digests(&self, identity: IdentityId, digests: impl IntoIterator<Item = TokenDigest>) {
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        issued.entry(identity).or_default().extend(digests);
    }

    fn is_issued(&self, identity: &IdentityId, token: &TokenDigest) -> bool {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .is_some_and(|set| set.contains(token))
    }
}

impl Capabilities for TokenPermitter {
    fn implemented(&self) -> Vec<CapabilityId> {
        vec![*capability::PERMITTER, *capability::CONFIGURABLE]
    }
}

impl Permitter for TokenPermitter {
    fn negotiation(&self) -> Negotiation {
        Negotiation::Capped {
            max_secs: self.max_secs,
        }
    }

    async fn acquire_identity(&self, request: &AcquireRequest) -> Result<Acquisition> {
        if request.authorization.is_empty() {
            return Ok(Acquisition::denied("no token presented"));
        }

        let _guard = self.locks.lock(request.identity).await;
        let token = digest(request.authorization.as_bytes());

        // Single critical section for the check and the consumption.
        {
            let mut consumed = self.consumed.lock().unwrap_or_else(|e| e.into_inner());
            if consumed.contains(&(request.identity, token)) {
                debug!(identity = %request.identity, "token replay refused");
                return Ok(Acquisition::denied("token already consumed"));
            }
            if !self.is_issued(&request.identity, &token) {
                return Ok(Acquisition::denied("unknown token"));
            }
            consumed.insert((request.identity, token));
        }

        let expiry = self
            .negotiation()
            .expiry(self.clock.now(), request.duration, None);
        self.grants.insert(
            (request.identity, request.requester),
            Grant {
                expiry,
                proof: token,
            },
        );
        info!(identity = %request.identity, requester = %request.requester, %expiry, "token accepted");
        Ok(Acquisition::Granted { expiry })
    }

    async fn release_identity(&self, request: &ReleaseRequest) -> Result<Release> {
        let _guard = self.locks.lock(request.identity).await;
        let key = (request.identity, request.possessor);

        let Some(grant) = self.grants.active(&key, self.clock.now()) else {
            return Ok(Release::Gone);
        };
        if digest(request.authorization.as_bytes()) != grant.proof {
            return Ok(Release::retained("release token does not match"));
        }
        self.grants.remove(&key);
        Ok(Release::Gone)
    }
}

impl Configurable for TokenPermitter {
    /// `config` is a concatenation of 32-byte token digests.
    async fn configure_identity(&self, identity: IdentityId, config: &[u8]) -> Result<()> {
        if config.is_empty() || config.len() % 32 != 0 {
            return Err(Error::MalformedConfig(format!(
                "token config must be a non-empty multiple of 32 bytes, got {}",
                config.len()
            )));
        }
        let digests = config.chunks_exact(32).map(|chunk| {
            let mut d = [0u8; 32];
            d.copy_from_slice(chunk);
            d
        });
        self.add_digests(identity, digests);
        Ok(())
    }
}

impl Persistent for TokenPermitter {
    fn snapshot(&self) -> PolicyState {
        let spent = self
            .consumed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(identity, digest)| Spent::Token {
                identity: *identity,
                digest: encode_digest(digest),
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
                proof: Some(encode_digest(&grant.proof)),
            })
            .collect();
        PolicyState { spent, grants }
    }

    fn restore(&self, state: PolicyState) -> Result<()> {
        let mut consumed = Vec::with_capacity(state.spent.len());
        for spent in &state.spent {
            match spent {
                Spent::Token { identity, digest } => {
                    consumed.push((*identity, decode_digest(digest)?));
                }
                other => return Err(foreign("token", other)),
            }
        }
        let mut grants = Vec::with_capacity(state.grants.len());
        for record in state.grants {
            let proof = record.proof.as_deref().ok_or_else(|| {
                Error::MalformedConfig(format!("token grant for {} has no proof", record.identity))
            })?;
            grants.push((
                (record.identity, record.account),
                Grant {
                    expiry: record.expiry,
                    proof: decode_digest(proof)?,
                },
            ));
        }

        self.consumed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(consumed);
        for (key, grant) in grants {
            self.grants.insert(key, grant);
        }
        Ok(())
    }
}
