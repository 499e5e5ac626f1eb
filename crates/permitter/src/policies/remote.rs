//! Delegation to an external decision backend.
//!
//! The backend sees the same context and authorization the permitter
//! received and answers with a verdict. Every call runs under an explicit
//! timeout; a timeout, an unreachable backend or an unreadable answer is a
//! denial (or a refused release), never a grant.

use super::{Grant, Grants, PairKey, digest};
use crate::state::{decode_digest, encode_digest, foreign};
use crate::{
    AcquireRequest, Acquisition, Account, Authorization, BackendError, Capabilities,
    CapabilityId, Clock, Context, GrantRecord, IdentityId, KeyedLocks, Negotiation, Permitter,
    Persistent, PolicyState, Release, ReleaseRequest, Result, Spent, SystemClock, capability,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Default time a backend has to answer.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Acquire,
    Release,
}

/// What the permitter asks its backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendQuery {
    pub operation: Operation,
    pub identity: IdentityId,
    pub account: Account,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    pub context: Context,
    pub authorization: Authorization,
}

/// What the backend answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendVerdict {
    pub allow: bool,
    /// Upper bound on the lifetime, in seconds.
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
    /// Absolute deadline, e.g. the expiry of the backing secret.
    #[serde(default)]
    pub not_after: Option<DateTime<Utc>>,
}

impl BackendVerdict {
    pub fn allow() -> Self {
        Self {
            allow: true,
            max_duration_secs: None,
            not_after: None,
        }
    }

    pub fn deny() -> Self {
        Self {
            allow: false,
            ..Self::allow()
        }
    }
}

/// An external service that reduces a query to allow/deny.
pub trait DecisionBackend: Send + Sync {
    fn decide(
        &self,
        query: &BackendQuery,
    ) -> impl Future<Output = std::result::Result<BackendVerdict, BackendError>> + Send;
}

/// Grants whatever its backend allows, within a lifetime cap.
///
/// Negotiation: [`Negotiation::Capped`] at the configured maximum, further
/// bounded by the verdict's `max_duration_secs` and `not_after`.
pub struct RemotePermitter<B> {
    backend: B,
    max_secs: u64,
    timeout: Duration,
    single_use: bool,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<PairKey>,
    used: Mutex<HashSet<(IdentityId, Account, [u8; 32])>>,
    grants: Grants<()>,
}

impl<B: DecisionBackend> RemotePermitter<B> {
    pub fn new(backend: B, max_secs: u64) -> Self {
        Self {
            backend,
            max_secs,
            timeout: DEFAULT_BACKEND_TIMEOUT,
            single_use: true,
            clock: Arc::new(SystemClock),
            locks: KeyedLocks::new(),
            used: Mutex::new(HashSet::new()),
            grants: Grants::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a granted authorization may be presented again by the same
    /// requester for the same identity. Defaults to single use.
    pub fn with_single_use(mut self, single_use: bool) -> Self {
        self.single_use = single_use;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn ask(&self, query: &BackendQuery) -> std::result::Result<BackendVerdict, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.decide(query)).await {
            Ok(answer) => answer,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }
}

impl<B: DecisionBackend> Capabilities for RemotePermitter<B> {
    fn implemented(&self) -> Vec<CapabilityId> {
        vec![*capability::PERMITTER]
    }
}

impl<B: DecisionBackend> Permitter for RemotePermitter<B> {
    fn negotiation(&self) -> Negotiation {
        Negotiation::Capped {
            max_secs: self.max_secs,
        }
    }

    async fn acquire_identity(&self, request: &AcquireRequest) -> Result<Acquisition> {
        let key = (request.identity, request.requester);
        let _guard = self.locks.lock(key).await;

        let fingerprint = (
            request.identity,
            request.requester,
            digest(request.authorization.as_bytes()),
        );
        let replayed = self.single_use
            && self
                .used
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&fingerprint);
        if replayed {
            debug!(identity = %request.identity, "authorization replay refused");
            return Ok(Acquisition::denied("authorization already used"));
        }

        let query = BackendQuery {
            operation: Operation::Acquire,
            identity: request.identity,
            account: request.requester,
            duration_secs: Some(request.duration.as_secs()),
            context: request.context.clone(),
            authorization: request.authorization.clone(),
        };
        let verdict = match self.ask(&query).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(identity = %request.identity, error = %e, "backend failed, denying");
                return Ok(Acquisition::denied(e.to_string()));
            }
        };
        if !verdict.allow {
            return Ok(Acquisition::denied("backend refused"));
        }

        if self.single_use {
            self.used
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(fingerprint);
        }
        let requested = match verdict.max_duration_secs {
            Some(max) => request.duration.min(Duration::from_secs(max)),
            None => request.duration,
        };
        let expiry = self
            .negotiation()
            .expiry(self.clock.now(), requested, verdict.not_after);
        self.grants.insert(key, Grant { expiry, proof: () });
        Ok(Acquisition::Granted { expiry })
    }

    async fn release_identity(&self, request: &ReleaseRequest) -> Result<Release> {
        let key = (request.identity, request.possessor);
        let _guard = self.locks.lock(key).await;
        if self.grants.active(&key, self.clock.now()).is_none() {
            return Ok(Release::Gone);
        }

        let query = BackendQuery {
            operation: Operation::Release,
            identity: request.identity,
            account: request.possessor,
            duration_secs: None,
            context: request.context.clone(),
            authorization: request.authorization.clone(),
        };
        match self.ask(&query).await {
            Ok(verdict) if verdict.allow => {
                self.grants.remove(&key);
                Ok(Release::Gone)
            }
            Ok(_) => Ok(Release::retained("backend refused")),
            Err(e) => {
                warn!(identity = %request.identity, error = %e, "backend failed, keeping grant");
                Ok(Release::retained(e.to_string()))
            }
        }
    }
}

impl<B> Persistent for RemotePermitter<B> {
    fn snapshot(&self) -> PolicyState {
        let spent = self
            .used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(identity, account, fingerprint)| Spent::Authorization {
                identity: *identity,
                account: *account,
                digest: encode_digest(fingerprint),
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
        let mut used = Vec::with_capacity(state.spent.len());
        for spent in &state.spent {
            match spent {
                Spent::Authorization {
                    identity,
                    account,
                    digest,
                } => used.push((*identity, *account, decode_digest(digest)?)),
                other => return Err(foreign("remote", other)),
            }
        }
        self.used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(used);
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Allows when the authorization equals `secret`; counts calls.
    struct Scripted {
        secret: Vec<u8>,
        delay: Duration,
        calls: AtomicUsize,
        verdict: BackendVerdict,
    }

    impl Scripted {
        fn new(secret: &[u8]) -> Self {
            Self {
                secret: secret.to_vec(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                verdict: BackendVerdict::allow(),
            }
        }
    }

    impl DecisionBackend for Scripted {
        async fn decide(
            &self,
            query: &BackendQuery,
        ) -> std::result::Result<BackendVerdict, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if query.authorization.as_bytes() == self.secret.as_slice() {
                Ok(self.verdict.clone())
            } else {
                Ok(BackendVerdict::deny())
            }
        }
    }

    struct Broken;

    impl DecisionBackend for Broken {
        async fn decide(
            &self,
            _query: &BackendQuery,
        ) -> std::result::Result<BackendVerdict, BackendError> {
            Err(BackendError::Unavailable("connection refused".into()))
        }
    }

    const ID: IdentityId = IdentityId([2; 32]);
    const BOB: Account = Account([0xb0; 20]);

    fn acquire(auth: &[u8], secs: u64) -> AcquireRequest {
        AcquireRequest::new(ID, BOB, Duration::from_secs(secs)).with_authorization(auth)
    }

    #[tokio::test]
    async fn backend_allow_grants() {
        let p = RemotePermitter::new(Scripted::new(b"ok"), 3600);
        assert!(p.acquire_identity(&acquire(b"ok", 60)).await.unwrap().is_allowed());
        assert!(!p.acquire_identity(&acquire(b"no", 60)).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn replay_is_refused_locally() {
        let p = RemotePermitter::new(Scripted::new(b"ok"), 3600);
        p.acquire_identity(&acquire(b"ok", 60)).await.unwrap();
        let replay = p.acquire_identity(&acquire(b"ok", 60)).await.unwrap();
        assert_eq!(replay, Acquisition::denied("authorization already used"));
        assert_eq!(p.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restored_state_refuses_replay() {
        let p = RemotePermitter::new(Scripted::new(b"ok"), 3600);
        p.acquire_identity(&acquire(b"ok", 600)).await.unwrap();

        let fresh = RemotePermitter::new(Scripted::new(b"ok"), 3600);
        fresh.restore(p.snapshot()).unwrap();
        let replay = fresh.acquire_identity(&acquire(b"ok", 60)).await.unwrap();
        assert_eq!(replay, Acquisition::denied("authorization already used"));
        assert_eq!(fresh.backend().calls.load(Ordering::SeqCst), 0);

        let bare = ReleaseRequest::new(ID, BOB);
        assert!(!fresh.release_identity(&bare).await.unwrap().is_gone());
    }

    #[tokio::test]
    async fn reuse_allowed_when_not_single_use() {
        let p = RemotePermitter::new(Scripted::new(b"ok"), 3600).with_single_use(false);
        p.acquire_identity(&acquire(b"ok", 60)).await.unwrap();
        assert!(p.acquire_identity(&acquire(b"ok", 60)).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn timeout_denies() {
        let mut backend = Scripted::new(b"ok");
        backend.delay = Duration::from_secs(10);
        let p = RemotePermitter::new(backend, 3600).with_timeout(Duration::from_millis(20));
        let decision = p.acquire_identity(&acquire(b"ok", 60)).await.unwrap();
        assert!(!decision.is_allowed());

        // A timed-out attempt does not burn the authorization.
        assert!(p.used.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_backend_denies() {
        let p = RemotePermitter::new(Broken, 3600);
        let decision = p.acquire_identity(&acquire(b"ok", 60)).await.unwrap();
        assert!(!decision.is_allowed());
    }

    #[tokio::test]
    async fn verdict_bounds_lifetime() {
        let mut backend = Scripted::new(b"ok");
        backend.verdict.max_duration_secs = Some(30);
        let p = RemotePermitter::new(backend, 3600);
        let before = Utc::now();
        let grant = p.acquire_identity(&acquire(b"ok", 600)).await.unwrap();
        let expiry = grant.expiry().unwrap();
        assert!(expiry <= Utc::now() + chrono::Duration::seconds(30));
        assert!(expiry >= before + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn release_refused_by_backend_keeps_grant() {
        let p = RemotePermitter::new(Scripted::new(b"ok"), 3600);
        p.acquire_identity(&acquire(b"ok", 600)).await.unwrap();

        let bad = ReleaseRequest::new(ID, BOB).with_authorization(&b"nope"[..]);
        assert!(!p.release_identity(&bad).await.unwrap().is_gone());

        let good = ReleaseRequest::new(ID, BOB).with_authorization(&b"ok"[..]);
        assert!(p.release_identity(&good).await.unwrap().is_gone());
        assert!(p.release_identity(&good).await.unwrap().is_gone());
    }

    #[tokio::test]
    async fn release_of_unknown_possessor_skips_backend() {
        let p = RemotePermitter::new(Scripted::new(b"ok"), 3600);
        let release = ReleaseRequest::new(ID, BOB);
        assert!(p.release_identity(&release).await.unwrap().is_gone());
        assert_eq!(p.backend().calls.load(Ordering::SeqCst), 0);
    }
}
