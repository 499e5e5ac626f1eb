//! The ledger of who holds which identity, and until when.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use permitter::{
    AcquireRequest, Account, Acquisition, CapabilityId, Clock, IdentityId, KeyedLocks, Permitter,
    Release, ReleaseRequest, SystemClock, add_saturating, capability,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use storage::{DecisionLog, Event, EventKind};
use tracing::{debug, info, warn};

/// Default upper bound on any permit the registry records (24 hours).
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Where a `(identity, account)` pair stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitState {
    NoDecisionMade,
    Granted { expiry: DateTime<Utc> },
    Expired { at: DateTime<Utc> },
    Released { at: DateTime<Utc> },
}

impl std::fmt::Display for PermitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermitState::NoDecisionMade => write!(f, "no decision made"),
            PermitState::Granted { expiry } => write!(f, "granted until {}", expiry.to_rfc3339()),
            PermitState::Expired { at } => write!(f, "expired at {}", at.to_rfc3339()),
            PermitState::Released { at } => write!(f, "released at {}", at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Record {
    Granted { expiry: DateTime<Utc> },
    Released { at: DateTime<Utc> },
}

type PairKey = (IdentityId, Account);

/// Binds identities to permitters and records what they decide.
///
/// Capability support is verified once, in [`Registry::bind`]. Each
/// `(identity, account)` pair is serialized through its own lock, so the
/// permitter call and the ledger update form a single step.
///
/// The lifetime clamp applies to the registry's own record only. A
/// permitter keeps the grant it made, at the expiry it chose, and goes on
/// judging releases by it. Once the clamped expiry passes the registry
/// reports [`PermitState::Expired`], yet the permitter still treats the
/// holder as valid and refuses an unauthorized release until its own
/// expiry. Signed and remote grants cannot be shortened from outside,
/// since the authorization binds the requested duration.
pub struct Registry<P> {
    bindings: RwLock<HashMap<IdentityId, Arc<P>>>,
    records: Mutex<HashMap<PairKey, Record>>,
    locks: KeyedLocks<PairKey>,
    clock: Arc<dyn Clock>,
    max_lifetime: Duration,
    log: Option<Mutex<DecisionLog>>,
}

impl<P: Permitter> Default for Registry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Permitter> Registry<P> {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            locks: KeyedLocks::new(),
            clock: Arc::new(SystemClock),
            max_lifetime: DEFAULT_MAX_LIFETIME,
            log: None,
        }
    }

    /// Cap every recorded expiry at `now + max_lifetime`.
    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Append every binding and decision to `log`.
    pub fn with_log(mut self, log: DecisionLog) -> Self {
        self.log = Some(Mutex::new(log));
        self
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    /// Put `identity` under the governance of `permitter`.
    ///
    /// The permitter must report the permitter capability and must not
    /// claim the reserved invalid id; otherwise nothing is bound.
    pub fn bind(&self, identity: IdentityId, permitter: Arc<P>) -> Result<()> {
        if permitter.supports_capability(CapabilityId::INVALID) {
            warn!(%identity, "permitter claims the invalid capability id");
            return Err(permitter::Error::CapabilityNotSupported(CapabilityId::INVALID).into());
        }
        if !permitter.supports_capability(*capability::PERMITTER) {
            warn!(%identity, "permitter does not support the permitter capability");
            return Err(permitter::Error::CapabilityNotSupported(*capability::PERMITTER).into());
        }

        let previous = self
            .bindings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity, permitter);
        info!(%identity, rebound = previous.is_some(), "permitter bound");
        self.record(Event::at(identity, None, self.clock.now(), EventKind::Bound));
        Ok(())
    }

    /// The permitter governing `identity`, if any.
    pub fn permitter(&self, identity: &IdentityId) -> Option<Arc<P>> {
        self.bindings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }

    pub fn is_bound(&self, identity: &IdentityId) -> bool {
        self.permitter(identity).is_some()
    }

    /// Ask the governing permitter for a permit and record the outcome.
    ///
    /// A granted expiry beyond `now + max_lifetime` is shortened to it; the
    /// returned acquisition carries the expiry actually recorded. The
    /// permitter is not told (see the type-level docs).
    pub async fn acquire(&self, request: &AcquireRequest) -> Result<Acquisition> {
        let permitter = self
            .permitter(&request.identity)
            .ok_or(Error::NotBound(request.identity))?;
        let key = (request.identity, request.requester);
        let _guard = self.locks.lock(key).await;

        let decision = match permitter.acquire_identity(request).await {
            Ok(decision) => decision,
            Err(e) => {
                self.fault(request.identity, request.requester, "acquire", &e);
                return Err(e.into());
            }
        };

        let now = self.clock.now();
        match decision {
            Acquisition::Granted { expiry } => {
                let cap = add_saturating(now, self.max_lifetime);
                let expiry = if expiry > cap {
                    warn!(
                        identity = %request.identity,
                        granted = %expiry,
                        recorded = %cap,
                        "permitter lengthened the lifetime beyond the registry cap; clamped"
                    );
                    cap
                } else {
                    expiry
                };
                self.records
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key, Record::Granted { expiry });
                info!(identity = %request.identity, requester = %request.requester, %expiry, "permit granted");
                self.record(Event::at(
                    request.identity,
                    Some(request.requester),
                    now,
                    EventKind::Acquired {
                        requested_secs: request.duration.as_secs(),
                        expiry,
                    },
                ));
                Ok(Acquisition::Granted { expiry })
            }
            Acquisition::Denied { reason } => {
                debug!(identity = %request.identity, requester = %request.requester, %reason, "permit denied");
                self.record(Event::at(
                    request.identity,
                    Some(request.requester),
                    now,
                    EventKind::AcquireDenied {
                        reason: reason.clone(),
                    },
                ));
                Ok(Acquisition::Denied { reason })
            }
        }
    }

    /// Ask the governing permitter to release a possessor and record the
    /// outcome. A retained possessor's record is left untouched.
    pub async fn release(&self, request: &ReleaseRequest) -> Result<Release> {
        let permitter = self
            .permitter(&request.identity)
            .ok_or(Error::NotBound(request.identity))?;
        let key = (request.identity, request.possessor);
        let _guard = self.locks.lock(key).await;

        let decision = match permitter.release_identity(request).await {
            Ok(decision) => decision,
            Err(e) => {
                self.fault(request.identity, request.possessor, "release", &e);
                return Err(e.into());
            }
        };

        let now = self.clock.now();
        match &decision {
            Release::Gone => {
                {
                    let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
                    let held = matches!(
                        records.get(&key),
                        Some(Record::Granted { expiry }) if *expiry > now
                    );
                    if held {
                        records.insert(key, Record::Released { at: now });
                    }
                }
                info!(identity = %request.identity, possessor = %request.possessor, "permit released");
                self.record(Event::at(
                    request.identity,
                    Some(request.possessor),
                    now,
                    EventKind::Released,
                ));
            }
            Release::Retained { reason } => {
                debug!(identity = %request.identity, possessor = %request.possessor, %reason, "release refused");
                self.record(Event::at(
                    request.identity,
                    Some(request.possessor),
                    now,
                    EventKind::ReleaseRefused {
                        reason: reason.clone(),
                    },
                ));
            }
        }
        Ok(decision)
    }

    /// Where `(identity, account)` stands right now.
    pub fn permit_state(&self, identity: IdentityId, account: Account) -> PermitState {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match records.get(&(identity, account)) {
            None => PermitState::NoDecisionMade,
            Some(Record::Released { at }) => PermitState::Released { at: *at },
            Some(Record::Granted { expiry }) if *expiry > self.clock.now() => {
                PermitState::Granted { expiry: *expiry }
            }
            Some(Record::Granted { expiry }) => PermitState::Expired { at: *expiry },
        }
    }

    /// Events recorded for `identity`, oldest first, optionally of one kind.
    pub fn history(&self, identity: IdentityId, kind: Option<&str>) -> Result<Vec<Event>> {
        match &self.log {
            Some(log) => Ok(log
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .load_identity(identity, kind)?),
            None => Ok(Vec::new()),
        }
    }

    fn fault(&self, identity: IdentityId, account: Account, operation: &str, e: &permitter::Error) {
        warn!(%identity, %account, operation, error = %e, "permitter fault");
        self.record(Event::at(
            identity,
            Some(account),
            self.clock.now(),
            EventKind::Fault {
                operation: operation.to_string(),
                message: e.to_string(),
            },
        ));
    }

    // The decision stands even when it cannot be logged.
    fn record(&self, event: Event) {
        let Some(log) = &self.log else {
            return;
        };
        if let Err(e) = log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append(&event)
        {
            warn!(identity = %event.identity, kind = event.kind.name(), error = %e, "failed to log decision");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use permitter::policies::{
        Approval, ApprovalPermitter, BackendQuery, BackendVerdict, DecisionBackend,
        RemotePermitter, SignaturePermitter, TokenPermitter,
    };
    use permitter::{BackendError, Capabilities, ManualClock, Negotiation};

    const IDENTITY: IdentityId = IdentityId([0x10; 32]);
    const HOLDER: Account = Account([0x20; 20]);

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn token_request(token: &[u8], secs: u64) -> AcquireRequest {
        AcquireRequest::new(IDENTITY, HOLDER, Duration::from_secs(secs)).with_authorization(token)
    }

    /// Claims nothing, so it must never be bound.
    struct Impostor;

    impl Capabilities for Impostor {
        fn implemented(&self) -> Vec<CapabilityId> {
            Vec::new()
        }
    }

    impl Permitter for Impostor {
        fn negotiation(&self) -> Negotiation {
            Negotiation::FixedWindow { secs: 1 }
        }

        async fn acquire_identity(&self, _: &AcquireRequest) -> permitter::Result<Acquisition> {
            Ok(Acquisition::Granted { expiry: Utc::now() })
        }

        async fn release_identity(&self, _: &ReleaseRequest) -> permitter::Result<Release> {
            Ok(Release::Gone)
        }
    }

    struct Generous;

    impl DecisionBackend for Generous {
        async fn decide(
            &self,
            _: &BackendQuery,
        ) -> std::result::Result<BackendVerdict, BackendError> {
            Ok(BackendVerdict::allow())
        }
    }

    #[test]
    fn refuses_to_bind_without_permitter_capability() {
        let registry = Registry::new();
        let err = registry.bind(IDENTITY, Arc::new(Impostor)).unwrap_err();
        assert!(matches!(
            err,
            Error::Permitter(permitter::Error::CapabilityNotSupported(id)) if id == *capability::PERMITTER
        ));
        assert!(!registry.is_bound(&IDENTITY));
    }

    #[tokio::test]
    async fn unbound_identity_is_an_error() {
        let registry: Registry<TokenPermitter> = Registry::new();
        let err = registry.acquire(&token_request(b"t", 60)).await.unwrap_err();
        assert!(matches!(err, Error::NotBound(id) if id == IDENTITY));
    }

    #[tokio::test]
    async fn walks_the_permit_state_machine() {
        let clock = clock();
        let start = clock.now();
        let tokens = TokenPermitter::with_clock(3600, clock.clone());
        tokens.issue(IDENTITY, b"first");
        tokens.issue(IDENTITY, b"second");
        let registry = Registry::new().with_clock(clock.clone());
        registry.bind(IDENTITY, Arc::new(tokens)).unwrap();

        assert_eq!(
            registry.permit_state(IDENTITY, HOLDER),
            PermitState::NoDecisionMade
        );

        registry.acquire(&token_request(b"first", 60)).await.unwrap();
        let expiry = start + chrono::Duration::seconds(60);
        assert_eq!(
            registry.permit_state(IDENTITY, HOLDER),
            PermitState::Granted { expiry }
        );

        clock.advance(Duration::from_secs(61));
        assert_eq!(
            registry.permit_state(IDENTITY, HOLDER),
            PermitState::Expired { at: expiry }
        );

        registry.acquire(&token_request(b"second", 60)).await.unwrap();
        let release = ReleaseRequest::new(IDENTITY, HOLDER).with_authorization(&b"second"[..]);
        assert!(registry.release(&release).await.unwrap().is_gone());
        assert_eq!(
            registry.permit_state(IDENTITY, HOLDER),
            PermitState::Released { at: clock.now() }
        );
    }

    #[tokio::test]
    async fn denial_leaves_existing_permit_alone() {
        let clock = clock();
        let tokens = TokenPermitter::with_clock(3600, clock.clone());
        tokens.issue(IDENTITY, b"good");
        let registry = Registry::new().with_clock(clock.clone());
        registry.bind(IDENTITY, Arc::new(tokens)).unwrap();

        let granted = registry.acquire(&token_request(b"good", 60)).await.unwrap();
        let denied = registry.acquire(&token_request(b"good", 60)).await.unwrap();
        assert!(!denied.is_allowed());
        assert_eq!(
            registry.permit_state(IDENTITY, HOLDER),
            PermitState::Granted {
                expiry: granted.expiry().unwrap()
            }
        );
    }

    #[tokio::test]
    async fn clamps_lengthened_lifetimes() {
        let clock = clock();
        let remote = RemotePermitter::new(Generous, 7 * 24 * 3600).with_clock(clock.clone());
        let registry = Registry::new()
            .with_clock(clock.clone())
            .with_max_lifetime(Duration::from_secs(3600));
        registry.bind(IDENTITY, Arc::new(remote)).unwrap();

        let request = AcquireRequest::new(IDENTITY, HOLDER, Duration::from_secs(48 * 3600))
            .with_authorization(&b"a"[..]);
        let decision = registry.acquire(&request).await.unwrap();
        assert_eq!(
            decision.expiry(),
            Some(clock.now() + chrono::Duration::seconds(3600))
        );
    }

    #[tokio::test]
    async fn clamped_record_expires_before_the_permitter_grant() {
        let clock = clock();
        let tokens = TokenPermitter::with_clock(7 * 24 * 3600, clock.clone());
        tokens.issue(IDENTITY, b"good");
        let registry = Registry::new()
            .with_clock(clock.clone())
            .with_max_lifetime(Duration::from_secs(3600));
        registry.bind(IDENTITY, Arc::new(tokens)).unwrap();

        registry.acquire(&token_request(b"good", 48 * 3600)).await.unwrap();
        clock.advance(Duration::from_secs(2 * 3600));
        assert!(matches!(
            registry.permit_state(IDENTITY, HOLDER),
            PermitState::Expired { .. }
        ));

        let bare = ReleaseRequest::new(IDENTITY, HOLDER);
        assert!(!registry.release(&bare).await.unwrap().is_gone());
    }

    #[tokio::test]
    async fn shortened_lifetimes_are_accepted() {
        let clock = clock();
        let approvals = ApprovalPermitter::with_clock(3600, clock.clone());
        approvals.approve_requests(&[Approval {
            identity: IDENTITY,
            requester: HOLDER,
            duration: Duration::from_secs(30),
        }]);
        let registry = Registry::new().with_clock(clock.clone());
        registry.bind(IDENTITY, Arc::new(approvals)).unwrap();

        let request = AcquireRequest::new(IDENTITY, HOLDER, Duration::from_secs(600));
        let decision = registry.acquire(&request).await.unwrap();
        assert_eq!(
            decision.expiry(),
            Some(clock.now() + chrono::Duration::seconds(30))
        );
    }

    #[tokio::test]
    async fn logs_decisions() {
        let clock = clock();
        let tokens = TokenPermitter::with_clock(3600, clock.clone());
        tokens.issue(IDENTITY, b"good");
        let registry = Registry::new()
            .with_clock(clock.clone())
            .with_log(DecisionLog::in_memory().unwrap());
        registry.bind(IDENTITY, Arc::new(tokens)).unwrap();

        registry.acquire(&token_request(b"bad", 60)).await.unwrap();
        registry.acquire(&token_request(b"good", 60)).await.unwrap();
        let wrong = ReleaseRequest::new(IDENTITY, HOLDER).with_authorization(&b"nope"[..]);
        registry.release(&wrong).await.unwrap();

        let kinds: Vec<_> = registry
            .history(IDENTITY, None)
            .unwrap()
            .iter()
            .map(|e| e.kind.name())
            .collect();
        assert_eq!(
            kinds,
            ["bound", "acquire_denied", "acquired", "release_refused"]
        );
        assert_eq!(registry.history(IDENTITY, Some("acquired")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_authorization_is_logged_as_a_fault() {
        let signatures = SignaturePermitter::with_clock(3600, clock());
        let registry = Registry::new()
            .with_clock(clock())
            .with_log(DecisionLog::in_memory().unwrap());
        registry.bind(IDENTITY, Arc::new(signatures)).unwrap();

        let request = AcquireRequest::new(IDENTITY, HOLDER, Duration::from_secs(60))
            .with_authorization(&[0u8; 10][..]);
        let err = registry.acquire(&request).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Permitter(permitter::Error::MalformedAuthorization(_))
        ));

        let faults = registry.history(IDENTITY, Some("fault")).unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].account, Some(HOLDER));
        match &faults[0].kind {
            EventKind::Fault { operation, .. } => assert_eq!(operation, "acquire"),
            other => panic!("expected a fault, got {other:?}"),
        }
        assert_eq!(registry.permit_state(IDENTITY, HOLDER), PermitState::NoDecisionMade);
    }
}
