//! The permitter protocol traits.

use crate::{
    AcquireRequest, Acquisition, Capabilities, IdentityId, Negotiation, Release, ReleaseRequest,
    Result,
};
use std::future::Future;

/// A pluggable decision component that grants and revokes permits.
///
/// Denials are values, not errors: an `Err` means the request itself was
/// malformed for this policy. Implementations must deny whenever their own
/// state is ambiguous, and must apply any side effects (consumed tokens,
/// recorded nonces) atomically with the decision for the key involved.
pub trait Permitter: Capabilities + Send + Sync {
    /// The rule relating a requested duration to the granted expiry.
    fn negotiation(&self) -> Negotiation;

    /// Decide whether `request.requester` may hold `request.identity`.
    ///
    /// Safe to call repeatedly: a retry with an already-consumed
    /// authorization is denied, never granted twice.
    fn acquire_identity(
        &self,
        request: &AcquireRequest,
    ) -> impl Future<Output = Result<Acquisition>> + Send;

    /// Decide whether `request.possessor` is gone from the identity.
    ///
    /// Idempotent: a possessor who never held the identity, or was already
    /// released, is reported gone. A refused release changes nothing.
    fn release_identity(
        &self,
        request: &ReleaseRequest,
    ) -> impl Future<Output = Result<Release>> + Send;
}

/// Per-identity policy configuration.
pub trait Configurable: Send + Sync {
    /// Install or extend the configuration governing `identity`.
    fn configure_identity(
        &self,
        identity: IdentityId,
        config: &[u8],
    ) -> impl Future<Output = Result<()>> + Send;
}
