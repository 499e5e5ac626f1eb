//! Identity permitter protocol.
//!
//! A permitter decides whether an account may hold a named identity and for
//! how long. It does not keep the ledger of who holds what; a registry does
//! that and asks the permitter for decisions.
//!
//! # Overview
//!
//! - [`Permitter`]: `acquire_identity` returns an [`Acquisition`] (granted
//!   with an authoritative expiry, or denied); `release_identity` returns a
//!   [`Release`] (gone, or retained).
//! - [`Capabilities`]: discovery of the interfaces an implementation honors,
//!   identified by [`CapabilityId`]s derived from interface shape.
//! - [`Negotiation`]: the documented rule turning a requested duration into
//!   an expiry.
//! - [`policies`]: one-time tokens, Ed25519 signatures, batch pre-approval,
//!   and delegation to a remote [`DecisionBackend`].
//!
//! Policies implement [`Persistent`] so their replay bookkeeping can outlive
//! the process that made a decision.
//!
//! A denial is a value. [`Error`] is reserved for requests that are
//! structurally wrong for the policy that receives them.
//!
//! # Example
//!
//! ```
//! use permitter::{AcquireRequest, Account, IdentityId, Permitter, capability};
//! use permitter::policies::TokenPermitter;
//! use permitter::Capabilities;
//! use std::time::Duration;
//!
//! # async fn example() -> permitter::Result<()> {
//! let permitter = TokenPermitter::new(3600);
//! assert!(permitter.supports_capability(*capability::PERMITTER));
//!
//! let identity = IdentityId([1; 32]);
//! permitter.issue(identity, b"one-time-secret");
//!
//! let request = AcquireRequest::new(identity, Account([2; 20]), Duration::from_secs(600))
//!     .with_authorization(&b"one-time-secret"[..]);
//! let first = permitter.acquire_identity(&request).await?;
//! let again = permitter.acquire_identity(&request).await?;
//! assert!(first.is_allowed());
//! assert!(!again.is_allowed());
//! # Ok(())
//! # }
//! ```

pub mod capability;
mod clock;
mod decision;
mod error;
mod identity;
mod keyed;
mod negotiation;
pub mod policies;
mod protocol;
mod state;

pub use capability::{Capabilities, CapabilityId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{AcquireRequest, Acquisition, Release, ReleaseRequest, denied_expiry};
pub use error::{BackendError, Error, Result};
pub use identity::{Account, Authorization, Context, IdentityId};
pub use keyed::{KeyGuard, KeyedLocks};
pub use negotiation::{Negotiation, add_saturating};
pub use protocol::{Configurable, Permitter};
pub use state::{GrantRecord, Persistent, PolicyState, Spent};
