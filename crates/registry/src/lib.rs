//! Reference identity registry.
//!
//! The registry owns the ledger a permitter never keeps: which account
//! holds which identity and until when. It binds each identity to a
//! permitter (checking capability support once, at bind time), forwards
//! acquire and release requests, and records the decisions.
//!
//! # Overview
//!
//! - [`Registry`]: bind, acquire, release and [`PermitState`] queries, with
//!   an optional [`storage::DecisionLog`].
//! - [`AnyPermitter`]: every shipped policy behind one type, built from a
//!   [`PermitterConfig`].
//!
//! Permitters may shorten a requested lifetime freely. A granted expiry
//! beyond `now + max_lifetime` is clamped to it and a warning is logged.
//!
//! # Example
//!
//! ```no_run
//! use permitter::policies::TokenPermitter;
//! use permitter::{AcquireRequest, Account, IdentityId};
//! use registry::{PermitState, Registry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> registry::Result<()> {
//! let identity = IdentityId([1; 32]);
//! let holder = Account([2; 20]);
//!
//! let tokens = TokenPermitter::new(3600);
//! tokens.issue(identity, b"one-time");
//!
//! let registry = Registry::new();
//! registry.bind(identity, Arc::new(tokens))?;
//!
//! let request = AcquireRequest::new(identity, holder, Duration::from_secs(600))
//!     .with_authorization(&b"one-time"[..]);
//! registry.acquire(&request).await?;
//! assert!(matches!(
//!     registry.permit_state(identity, holder),
//!     PermitState::Granted { .. }
//! ));
//! # Ok(())
//! # }
//! ```

mod any;
mod config;
mod error;
mod registry;

pub use any::AnyPermitter;
pub use config::{PermitterConfig, RegistryConfig};
pub use error::{Error, Result};
pub use registry::{DEFAULT_MAX_LIFETIME, PermitState, Registry};
