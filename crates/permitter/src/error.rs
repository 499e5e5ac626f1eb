//! Permitter error types.
//!
//! A denied request is not an error. These types describe requests that are
//! structurally wrong for the policy handling them, so callers can tell
//! "this request is malformed" apart from "this request was refused".

use crate::CapabilityId;
use thiserror::Error;

/// Protocol-level faults.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The implementation does not honor a required capability.
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(CapabilityId),

    /// The authorization bytes do not have the structure the policy expects.
    #[error("malformed authorization: {0}")]
    MalformedAuthorization(String),

    /// The context bytes do not have the structure the policy expects.
    #[error("malformed context: {0}")]
    MalformedContext(String),

    /// Per-identity configuration could not be interpreted.
    #[error("malformed config: {0}")]
    MalformedConfig(String),

    /// Failed to parse an identifier or encoded value.
    #[error("failed to parse: {0}")]
    Parse(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of an external decision backend.
///
/// These never reach the registry as errors: the remote policy turns every
/// one of them into a denial.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend did not answer within the configured timeout.
    #[error("backend timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend could not be reached or reported a failure.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something that is not a verdict.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}
