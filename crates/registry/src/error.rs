use permitter::IdentityId;
use thiserror::Error;

/// Registry errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No permitter governs the identity.
    #[error("identity {0} has no bound permitter")]
    NotBound(IdentityId),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Permitter(#[from] permitter::Error),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Backend(#[from] backend::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
