//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The decision log does not exist.
    ///
    /// This typically means no decision has been made yet.
    #[error("decision log not found at {path}. Run 'permitter acquire' first")]
    DatabaseNotFound { path: PathBuf },

    /// No data directory could be determined for the decision log.
    #[error("no data directory; set log.database and state.database in the config")]
    NoDataDir,

    /// A command-line argument could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration is invalid or missing required fields.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the registry layer.
    #[error(transparent)]
    Registry(#[from] registry::Error),

    /// A request was malformed for the configured policy.
    #[error(transparent)]
    Permitter(#[from] permitter::Error),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
