//! Backend error types.

use crate::protocol::JsonRpcError;
use permitter::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to spawn backend: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("backend exited unexpectedly")]
    BackendExited,

    #[error("timeout after {0:?} waiting for response")]
    Timeout(std::time::Duration),

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("http error: {0}")]
    Http(String),

    #[error("output too large: {size} bytes (max {max})")]
    OutputTooLarge { size: usize, max: usize },

    #[error("invalid backend config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for BackendError {
    fn from(e: Error) -> Self {
        match e {
            Error::Timeout(after) => BackendError::Timeout(after),
            Error::InvalidResponse(_)
            | Error::Serialize(_)
            | Error::OutputTooLarge { .. }
            | Error::JsonRpc(_) => BackendError::InvalidResponse(e.to_string()),
            other => BackendError::Unavailable(other.to_string()),
        }
    }
}
