//! Decision backends for remote permitters.
//!
//! A [`permitter::policies::RemotePermitter`] reduces each request to a
//! [`BackendQuery`] and asks a backend for a [`BackendVerdict`]. This crate
//! provides two transports:
//!
//! - [`StdioBackend`]: a child process speaking line-delimited JSON-RPC 2.0
//!   (method [`DECIDE_METHOD`]).
//! - [`HttpBackend`]: an HTTP endpoint receiving the query as a JSON POST.
//!
//! # Example
//!
//! ```no_run
//! use backend::{Backend, BackendConfig};
//! use permitter::policies::RemotePermitter;
//!
//! # async fn example() -> backend::Result<()> {
//! let config: BackendConfig = serde_json::from_str(
//!     r#"{"transport": "http", "url": "https://authz.internal/decide"}"#,
//! )?;
//! let backend = Backend::from_config(config).await?;
//! let permitter = RemotePermitter::new(backend, 3600);
//! # let _ = permitter;
//! # Ok(())
//! # }
//! ```

mod error;
mod http;
mod protocol;
mod stdio;

pub use error::{Error, Result};
pub use http::{HttpBackend, HttpBackendBuilder};
pub use permitter::policies::{BackendQuery, BackendVerdict};
pub use protocol::{DECIDE_METHOD, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use stdio::{DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, StdioBackend, StdioConfig};

use permitter::BackendError;
use permitter::policies::DecisionBackend;
use serde::Deserialize;
use std::time::Duration;

/// How to reach a decision backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum BackendConfig {
    Stdio(StdioConfig),
    Http {
        url: String,
        #[serde(default)]
        bearer_token: Option<String>,
    },
}

/// Either transport behind one type.
pub enum Backend {
    Stdio(StdioBackend),
    Http(HttpBackend),
}

impl Backend {
    /// Connect to (or spawn) the configured backend.
    pub async fn from_config(config: BackendConfig) -> Result<Self> {
        Self::from_config_with_timeout(config, DEFAULT_TIMEOUT).await
    }

    pub async fn from_config_with_timeout(config: BackendConfig, timeout: Duration) -> Result<Self> {
        match config {
            BackendConfig::Stdio(stdio) => Ok(Self::Stdio(
                StdioBackend::spawn(stdio).await?.with_timeout(timeout),
            )),
            BackendConfig::Http { url, bearer_token } => {
                let mut builder = HttpBackend::builder(url).timeout(timeout);
                if let Some(token) = bearer_token {
                    builder = builder.bearer_token(token);
                }
                Ok(Self::Http(builder.build()?))
            }
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio(backend) => write!(f, "stdio({})", backend.command()),
            Self::Http(backend) => backend.fmt(f),
        }
    }
}

impl DecisionBackend for Backend {
    async fn decide(
        &self,
        query: &BackendQuery,
    ) -> std::result::Result<BackendVerdict, BackendError> {
        match self {
            Self::Stdio(backend) => backend.decide(query).await,
            Self::Http(backend) => backend.decide(query).await,
        }
    }
}
