//! Config-driven dispatch over the shipped policies.

use crate::config::PermitterConfig;
use crate::{Error, Result};
use backend::Backend;
use permitter::policies::{ApprovalPermitter, RemotePermitter, SignaturePermitter, TokenPermitter};
use permitter::{
    AcquireRequest, Acquisition, Capabilities, CapabilityId, Configurable, IdentityId, Negotiation,
    Permitter, Persistent, PolicyState, Release, ReleaseRequest, capability,
};
use std::time::Duration;
use tracing::debug;

/// Any of the shipped policies behind one type.
pub enum AnyPermitter {
    Token(TokenPermitter),
    Signature(SignaturePermitter),
    Approval(ApprovalPermitter),
    Remote(RemotePermitter<Backend>),
}

impl AnyPermitter {
    /// Build and configure the policy described by `config`.
    ///
    /// A stdio backend is spawned here, so this must run inside a runtime.
    pub async fn from_config(config: &PermitterConfig) -> Result<Self> {
        match config {
            PermitterConfig::Token {
                max_duration_secs,
                tokens,
            } => {
                let permitter = TokenPermitter::new(*max_duration_secs);
                for (identity, digests) in tokens {
                    let mut packed = Vec::with_capacity(digests.len() * 32);
                    for digest in digests {
                        let bytes = hex::decode(digest.trim_start_matches("0x")).map_err(|e| {
                            Error::Config(format!("token digest for {identity}: {e}"))
                        })?;
                        if bytes.len() != 32 {
                            return Err(Error::Config(format!(
                                "token digest for {identity}: expected 32 bytes, got {}",
                                bytes.len()
                            )));
                        }
                        packed.extend_from_slice(&bytes);
                    }
                    permitter.configure_identity(*identity, &packed).await?;
                }
                debug!(identities = tokens.len(), "token permitter configured");
                Ok(Self::Token(permitter))
            }
            PermitterConfig::Signature {
                max_duration_secs,
                keys,
            } => {
                let permitter = SignaturePermitter::new(*max_duration_secs);
                for (identity, key) in keys {
                    let bytes = hex::decode(key.trim_start_matches("0x"))
                        .map_err(|e| Error::Config(format!("verifying key for {identity}: {e}")))?;
                    permitter.configure_identity(*identity, &bytes).await?;
                }
                debug!(identities = keys.len(), "signature permitter configured");
                Ok(Self::Signature(permitter))
            }
            PermitterConfig::Remote {
                max_duration_secs,
                timeout_ms,
                single_use,
                backend,
                ..
            } => {
                let timeout = Duration::from_millis(*timeout_ms);
                let backend = Backend::from_config_with_timeout(backend.clone(), timeout).await?;
                debug!(%backend, "remote permitter configured");
                Ok(Self::Remote(
                    RemotePermitter::new(backend, *max_duration_secs)
                        .with_timeout(timeout)
                        .with_single_use(*single_use),
                ))
            }
        }
    }

    /// Short policy name, as used for `kind` in configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Signature(_) => "signature",
            Self::Approval(_) => "approval",
            Self::Remote(_) => "remote",
        }
    }
}

impl Capabilities for AnyPermitter {
    fn implemented(&self) -> Vec<CapabilityId> {
        match self {
            Self::Token(p) => p.implemented(),
            Self::Signature(p) => p.implemented(),
            Self::Approval(p) => p.implemented(),
            Self::Remote(p) => p.implemented(),
        }
    }

    fn supports_capability(&self, id: CapabilityId) -> bool {
        match self {
            Self::Token(p) => p.supports_capability(id),
            Self::Signature(p) => p.supports_capability(id),
            Self::Approval(p) => p.supports_capability(id),
            Self::Remote(p) => p.supports_capability(id),
        }
    }
}

impl Permitter for AnyPermitter {
    fn negotiation(&self) -> Negotiation {
        match self {
            Self::Token(p) => p.negotiation(),
            Self::Signature(p) => p.negotiation(),
            Self::Approval(p) => p.negotiation(),
            Self::Remote(p) => p.negotiation(),
        }
    }

    async fn acquire_identity(&self, request: &AcquireRequest) -> permitter::Result<Acquisition> {
        match self {
            Self::Token(p) => p.acquire_identity(request).await,
            Self::Signature(p) => p.acquire_identity(request).await,
            Self::Approval(p) => p.acquire_identity(request).await,
            Self::Remote(p) => p.acquire_identity(request).await,
        }
    }

    async fn release_identity(&self, request: &ReleaseRequest) -> permitter::Result<Release> {
        match self {
            Self::Token(p) => p.release_identity(request).await,
            Self::Signature(p) => p.release_identity(request).await,
            Self::Approval(p) => p.release_identity(request).await,
            Self::Remote(p) => p.release_identity(request).await,
        }
    }
}

impl Configurable for AnyPermitter {
    async fn configure_identity(&self, identity: IdentityId, config: &[u8]) -> permitter::Result<()> {
        match self {
            Self::Token(p) => p.configure_identity(identity, config).await,
            Self::Signature(p) => p.configure_identity(identity, config).await,
            Self::Approval(_) | Self::Remote(_) => Err(permitter::Error::CapabilityNotSupported(
                *capability::CONFIGURABLE,
            )),
        }
    }
}

impl Persistent for AnyPermitter {
    fn snapshot(&self) -> PolicyState {
        match self {
            Self::Token(p) => p.snapshot(),
            Self::Signature(p) => p.snapshot(),
            Self::Remote(p) => p.snapshot(),
            // Approvals are issued in process and never outlive it.
            Self::Approval(_) => PolicyState::default(),
        }
    }

    fn restore(&self, state: PolicyState) -> permitter::Result<()> {
        match self {
            Self::Token(p) => p.restore(state),
            Self::Signature(p) => p.restore(state),
            Self::Remote(p) => p.restore(state),
            Self::Approval(_) if state.is_empty() => Ok(()),
            Self::Approval(_) => Err(permitter::Error::MalformedConfig(
                "approval policy keeps no restorable state".into(),
            )),
        }
    }
}
