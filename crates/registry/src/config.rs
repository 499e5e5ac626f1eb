//! Permitter and registry configuration.

use crate::registry::DEFAULT_MAX_LIFETIME;
use backend::BackendConfig;
use permitter::IdentityId;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Which policy governs the configured identities, and how.
///
/// ```toml
/// kind = "signature"
/// max_duration_secs = 3600
///
/// [keys]
/// "0x1111...1111" = "d75a9801..."
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermitterConfig {
    /// One-time tokens, given as hex SHA-256 digests per identity.
    Token {
        #[serde(default = "default_max_duration_secs")]
        max_duration_secs: u64,
        #[serde(default)]
        tokens: HashMap<IdentityId, Vec<String>>,
    },
    /// Ed25519 authority keys, given as hex verifying keys per identity.
    Signature {
        #[serde(default = "default_max_duration_secs")]
        max_duration_secs: u64,
        #[serde(default)]
        keys: HashMap<IdentityId, String>,
    },
    /// An external decision backend governing the listed identities.
    Remote {
        #[serde(default = "default_max_duration_secs")]
        max_duration_secs: u64,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_single_use")]
        single_use: bool,
        #[serde(default)]
        identities: Vec<IdentityId>,
        backend: BackendConfig,
    },
}

impl PermitterConfig {
    /// The identities this permitter should be bound to.
    pub fn identities(&self) -> Vec<IdentityId> {
        let mut identities: Vec<IdentityId> = match self {
            PermitterConfig::Token { tokens, .. } => tokens.keys().copied().collect(),
            PermitterConfig::Signature { keys, .. } => keys.keys().copied().collect(),
            PermitterConfig::Remote { identities, .. } => identities.clone(),
        };
        identities.sort();
        identities.dedup();
        identities
    }
}

fn default_max_duration_secs() -> u64 {
    3600
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_single_use() -> bool {
    true
}

/// Registry-wide settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Longest permit the registry will record, whatever a permitter grants.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl RegistryConfig {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

fn default_max_lifetime_secs() -> u64 {
    DEFAULT_MAX_LIFETIME.as_secs()
}
