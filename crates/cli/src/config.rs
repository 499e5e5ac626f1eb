//! Configuration loading from permitter.toml.

use registry::{PermitterConfig, RegistryConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration.
///
/// ```toml
/// [registry]
/// max_lifetime_secs = 86400
///
/// [log]
/// database = "/var/lib/permitter/decisions.db"
///
/// [state]
/// database = "/var/lib/permitter/state.db"
///
/// [permitter]
/// kind = "remote"
/// identities = ["0x…"]
///
/// [permitter.backend]
/// transport = "http"
/// url = "https://authz.internal/decide"
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub state: StateConfig,

    /// The policy governing every configured identity.
    pub permitter: PermitterConfig,
}

/// Decision log settings.
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Record decisions at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Database path. Defaults to `decisions.db` under the data directory.
    pub database: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            database: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Where consumed tokens, used nonces and live grants are kept between
/// invocations.
#[derive(Debug, Default, Deserialize)]
pub struct StateConfig {
    /// Database path. Defaults to `state.db` under the data directory.
    pub database: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.max_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.max_lifetime_secs must be positive".into(),
            ));
        }
        if self.permitter.identities().is_empty() {
            return Err(ConfigError::Invalid(
                "permitter governs no identities".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use permitter::IdentityId;

    const SIGNATURE: &str = r#"
        [registry]
        max_lifetime_secs = 7200

        [permitter]
        kind = "signature"
        max_duration_secs = 600

        [permitter.keys]
        "0x0101010101010101010101010101010101010101010101010101010101010101" = "3d4017c3e843895a92b70aa74d1b7ebc9c982ccf2ec4968cc0cd55f12af4660c"
    "#;

    #[test]
    fn parses_full_config() {
        let config = Config::parse(SIGNATURE).unwrap();
        assert_eq!(config.registry.max_lifetime_secs, 7200);
        assert!(config.log.enabled);
        assert!(config.log.database.is_none());
        assert_eq!(config.permitter.identities(), vec![IdentityId([1; 32])]);
    }

    #[test]
    fn registry_and_log_sections_are_optional() {
        let config = Config::parse(
            r#"
            [permitter]
            kind = "remote"
            identities = ["0x0202020202020202020202020202020202020202020202020202020202020202"]

            [permitter.backend]
            transport = "http"
            url = "http://localhost:8080/decide"
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.max_lifetime_secs, 86_400);
        assert!(config.log.enabled);
        assert!(config.state.database.is_none());
    }

    #[test]
    fn state_database_is_configurable() {
        let config = Config::parse(&format!("[state]\ndatabase = \"/tmp/state.db\"\n{SIGNATURE}")).unwrap();
        assert_eq!(config.state.database, Some(PathBuf::from("/tmp/state.db")));
    }

    #[test]
    fn missing_permitter_is_a_parse_error() {
        let err = Config::parse("[registry]\nmax_lifetime_secs = 60\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn empty_identity_set_is_invalid() {
        let err = Config::parse("[permitter]\nkind = \"token\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_lifetime_is_invalid() {
        let err = Config::parse(&SIGNATURE.replace("7200", "0")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
