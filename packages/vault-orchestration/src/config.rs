//! Vault configuration (YAML schema v1)

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vault_core::{CacheConfig, HealthConfig};

use crate::delivery::DeliveryConfig;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IdentityConfig {
    /// Identity field scoping cache entries and queued tasks
    pub use_identity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    pub version: u32,
    /// Cache schema; a change clears the cache namespace on startup
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            version: 1,
            schema_version: default_schema_version(),
            health: HealthConfig::default(),
            cache: CacheConfig::default(),
            delivery: DeliveryConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_yaml(path: impl AsRef<std::path::Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        // Version is checked before the typed parse so its absence gets a
        // dedicated error instead of a generic missing-field one
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        if raw.get("version").is_none() {
            return Err(ConfigError::MissingVersion);
        }

        let config: VaultConfig = serde_yaml::from_value(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Yaml)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }
        if let Some(length) = self.cache.fingerprint_length {
            if !(8..=64).contains(&length) {
                return Err(invalid(
                    "cache.fingerprint_length",
                    format!("{} not in 8..=64", length),
                ));
            }
        }
        if self.delivery.default_retry == 0 {
            return Err(invalid("delivery.default_retry", "must be at least 1"));
        }
        if self.cache.ttl_ms == Some(0) {
            return Err(invalid("cache.ttl_ms", "must be greater than 0"));
        }
        if self.health.ttl_ms == Some(0) {
            return Err(invalid("health.ttl_ms", "must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}
