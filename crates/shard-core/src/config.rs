//! shardgrid.toml configuration parser.
//!
//! Every recognized field is enumerated here; unknown fields are rejected
//! and values are validated once, at load time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::KeyPolicy;
use crate::types::is_valid_identifier;

/// Upper bound for any remote timeout, in seconds.
const MAX_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} = {value:?} is not a valid identifier (expected [a-z0-9][a-z0-9_-]*)")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("{field} = {value} is out of range (1..=3600 seconds)")]
    TimeoutOutOfRange { field: &'static str, value: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardGridConfig {
    pub catalog: CatalogConfig,
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub sql: SqlConfig,
    #[serde(default)]
    pub keys: KeysConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// Location of the catalog store file.
    pub path: PathBuf,
    /// Shard map name recorded in the store at initialization.
    #[serde(default = "default_shard_map")]
    pub shard_map: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Root directory of the local provisioner (one subdirectory per server).
    pub root: PathBuf,
    /// Server new tenant databases are created on.
    pub server: String,
    /// Template used to create and seed tenant databases.
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_service_plan")]
    pub service_plan: String,
    #[serde(default = "default_tenant_type")]
    pub tenant_type: String,
    #[serde(default = "default_postal_code")]
    pub postal_code: String,
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SqlConfig {
    pub user: String,
    /// Name of the environment variable holding the password, if any.
    pub password_env: Option<String>,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub encrypt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysConfig {
    #[serde(default)]
    pub policy: KeyPolicy,
}

fn default_shard_map() -> String {
    "tenantcatalog".to_string()
}

fn default_template() -> String {
    "basetenantdb".to_string()
}

fn default_service_plan() -> String {
    "standard".to_string()
}

fn default_tenant_type() -> String {
    "multipurpose".to_string()
}

fn default_postal_code() -> String {
    "98052".to_string()
}

fn default_country_code() -> String {
    "USA".to_string()
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            user: "developer".to_string(),
            password_env: Some("SHARDGRID_SQL_PASSWORD".to_string()),
            connect_timeout_secs: 30,
            query_timeout_secs: 60,
            encrypt: true,
        }
    }
}

impl SqlConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Resolve the password from the configured environment variable.
    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

impl ShardGridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: ShardGridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field that has a constrained domain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.path.as_os_str().is_empty() {
            return Err(ConfigError::Empty { field: "catalog.path" });
        }
        if self.provisioning.root.as_os_str().is_empty() {
            return Err(ConfigError::Empty { field: "provisioning.root" });
        }
        check_identifier("catalog.shard_map", &self.catalog.shard_map)?;
        check_identifier("provisioning.server", &self.provisioning.server)?;
        check_identifier("provisioning.template", &self.provisioning.template)?;
        if self.provisioning.service_plan.is_empty() {
            return Err(ConfigError::Empty { field: "provisioning.service_plan" });
        }
        if self.sql.user.is_empty() {
            return Err(ConfigError::Empty { field: "sql.user" });
        }
        check_timeout("sql.connect_timeout_secs", self.sql.connect_timeout_secs)?;
        check_timeout("sql.query_timeout_secs", self.sql.query_timeout_secs)?;
        Ok(())
    }

    /// Scaffold a minimal shardgrid.toml rooted at `root`.
    pub fn scaffold(root: &Path, server: &str) -> Self {
        ShardGridConfig {
            catalog: CatalogConfig {
                path: root.join("catalog.redb"),
                shard_map: default_shard_map(),
            },
            provisioning: ProvisioningConfig {
                root: root.to_path_buf(),
                server: server.to_string(),
                template: default_template(),
                service_plan: default_service_plan(),
                tenant_type: default_tenant_type(),
                postal_code: default_postal_code(),
                country_code: default_country_code(),
            },
            sql: SqlConfig::default(),
            keys: KeysConfig::default(),
        }
    }
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Empty { field });
    }
    if !is_valid_identifier(value) {
        return Err(ConfigError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_timeout(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 || value > MAX_TIMEOUT_SECS {
        return Err(ConfigError::TimeoutOutOfRange { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[catalog]
path = "/tmp/catalog.redb"

[provisioning]
root = "/tmp/shardgrid"
server = "tenants1"
"#;

    #[test]
    fn test_parse_minimal_applies_defaults() {
        let config = ShardGridConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.catalog.shard_map, "tenantcatalog");
        assert_eq!(config.provisioning.template, "basetenantdb");
        assert_eq!(config.sql.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.sql.query_timeout(), Duration::from_secs(60));
        assert!(config.sql.encrypt);
        assert_eq!(config.keys.policy, KeyPolicy::NonNegative);
    }

    #[test]
    fn test_scaffold_roundtrips_through_toml() {
        let config = ShardGridConfig::scaffold(Path::new("/srv/shardgrid"), "tenants1");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("tenants1"));
        let back = ShardGridConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_rejects_unknown_field() {
        let toml_str = format!("{MINIMAL}\n[extra]\nfoo = 1\n");
        assert!(ShardGridConfig::from_toml_str(&toml_str).is_err());
    }

    #[test]
    fn test_rejects_invalid_server_name() {
        let toml_str = MINIMAL.replace("tenants1", "Tenants 1");
        let err = ShardGridConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("provisioning.server"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = ShardGridConfig::from_toml_str(MINIMAL).unwrap();
        config.sql.query_timeout_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TimeoutOutOfRange {
                field: "sql.query_timeout_secs",
                value: 0
            })
        );
    }

    #[test]
    fn test_parses_any_key_policy() {
        let toml_str = format!("{MINIMAL}\n[keys]\npolicy = \"any\"\n");
        let config = ShardGridConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(config.keys.policy, KeyPolicy::Any);
    }
}
