//! Shared types used across ShardGrid crates.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::key::RawKey;

/// A physical database holding tenant data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Shard {
    /// Server (host) the database lives on.
    pub server: String,
    /// Database name on that server.
    pub database: String,
}

impl Shard {
    pub fn new(server: &str, database: &str) -> Self {
        Self {
            server: server.to_string(),
            database: database.to_string(),
        }
    }

    /// Whether both parts are identifiers, which keeps `table_key` unambiguous.
    pub fn is_valid(&self) -> bool {
        is_valid_identifier(&self.server) && is_valid_identifier(&self.database)
    }

    /// Build the composite key for the shards table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.server, self.database)
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.database)
    }
}

/// Whether a mapping currently serves lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Online,
    Offline,
}

impl MappingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            MappingStatus::Online => "online",
            MappingStatus::Offline => "offline",
        }
    }
}

/// A single-point key → shard association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub key: RawKey,
    pub shard: Shard,
    pub status: MappingStatus,
    /// Starts at 1, bumped on every committed change.
    pub version: u64,
}

impl Mapping {
    /// A fresh online mapping at version 1.
    pub fn new(key: RawKey, shard: Shard) -> Self {
        Self {
            key,
            shard,
            status: MappingStatus::Online,
            version: 1,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == MappingStatus::Online
    }

    /// Build the key for the mappings table.
    pub fn table_key(&self) -> String {
        self.key.to_hex()
    }
}

/// Descriptive attributes of a tenant, stored next to its mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMetadata {
    pub key: RawKey,
    /// Display name as supplied at registration.
    pub name: String,
    pub tenant_type: String,
    pub postal_code: String,
    pub country_code: String,
    pub service_plan: String,
    /// Unix timestamp (seconds) of the first registration.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last upsert.
    pub updated_at: u64,
}

impl TenantMetadata {
    /// Build the key for the tenants table.
    pub fn table_key(&self) -> String {
        self.key.to_hex()
    }
}

/// Physical database name for a tenant display name.
///
/// Removes all whitespace and lower-cases, so "Contoso Concert Hall" and
/// "contoso concerthall" land on the same database.
pub fn normalize_tenant_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("identifier pattern compiles"));

/// Check that a normalized name is usable as a physical identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_whitespace_and_lowercases() {
        assert_eq!(normalize_tenant_name("Acme"), "acme");
        assert_eq!(normalize_tenant_name("  Contoso Concert\tHall "), "contosoconcerthall");
    }

    #[test]
    fn identifiers_reject_punctuation_and_empty() {
        assert!(is_valid_identifier("acme"));
        assert!(is_valid_identifier("tenants1"));
        assert!(is_valid_identifier("dogwood-dojo_2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("-acme"));
        assert!(!is_valid_identifier("acme's"));
        assert!(!is_valid_identifier("café"));
    }

    #[test]
    fn mapping_table_key_is_raw_hex() {
        let key = RawKey::from_hex("0x80001388").unwrap();
        let mapping = Mapping::new(key, Shard::new("s1", "acme"));
        assert_eq!(mapping.table_key(), "0x80001388");
        assert!(mapping.is_online());
        assert_eq!(mapping.version, 1);
    }

    #[test]
    fn shard_parts_must_be_identifiers() {
        assert!(Shard::new("tenants1", "acme").is_valid());
        assert!(!Shard::new("east/1", "acme").is_valid());
        assert!(!Shard::new("east", "1/acme").is_valid());
        assert!(!Shard::new("tenants1", "").is_valid());
    }

    #[test]
    fn shard_display_matches_table_key() {
        let shard = Shard::new("tenants1", "acme");
        assert_eq!(shard.to_string(), shard.table_key());
    }
}
