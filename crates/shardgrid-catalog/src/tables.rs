//! redb table definitions for the catalog store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized types).
//! Shards are keyed by `{server}/{database}`; mappings and tenants share the
//! raw key's hex form (`0x80001388`) so a tenant's metadata and its mapping
//! have the same identity.

use redb::TableDefinition;

/// Schema marker written at initialization: schema version and shard map name.
pub const CATALOG_META: TableDefinition<&str, &str> = TableDefinition::new("catalog_meta");

/// Registered shards keyed by `{server}/{database}`.
pub const SHARDS: TableDefinition<&str, &[u8]> = TableDefinition::new("shards");

/// Point mappings keyed by raw key hex.
pub const MAPPINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("mappings");

/// Tenant metadata keyed by raw key hex.
pub const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_SHARD_MAP: &str = "shard_map";

/// Bumped whenever the record layout changes incompatibly.
pub const SCHEMA_VERSION: &str = "1";
