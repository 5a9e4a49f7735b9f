//! shard-core: types shared by every ShardGrid crate.
//!
//! Holds the tenant key codec, the catalog's record types, and the
//! `shardgrid.toml` configuration model.

pub mod config;
pub mod key;
pub mod types;

pub use config::{ConfigError, ShardGridConfig};
pub use key::{KeyCodec, KeyError, KeyPolicy, RawKey, ShardKey, TenantKey, derive_tenant_key};
pub use types::*;
