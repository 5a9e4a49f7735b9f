//! shardgrid-catalog: the tenant shard catalog.
//!
//! Maps tenant keys to the shard (physical database) that holds the tenant,
//! backed by [redb](https://docs.rs/redb).
//!
//! # Architecture
//!
//! ```text
//! Catalog
//!   ├── ShardMap      (in-memory view: shards + key → shard mappings)
//!   └── CatalogStore  (redb: catalog_meta, shards, mappings, tenants)
//! ```
//!
//! Every mutation is idempotent so a client that cannot tell whether its
//! previous attempt committed can simply retry it. Lookups return
//! `Result<Option<_>>`: absence is `Ok(None)`, failure is `Err`.

pub mod catalog;
pub mod error;
pub mod shard_map;
pub mod store;
pub mod tables;

pub use catalog::Catalog;
pub use error::{CatalogError, CatalogResult};
pub use shard_map::{MappingOutcome, MappingPlan, ShardMap, ShardOutcome};
pub use store::CatalogStore;
