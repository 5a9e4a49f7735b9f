//! Catalog: the shard map together with the store that backs it.
//!
//! A `Catalog` is an explicit handle: open one at startup and pass it to
//! whatever needs it. The store is the source of truth; the [`ShardMap`] held
//! here is a view rebuilt on open and kept current by every lookup and write
//! made through this handle.

use std::path::{Path, PathBuf};

use shard_core::{KeyCodec, Mapping, MappingStatus, Shard, ShardKey, TenantMetadata};
use tracing::{debug, info};

use crate::error::CatalogResult;
use crate::shard_map::{MappingOutcome, ShardMap, ShardOutcome};
use crate::store::CatalogStore;

pub struct Catalog {
    store: CatalogStore,
    shard_map: ShardMap,
    location: Option<PathBuf>,
}

impl Catalog {
    /// Open an existing catalog. Fails `CatalogNotInitialized` when the
    /// store lacks its schema.
    pub fn open(location: &Path, codec: KeyCodec) -> CatalogResult<Self> {
        let store = CatalogStore::open(location)?;
        let mut catalog = Self::from_store(store, codec)?;
        catalog.location = Some(location.to_path_buf());
        Ok(catalog)
    }

    /// Create the catalog store (if needed) and open it.
    pub fn initialize(location: &Path, shard_map: &str, codec: KeyCodec) -> CatalogResult<Self> {
        let store = CatalogStore::initialize(location, shard_map)?;
        let mut catalog = Self::from_store(store, codec)?;
        catalog.location = Some(location.to_path_buf());
        Ok(catalog)
    }

    /// Build a catalog over an already-open store handle.
    ///
    /// Several catalogs may share one store; each keeps its own view.
    pub fn from_store(store: CatalogStore, codec: KeyCodec) -> CatalogResult<Self> {
        let name = store.shard_map_name()?;
        let shard_map = ShardMap::from_records(
            &name,
            codec,
            store.list_shards()?,
            store.list_mappings()?,
        );
        info!(
            shard_map = %name,
            shards = shard_map.shards().count(),
            mappings = shard_map.len(),
            "catalog loaded"
        );
        Ok(Self {
            store,
            shard_map,
            location: None,
        })
    }

    /// Store file location, if the catalog is file-backed.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// The in-memory view. May lag other writers until [`Catalog::refresh`].
    pub fn shard_map(&self) -> &ShardMap {
        &self.shard_map
    }

    /// Rebuild the view from the store.
    pub fn refresh(&mut self) -> CatalogResult<()> {
        self.shard_map = ShardMap::from_records(
            self.shard_map.name(),
            self.shard_map.codec(),
            self.store.list_shards()?,
            self.store.list_mappings()?,
        );
        debug!(mappings = self.shard_map.len(), "catalog view refreshed");
        Ok(())
    }

    /// The online mapping for `key`.
    ///
    /// `Ok(None)` means the key is valid and has no online mapping. An invalid
    /// key or a store failure is an `Err`, never a `None`.
    pub fn try_get_mapping<K: ShardKey>(&mut self, key: K) -> CatalogResult<Option<Mapping>> {
        let raw = self.shard_map.encode(key)?;
        let stored = self.store.get_mapping(&raw)?;
        self.shard_map.record_mapping(&raw, stored);
        Ok(self.shard_map.online(&raw).cloned())
    }

    /// The mapping for `key` regardless of status.
    pub fn mapping<K: ShardKey>(&mut self, key: K) -> CatalogResult<Option<Mapping>> {
        let raw = self.shard_map.encode(key)?;
        let stored = self.store.get_mapping(&raw)?;
        self.shard_map.record_mapping(&raw, stored.clone());
        Ok(stored)
    }

    /// Whether `key` has an online mapping.
    pub fn key_exists<K: ShardKey>(&mut self, key: K) -> CatalogResult<bool> {
        Ok(self.try_get_mapping(key)?.is_some())
    }

    /// Register a shard. Idempotent; fails `InvalidShard` unless both parts
    /// are identifiers.
    pub fn add_shard(&mut self, shard: &Shard) -> CatalogResult<ShardOutcome> {
        let outcome = self.store.add_shard(shard)?;
        self.shard_map.record_shard(shard.clone());
        Ok(outcome)
    }

    /// Map `key` to `shard`. Idempotent for the same shard; fails
    /// `MappingConflict` for a different one and `UnknownShard` for an
    /// unregistered one.
    pub fn add_mapping<K: ShardKey>(&mut self, key: K, shard: &Shard) -> CatalogResult<MappingOutcome> {
        let raw = self.shard_map.encode(key)?;
        let (outcome, mapping) = self.store.add_mapping(&raw, shard)?;
        self.shard_map.record_mapping(&raw, Some(mapping));
        Ok(outcome)
    }

    /// Compare-and-swap a mapping's status.
    pub fn set_mapping_status<K: ShardKey>(
        &mut self,
        key: K,
        status: MappingStatus,
        expected_version: u64,
    ) -> CatalogResult<Mapping> {
        let raw = self.shard_map.encode(key)?;
        let mapping = self.store.set_mapping_status(&raw, status, expected_version)?;
        self.shard_map.record_mapping(&raw, Some(mapping.clone()));
        info!(key = %raw, status = status.label(), version = mapping.version, "mapping status changed");
        Ok(mapping)
    }

    /// Merge tenant metadata by key.
    pub fn upsert_tenant(&self, metadata: &TenantMetadata) -> CatalogResult<TenantMetadata> {
        self.store.upsert_tenant(metadata)
    }

    pub fn tenant<K: ShardKey>(&self, key: K) -> CatalogResult<Option<TenantMetadata>> {
        let raw = self.shard_map.encode(key)?;
        self.store.get_tenant(&raw)
    }

    pub fn tenants(&self) -> CatalogResult<Vec<TenantMetadata>> {
        self.store.list_tenants()
    }

    pub fn shards(&self) -> CatalogResult<Vec<Shard>> {
        self.store.list_shards()
    }

    pub fn mappings(&self) -> CatalogResult<Vec<Mapping>> {
        self.store.list_mappings()
    }
}
