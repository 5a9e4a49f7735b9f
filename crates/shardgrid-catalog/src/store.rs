//! CatalogStore: redb-backed persistence for the shard catalog.
//!
//! The store is the source of truth. Every read-check-write (mapping add,
//! status compare-and-swap, tenant merge) runs inside a single redb write
//! transaction; redb admits one writer at a time, so two registration
//! attempts racing on the same key cannot interleave between the check and
//! the write.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shard_core::{Mapping, MappingStatus, RawKey, Shard, TenantMetadata};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};
use crate::shard_map::{MappingOutcome, MappingPlan, ShardOutcome, plan_mapping, plan_status};
use crate::tables::*;

/// Convert any `Display` error into a `CatalogError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| CatalogError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> CatalogResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CatalogResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn check_shard(shard: &Shard) -> CatalogResult<()> {
    if shard.is_valid() {
        Ok(())
    } else {
        Err(CatalogError::InvalidShard(shard.clone()))
    }
}

/// Thread-safe catalog store backed by redb.
#[derive(Clone)]
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    /// Create (or re-open) a catalog store and write its schema marker.
    ///
    /// Re-initializing with the same shard map name is a no-op.
    pub fn initialize(path: &Path, shard_map: &str) -> CatalogResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_schema(shard_map)?;
        debug!(?path, shard_map, "catalog store initialized");
        Ok(store)
    }

    /// Create an ephemeral in-memory catalog store (for testing).
    pub fn initialize_in_memory(shard_map: &str) -> CatalogResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_schema(shard_map)?;
        debug!(shard_map, "in-memory catalog store initialized");
        Ok(store)
    }

    /// Open an existing catalog store.
    ///
    /// Fails `CatalogNotInitialized` when the file or its schema marker is
    /// missing; that is a deployment error, not something to retry.
    pub fn open(path: &Path) -> CatalogResult<Self> {
        if !path.exists() {
            return Err(CatalogError::CatalogNotInitialized(format!(
                "no catalog store at {}",
                path.display()
            )));
        }
        let db = Database::open(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        let shard_map = store.shard_map_name()?;
        debug!(?path, %shard_map, "catalog store opened");
        Ok(store)
    }

    /// Create all tables and the schema marker if they don't exist yet.
    fn ensure_schema(&self, shard_map: &str) -> CatalogResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta = txn.open_table(CATALOG_META).map_err(map_err!(Table))?;
            let existing = meta
                .get(META_SHARD_MAP)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            match existing {
                Some(found) if found != shard_map => {
                    return Err(CatalogError::ShardMapMismatch {
                        expected: shard_map.to_string(),
                        found,
                    });
                }
                Some(_) => {}
                None => {
                    meta.insert(META_SHARD_MAP, shard_map)
                        .map_err(map_err!(Write))?;
                    meta.insert(META_SCHEMA_VERSION, SCHEMA_VERSION)
                        .map_err(map_err!(Write))?;
                }
            }
            // Opening a table in a write transaction creates it if absent.
            txn.open_table(SHARDS).map_err(map_err!(Table))?;
            txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
            txn.open_table(TENANTS).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Shard map name recorded at initialization. Also validates the schema.
    pub fn shard_map_name(&self) -> CatalogResult<String> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let meta = match txn.open_table(CATALOG_META) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => {
                return Err(CatalogError::CatalogNotInitialized(
                    "catalog store has no schema marker".to_string(),
                ));
            }
            Err(e) => return Err(CatalogError::Table(e.to_string())),
        };
        let version = meta
            .get(META_SCHEMA_VERSION)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string());
        if version.as_deref() != Some(SCHEMA_VERSION) {
            return Err(CatalogError::CatalogNotInitialized(format!(
                "unsupported catalog schema version {version:?}"
            )));
        }
        let name = meta
            .get(META_SHARD_MAP)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string())
            .ok_or_else(|| {
                CatalogError::CatalogNotInitialized("catalog store has no shard map".to_string())
            })?;
        for table in [SHARDS, MAPPINGS, TENANTS] {
            match txn.open_table(table) {
                Ok(_) => {}
                Err(TableError::TableDoesNotExist(missing)) => {
                    return Err(CatalogError::CatalogNotInitialized(format!(
                        "catalog store is missing table {missing}"
                    )));
                }
                Err(e) => return Err(CatalogError::Table(e.to_string())),
            }
        }
        Ok(name)
    }

    // ── Shards ─────────────────────────────────────────────────────

    /// Register a shard. Registering it again is a no-op.
    pub fn add_shard(&self, shard: &Shard) -> CatalogResult<ShardOutcome> {
        check_shard(shard)?;
        let key = shard.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(SHARDS).map_err(map_err!(Table))?;
            let stored: Option<Shard> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            if let Some(stored) = stored {
                if stored != *shard {
                    return Err(CatalogError::InvalidShard(shard.clone()));
                }
                outcome = ShardOutcome::AlreadyRegistered;
            } else {
                let value = encode(shard)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                outcome = ShardOutcome::Added;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, ?outcome, "shard registered");
        Ok(outcome)
    }

    /// Get a shard by server and database name.
    pub fn get_shard(&self, server: &str, database: &str) -> CatalogResult<Option<Shard>> {
        let key = format!("{server}/{database}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SHARDS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all registered shards.
    pub fn list_shards(&self) -> CatalogResult<Vec<Shard>> {
        self.list(SHARDS)
    }

    // ── Mappings ───────────────────────────────────────────────────

    /// Map `key` to `shard`, atomically checking the registry and any
    /// existing mapping in the same write transaction.
    pub fn add_mapping(&self, key: &RawKey, shard: &Shard) -> CatalogResult<(MappingOutcome, Mapping)> {
        check_shard(shard)?;
        let hex = key.to_hex();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let plan;
        {
            let shards = txn.open_table(SHARDS).map_err(map_err!(Table))?;
            let registered = match shards.get(shard.table_key().as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode::<Shard>(guard.value())? == *shard,
                None => false,
            };

            let mut mappings = txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
            let existing: Option<Mapping> = match mappings.get(hex.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            plan = plan_mapping(existing.as_ref(), key, shard, registered)?;
            if let MappingPlan::Write(mapping) = &plan {
                let value = encode(mapping)?;
                mappings
                    .insert(hex.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let outcome = match plan {
            MappingPlan::Write(_) => MappingOutcome::Added,
            MappingPlan::Unchanged(_) => MappingOutcome::AlreadyMapped,
        };
        debug!(key = %hex, %shard, ?outcome, "mapping stored");
        Ok((outcome, plan.into_mapping()))
    }

    /// Get the mapping for a raw key regardless of status.
    pub fn get_mapping(&self, key: &RawKey) -> CatalogResult<Option<Mapping>> {
        let hex = key.to_hex();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
        match table.get(hex.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all mappings in raw key order.
    pub fn list_mappings(&self) -> CatalogResult<Vec<Mapping>> {
        self.list(MAPPINGS)
    }

    /// Compare-and-swap the status of a mapping.
    pub fn set_mapping_status(
        &self,
        key: &RawKey,
        status: MappingStatus,
        expected_version: u64,
    ) -> CatalogResult<Mapping> {
        let hex = key.to_hex();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let plan;
        {
            let mut table = txn.open_table(MAPPINGS).map_err(map_err!(Table))?;
            let existing: Option<Mapping> = match table.get(hex.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            plan = plan_status(existing.as_ref(), key, status, expected_version)?;
            if let MappingPlan::Write(mapping) = &plan {
                let value = encode(mapping)?;
                table
                    .insert(hex.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let mapping = plan.into_mapping();
        debug!(key = %hex, status = status.label(), version = mapping.version, "mapping status set");
        Ok(mapping)
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Merge tenant metadata by key in one write transaction.
    ///
    /// An existing record keeps its `created_at`; everything else is
    /// replaced. Returns the stored record.
    pub fn upsert_tenant(&self, metadata: &TenantMetadata) -> CatalogResult<TenantMetadata> {
        let hex = metadata.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let merged;
        {
            let mut table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let existing: Option<TenantMetadata> = match table.get(hex.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            merged = match existing {
                Some(current) => TenantMetadata {
                    created_at: current.created_at,
                    ..metadata.clone()
                },
                None => metadata.clone(),
            };
            let value = encode(&merged)?;
            table
                .insert(hex.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %hex, name = %merged.name, "tenant metadata upserted");
        Ok(merged)
    }

    /// Get tenant metadata by raw key.
    pub fn get_tenant(&self, key: &RawKey) -> CatalogResult<Option<TenantMetadata>> {
        let hex = key.to_hex();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
        match table.get(hex.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all tenant metadata records.
    pub fn list_tenants(&self) -> CatalogResult<Vec<TenantMetadata>> {
        self.list(TENANTS)
    }

    fn list<T: DeserializeOwned>(
        &self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
    ) -> CatalogResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(definition).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}
