//! ShardMap: shard registry plus the key → shard mapping table.
//!
//! The idempotency rules live in [`plan_mapping`] and [`plan_status`]. Both
//! the in-memory [`ShardMap`] and the durable [`CatalogStore`] apply them, so
//! a retried call behaves the same whether it hits the view or the store:
//!
//! - adding a registered shard is a no-op;
//! - adding `key → shard` when `key` already maps to `shard` is a no-op;
//! - adding `key → other` when `key` maps elsewhere fails `MappingConflict`;
//! - a mapping's shard must be registered first (`UnknownShard`);
//! - status changes compare-and-swap on the mapping version.
//!
//! [`CatalogStore`]: crate::store::CatalogStore

use std::collections::{BTreeMap, BTreeSet};

use shard_core::{KeyCodec, Mapping, MappingStatus, RawKey, Shard, ShardKey};

use crate::error::{CatalogError, CatalogResult};

/// Result of registering a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardOutcome {
    Added,
    AlreadyRegistered,
}

/// Result of adding a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingOutcome {
    Added,
    AlreadyMapped,
}

/// What a mapping mutation resolves to against the current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingPlan {
    /// Write this record.
    Write(Mapping),
    /// The current record already satisfies the request.
    Unchanged(Mapping),
}

impl MappingPlan {
    pub fn mapping(&self) -> &Mapping {
        match self {
            MappingPlan::Write(m) | MappingPlan::Unchanged(m) => m,
        }
    }

    pub fn into_mapping(self) -> Mapping {
        match self {
            MappingPlan::Write(m) | MappingPlan::Unchanged(m) => m,
        }
    }
}

/// Resolve `key → shard` against the existing mapping for `key`.
pub fn plan_mapping(
    existing: Option<&Mapping>,
    key: &RawKey,
    shard: &Shard,
    shard_registered: bool,
) -> CatalogResult<MappingPlan> {
    if !shard_registered {
        return Err(CatalogError::UnknownShard(shard.clone()));
    }
    match existing {
        Some(current) if current.shard == *shard => Ok(MappingPlan::Unchanged(current.clone())),
        Some(current) => Err(CatalogError::MappingConflict {
            key: key.clone(),
            existing: current.shard.clone(),
            requested: shard.clone(),
        }),
        None => Ok(MappingPlan::Write(Mapping::new(key.clone(), shard.clone()))),
    }
}

/// Resolve a status change, checking the caller's expected version.
pub fn plan_status(
    existing: Option<&Mapping>,
    key: &RawKey,
    status: MappingStatus,
    expected_version: u64,
) -> CatalogResult<MappingPlan> {
    let current = existing.ok_or_else(|| CatalogError::MappingNotFound(key.clone()))?;
    if current.version != expected_version {
        return Err(CatalogError::VersionConflict {
            key: key.clone(),
            expected: expected_version,
            actual: current.version,
        });
    }
    if current.status == status {
        return Ok(MappingPlan::Unchanged(current.clone()));
    }
    Ok(MappingPlan::Write(Mapping {
        status,
        version: current.version + 1,
        ..current.clone()
    }))
}

/// In-memory shard map.
#[derive(Debug, Clone)]
pub struct ShardMap {
    name: String,
    codec: KeyCodec,
    shards: BTreeSet<Shard>,
    mappings: BTreeMap<RawKey, Mapping>,
}

impl ShardMap {
    pub fn new(name: &str, codec: KeyCodec) -> Self {
        Self {
            name: name.to_string(),
            codec,
            shards: BTreeSet::new(),
            mappings: BTreeMap::new(),
        }
    }

    /// Rebuild a view from persisted records.
    pub fn from_records(
        name: &str,
        codec: KeyCodec,
        shards: impl IntoIterator<Item = Shard>,
        mappings: impl IntoIterator<Item = Mapping>,
    ) -> Self {
        Self {
            name: name.to_string(),
            codec,
            shards: shards.into_iter().collect(),
            mappings: mappings.into_iter().map(|m| (m.key.clone(), m)).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codec(&self) -> KeyCodec {
        self.codec
    }

    /// Normalize a logical key. Fails before any lookup on a bad key.
    pub fn encode<K: ShardKey>(&self, key: K) -> CatalogResult<RawKey> {
        Ok(self.codec.encode(key)?)
    }

    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.iter()
    }

    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    pub fn contains_shard(&self, shard: &Shard) -> bool {
        self.shards.contains(shard)
    }

    /// Register a shard. Registering it again is a no-op.
    pub fn add_shard(&mut self, shard: Shard) -> ShardOutcome {
        if self.shards.insert(shard) {
            ShardOutcome::Added
        } else {
            ShardOutcome::AlreadyRegistered
        }
    }

    /// Map `key` to `shard` under the idempotency rules.
    pub fn add_mapping<K: ShardKey>(&mut self, key: K, shard: &Shard) -> CatalogResult<MappingOutcome> {
        let raw = self.encode(key)?;
        let plan = plan_mapping(
            self.mappings.get(&raw),
            &raw,
            shard,
            self.shards.contains(shard),
        )?;
        Ok(match plan {
            MappingPlan::Write(mapping) => {
                self.mappings.insert(raw, mapping);
                MappingOutcome::Added
            }
            MappingPlan::Unchanged(_) => MappingOutcome::AlreadyMapped,
        })
    }

    /// The online mapping for `key`, if any. Absence is `Ok(None)`.
    pub fn try_get_mapping<K: ShardKey>(&self, key: K) -> CatalogResult<Option<&Mapping>> {
        let raw = self.encode(key)?;
        Ok(self.online(&raw))
    }

    /// The mapping for `key` regardless of status.
    pub fn mapping(&self, raw: &RawKey) -> Option<&Mapping> {
        self.mappings.get(raw)
    }

    pub(crate) fn online(&self, raw: &RawKey) -> Option<&Mapping> {
        self.mappings.get(raw).filter(|m| m.is_online())
    }

    /// Compare-and-swap the status of the mapping for `key`.
    pub fn set_status<K: ShardKey>(
        &mut self,
        key: K,
        status: MappingStatus,
        expected_version: u64,
    ) -> CatalogResult<&Mapping> {
        let raw = self.encode(key)?;
        let plan = plan_status(self.mappings.get(&raw), &raw, status, expected_version)?;
        self.mappings.insert(raw.clone(), plan.into_mapping());
        self.mappings
            .get(&raw)
            .ok_or(CatalogError::MappingNotFound(raw))
    }

    /// Mirror a committed shard record.
    pub(crate) fn record_shard(&mut self, shard: Shard) {
        self.shards.insert(shard);
    }

    /// Mirror a committed mapping record, or forget it when the store has none.
    pub(crate) fn record_mapping(&mut self, raw: &RawKey, mapping: Option<Mapping>) {
        match mapping {
            Some(m) => {
                self.shards.insert(m.shard.clone());
                self.mappings.insert(raw.clone(), m);
            }
            None => {
                self.mappings.remove(raw);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_core::KeyPolicy;

    fn map_with_shard(shard: &Shard) -> ShardMap {
        let mut map = ShardMap::new("tenantcatalog", KeyCodec::default());
        map.add_shard(shard.clone());
        map
    }

    #[test]
    fn add_shard_twice_is_noop() {
        let shard = Shard::new("tenants1", "acme");
        let mut map = ShardMap::new("tenantcatalog", KeyCodec::default());

        assert_eq!(map.add_shard(shard.clone()), ShardOutcome::Added);
        assert_eq!(map.add_shard(shard.clone()), ShardOutcome::AlreadyRegistered);
        assert_eq!(map.shards().count(), 1);
    }

    #[test]
    fn add_mapping_twice_to_same_shard_succeeds() {
        let shard = Shard::new("tenants1", "acme");
        let mut map = map_with_shard(&shard);

        assert_eq!(map.add_mapping(5000, &shard).unwrap(), MappingOutcome::Added);
        assert_eq!(map.add_mapping(5000, &shard).unwrap(), MappingOutcome::AlreadyMapped);
        assert_eq!(map.len(), 1);
        assert_eq!(map.try_get_mapping(5000).unwrap().unwrap().shard, shard);
    }

    #[test]
    fn add_mapping_to_other_shard_conflicts() {
        let acme = Shard::new("tenants1", "acme");
        let other = Shard::new("tenants1", "other");
        let mut map = map_with_shard(&acme);
        map.add_shard(other.clone());

        map.add_mapping(5000, &acme).unwrap();
        let err = map.add_mapping(5000, &other).unwrap_err();

        assert!(matches!(err, CatalogError::MappingConflict { .. }));
        assert_eq!(map.try_get_mapping(5000).unwrap().unwrap().shard, acme);
    }

    #[test]
    fn add_mapping_requires_registered_shard() {
        let mut map = ShardMap::new("tenantcatalog", KeyCodec::default());
        let err = map.add_mapping(1, &Shard::new("tenants1", "ghost")).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownShard(_)));
        assert!(map.is_empty());
    }

    #[test]
    fn missing_key_is_none_but_bad_key_is_error() {
        let map = ShardMap::new("tenantcatalog", KeyCodec::default());
        assert!(map.try_get_mapping(42).unwrap().is_none());
        assert!(matches!(
            map.try_get_mapping(-42),
            Err(CatalogError::InvalidKey(_))
        ));
    }

    #[test]
    fn offline_mapping_is_hidden_from_lookup() {
        let shard = Shard::new("tenants1", "acme");
        let mut map = map_with_shard(&shard);
        map.add_mapping(7, &shard).unwrap();

        let mapping = map.set_status(7, MappingStatus::Offline, 1).unwrap();
        assert_eq!(mapping.version, 2);
        assert!(map.try_get_mapping(7).unwrap().is_none());

        // Still registered, so re-adding the same mapping stays idempotent.
        assert_eq!(map.add_mapping(7, &shard).unwrap(), MappingOutcome::AlreadyMapped);
    }

    #[test]
    fn status_change_with_stale_version_conflicts() {
        let shard = Shard::new("tenants1", "acme");
        let mut map = map_with_shard(&shard);
        map.add_mapping(7, &shard).unwrap();
        map.set_status(7, MappingStatus::Offline, 1).unwrap();

        let err = map.set_status(7, MappingStatus::Online, 1).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn status_change_to_same_status_keeps_version() {
        let shard = Shard::new("tenants1", "acme");
        let mut map = map_with_shard(&shard);
        map.add_mapping(7, &shard).unwrap();

        let mapping = map.set_status(7, MappingStatus::Online, 1).unwrap();
        assert_eq!(mapping.version, 1);
    }

    #[test]
    fn status_change_on_missing_key_is_not_found() {
        let mut map = ShardMap::new("tenantcatalog", KeyCodec::default());
        let err = map.set_status(7, MappingStatus::Offline, 1).unwrap_err();
        assert!(matches!(err, CatalogError::MappingNotFound(_)));
    }

    #[test]
    fn keys_are_unique_after_repeated_adds() {
        let shard = Shard::new("tenants1", "acme");
        let mut map = ShardMap::new("tenantcatalog", KeyCodec::new(KeyPolicy::Any));
        map.add_shard(shard.clone());

        for _ in 0..5 {
            map.add_mapping(-3, &shard).unwrap();
        }
        let raw = map.encode(-3).unwrap();
        assert_eq!(map.mappings().filter(|m| m.key == raw).count(), 1);
    }
}
