//! Consistency of the catalog under retries and concurrent registrations.

use std::sync::{Arc, Barrier};
use std::thread;

use shard_core::{KeyCodec, Shard, TenantMetadata};
use shardgrid_catalog::{Catalog, CatalogError, CatalogStore, MappingOutcome, ShardOutcome};

fn tenant(catalog: &Catalog, key: i32, name: &str, at: u64) -> TenantMetadata {
    TenantMetadata {
        key: catalog.shard_map().encode(key).unwrap(),
        name: name.to_string(),
        tenant_type: "multipurpose".to_string(),
        postal_code: "98052".to_string(),
        country_code: "USA".to_string(),
        service_plan: "standard".to_string(),
        created_at: at,
        updated_at: at,
    }
}

#[test]
fn open_uninitialized_location_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = Catalog::open(&dir.path().join("catalog.redb"), KeyCodec::default());
    assert!(matches!(result, Err(CatalogError::CatalogNotInitialized(_))));
}

#[test]
fn blind_retry_of_every_registration_step_converges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.redb");
    let shard = Shard::new("tenants1", "acme");

    {
        let mut catalog = Catalog::initialize(&path, "tenantcatalog", KeyCodec::default()).unwrap();
        assert_eq!(catalog.add_shard(&shard).unwrap(), ShardOutcome::Added);
        assert_eq!(catalog.add_mapping(5000, &shard).unwrap(), MappingOutcome::Added);
        catalog.upsert_tenant(&tenant(&catalog, 5000, "Acme", 1000)).unwrap();
    }

    // A client that lost the acknowledgement re-runs all three steps.
    let mut catalog = Catalog::open(&path, KeyCodec::default()).unwrap();
    assert_eq!(catalog.location(), Some(path.as_path()));
    assert_eq!(catalog.add_shard(&shard).unwrap(), ShardOutcome::AlreadyRegistered);
    assert_eq!(catalog.add_mapping(5000, &shard).unwrap(), MappingOutcome::AlreadyMapped);
    catalog.upsert_tenant(&tenant(&catalog, 5000, "Acme", 2000)).unwrap();

    assert_eq!(catalog.shards().unwrap().len(), 1);
    assert_eq!(catalog.mappings().unwrap().len(), 1);
    let tenants = catalog.tenants().unwrap();
    assert_eq!(tenants.len(), 1);
    assert_eq!(tenants[0].created_at, 1000);
    assert_eq!(tenants[0].updated_at, 2000);
    assert_eq!(catalog.tenant(5000).unwrap().unwrap().name, "Acme");
}

#[test]
fn concurrent_claims_on_one_key_leave_a_single_owner() {
    let store = CatalogStore::initialize_in_memory("tenantcatalog").unwrap();
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut catalog = Catalog::from_store(store, KeyCodec::default()).unwrap();
                let shard = Shard::new("tenants1", &format!("db{i}"));
                catalog.add_shard(&shard).unwrap();
                barrier.wait();
                catalog.add_mapping(77, &shard)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(CatalogError::MappingConflict { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, contenders - 1);

    let mut catalog = Catalog::from_store(store, KeyCodec::default()).unwrap();
    assert!(catalog.key_exists(77).unwrap());
    assert_eq!(catalog.mappings().unwrap().len(), 1);
}
