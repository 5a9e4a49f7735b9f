//! `shardctl register | lookup | list | status`: tenant operations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use shard_core::{
    Mapping, MappingStatus, TenantKey, TenantMetadata, derive_tenant_key, normalize_tenant_name,
};
use shardgrid_catalog::Catalog;
use shardgrid_provision::{
    LocalProvisioner, ProvisioningSettings, ProvisioningWorkflow, SqliteTransport, TenantRequest,
};

use super::{load_config, open_catalog};

/// Optional profile attributes that override the configured defaults.
#[derive(Debug, Default)]
pub struct ProfileOverrides {
    pub tenant_type: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterReport {
    pub name: String,
    pub key: TenantKey,
    pub raw_key: String,
    pub shard: String,
    pub reused_database: bool,
    pub phases: Vec<&'static str>,
}

impl fmt::Display for RegisterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "✓ Registered {} ({}, {})", self.name, self.key, self.raw_key)?;
        write!(f, "  Shard: {}", self.shard)?;
        if self.reused_database {
            write!(f, " (database reused from an earlier attempt)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct LookupReport {
    pub key: TenantKey,
    pub raw_key: String,
    pub mapping: Option<Mapping>,
    pub tenant: Option<TenantMetadata>,
}

impl fmt::Display for LookupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mapping {
            Some(mapping) => {
                write!(f, "{} ({}) → {}", self.key, self.raw_key, mapping.shard)?;
                if let Some(tenant) = &self.tenant {
                    write!(f, "  [{}]", tenant.name)?;
                }
                Ok(())
            }
            None => write!(f, "{} ({}) is not mapped online", self.key, self.raw_key),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TenantRow {
    pub name: Option<String>,
    pub raw_key: String,
    pub shard: Option<String>,
    pub status: Option<MappingStatus>,
    pub version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct TenantList {
    pub shard_map: String,
    pub tenants: Vec<TenantRow>,
}

impl fmt::Display for TenantList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard map {}: {} tenant(s)", self.shard_map, self.tenants.len())?;
        for row in &self.tenants {
            write!(
                f,
                "\n  {:<12} {:<24} {:<32} {}",
                row.raw_key,
                row.name.as_deref().unwrap_or("-"),
                row.shard.as_deref().unwrap_or("-"),
                row.status.map(|s| s.label()).unwrap_or("unmapped"),
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub key: TenantKey,
    pub mapping: Mapping,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "✓ {} → {} is {} (version {})",
            self.key,
            self.mapping.shard,
            self.mapping.status.label(),
            self.mapping.version
        )
    }
}

pub fn register(
    config_path: &Path,
    name: &str,
    key: Option<TenantKey>,
    profile: ProfileOverrides,
) -> Result<RegisterReport> {
    let config = load_config(config_path)?;
    let mut catalog = open_catalog(&config)?;
    let provisioner = LocalProvisioner::new(&config.provisioning.root);
    let transport = SqliteTransport::new(&config.provisioning.root);
    let settings = ProvisioningSettings::from_config(&config);
    let workflow = ProvisioningWorkflow::new(&provisioner, &transport, &settings);

    let key = key.unwrap_or_else(|| derive_tenant_key(name));
    let mut request = TenantRequest::new(name, key);
    request.tenant_type = profile.tenant_type;
    request.postal_code = profile.postal_code;
    request.country_code = profile.country_code;

    let registration = workflow.register(&mut catalog, request).map_err(|e| {
        let hint = if e.is_retryable() {
            "; rerun the same command to resume"
        } else {
            ""
        };
        anyhow!(e).context(format!("registering {name:?} failed{hint}"))
    })?;

    Ok(RegisterReport {
        name: name.to_string(),
        key,
        raw_key: registration.raw_key().to_hex(),
        shard: registration.shard().to_string(),
        reused_database: registration.reused_database(),
        phases: registration.history().iter().map(|p| p.label()).collect(),
    })
}

pub fn lookup(config_path: &Path, key: Option<TenantKey>, name: Option<&str>) -> Result<LookupReport> {
    let config = load_config(config_path)?;
    let mut catalog = open_catalog(&config)?;
    let key = match (key, name) {
        (Some(key), _) => key,
        (None, Some(name)) => match key_for_name(&catalog, name)? {
            Some(key) => key,
            None => derive_tenant_key(name),
        },
        (None, None) => return Err(anyhow!("either --key or --name is required")),
    };

    let raw_key = catalog.shard_map().encode(key)?.to_hex();
    let mapping = catalog.try_get_mapping(key)?;
    let tenant = match mapping {
        Some(_) => catalog.tenant(key)?,
        None => None,
    };
    Ok(LookupReport {
        key,
        raw_key,
        mapping,
        tenant,
    })
}

/// Key of the registered tenant whose name normalizes to the same database.
fn key_for_name(catalog: &Catalog, name: &str) -> Result<Option<TenantKey>> {
    let wanted = normalize_tenant_name(name);
    for tenant in catalog.tenants()? {
        if normalize_tenant_name(&tenant.name) == wanted {
            let key = catalog.shard_map().codec().decode(&tenant.key)?;
            return Ok(Some(key));
        }
    }
    Ok(None)
}

pub fn list(config_path: &Path) -> Result<TenantList> {
    let config = load_config(config_path)?;
    let catalog = open_catalog(&config)?;

    let mut mappings: BTreeMap<String, Mapping> = catalog
        .mappings()?
        .into_iter()
        .map(|m| (m.key.to_hex(), m))
        .collect();
    let mut tenants: Vec<TenantRow> = Vec::new();
    for tenant in catalog.tenants()? {
        let raw_key = tenant.key.to_hex();
        let mapping = mappings.remove(&raw_key);
        tenants.push(row(Some(tenant.name), raw_key, mapping));
    }
    // Mappings created outside registration have no metadata.
    for (raw_key, mapping) in mappings {
        tenants.push(row(None, raw_key, Some(mapping)));
    }
    tenants.sort_by(|a, b| a.raw_key.cmp(&b.raw_key));

    Ok(TenantList {
        shard_map: catalog.shard_map().name().to_string(),
        tenants,
    })
}

fn row(name: Option<String>, raw_key: String, mapping: Option<Mapping>) -> TenantRow {
    TenantRow {
        name,
        raw_key,
        shard: mapping.as_ref().map(|m| m.shard.to_string()),
        status: mapping.as_ref().map(|m| m.status),
        version: mapping.map(|m| m.version),
    }
}

pub fn status(config_path: &Path, key: TenantKey, online: bool) -> Result<StatusReport> {
    let config = load_config(config_path)?;
    let mut catalog = open_catalog(&config)?;
    let current = catalog
        .mapping(key)?
        .with_context(|| format!("no mapping for key {key}"))?;
    let target = if online {
        MappingStatus::Online
    } else {
        MappingStatus::Offline
    };
    let mapping = catalog.set_mapping_status(key, target, current.version)?;
    Ok(StatusReport { key, mapping })
}
