//! Tenant registration workflow: drives one registration attempt.
//!
//! An attempt moves through fixed phases, one remote side effect per step:
//!
//! ```text
//! Start → ShardVerified → ShardProvisioned → Seeded → Registered → Done
//!   any failure → Aborted { reason }
//! ```
//!
//! No step is rolled back. Every step is safe to repeat, so a failed attempt
//! is recovered by submitting the same request again.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use shard_core::{
    KeyCodec, RawKey, Shard, ShardGridConfig, TenantKey, TenantMetadata, is_valid_identifier,
    normalize_tenant_name,
};
use shardgrid_catalog::{Catalog, CatalogError};
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::interfaces::{
    ConnectionTarget, DeploymentParameters, PARAM_TENANT_KEY, PARAM_TENANT_NAME, ProvisionerError,
    ResourceProvisioner, SqlTransport, Statement, TemplateRef, Timeouts,
};

/// Clears any previous profile row so the seed can be replayed.
pub const SEED_CLEAR_SQL: &str = "DELETE FROM tenant_profile";

pub const SEED_INSERT_SQL: &str = "INSERT INTO tenant_profile \
     (tenant_key, tenant_name, tenant_type, postal_code, country_code, service_plan) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Current phase of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationPhase {
    Start,
    /// Server exists and the key and name checks passed.
    ShardVerified,
    /// Tenant database exists.
    ShardProvisioned,
    /// Tenant profile row written.
    Seeded,
    /// Shard, mapping and metadata recorded in the catalog.
    Registered,
    Done,
    Aborted { reason: String },
}

impl RegistrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationPhase::Done | RegistrationPhase::Aborted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RegistrationPhase::Start => "start",
            RegistrationPhase::ShardVerified => "shard_verified",
            RegistrationPhase::ShardProvisioned => "shard_provisioned",
            RegistrationPhase::Seeded => "seeded",
            RegistrationPhase::Registered => "registered",
            RegistrationPhase::Done => "done",
            RegistrationPhase::Aborted { .. } => "aborted",
        }
    }
}

/// A request to register one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRequest {
    pub name: String,
    pub key: TenantKey,
    pub tenant_type: Option<String>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
}

impl TenantRequest {
    pub fn new(name: &str, key: TenantKey) -> Self {
        Self {
            name: name.to_string(),
            key,
            tenant_type: None,
            postal_code: None,
            country_code: None,
        }
    }

    pub fn with_tenant_type(mut self, tenant_type: &str) -> Self {
        self.tenant_type = Some(tenant_type.to_string());
        self
    }

    pub fn with_postal_code(mut self, postal_code: &str) -> Self {
        self.postal_code = Some(postal_code.to_string());
        self
    }

    pub fn with_country_code(mut self, country_code: &str) -> Self {
        self.country_code = Some(country_code.to_string());
        self
    }
}

/// Fixed inputs shared by every registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningSettings {
    pub server: String,
    pub template: String,
    pub service_plan: String,
    pub tenant_type: String,
    pub postal_code: String,
    pub country_code: String,
    pub user: String,
    pub password: Option<String>,
    pub encrypt: bool,
    pub timeouts: Timeouts,
}

impl ProvisioningSettings {
    pub fn from_config(config: &ShardGridConfig) -> Self {
        let p = &config.provisioning;
        Self {
            server: p.server.clone(),
            template: p.template.clone(),
            service_plan: p.service_plan.clone(),
            tenant_type: p.tenant_type.clone(),
            postal_code: p.postal_code.clone(),
            country_code: p.country_code.clone(),
            user: config.sql.user.clone(),
            password: config.sql.password(),
            encrypt: config.sql.encrypt,
            timeouts: Timeouts {
                connect: config.sql.connect_timeout(),
                query: config.sql.query_timeout(),
            },
        }
    }
}

/// One registration attempt.
#[derive(Debug, Clone)]
pub struct Registration {
    request: TenantRequest,
    raw_key: RawKey,
    shard: Shard,
    phase: RegistrationPhase,
    history: Vec<RegistrationPhase>,
    reused_database: bool,
}

impl Registration {
    pub fn request(&self) -> &TenantRequest {
        &self.request
    }

    pub fn raw_key(&self) -> &RawKey {
        &self.raw_key
    }

    /// Target shard: the configured server plus the normalized tenant name.
    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    pub fn phase(&self) -> &RegistrationPhase {
        &self.phase
    }

    /// Every phase entered so far, starting with `Start`.
    pub fn history(&self) -> &[RegistrationPhase] {
        &self.history
    }

    /// Whether an existing database left by an earlier attempt was adopted.
    pub fn reused_database(&self) -> bool {
        self.reused_database
    }

    fn transition(&mut self, next: RegistrationPhase) {
        self.phase = next.clone();
        self.history.push(next);
    }
}

/// Runs registrations against injected collaborators.
pub struct ProvisioningWorkflow<'a, P: ?Sized, T: ?Sized> {
    provisioner: &'a P,
    transport: &'a T,
    settings: &'a ProvisioningSettings,
}

impl<'a, P, T> ProvisioningWorkflow<'a, P, T>
where
    P: ResourceProvisioner + ?Sized,
    T: SqlTransport + ?Sized,
{
    pub fn new(provisioner: &'a P, transport: &'a T, settings: &'a ProvisioningSettings) -> Self {
        Self {
            provisioner,
            transport,
            settings,
        }
    }

    /// Validate a request and create an attempt in `Start`.
    ///
    /// Invalid names and keys are rejected here, before any remote call.
    pub fn begin(&self, request: TenantRequest, codec: KeyCodec) -> ProvisionResult<Registration> {
        let database = normalize_tenant_name(&request.name);
        if !is_valid_identifier(&database) {
            return Err(ProvisionError::InvalidTenantName(request.name));
        }
        let raw_key = codec.encode(request.key)?;
        Ok(Registration {
            shard: Shard::new(&self.settings.server, &database),
            raw_key,
            request,
            phase: RegistrationPhase::Start,
            history: vec![RegistrationPhase::Start],
            reused_database: false,
        })
    }

    /// Register a tenant end to end.
    ///
    /// On failure the error is returned; the attempt itself is dropped and
    /// the caller recovers by calling again with the same request.
    pub fn register(&self, catalog: &mut Catalog, request: TenantRequest) -> ProvisionResult<Registration> {
        let mut registration = self.begin(request, catalog.shard_map().codec())?;
        self.run(catalog, &mut registration)?;
        Ok(registration)
    }

    /// Advance until `Done` or the first failure.
    pub fn run(&self, catalog: &mut Catalog, registration: &mut Registration) -> ProvisionResult<()> {
        while !registration.phase.is_terminal() {
            self.advance(catalog, registration)?;
        }
        match &registration.phase {
            RegistrationPhase::Aborted { reason } => Err(ProvisionError::Aborted(reason.clone())),
            _ => Ok(()),
        }
    }

    /// Perform the step for the current phase and move to the next one.
    ///
    /// A failing step moves the attempt to `Aborted` and returns the error.
    /// Advancing a `Done` attempt is a no-op; advancing an aborted one fails.
    pub fn advance(
        &self,
        catalog: &mut Catalog,
        registration: &mut Registration,
    ) -> ProvisionResult<RegistrationPhase> {
        let current = registration.phase.clone();
        let step = match &current {
            RegistrationPhase::Start => self
                .verify(catalog, registration)
                .map(|()| RegistrationPhase::ShardVerified),
            RegistrationPhase::ShardVerified => self
                .provision(registration)
                .map(|()| RegistrationPhase::ShardProvisioned),
            RegistrationPhase::ShardProvisioned => {
                self.seed(registration).map(|()| RegistrationPhase::Seeded)
            }
            RegistrationPhase::Seeded => self
                .record(catalog, registration)
                .map(|()| RegistrationPhase::Registered),
            RegistrationPhase::Registered => Ok(RegistrationPhase::Done),
            RegistrationPhase::Done => return Ok(RegistrationPhase::Done),
            RegistrationPhase::Aborted { reason } => {
                return Err(ProvisionError::Aborted(reason.clone()));
            }
        };

        match step {
            Ok(next) => {
                info!(
                    tenant = %registration.request.name,
                    key = %registration.raw_key,
                    shard = %registration.shard,
                    from = current.label(),
                    to = next.label(),
                    "registration advanced"
                );
                registration.transition(next.clone());
                Ok(next)
            }
            Err(e) => {
                warn!(
                    tenant = %registration.request.name,
                    key = %registration.raw_key,
                    phase = current.label(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "registration aborted"
                );
                registration.transition(RegistrationPhase::Aborted {
                    reason: format!("{}: {e}", current.label()),
                });
                Err(e)
            }
        }
    }

    /// Server exists, key is free or already ours, and the database name is
    /// free or left by an earlier attempt for the same key.
    fn verify(&self, catalog: &mut Catalog, registration: &mut Registration) -> ProvisionResult<()> {
        let shard = &registration.shard;
        self.provisioner
            .ensure_server_exists(&shard.server)
            .map_err(|e| match e {
                ProvisionerError::NotFound(_) => ProvisionError::ServerNotFound(shard.server.clone()),
                other => ProvisionError::Provisioner(other),
            })?;

        if let Some(existing) = catalog.mapping(registration.request.key)? {
            if existing.shard != *shard {
                return Err(CatalogError::MappingConflict {
                    key: registration.raw_key.clone(),
                    existing: existing.shard,
                    requested: shard.clone(),
                }
                .into());
            }
        }

        if self.provisioner.database_exists(&shard.server, &shard.database)? {
            let handle = self.provisioner.get_database(&shard.server, &shard.database)?;
            let ours = registration.raw_key.to_hex();
            if handle.tenant_key() != Some(ours.as_str()) {
                return Err(ProvisionError::TenantAlreadyExists(shard.to_string()));
            }
            debug!(shard = %shard, "adopting database from an earlier attempt");
            registration.reused_database = true;
        }
        Ok(())
    }

    fn provision(&self, registration: &Registration) -> ProvisionResult<()> {
        if registration.reused_database {
            return Ok(());
        }
        let shard = &registration.shard;
        let parameters = DeploymentParameters {
            server: shard.server.clone(),
            database: shard.database.clone(),
            values: BTreeMap::from([
                (PARAM_TENANT_KEY.to_string(), registration.raw_key.to_hex()),
                (PARAM_TENANT_NAME.to_string(), registration.request.name.clone()),
            ]),
        };
        let handle = self
            .provisioner
            .deploy_template(&TemplateRef::new(&self.settings.template), &parameters)?;
        debug!(shard = %handle.shard(), template = %self.settings.template, "tenant database deployed");
        Ok(())
    }

    /// Replace the tenant profile row. Both statements are parameterized.
    fn seed(&self, registration: &Registration) -> ProvisionResult<()> {
        let target = ConnectionTarget {
            server: registration.shard.server.clone(),
            database: registration.shard.database.clone(),
            user: self.settings.user.clone(),
            password: self.settings.password.clone(),
            encrypt: self.settings.encrypt,
        };
        let timeouts = &self.settings.timeouts;
        let profile = self.metadata(registration, 0);

        self.transport
            .execute(&target, &Statement::new(SEED_CLEAR_SQL), timeouts)?;
        let insert = Statement::new(SEED_INSERT_SQL)
            .bind(i64::from(registration.request.key))
            .bind(profile.name)
            .bind(profile.tenant_type)
            .bind(profile.postal_code)
            .bind(profile.country_code)
            .bind(profile.service_plan);
        self.transport.execute(&target, &insert, timeouts)?;
        Ok(())
    }

    fn record(&self, catalog: &mut Catalog, registration: &Registration) -> ProvisionResult<()> {
        let key = registration.request.key;
        catalog.add_shard(&registration.shard)?;
        catalog.add_mapping(key, &registration.shard)?;
        catalog.upsert_tenant(&self.metadata(registration, unix_now()))?;
        Ok(())
    }

    fn metadata(&self, registration: &Registration, now: u64) -> TenantMetadata {
        let request = &registration.request;
        let settings = self.settings;
        TenantMetadata {
            key: registration.raw_key.clone(),
            name: request.name.clone(),
            tenant_type: request
                .tenant_type
                .clone()
                .unwrap_or_else(|| settings.tenant_type.clone()),
            postal_code: request
                .postal_code
                .clone()
                .unwrap_or_else(|| settings.postal_code.clone()),
            country_code: request
                .country_code
                .clone()
                .unwrap_or_else(|| settings.country_code.clone()),
            service_plan: settings.service_plan.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{QueryResult, ResourceHandle, TransportError};

    struct NoServers;

    impl ResourceProvisioner for NoServers {
        fn ensure_server_exists(&self, server: &str) -> Result<(), ProvisionerError> {
            Err(ProvisionerError::NotFound(server.to_string()))
        }

        fn deploy_template(
            &self,
            _template: &TemplateRef,
            _parameters: &DeploymentParameters,
        ) -> Result<ResourceHandle, ProvisionerError> {
            panic!("deploy must not be reached")
        }

        fn database_exists(&self, _server: &str, _database: &str) -> Result<bool, ProvisionerError> {
            Ok(false)
        }

        fn get_database(&self, server: &str, database: &str) -> Result<ResourceHandle, ProvisionerError> {
            Err(ProvisionerError::NotFound(format!("{server}/{database}")))
        }
    }

    struct NoTransport;

    impl SqlTransport for NoTransport {
        fn execute(
            &self,
            _target: &ConnectionTarget,
            _statement: &Statement,
            _timeouts: &Timeouts,
        ) -> Result<QueryResult, TransportError> {
            panic!("transport must not be reached")
        }
    }

    fn settings() -> ProvisioningSettings {
        let config = ShardGridConfig::scaffold(std::path::Path::new("/srv/shardgrid"), "tenants1");
        ProvisioningSettings::from_config(&config)
    }

    fn catalog() -> Catalog {
        let store = shardgrid_catalog::CatalogStore::initialize_in_memory("tenantcatalog").unwrap();
        Catalog::from_store(store, KeyCodec::default()).unwrap()
    }

    #[test]
    fn begin_targets_normalized_database() {
        let settings = settings();
        let workflow = ProvisioningWorkflow::new(&NoServers, &NoTransport, &settings);
        let reg = workflow
            .begin(TenantRequest::new("Contoso Concert Hall", 7), KeyCodec::default())
            .unwrap();
        assert_eq!(reg.shard(), &Shard::new("tenants1", "contosoconcerthall"));
        assert_eq!(reg.phase(), &RegistrationPhase::Start);
        assert_eq!(reg.raw_key().to_hex(), "0x80000007");
    }

    #[test]
    fn begin_rejects_bad_name_and_key() {
        let settings = settings();
        let workflow = ProvisioningWorkflow::new(&NoServers, &NoTransport, &settings);
        assert!(matches!(
            workflow.begin(TenantRequest::new("Acme/Prod", 1), KeyCodec::default()),
            Err(ProvisionError::InvalidTenantName(_))
        ));
        assert!(matches!(
            workflow.begin(TenantRequest::new("   ", 1), KeyCodec::default()),
            Err(ProvisionError::InvalidTenantName(_))
        ));
        assert!(matches!(
            workflow.begin(TenantRequest::new("acme", -5), KeyCodec::default()),
            Err(ProvisionError::InvalidKey(_))
        ));
    }

    #[test]
    fn missing_server_aborts_at_start() {
        let settings = settings();
        let workflow = ProvisioningWorkflow::new(&NoServers, &NoTransport, &settings);
        let mut catalog = catalog();
        let mut reg = workflow
            .begin(TenantRequest::new("Acme", 5000), KeyCodec::default())
            .unwrap();

        let err = workflow.advance(&mut catalog, &mut reg).unwrap_err();
        assert!(matches!(err, ProvisionError::ServerNotFound(ref s) if s == "tenants1"));
        assert!(matches!(reg.phase(), RegistrationPhase::Aborted { .. }));

        // An aborted attempt stays aborted.
        assert!(matches!(
            workflow.advance(&mut catalog, &mut reg),
            Err(ProvisionError::Aborted(_))
        ));
        assert!(catalog.shards().unwrap().is_empty());
    }

    #[test]
    fn request_overrides_profile_defaults() {
        let settings = settings();
        let workflow = ProvisioningWorkflow::new(&NoServers, &NoTransport, &settings);
        let reg = workflow
            .begin(
                TenantRequest::new("Acme", 1).with_postal_code("10115").with_country_code("DEU"),
                KeyCodec::default(),
            )
            .unwrap();
        let meta = workflow.metadata(&reg, 42);
        assert_eq!(meta.postal_code, "10115");
        assert_eq!(meta.country_code, "DEU");
        assert_eq!(meta.tenant_type, "multipurpose");
        assert_eq!(meta.created_at, 42);
    }

    #[test]
    fn phase_labels_and_terminality() {
        assert!(RegistrationPhase::Done.is_terminal());
        assert!(RegistrationPhase::Aborted { reason: "x".into() }.is_terminal());
        assert!(!RegistrationPhase::Seeded.is_terminal());
        assert_eq!(RegistrationPhase::ShardProvisioned.label(), "shard_provisioned");
    }
}
