//! ShardGrid tenant provisioning.
//!
//! Registers a tenant end to end: verifies the target server, creates the
//! tenant database from a template, seeds its profile row, then records the
//! shard, mapping and metadata in the catalog. Every step is idempotent, so a
//! failed registration is recovered by resubmitting it.
//!
//! # Components
//!
//! - **`interfaces`**: `ResourceProvisioner` and `SqlTransport` contracts
//! - **`workflow`**: Registration state machine (begin, advance, run)
//! - **`local`**: Directory-backed provisioner and SQLite transport
//! - **`error`**: `ProvisionError` and retry classification

pub mod error;
pub mod interfaces;
pub mod local;
pub mod workflow;

pub use error::{ProvisionError, ProvisionResult};
pub use interfaces::{
    ConnectionTarget, DeploymentParameters, ProvisionerError, QueryResult, ResourceHandle,
    ResourceProvisioner, SqlTransport, SqlValue, Statement, TemplateRef, Timeouts, TransportError,
};
pub use local::{BASE_TEMPLATE_SQL, LocalProvisioner, SqliteTransport};
pub use workflow::{
    ProvisioningSettings, ProvisioningWorkflow, Registration, RegistrationPhase, TenantRequest,
};
