//! Collaborator interfaces consumed by the provisioning workflow.
//!
//! The workflow only depends on these contracts: a resource provisioner that
//! creates tenant databases from templates, and a SQL transport that runs
//! parameterized statements against them. Both are injected so tests can
//! substitute in-memory fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shard_core::Shard;
use thiserror::Error;

/// Deployment parameter carrying the tenant's raw key hex form.
pub const PARAM_TENANT_KEY: &str = "tenant_key";

/// Deployment parameter carrying the tenant's display name.
pub const PARAM_TENANT_NAME: &str = "tenant_name";

// ── Resource provisioner ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Failed(String),
}

/// Reference to a deployment template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
}

impl TemplateRef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Parameters for one template deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentParameters {
    pub server: String,
    pub database: String,
    /// Free-form values recorded with the deployment.
    pub values: BTreeMap<String, String>,
}

/// A provisioned database and the parameters it was deployed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub server: String,
    pub database: String,
    pub template: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

impl ResourceHandle {
    pub fn shard(&self) -> Shard {
        Shard::new(&self.server, &self.database)
    }

    /// Raw key hex of the tenant this database was deployed for, if recorded.
    pub fn tenant_key(&self) -> Option<&str> {
        self.parameters.get(PARAM_TENANT_KEY).map(String::as_str)
    }
}

/// Creates and inspects physical tenant databases.
pub trait ResourceProvisioner: Send + Sync {
    /// Succeeds when the server exists; `NotFound` otherwise.
    fn ensure_server_exists(&self, server: &str) -> Result<(), ProvisionerError>;

    /// Create a database from a template. Not idempotent: deploying over an
    /// existing database fails.
    fn deploy_template(
        &self,
        template: &TemplateRef,
        parameters: &DeploymentParameters,
    ) -> Result<ResourceHandle, ProvisionerError>;

    fn database_exists(&self, server: &str, database: &str) -> Result<bool, ProvisionerError>;

    fn get_database(&self, server: &str, database: &str) -> Result<ResourceHandle, ProvisionerError>;
}

// ── SQL transport ──────────────────────────────────────────────────

/// Independent bounds for connecting and for running one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub query: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            query: Duration::from_secs(60),
        }
    }
}

/// Where a statement runs.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    /// Require an encrypted channel. Transports without a network channel
    /// ignore it.
    pub encrypt: bool,
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("encrypt", &self.encrypt)
            .finish()
    }
}

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// Statement text plus positional parameters (`?1`, `?2`, ...).
///
/// Variable data always travels as a parameter, never inside the text.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            params: Vec::new(),
        }
    }

    /// Builder method: bind the next positional parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Rows returned by a query, or the affected count of a modification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows_affected: usize,
    pub rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect timed out: {0}")]
    ConnectTimeout(String),

    #[error("query timed out: {0}")]
    QueryTimeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("statement failed: {0}")]
    Statement(String),

    /// The statement was rejected by a uniqueness or other constraint.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Rejected before connecting: bad target names or unusable timeouts.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether the statement may or may not have taken effect.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectTimeout(_)
                | TransportError::QueryTimeout(_)
                | TransportError::Connection(_)
        )
    }
}

/// Runs statements against catalog or shard databases.
pub trait SqlTransport: Send + Sync {
    fn execute(
        &self,
        target: &ConnectionTarget,
        statement: &Statement,
        timeouts: &Timeouts,
    ) -> Result<QueryResult, TransportError>;
}
