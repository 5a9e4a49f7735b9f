//! Local backends: servers are directories, databases are SQLite files.
//!
//! Layout under the provisioning root:
//!
//! ```text
//! <root>/templates/<template>.sql          schema script per template
//! <root>/<server>/                         one directory per server
//! <root>/<server>/<database>.sqlite        tenant database
//! <root>/<server>/<database>.deployment.json  parameters it was deployed with
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use shard_core::is_valid_identifier;
use tracing::{debug, info};

use crate::interfaces::{
    ConnectionTarget, DeploymentParameters, ProvisionerError, QueryResult, ResourceHandle,
    ResourceProvisioner, SqlTransport, SqlValue, Statement, TemplateRef, Timeouts, TransportError,
};

/// Schema installed as the default tenant template.
pub const BASE_TEMPLATE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS tenant_profile (
    tenant_key   INTEGER NOT NULL PRIMARY KEY,
    tenant_name  TEXT    NOT NULL,
    tenant_type  TEXT    NOT NULL,
    postal_code  TEXT    NOT NULL,
    country_code TEXT    NOT NULL,
    service_plan TEXT    NOT NULL
);
CREATE TABLE IF NOT EXISTS venues (
    venue_id   INTEGER PRIMARY KEY,
    venue_name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    event_id   INTEGER PRIMARY KEY,
    venue_id   INTEGER NOT NULL REFERENCES venues(venue_id),
    event_name TEXT    NOT NULL,
    starts_at  INTEGER NOT NULL
);
";

const TEMPLATES_DIR: &str = "templates";

/// VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1000;

fn database_path(root: &Path, server: &str, database: &str) -> PathBuf {
    root.join(server).join(format!("{database}.sqlite"))
}

fn check_identifier(kind: &str, value: &str) -> Result<(), ProvisionerError> {
    if is_valid_identifier(value) {
        Ok(())
    } else {
        Err(ProvisionerError::Failed(format!("invalid {kind} name {value:?}")))
    }
}

// ── Provisioner ────────────────────────────────────────────────────

/// Directory-backed resource provisioner.
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    root: PathBuf,
}

impl LocalProvisioner {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a server directory. Idempotent.
    pub fn create_server(&self, server: &str) -> Result<PathBuf, ProvisionerError> {
        check_identifier("server", server)?;
        let dir = self.root.join(server);
        fs::create_dir_all(&dir).map_err(|e| ProvisionerError::Failed(e.to_string()))?;
        info!(server, path = %dir.display(), "server ready");
        Ok(dir)
    }

    /// Install (or replace) a template script.
    pub fn install_template(&self, name: &str, script: &str) -> Result<PathBuf, ProvisionerError> {
        check_identifier("template", name)?;
        let dir = self.root.join(TEMPLATES_DIR);
        fs::create_dir_all(&dir).map_err(|e| ProvisionerError::Failed(e.to_string()))?;
        let path = dir.join(format!("{name}.sql"));
        fs::write(&path, script).map_err(|e| ProvisionerError::Failed(e.to_string()))?;
        info!(template = name, path = %path.display(), "template installed");
        Ok(path)
    }

    /// Server names, sorted.
    pub fn servers(&self) -> Result<Vec<String>, ProvisionerError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ProvisionerError::Failed(e.to_string())),
        };
        let mut servers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ProvisionerError::Failed(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && name != TEMPLATES_DIR {
                servers.push(name);
            }
        }
        servers.sort();
        Ok(servers)
    }

    fn sidecar_path(&self, server: &str, database: &str) -> PathBuf {
        self.root.join(server).join(format!("{database}.deployment.json"))
    }

    fn create_database(&self, path: &Path, script: &str) -> Result<(), ProvisionerError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path, flags)
            .map_err(|e| ProvisionerError::Failed(e.to_string()))?;
        connection
            .execute_batch(script)
            .map_err(|e| ProvisionerError::Failed(format!("template script failed: {e}")))
    }
}

impl ResourceProvisioner for LocalProvisioner {
    fn ensure_server_exists(&self, server: &str) -> Result<(), ProvisionerError> {
        check_identifier("server", server)?;
        if self.root.join(server).is_dir() {
            Ok(())
        } else {
            Err(ProvisionerError::NotFound(format!("server {server}")))
        }
    }

    fn deploy_template(
        &self,
        template: &TemplateRef,
        parameters: &DeploymentParameters,
    ) -> Result<ResourceHandle, ProvisionerError> {
        check_identifier("template", &template.name)?;
        check_identifier("database", &parameters.database)?;
        self.ensure_server_exists(&parameters.server)?;

        let template_path = self
            .root
            .join(TEMPLATES_DIR)
            .join(format!("{}.sql", template.name));
        let script = fs::read_to_string(&template_path)
            .map_err(|_| ProvisionerError::NotFound(format!("template {}", template.name)))?;

        let db_path = database_path(&self.root, &parameters.server, &parameters.database);
        if db_path.exists() {
            return Err(ProvisionerError::AlreadyExists(format!(
                "{}/{}",
                parameters.server, parameters.database
            )));
        }

        let handle = ResourceHandle {
            server: parameters.server.clone(),
            database: parameters.database.clone(),
            template: Some(template.name.clone()),
            parameters: parameters.values.clone(),
        };
        // Parameters land before the database file so any database that
        // exists can be attributed.
        let sidecar = self.sidecar_path(&parameters.server, &parameters.database);
        let json = serde_json::to_vec_pretty(&handle)
            .map_err(|e| ProvisionerError::Failed(e.to_string()))?;
        fs::write(&sidecar, json).map_err(|e| ProvisionerError::Failed(e.to_string()))?;

        if let Err(e) = self.create_database(&db_path, &script) {
            let _ = fs::remove_file(&db_path);
            let _ = fs::remove_file(&sidecar);
            return Err(e);
        }
        info!(
            shard = %handle.shard(),
            template = %template.name,
            "database deployed from template"
        );
        Ok(handle)
    }

    fn database_exists(&self, server: &str, database: &str) -> Result<bool, ProvisionerError> {
        check_identifier("server", server)?;
        check_identifier("database", database)?;
        Ok(database_path(&self.root, server, database).is_file())
    }

    fn get_database(&self, server: &str, database: &str) -> Result<ResourceHandle, ProvisionerError> {
        if !self.database_exists(server, database)? {
            return Err(ProvisionerError::NotFound(format!("database {server}/{database}")));
        }
        match fs::read(self.sidecar_path(server, database)) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ProvisionerError::Failed(format!("corrupt deployment record: {e}"))),
            // Created outside the provisioner: nothing recorded.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ResourceHandle {
                server: server.to_string(),
                database: database.to_string(),
                template: None,
                parameters: Default::default(),
            }),
            Err(e) => Err(ProvisionerError::Failed(e.to_string())),
        }
    }
}

// ── Transport ──────────────────────────────────────────────────────

/// SQL transport over the SQLite files laid out by [`LocalProvisioner`].
///
/// The connect timeout bounds lock acquisition; the query timeout bounds
/// statement execution through a progress-handler deadline. Databases are
/// local files, so `ConnectionTarget::encrypt` has no effect here.
#[derive(Debug, Clone)]
pub struct SqliteTransport {
    root: PathBuf,
}

impl SqliteTransport {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn connect(&self, target: &ConnectionTarget, timeouts: &Timeouts) -> Result<Connection, TransportError> {
        for (kind, value) in [("server", &target.server), ("database", &target.database)] {
            check_identifier(kind, value).map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        }
        let path = database_path(&self.root, &target.server, &target.database);
        // No CREATE flag: a missing database is a connection failure.
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(&path, flags).map_err(|e| {
            TransportError::Connection(format!("{}/{}: {e}", target.server, target.database))
        })?;
        connection
            .busy_timeout(timeouts.connect)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(connection)
    }
}

impl SqlTransport for SqliteTransport {
    fn execute(
        &self,
        target: &ConnectionTarget,
        statement: &Statement,
        timeouts: &Timeouts,
    ) -> Result<QueryResult, TransportError> {
        let deadline = Instant::now().checked_add(timeouts.query).ok_or_else(|| {
            TransportError::InvalidRequest(format!("query timeout {:?} is out of range", timeouts.query))
        })?;
        let connection = self.connect(target, timeouts)?;
        connection
            .progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline))
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let mut prepared = connection.prepare(statement.text()).map_err(classify)?;
        let params = rusqlite::params_from_iter(statement.params().iter().map(to_value));
        let columns = prepared.column_count();

        let result = if columns == 0 {
            let rows_affected = prepared.execute(params).map_err(classify)?;
            QueryResult {
                rows_affected,
                rows: Vec::new(),
            }
        } else {
            let mut cursor = prepared.query(params).map_err(classify)?;
            let mut rows = Vec::new();
            while let Some(row) = cursor.next().map_err(classify)? {
                let mut values = Vec::with_capacity(columns);
                for i in 0..columns {
                    let value: Value = row.get(i).map_err(classify)?;
                    values.push(from_value(value));
                }
                rows.push(values);
            }
            QueryResult {
                rows_affected: 0,
                rows,
            }
        };
        debug!(
            server = %target.server,
            database = %target.database,
            rows = result.rows.len(),
            affected = result.rows_affected,
            "statement executed"
        );
        Ok(result)
    }
}

fn classify(err: rusqlite::Error) -> TransportError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
            TransportError::QueryTimeout(err.to_string())
        }
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked =>
        {
            TransportError::ConnectTimeout(err.to_string())
        }
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            TransportError::Constraint(err.to_string())
        }
        _ => TransportError::Statement(err.to_string()),
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(v),
        Value::Real(v) => SqlValue::Real(v),
        Value::Text(v) => SqlValue::Text(v),
        Value::Blob(v) => SqlValue::Blob(v),
    }
}
