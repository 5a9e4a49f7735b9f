//! `shardctl server` / `shardctl template`: local backend resources.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use shardgrid_provision::{BASE_TEMPLATE_SQL, LocalProvisioner};

use super::load_config;

#[derive(Debug, Serialize)]
pub struct ResourceReport {
    pub kind: &'static str,
    pub name: String,
    pub path: PathBuf,
}

impl fmt::Display for ResourceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "✓ {} {} at {}", self.kind, self.name, self.path.display())
    }
}

#[derive(Debug, Serialize)]
pub struct ServerList {
    pub servers: Vec<String>,
}

impl fmt::Display for ServerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.servers.is_empty() {
            return write!(f, "no servers");
        }
        write!(f, "{}", self.servers.join("\n"))
    }
}

pub fn server_add(config_path: &Path, name: &str) -> Result<ResourceReport> {
    let config = load_config(config_path)?;
    let path = LocalProvisioner::new(&config.provisioning.root).create_server(name)?;
    Ok(ResourceReport {
        kind: "server",
        name: name.to_string(),
        path,
    })
}

pub fn server_list(config_path: &Path) -> Result<ServerList> {
    let config = load_config(config_path)?;
    let servers = LocalProvisioner::new(&config.provisioning.root).servers()?;
    Ok(ServerList { servers })
}

pub fn template_add(config_path: &Path, name: &str, file: Option<&Path>) -> Result<ResourceReport> {
    let config = load_config(config_path)?;
    let script = match file {
        Some(file) => std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?,
        None => BASE_TEMPLATE_SQL.to_string(),
    };
    let path = LocalProvisioner::new(&config.provisioning.root).install_template(name, &script)?;
    Ok(ResourceReport {
        kind: "template",
        name: name.to_string(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init::init;

    #[test]
    fn test_server_add_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("shardgrid.toml");
        init(&config_path, dir.path(), "tenants1", false).unwrap();

        server_add(&config_path, "tenants2").unwrap();
        let list = server_list(&config_path).unwrap();
        assert_eq!(list.servers, vec!["tenants1".to_string(), "tenants2".to_string()]);
        assert!(server_add(&config_path, "../escape").is_err());
    }

    #[test]
    fn test_template_add_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("shardgrid.toml");
        init(&config_path, dir.path(), "tenants1", false).unwrap();
        let script = dir.path().join("custom.sql");
        std::fs::write(&script, "CREATE TABLE tenant_profile (x INTEGER);").unwrap();

        let report = template_add(&config_path, "custom", Some(&script)).unwrap();
        assert_eq!(
            std::fs::read_to_string(report.path).unwrap(),
            "CREATE TABLE tenant_profile (x INTEGER);"
        );
    }

    #[test]
    fn test_missing_config_mentions_init() {
        let dir = tempfile::tempdir().unwrap();
        let err = server_list(&dir.path().join("shardgrid.toml")).unwrap_err();
        assert!(err.to_string().contains("shardctl init"));
    }
}
