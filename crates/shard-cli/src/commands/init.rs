//! `shardctl init`: scaffold shardgrid.toml, the default server and
//! template, and an empty catalog.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use shard_core::{KeyCodec, ShardGridConfig};
use shardgrid_catalog::Catalog;
use shardgrid_provision::{BASE_TEMPLATE_SQL, LocalProvisioner};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct InitReport {
    pub config: PathBuf,
    pub catalog: PathBuf,
    pub shard_map: String,
    pub server: String,
    pub template: String,
}

impl fmt::Display for InitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "✓ Generated {}", self.config.display())?;
        writeln!(f, "  Catalog:   {} ({})", self.catalog.display(), self.shard_map)?;
        writeln!(f, "  Server:    {}", self.server)?;
        write!(f, "  Template:  {}", self.template)
    }
}

pub fn init(config_path: &Path, root: &Path, server: &str, force: bool) -> Result<InitReport> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))?;
    let root = fs::canonicalize(root)?;
    let config = ShardGridConfig::scaffold(&root, server);
    config.validate()?;

    let provisioner = LocalProvisioner::new(&config.provisioning.root);
    provisioner.create_server(&config.provisioning.server)?;
    provisioner.install_template(&config.provisioning.template, BASE_TEMPLATE_SQL)?;
    Catalog::initialize(
        &config.catalog.path,
        &config.catalog.shard_map,
        KeyCodec::new(config.keys.policy),
    )?;

    fs::write(config_path, config.to_toml_string()?)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    info!(config = %config_path.display(), root = %root.display(), "initialized");

    Ok(InitReport {
        config: config_path.to_path_buf(),
        catalog: config.catalog.path,
        shard_map: config.catalog.shard_map,
        server: config.provisioning.server,
        template: config.provisioning.template,
    })
}
