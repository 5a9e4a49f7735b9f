use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use shard_core::{KeyCodec, ShardGridConfig};
use shardgrid_catalog::Catalog;

pub mod init;
pub mod resources;
pub mod tenants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print a command report in the requested format.
pub fn emit<T: Serialize + fmt::Display>(format: OutputFormat, report: &T) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => println!("{report}"),
    }
    Ok(())
}

pub(crate) fn load_config(path: &Path) -> anyhow::Result<ShardGridConfig> {
    ShardGridConfig::from_file(path)
        .with_context(|| format!("failed to load {} (run `shardctl init` first?)", path.display()))
}

pub(crate) fn open_catalog(config: &ShardGridConfig) -> anyhow::Result<Catalog> {
    let codec = KeyCodec::new(config.keys.policy);
    Catalog::open(&config.catalog.path, codec)
        .with_context(|| format!("failed to open catalog {}", config.catalog.path.display()))
}
