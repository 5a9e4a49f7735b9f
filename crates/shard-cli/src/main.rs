use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

mod commands;

use commands::{OutputFormat, emit};

#[derive(Parser)]
#[command(
    name = "shardctl",
    about = "ShardGrid: multi-tenant shard catalog and tenant provisioning",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to shardgrid.toml
    #[arg(short, long, global = true, default_value = "shardgrid.toml")]
    config: PathBuf,
    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config scaffold and initialize the catalog
    Init {
        /// Root directory for the catalog and local servers
        #[arg(short, long)]
        root: PathBuf,
        /// Server new tenants are created on
        #[arg(short, long, default_value = "tenants1")]
        server: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Manage database servers
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Manage tenant database templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// Register a tenant: create its database, seed it and map its key.
    ///
    /// Safe to rerun after a failure; completed steps are reused.
    Register {
        /// Tenant display name
        #[arg(short, long)]
        name: String,
        /// Tenant key (derived from the name when omitted)
        #[arg(short, long, allow_negative_numbers = true)]
        key: Option<i32>,
        #[arg(long)]
        tenant_type: Option<String>,
        #[arg(long)]
        postal_code: Option<String>,
        #[arg(long)]
        country_code: Option<String>,
    },
    /// Look up the shard serving a tenant
    #[command(group(ArgGroup::new("tenant").required(true).args(["key", "name"])))]
    Lookup {
        #[arg(short, long, allow_negative_numbers = true)]
        key: Option<i32>,
        /// Tenant name (matched against registered tenants, else hashed to a key)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List registered tenants with their mappings
    List,
    /// Take a tenant's mapping online or offline
    #[command(group(ArgGroup::new("target").required(true).args(["online", "offline"])))]
    Status {
        #[arg(short, long, allow_negative_numbers = true)]
        key: i32,
        #[arg(long)]
        online: bool,
        #[arg(long)]
        offline: bool,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// Create a server
    Add { name: String },
    /// List servers
    List,
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Install a template script (the built-in tenant schema when no file is given)
    Add {
        name: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("shardctl=info".parse()?)
        .add_directive("shardgrid=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = cli.config.as_path();
    let format = cli.format;

    match cli.command {
        Commands::Init {
            root,
            server,
            force,
        } => emit(format, &commands::init::init(config, &root, &server, force)?),
        Commands::Server { action } => match action {
            ServerAction::Add { name } => emit(format, &commands::resources::server_add(config, &name)?),
            ServerAction::List => emit(format, &commands::resources::server_list(config)?),
        },
        Commands::Template { action } => match action {
            TemplateAction::Add { name, file } => emit(
                format,
                &commands::resources::template_add(config, &name, file.as_deref())?,
            ),
        },
        Commands::Register {
            name,
            key,
            tenant_type,
            postal_code,
            country_code,
        } => {
            let profile = commands::tenants::ProfileOverrides {
                tenant_type,
                postal_code,
                country_code,
            };
            emit(format, &commands::tenants::register(config, &name, key, profile)?)
        }
        Commands::Lookup { key, name } => {
            emit(format, &commands::tenants::lookup(config, key, name.as_deref())?)
        }
        Commands::List => emit(format, &commands::tenants::list(config)?),
        Commands::Status { key, online, .. } => {
            emit(format, &commands::tenants::status(config, key, online)?)
        }
    }
}
