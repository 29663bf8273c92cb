mod cloud;
mod commands;
mod config;
mod context;
mod export;
mod output;
mod traits;

#[cfg(test)]
mod test_helpers;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::export::ExportArgs;
use commands::{ExportCommand, ServeCommand, TypesCommand};
use config::{Config, ConfigOverrides};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "teleform")]
#[command(about = "Teleform - Export existing Azure resources as Terraform configuration", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, global = true, env = "TELEFORM_CONFIG")]
    config: Option<PathBuf>,

    /// Exporter program name or path
    #[arg(long, global = true, env = "TELEFORM_EXPORTER")]
    exporter: Option<String>,

    /// Directory holding the per-request export workspaces
    #[arg(long, global = true, env = "TELEFORM_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Azure tenant to authenticate against
    #[arg(long, global = true, env = "AZURE_TENANT_ID")]
    tenant_id: Option<String>,

    /// Pre-issued management token (skips the Azure CLI login)
    #[arg(long, global = true, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Address to bind to
        #[arg(long, env = "TELEFORM_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "TELEFORM_PORT")]
        port: Option<u16>,
    },

    /// Export one resource group to a zip archive
    Export {
        /// Subscription ID
        #[arg(short, long)]
        subscription: String,

        /// Resource group name
        #[arg(short, long)]
        resource_group: String,

        /// Terraform resource kinds to export (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<String>,

        /// Resource IDs to export (comma-separated); takes precedence over --kinds
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Archive path (defaults to ./<resource-group>-terraform.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the supported Azure resource types and their Terraform kinds
    Types {
        /// Only show types containing this text
        filter: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("teleform=info,tower_http=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ctx = context::Context::new();

    let mut overrides = ConfigOverrides {
        exporter: cli.exporter,
        work_dir: cli.work_dir,
        tenant_id: cli.tenant_id,
        access_token: cli.access_token,
        ..ConfigOverrides::default()
    };

    match cli.command {
        Commands::Serve { host, port } => {
            overrides.host = host;
            overrides.port = port;
            let config = load_config(&ctx, cli.config.as_deref(), &overrides)?;
            ServeCommand::execute(&ctx, config)?;
        }
        Commands::Export {
            subscription,
            resource_group,
            kinds,
            ids,
            output,
        } => {
            let config = load_config(&ctx, cli.config.as_deref(), &overrides)?;
            ExportCommand::execute(
                &ctx,
                config,
                ExportArgs {
                    subscription,
                    resource_group,
                    kinds,
                    ids,
                    output,
                },
            )?;
        }
        Commands::Types { filter } => {
            TypesCommand::execute(&ctx, filter.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(
    ctx: &context::Context,
    path: Option<&std::path::Path>,
    overrides: &ConfigOverrides,
) -> Result<Config> {
    let mut config = Config::load(ctx.fs.as_ref(), path)?;
    config.apply_overrides(overrides);
    Ok(config)
}
