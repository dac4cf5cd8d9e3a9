//! The `shog` command-line interface.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Debug, Parser)]
#[command(
    name = "shog",
    version,
    about = "Shoggoth node - publish and replicate content-addressed resources"
)]
pub struct Cli {
    /// File to use for configuration.
    #[arg(short = 'c', global = true, value_name = "file")]
    pub config: Option<PathBuf>,

    /// Runtime directory (must be an absolute path).
    #[arg(short = 'r', global = true, value_name = "directory")]
    pub runtime_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a Shoggoth node in the foreground.
    Run,
    /// Start a Shoggoth node as a service.
    Start,
    /// Stop the Shoggoth node service.
    Stop,
    /// Restart the Shoggoth node service.
    Restart,
    /// Check the status of the Shoggoth node service.
    Status,
    /// Print the logs of the Shoggoth node service.
    Logs,
    /// Display your Node ID.
    Id,
    /// Pin a local file or directory as a Shoggoth resource.
    Pin { path: PathBuf, label: String },
    /// Unpin a resource.
    Unpin { shoggoth_id: String },
    /// Pin a remote resource.
    Clone { url: String, label: String },
    /// Backup the node pins and configuration.
    Backup,
    /// Restore node pins and configuration from a backup file.
    Restore,
}

/// Dispatches the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.config;
    let runtime = cli.runtime_dir;

    match cli.command {
        Command::Run => commands::run_node(config, runtime).await?,
        Command::Start => commands::start_service(config, runtime)?,
        Command::Stop => commands::stop_service(config, runtime)?,
        Command::Restart => commands::restart_service(config, runtime)?,
        Command::Status => commands::service_status(config, runtime)?,
        Command::Logs => commands::print_service_logs(config, runtime)?,
        Command::Id => commands::print_node_id(config, runtime)?,
        Command::Pin { path, label } => commands::pin_resource(config, runtime, path, label).await?,
        Command::Unpin { shoggoth_id } => {
            commands::unpin_resource(config, runtime, shoggoth_id).await?
        }
        Command::Clone { url, label } => {
            commands::clone_resource(config, runtime, url, label).await?
        }
        Command::Backup => commands::backup(config, runtime)?,
        Command::Restore => commands::restore(config, runtime)?,
    }

    Ok(())
}
