//! Shoggoth node binary.

use clap::Parser;
use tracing::error;

use shoggoth_node::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Err(e) = cli::run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}
