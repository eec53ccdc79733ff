//! Main entry point for the courier store-maintenance CLI

use anyhow::Context;
use clap::Parser;
use courier::cli::{store, Cli, CliError, Commands};
use courier::kv::Registry;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("courier=info"));

    if json_format {
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
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        courier::metrics::init_metrics(addr)
            .await
            .map_err(|e| CliError::MetricsError(e.to_string()))?;
    }

    let registry = Registry::builtin();
    let storage = registry
        .open_with_map(&cli.store)
        .context("failed to open checkpoint store")?;

    let result = match &cli.command {
        Commands::Namespaces => store::namespaces(&storage, cli.output_format),
        Commands::Dump(args) => args.execute(&storage, cli.output_format),
        Commands::Migrate(args) => args.execute(&registry, &storage),
        Commands::Reset(args) => args.execute(&storage),
    };
    storage.close().context("failed to close checkpoint store")?;
    result.map_err(anyhow::Error::from)
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
