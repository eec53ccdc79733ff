//! CLI for inspecting and maintaining checkpoint stores

pub mod error;
pub mod store;

pub use error::CliError;
pub use store::{DumpArgs, MigrateArgs, ResetArgs};

use crate::kv::StorageOptions;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;

/// Default store when `--store` is not given
pub const DEFAULT_STORE: &str = "type=embedded,path=./courier.db";

/// Parse a `key=value,...` store description
pub fn parse_store(s: &str) -> Result<StorageOptions, String> {
    let opts = StorageOptions::parse(s).map_err(|e| e.to_string())?;
    if opts.get(crate::kv::DRIVER_TYPE_KEY).is_none() {
        return Err("missing `type` (legacy, embedded, bolt or file)".to_string());
    }
    Ok(opts)
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "courier")]
#[command(about = "Inspect and maintain transfer checkpoint stores", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Checkpoint store, e.g. `type=file,path=./courier.json`
    #[arg(long, global = true, env = "COURIER_STORE", default_value = DEFAULT_STORE, value_parser = parse_store)]
    pub store: StorageOptions,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List namespaces in the store
    Namespaces,
    /// Print keys and value sizes
    Dump(DumpArgs),
    /// Copy every namespace into another store
    Migrate(MigrateArgs),
    /// Forget a download session so it starts over
    Reset(ResetArgs),
}
