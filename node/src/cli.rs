//! # CLI Interface
//!
//! Defines the command-line argument structure for `tontine-node` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tontine vault governance node.
///
/// Serves the withdrawal governance engine over HTTP, streams notifications
/// over WebSocket, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "tontine-node",
    about = "Tontine vault governance node",
    version,
    propagate_version = true
)]
pub struct TontineNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the tontine node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory and an empty ledger.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the ledger database.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "TONTINE_DATA_DIR", default_value = "./tontine-data")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "TONTINE_API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TONTINE_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "TONTINE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log directive when `RUST_LOG` is unset.
    #[arg(
        long,
        env = "TONTINE_LOG_LEVEL",
        default_value = crate::logging::RUN_DIRECTIVE
    )]
    pub log_level: String,

    /// Milliseconds between outbox drains.
    #[arg(long, env = "TONTINE_DISPATCH_INTERVAL_MS", default_value_t = 500)]
    pub dispatch_interval_ms: u64,

    /// Reject a request as soon as approval becomes arithmetically
    /// impossible, instead of waiting for "no" votes to exceed the quorum.
    ///
    /// Changes the outcome of requests that are already pending.
    #[arg(long, env = "TONTINE_SYMMETRIC_REJECTION")]
    pub symmetric_rejection: bool,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "TONTINE_DATA_DIR", default_value = "./tontine-data")]
    pub data_dir: PathBuf,
}
