// Copyright (c) 2026 Tontine Contributors. MIT License.
// See LICENSE for details.

//! # Tontine Node
//!
//! Entry point for the `tontine-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the ledger, starts the outbox dispatcher, and
//! serves the HTTP/WS API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the node
//! - `init`    — create the data directory and an empty ledger
//! - `version` — print build version information

mod api;
mod cli;
mod error;
mod logging;
mod metrics;
mod notify;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, watch};

use tontine_protocol::config::{DispatcherConfig, EngineConfig, ENGINE_VERSION};
use tontine_protocol::governance::{GovernanceEngine, RejectionThreshold};
use tontine_protocol::outbox::{Dispatcher, Notifier};
use tontine_protocol::storage::LedgerDb;

use cli::{Commands, TontineNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;
use notify::BroadcastNotifier;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TontineNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens (or creates) the ledger under `data_dir`.
fn open_ledger(data_dir: &Path) -> Result<LedgerDb> {
    let db_path = data_dir.join("ledger");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create ledger directory: {}", db_path.display()))?;

    let db = LedgerDb::open(&db_path)
        .with_context(|| format!("failed to open ledger at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), vaults = db.vault_count(), "ledger opened");
    Ok(db)
}

/// Starts the full node: API server, metrics endpoint, and outbox dispatcher.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        symmetric_rejection = args.symmetric_rejection,
        "starting tontine-node"
    );

    // --- Persistent storage ---
    let db = open_ledger(&args.data_dir)?;

    // --- Engine ---
    let mut engine_config = EngineConfig::default();
    if args.symmetric_rejection {
        engine_config.rejection_threshold = RejectionThreshold::Symmetric;
    }
    let engine = Arc::new(GovernanceEngine::new(db.clone(), engine_config));

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (engine {})",
            env!("CARGO_PKG_VERSION"),
            ENGINE_VERSION
        ),
        engine,
        metrics: Arc::clone(&node_metrics),
        event_tx: event_tx.clone(),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Outbox dispatcher ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(
        db.clone(),
        DispatcherConfig {
            interval_ms: args.dispatch_interval_ms,
            ..DispatcherConfig::default()
        },
    );
    let notifier: Arc<dyn Notifier> = Arc::new(BroadcastNotifier::new(event_tx));
    let dispatch_metrics = Arc::clone(&node_metrics);
    let dispatch_loop = tokio::spawn(async move {
        dispatcher
            .run(notifier, shutdown_rx, |report| {
                dispatch_metrics.record_dispatch(report)
            })
            .await;
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    // Let the dispatcher finish its current pass before the ledger closes.
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatch_loop.await {
        tracing::warn!("dispatcher task ended abnormally: {}", e);
    }
    db.flush().context("failed to flush ledger on shutdown")?;

    tracing::info!("tontine-node stopped");
    Ok(())
}

/// Initializes a new node data directory with an empty ledger.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::INIT_DIRECTIVE, LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    let db = open_ledger(data_dir)?;
    db.flush().context("failed to flush new ledger")?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Ledger         : {}", data_dir.join("ledger").display());
    println!("  Vaults         : {}", db.vault_count());

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("tontine-node {}", env!("CARGO_PKG_VERSION"));
    println!("engine       {}", ENGINE_VERSION);
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
