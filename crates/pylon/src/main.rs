// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Pylon: a dynamic L4 load balancer and a replicated note store.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pylon_core::{LbConfig, NodeEnv, StoreConfig, SyncMode};
use pylon_lb::Controller;
use pylon_notes::state::NodeIdentity;
use pylon_notes::{build_router, startup_sync, AppState, NoteStore};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;

use cli::{Cli, Commands, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Balance => run_balancer().await,
        Commands::Notes(args) => run_notes(args).await,
        Commands::Version => {
            println!("pylon {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_balancer() -> Result<()> {
    let config = LbConfig::from_env();

    let controller = Controller::bind(config)
        .await
        .context("Failed to bind the control plane listener")?;
    info!(addr = %controller.local_addr(), "load balancer ready");

    // Signals cause immediate, best-effort exit; the registry is not
    // durable and back-ends re-register on restart.
    tokio::select! {
        () = controller.run() => {}
        () = shutdown_signal() => {
            info!("shutting down");
        }
    }

    Ok(())
}

async fn run_notes(args: cli::NotesArgs) -> Result<()> {
    let config = StoreConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config file: {}", args.config.display()))?;
    let env = NodeEnv::from_env();

    if config.sync == SyncMode::LocalWrite && env.replica_id.is_none() {
        bail!("local-write requires $REPLICA_ID to identify this replica");
    }

    let store = Arc::new(
        NoteStore::new(env.data_dir.clone())
            .await
            .context("Failed to initialize note storage")?,
    );

    let node = NodeIdentity {
        is_replica0: env.is_replica0,
        replica_id: env.replica_id.unwrap_or_default(),
    };
    info!(
        sync = %config.sync,
        replicas = config.replicas.len(),
        is_replica0 = node.is_replica0,
        data_dir = %env.data_dir.display(),
        "note store starting"
    );

    let state = AppState::new(store, &config, node);

    // Non-primary replicas populate their directory from replicas[0]
    // before the API listener starts accepting.
    if !state.node.is_replica0 {
        startup_sync(&state.store, state.peers[0].as_ref())
            .await
            .context("Could not sync with replicas[0]")?;
    }

    let app = build_router(state, args.log_requests);

    let addr = ("0.0.0.0", config.service_port);
    let listener = TcpListener::bind(addr).await.context("Failed to bind to service port")?;
    info!(port = config.service_port, "note store API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shutdown complete");
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer();

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}
