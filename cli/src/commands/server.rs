// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server lifecycle commands
//!
//! Commands: run, status

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use afk_core::domain::clock::system_clock;
use afk_core::domain::config::AfkConfigManifest;
use afk_core::presentation::{app, AppState};
use afk_sdk::client::AfkClient;

use super::{load_config, shutdown_signal};

#[derive(Subcommand)]
pub enum ServerCommand {
    /// Run the command broker and event hub in the foreground
    Run {
        /// Override spec.server.port
        #[arg(long, env = "AFK_PORT")]
        port: Option<u16>,

        /// Override spec.server.bind_address
        #[arg(long, env = "AFK_BIND_ADDRESS")]
        bind: Option<String>,
    },

    /// Probe a running server's health endpoint
    Status {
        /// Server URL (default: spec.hooks.server_url)
        #[arg(long)]
        url: Option<String>,
    },
}

pub async fn handle_command(command: ServerCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        ServerCommand::Run { port, bind } => run(config_path, port, bind).await,
        ServerCommand::Status { url } => status(config_path, url).await,
    }
}

async fn run(config_path: Option<PathBuf>, port: Option<u16>, bind: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.spec.server.port = port;
    }
    if let Some(bind) = bind {
        config.spec.server.bind_address = bind;
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    install_metrics(&config)?;

    let server = &config.spec.server;
    let state = Arc::new(AppState::new(server, system_clock()));

    let shutdown = CancellationToken::new();
    let sweeper = Arc::new(state.maintenance()).spawn(shutdown.clone());

    let addr = server.socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        addr = %addr,
        command_ttl_secs = server.command_ttl_seconds,
        sweep_interval_secs = server.sweep_interval_seconds,
        "AFK server listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    let _ = sweeper.await;
    info!("AFK server stopped");
    Ok(())
}

fn install_metrics(config: &AfkConfigManifest) -> Result<()> {
    let Some(metrics) = config
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.metrics.as_ref())
        .filter(|m| m.enabled)
    else {
        return Ok(());
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus metrics exposed");
    Ok(())
}

async fn status(config_path: Option<PathBuf>, url: Option<String>) -> Result<()> {
    let mut hooks = load_config(config_path)?.spec.hooks;
    if let Some(url) = url {
        hooks.server_url = url;
    }
    let url = hooks.server_url.clone();
    let client = AfkClient::from_hook_config(&hooks);

    match client.health().await {
        Ok(health) => {
            println!("{}", format!("✓ Server healthy at {}", url).green());
            if let Some(uptime) = health["uptime_seconds"].as_u64() {
                println!("  Uptime: {}s", uptime);
            }
            Ok(())
        }
        Err(err) => {
            println!("{}", format!("✗ Server unreachable at {}", url).red());
            Err(err).context("Health check failed")
        }
    }
}
