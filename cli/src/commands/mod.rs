// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the AFK CLI

pub mod config;
pub mod context;
pub mod hook;
pub mod issue;
pub mod server;
pub mod watch;

pub use self::config::ConfigCommand;
pub use self::hook::{HeartbeatArgs, HookArgs};
pub use self::issue::IssueCommand;
pub use self::server::ServerCommand;
pub use self::watch::WatchArgs;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

use afk_core::domain::config::AfkConfigManifest;

/// Load the manifest (explicit path, discovery, then defaults) with env overrides applied.
pub fn load_config(config_path: Option<PathBuf>) -> Result<AfkConfigManifest> {
    AfkConfigManifest::load_or_default(config_path).context("Failed to load configuration")
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
