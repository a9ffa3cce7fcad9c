// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent hook entry points
//!
//! `afk hook <point>` reads the lifecycle payload from stdin and writes
//! exactly one JSON decision to stdout. It exits successfully in every
//! case; logs go to stderr. A stdin that stays open is given up on after
//! the event timeout.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::future::Future;
use std::io::Read;
use std::path::PathBuf;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use afk_core::domain::config::AfkConfigManifest;
use afk_core::domain::events::{HookResponse, HookType};
use afk_sdk::client::AfkClient;
use afk_sdk::context::{resolve_session_id, AgentContext, SESSION_ID_ENV};
use afk_sdk::hook::{HookInput, HookInvocation, HookRunner, HookSettings};

use super::load_config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookPoint {
    PreToolUse,
    PostToolUse,
    Stop,
    Notification,
}

impl From<HookPoint> for HookType {
    fn from(point: HookPoint) -> Self {
        match point {
            HookPoint::PreToolUse => HookType::PreToolUse,
            HookPoint::PostToolUse => HookType::PostToolUse,
            HookPoint::Stop => HookType::Stop,
            HookPoint::Notification => HookType::Notification,
        }
    }
}

#[derive(Debug, Args)]
pub struct HookArgs {
    /// Lifecycle point being reported
    #[arg(value_enum)]
    pub point: HookPoint,

    /// Agent id (default: derived from user, host and project)
    #[arg(long, env = "AFK_AGENT_ID")]
    pub agent_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct HeartbeatArgs {
    /// Agent id (default: derived from user, host and project)
    #[arg(long, env = "AFK_AGENT_ID")]
    pub agent_id: Option<String>,
}

pub async fn run(args: HookArgs, config_path: Option<PathBuf>) -> Result<()> {
    let point = HookType::from(args.point);
    let config = load_config(config_path).unwrap_or_else(|err| {
        warn!(error = %err, "Falling back to default hook configuration");
        let mut config = AfkConfigManifest::default();
        config.apply_env_overrides();
        config
    });

    let context = AgentContext::detect();
    let agent_id = args.agent_id.unwrap_or_else(|| context.agent_id.clone());
    let env_session = std::env::var(SESSION_ID_ENV).ok();

    let hooks = &config.spec.hooks;
    let runner = HookRunner::new(AfkClient::from_hook_config(hooks), HookSettings::from(hooks));
    let response = runner
        .run_with_payload(point, &agent_id, stdin_payload(), |input| HookInvocation {
            agent_id: agent_id.clone(),
            session_id: resolve_session_id(env_session, input.session_id().as_deref()),
            data: input.to_event_data(point, &context),
        })
        .await;
    emit_response(&response)
}

/// Read stdin to the end on a detached thread. An agent that never closes
/// the pipe then cannot keep the process alive once the decision is printed.
fn stdin_payload() -> impl Future<Output = std::io::Result<String>> {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("hook-stdin".to_string())
        .spawn(move || {
            let mut raw = String::new();
            let _ = tx.send(std::io::stdin().read_to_string(&mut raw).map(|_| raw));
        });
    if let Err(err) = spawned {
        debug!(error = %err, "Could not start stdin reader");
    }
    async move {
        rx.await
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin reader stopped")))
    }
}

fn emit_response(response: &HookResponse) -> Result<()> {
    let json = serde_json::to_string(response).context("Failed to encode hook response")?;
    println!("{}", json);
    Ok(())
}

pub async fn heartbeat(args: HeartbeatArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let agent_id = args
        .agent_id
        .unwrap_or_else(|| AgentContext::detect().agent_id);

    AfkClient::from_hook_config(&config.spec.hooks)
        .heartbeat(&agent_id)
        .await
        .context("Heartbeat failed")?;
    println!("{}", format!("✓ Heartbeat sent for {}", agent_id).green());
    Ok(())
}
