// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `afk watch`: terminal observer for the event stream

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use afk_core::domain::events::{FrameKind, StreamFrame};
use afk_sdk::client::AfkClient;
use afk_sdk::observer::{ConnectionManager, ConnectionSettings, ConnectionStatus};

use super::{load_config, shutdown_signal};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show frames for this agent
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Show tool arguments, results and payloads
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: WatchArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut observer = load_config(config_path)?.spec.observer;
    if args.agent.is_some() {
        observer.agent_filter = args.agent;
    }

    let client = Arc::new(AfkClient::from_observer_config(&observer));
    let manager = ConnectionManager::new(client, ConnectionSettings::from(&observer));

    manager.on_status_change(|status| eprintln!("{}", format_status(status)));
    let verbose = args.verbose;
    manager.on_frame(move |frame| println!("{}", format_frame(frame, verbose)));

    info!(server = %observer.server_url, "Watching event stream");
    manager.connect();
    shutdown_signal().await;
    manager.disconnect();
    Ok(())
}

pub fn format_status(status: ConnectionStatus) -> String {
    let label = format!("● {}", status);
    match status {
        ConnectionStatus::Connected => label.green().to_string(),
        ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => {
            label.yellow().to_string()
        }
        ConnectionStatus::Disconnected => label.red().to_string(),
    }
}

pub fn format_frame(frame: &StreamFrame, verbose: bool) -> String {
    let stamp = format!("[{}]", frame.timestamp.format("%H:%M:%S")).dimmed();
    let data = &frame.data;
    let text = |key: &str| data[key].as_str().unwrap_or("?").to_string();

    let line = match frame.kind {
        FrameKind::Connected => text("message").dimmed().to_string(),
        FrameKind::HookEvent => {
            let hook = text("hookType");
            let mut line = format!("{} {}", text("agentId").cyan(), hook.bold());
            if let Some(tool) = data["data"]["toolName"].as_str() {
                line.push_str(&format!(" {}", tool));
            }
            if let Some(message) = data["data"]["message"].as_str() {
                line.push_str(&format!(" {}", message.dimmed()));
            }
            if verbose {
                for key in ["toolArgs", "result"] {
                    let value = &data["data"][key];
                    if !value.is_null() {
                        line.push_str(&format!("\n    {}: {}", key, value));
                    }
                }
            }
            line
        }
        FrameKind::AgentStatus => format!(
            "agent {} ({}) is {}",
            text("id").cyan(),
            data["name"].as_str().unwrap_or("unnamed"),
            text("status").bold()
        ),
        FrameKind::CommandUpdate => {
            let status = text("status");
            let status = match status.as_str() {
                "completed" => status.green(),
                "expired" => status.red(),
                "processing" => status.yellow(),
                _ => status.normal(),
            };
            let mut line = format!(
                "command {} {} for {} is {}",
                text("id").dimmed(),
                text("type").bold(),
                text("agentId").cyan(),
                status
            );
            if verbose {
                if let Some(reason) = data["payload"]["reason"].as_str() {
                    line.push_str(&format!("\n    reason: {}", reason));
                }
                if let Some(result) = data["result"].as_str() {
                    line.push_str(&format!("\n    result: {}", result));
                }
            }
            line
        }
        FrameKind::Error => format!("error: {}", text("message")).red().to_string(),
    };
    format!("{} {}", stamp, line)
}
