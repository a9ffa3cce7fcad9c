// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Operator commands
//!
//! Commands: approve, deny, context, continue, stop, interrupt, list, agents
//!
//! Commands go through the observer connection manager, so a server that is
//! briefly unreachable only delays delivery: the command waits in the offline
//! queue until the stream reconnects or `--wait` runs out.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use afk_core::domain::command::{CreateCommandRequest, RemoteCommand};
use afk_core::domain::config::ObserverConfig;
use afk_sdk::client::AfkClient;
use afk_sdk::observer::{ConnectionManager, ConnectionSettings, ConnectionStatus, SendOutcome};

use super::load_config;

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Agent the command is addressed to
    #[arg(short, long)]
    pub agent: String,

    /// Session id (default: any session of the agent)
    #[arg(short, long, default_value = "")]
    pub session: String,

    /// Seconds to keep trying delivery before giving up
    #[arg(long, default_value = "10")]
    pub wait: u64,
}

#[derive(Debug, Subcommand)]
pub enum IssueCommand {
    /// Let the pending tool call proceed
    Approve {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Block the pending tool call
    Deny {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        reason: Option<String>,
        /// Feedback handed back to the agent
        #[arg(long)]
        feedback: Option<String>,
    },

    /// Proceed and hand instructions to the agent
    Context {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(value_name = "INSTRUCTIONS")]
        instructions: String,
    },

    /// Keep the session running when it tries to stop
    Continue {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(value_name = "INSTRUCTIONS")]
        instructions: Option<String>,
    },

    /// Confirm that the session may stop
    Stop {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Interrupt the agent at its next tool call
    Interrupt {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        reason: Option<String>,
    },

    /// List commands, optionally for one agent
    List {
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// List known agents and their presence
    Agents,
}

impl IssueCommand {
    /// The creation request and delivery options, for the variants that issue one.
    pub fn into_request(self) -> Option<(CreateCommandRequest, Duration)> {
        let (request, target) = match self {
            Self::Approve { target, reason } => (
                CreateCommandRequest::approve(&target.agent, &target.session, reason),
                target,
            ),
            Self::Deny {
                target,
                reason,
                feedback,
            } => (
                CreateCommandRequest::deny(&target.agent, &target.session, reason, feedback),
                target,
            ),
            Self::Context {
                target,
                instructions,
            } => (
                CreateCommandRequest::inject_context(&target.agent, &target.session, instructions),
                target,
            ),
            Self::Continue {
                target,
                instructions,
            } => (
                CreateCommandRequest::continue_session(&target.agent, &target.session, instructions),
                target,
            ),
            Self::Stop { target, reason } => (
                CreateCommandRequest::stop_session(&target.agent, &target.session, reason),
                target,
            ),
            Self::Interrupt { target, reason } => (
                CreateCommandRequest::interrupt(&target.agent, &target.session, reason),
                target,
            ),
            Self::List { .. } | Self::Agents => return None,
        };
        Some((request, Duration::from_secs(target.wait)))
    }
}

pub async fn handle_command(command: IssueCommand, config_path: Option<PathBuf>) -> Result<()> {
    let observer = load_config(config_path)?.spec.observer;
    match command {
        IssueCommand::List { agent } => list(&observer, agent).await,
        IssueCommand::Agents => agents(&observer).await,
        other => match other.into_request() {
            Some((request, wait)) => deliver(&observer, request, wait).await,
            None => Ok(()),
        },
    }
}

async fn deliver(observer: &ObserverConfig, request: CreateCommandRequest, wait: Duration) -> Result<()> {
    let client = Arc::new(AfkClient::from_observer_config(observer));
    let manager = ConnectionManager::new(client, ConnectionSettings::from(observer));

    let (tx, mut rx) = watch::channel(manager.status());
    manager.on_status_change(move |status| {
        let _ = tx.send(status);
    });
    manager.connect();

    let deadline = Instant::now() + wait;
    let connected = tokio::time::timeout(wait, rx.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .is_ok();
    debug!(connected, "Observer connection settled");

    match manager.send_command(request).await {
        SendOutcome::Sent(command) => print_command(&command),
        SendOutcome::Queued(queued_id) => {
            println!("{}", "Server unreachable, command queued".yellow());
            while !manager.queue().is_empty() && Instant::now() < deadline {
                if manager.status() == ConnectionStatus::Connected {
                    if let Some(report) = manager.flush_queue().await {
                        report.sent.iter().for_each(print_command);
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            if !manager.queue().is_empty() {
                manager.disconnect();
                bail!("Command {} was not delivered within {}s", queued_id, wait.as_secs());
            }
        }
    }
    manager.disconnect();
    Ok(())
}

fn print_command(command: &RemoteCommand) {
    println!(
        "{}",
        format!(
            "✓ {} command {} sent to {}",
            command.command_type, command.id, command.agent_id
        )
        .green()
    );
}

async fn list(observer: &ObserverConfig, agent: Option<String>) -> Result<()> {
    let client = AfkClient::from_observer_config(observer);
    let commands = match agent {
        Some(agent) => client.agent_commands(&agent).await,
        None => client.list_commands().await,
    }
    .context("Failed to list commands")?;

    if commands.is_empty() {
        println!("{}", "No commands".dimmed());
        return Ok(());
    }
    for command in commands {
        println!(
            "{}  {:<9} {:<10} {:<24} {}",
            command.created_at.format("%H:%M:%S").to_string().dimmed(),
            command.command_type.to_string().bold(),
            command.status.to_string(),
            command.agent_id,
            command.id.as_str().dimmed()
        );
    }
    Ok(())
}

async fn agents(observer: &ObserverConfig) -> Result<()> {
    let agents = AfkClient::from_observer_config(observer)
        .agents()
        .await
        .context("Failed to list agents")?;

    if agents.is_empty() {
        println!("{}", "No agents have reported yet".dimmed());
        return Ok(());
    }
    for agent in agents {
        println!(
            "{:<32} {:<8} last seen {}",
            agent.id.cyan(),
            agent.status.to_string(),
            agent.last_activity.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
