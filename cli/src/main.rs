// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AFK CLI
//!
//! The `afk` binary covers every role in a remote supervision setup:
//!
//! - `afk server run|status` - command broker and event hub
//! - `afk hook <point>` - hook decision client invoked by the agent
//! - `afk watch` - live observer of the event stream
//! - `afk command approve|deny|context|continue|stop|interrupt|list|agents`
//! - `afk config show|validate|generate` - configuration management
//!
//! Logs always go to stderr so `afk hook` keeps stdout for its JSON decision.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use afk_cli::commands::{
    self, ConfigCommand, HeartbeatArgs, HookArgs, IssueCommand, ServerCommand, WatchArgs,
};
use afk_core::domain::config::{AfkConfigManifest, LoggingConfig};

/// AFK - supervise coding agents while away from the keyboard
#[derive(Parser)]
#[command(name = "afk")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "AFK_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AFK_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run or probe the command broker
    #[command(name = "server")]
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },

    /// Handle one agent lifecycle hook (payload on stdin, decision on stdout)
    #[command(name = "hook")]
    Hook(HookArgs),

    /// Refresh this agent's presence on the server
    #[command(name = "heartbeat")]
    Heartbeat(HeartbeatArgs),

    /// Follow the live event stream
    #[command(name = "watch")]
    Watch(WatchArgs),

    /// Issue or list remote commands
    #[command(name = "command")]
    Command {
        #[command(subcommand)]
        command: IssueCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Show the agent identity detected for this directory
    #[command(name = "context")]
    Context,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let logging = AfkConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .and_then(|config| config.spec.observability)
        .and_then(|observability| observability.logging);
    init_logging(cli.log_level.as_deref(), logging.as_ref())?;

    match cli.command {
        Commands::Server { command } => commands::server::handle_command(command, cli.config).await,
        Commands::Hook(args) => commands::hook::run(args, cli.config).await,
        Commands::Heartbeat(args) => commands::hook::heartbeat(args, cli.config).await,
        Commands::Watch(args) => commands::watch::run(args, cli.config).await,
        Commands::Command { command } => commands::issue::handle_command(command, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Context => commands::context::show(),
    }
}

/// Initialize tracing subscriber for logging
///
/// Filter precedence: RUST_LOG, then `--log-level`, then the manifest, then "info".
fn init_logging(level: Option<&str>, config: Option<&LoggingConfig>) -> Result<()> {
    let level = level
        .or(config.map(|c| c.level.as_str()))
        .unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.is_some_and(|c| c.format == "json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_hook_invocation() {
        let cli = Cli::try_parse_from(["afk", "hook", "pre-tool-use", "--agent-id", "a1"]).unwrap();
        match cli.command {
            Commands::Hook(args) => assert_eq!(args.agent_id.as_deref(), Some("a1")),
            _ => panic!("expected hook command"),
        }
    }

    #[test]
    fn test_parses_deny_with_feedback() {
        let cli = Cli::try_parse_from([
            "afk", "command", "deny", "--agent", "a1", "--reason", "no", "--feedback", "use git mv",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Command {
                command: IssueCommand::Deny { .. }
            }
        ));
    }
}
