// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use afk_core::domain::config::AfkConfigManifest;

use super::load_config;

pub const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
pub const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the merged manifest as YAML
        #[arg(long)]
        raw: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./afk-config.yaml)
        #[arg(short, long, default_value = "./afk-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, raw } => show(config_override, paths, raw),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, raw: bool) -> Result<()> {
    let config = load_config(config_override.clone())?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. AFK_CONFIG_PATH: {}",
            std::env::var("AFK_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./afk-config.yaml");
        println!("  4. ~/.afk/config.yaml");
        println!("  5. /etc/afk/config.yaml");
        match AfkConfigManifest::discover_config() {
            Some(path) => println!("  Using: {}", path.display().to_string().cyan()),
            None if config_override.is_none() => println!("  Using: {}", "built-in defaults".dimmed()),
            None => {}
        }
        println!();
    }

    if raw {
        let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{}", yaml);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let server = &config.spec.server;
    println!("{}", "Server:".bold());
    println!("  Listen: {}", server.socket_addr());
    println!("  Command TTL: {}s", server.command_ttl_seconds);
    println!("  Sweep interval: {}s", server.sweep_interval_seconds);
    println!(
        "  History: {} frames ({} replayed on connect)",
        server.history_capacity, server.replay_count
    );
    println!();

    let hooks = &config.spec.hooks;
    println!("{}", "Hooks:".bold());
    println!("  Server URL: {}", hooks.server_url);
    println!(
        "  Token: {}",
        if hooks.resolved_token().is_some() { "set" } else { "(none)" }
    );
    println!(
        "  Wait windows: pre_tool_use {}ms, stop {}ms (poll every {}ms)",
        hooks.pre_tool_use_max_wait_ms, hooks.stop_max_wait_ms, hooks.poll_interval_ms
    );
    println!();

    let observer = &config.spec.observer;
    println!("{}", "Observer:".bold());
    println!("  Server URL: {}", observer.server_url);
    println!(
        "  Agent filter: {}",
        observer.agent_filter.as_deref().unwrap_or("(all agents)")
    );
    println!(
        "  Reconnect: {}ms to {}ms, {} attempts",
        observer.initial_reconnect_delay_ms,
        observer.max_reconnect_delay_ms,
        observer.max_reconnect_attempts
    );
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = load_config(config_path)?;
    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}
