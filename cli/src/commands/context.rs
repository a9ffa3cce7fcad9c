// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `afk context`: show the identity hooks will report from this directory

use anyhow::Result;
use colored::Colorize;

use afk_sdk::context::{resolve_session_id, AgentContext, SESSION_ID_ENV};

pub fn show() -> Result<()> {
    let context = AgentContext::detect();

    println!("{}", "Agent context:".bold());
    println!("  Agent ID:      {}", context.agent_id.cyan());
    println!("  Agent name:    {}", context.agent_name);
    println!("  Working dir:   {}", context.working_directory.display());
    println!();
    println!("{}", "Computer:".bold());
    println!("  ID:            {}", context.computer_id);
    println!("  Name:          {}", context.computer_name);
    println!("  Hostname:      {}", context.hostname);
    println!("  Platform:      {}", context.platform);
    println!();

    match std::env::var(SESSION_ID_ENV) {
        Ok(session) if !session.is_empty() => {
            println!("  Session:       {} (from {})", session, SESSION_ID_ENV)
        }
        _ => println!(
            "  Session:       {} (generated per invocation, e.g. {})",
            "(not pinned)".dimmed(),
            resolve_session_id(None, None)
        ),
    }
    Ok(())
}
