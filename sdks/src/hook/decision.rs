// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mapping from a claimed command to the decision returned to the agent
//!
//! | type      | pre-use                | stop                     |
//! |-----------|------------------------|--------------------------|
//! | approve   | proceed                | (not claimed)            |
//! | deny      | block + reason/feedback| (not claimed)            |
//! | context   | proceed + instructions | (not claimed)            |
//! | continue  | proceed                | block the stop           |
//! | stop      | proceed                | confirm stop             |
//! | interrupt | block                  | confirm stop             |
//! | unknown   | proceed                | (not claimed)            |

use afk_core::domain::command::{CommandType, RemoteCommand};
use afk_core::domain::events::{HookResponse, HookType};

pub const NO_REMOTE_COMMANDS: &str = "No remote commands, proceeding";
pub const NO_SESSION_CONTROL: &str = "No session control commands, proceeding with stop";
pub const INTERRUPT_FEEDBACK: &str = "Execution was interrupted by user request";

pub const EXECUTED_BY_HOOK: &str = "Executed by hook";
pub const EXECUTED_BY_STOP_HOOK: &str = "Executed by stop hook";
pub const INTERRUPTED_EXECUTION: &str = "Interrupted execution";

/// Whether the hook at `point` should claim `command` at all. Commands it
/// skips stay pending for a later lifecycle point.
pub fn claimable_at(point: HookType, command: &RemoteCommand) -> bool {
    match point {
        HookType::PreToolUse => true,
        HookType::Stop => command.command_type.is_session_control(),
        HookType::PostToolUse | HookType::Notification => false,
    }
}

/// Decision used when nothing was claimed in time, or anything failed.
pub fn default_decision(point: HookType) -> HookResponse {
    match point {
        HookType::PreToolUse => HookResponse::proceed(NO_REMOTE_COMMANDS),
        HookType::Stop => HookResponse::proceed(NO_SESSION_CONTROL),
        HookType::PostToolUse | HookType::Notification => HookResponse::allow(),
    }
}

/// Result string recorded when completing a command claimed at `point`.
pub fn completion_result(point: HookType) -> &'static str {
    match point {
        HookType::Stop => EXECUTED_BY_STOP_HOOK,
        _ => EXECUTED_BY_HOOK,
    }
}

/// Decision for an interrupt found by the priority lookup.
pub fn interrupt_decision(command: &RemoteCommand) -> HookResponse {
    HookResponse::block(
        reason_or(command, "Execution interrupted from dashboard"),
        Some(INTERRUPT_FEEDBACK.to_string()),
    )
}

pub fn decide(point: HookType, command: &RemoteCommand) -> HookResponse {
    let payload = &command.payload;
    match point {
        HookType::Stop => match command.command_type {
            CommandType::Continue => HookResponse::block(
                reason_or(command, "Continue session requested"),
                payload.instructions.clone().or_else(|| payload.feedback.clone()),
            ),
            CommandType::Stop => HookResponse::proceed(reason_or(command, "Stop session confirmed"))
                .with_feedback(payload.feedback.clone()),
            CommandType::Interrupt => {
                HookResponse::proceed(reason_or(command, "Execution interrupted"))
                    .with_feedback(payload.feedback.clone())
            }
            _ => HookResponse::proceed("Unknown command type, proceeding with stop"),
        },
        _ => match command.command_type {
            CommandType::Approve => HookResponse::proceed(reason_or(command, "Approved remotely"))
                .with_feedback(payload.feedback.clone()),
            CommandType::Deny => HookResponse::block(
                reason_or(command, "Denied remotely"),
                payload.feedback.clone(),
            ),
            CommandType::InjectContext => HookResponse::proceed("Context provided remotely")
                .with_feedback(payload.instructions.clone().or_else(|| payload.feedback.clone())),
            CommandType::Interrupt => HookResponse::block(
                reason_or(command, "Execution interrupted"),
                Some(INTERRUPT_FEEDBACK.to_string()),
            ),
            CommandType::Continue | CommandType::Stop | CommandType::Unknown => {
                HookResponse::proceed("Unknown command type, proceeding")
            }
        },
    }
}

fn reason_or(command: &RemoteCommand, fallback: &str) -> String {
    command
        .payload
        .reason
        .clone()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
