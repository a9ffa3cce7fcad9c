// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::agent::AgentPresence;
use crate::domain::command::RemoteCommand;

/// Lifecycle point inside the monitored process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    PreToolUse,
    PostToolUse,
    Stop,
    Notification,
}

impl HookType {
    /// Points where the hook waits for an operator decision
    pub fn awaits_decision(&self) -> bool {
        matches!(self, Self::PreToolUse | Self::Stop)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::Stop => "stop",
            Self::Notification => "notification",
        };
        f.write_str(name)
    }
}

/// Free-form payload captured at the lifecycle point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Immutable record emitted once by the agent at a lifecycle point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub agent_id: String,
    pub session_id: String,
    pub hook_type: HookType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: EventData,
}

impl LifecycleEvent {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        hook_type: HookType,
        data: EventData,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            hook_type,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Decision handed back to the monitored process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl HookResponse {
    /// Bare approval with nothing to report
    pub fn allow() -> Self {
        Self {
            approved: true,
            reason: None,
            feedback: None,
        }
    }

    pub fn proceed(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: Some(reason.into()),
            feedback: None,
        }
    }

    pub fn block(reason: impl Into<String>, feedback: Option<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            feedback,
        }
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Connected,
    HookEvent,
    AgentStatus,
    CommandUpdate,
    Error,
}

/// One push-stream frame: `{type, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Agent the frame concerns; frames without one reach every observer
    #[serde(skip)]
    pub agent_id: Option<String>,
}

impl StreamFrame {
    fn build<T: Serialize>(
        kind: FrameKind,
        data: &T,
        agent_id: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
            timestamp,
            agent_id,
        }
    }

    pub fn connected(timestamp: DateTime<Utc>) -> Self {
        Self::build(
            FrameKind::Connected,
            &serde_json::json!({ "message": "Connected to event stream" }),
            None,
            timestamp,
        )
    }

    pub fn hook_event(event: &LifecycleEvent, timestamp: DateTime<Utc>) -> Self {
        Self::build(FrameKind::HookEvent, event, Some(event.agent_id.clone()), timestamp)
    }

    pub fn agent_status(agent: &AgentPresence, timestamp: DateTime<Utc>) -> Self {
        Self::build(FrameKind::AgentStatus, agent, Some(agent.id.clone()), timestamp)
    }

    pub fn command_update(command: &RemoteCommand, timestamp: DateTime<Utc>) -> Self {
        Self::build(
            FrameKind::CommandUpdate,
            command,
            Some(command.agent_id.clone()),
            timestamp,
        )
    }

    pub fn error(message: &str, timestamp: DateTime<Utc>) -> Self {
        Self::build(
            FrameKind::Error,
            &serde_json::json!({ "message": message }),
            None,
            timestamp,
        )
    }

    /// Whether an observer registered with `filter` should receive this frame
    pub fn matches_filter(&self, filter: Option<&str>) -> bool {
        match (filter, self.agent_id.as_deref()) {
            (None, _) | (_, None) => true,
            (Some(wanted), Some(agent)) => wanted == agent,
        }
    }

    /// Frames decoded off the wire do not carry the routing key; recover it from the payload.
    pub fn with_agent_from_data(mut self) -> Self {
        if self.agent_id.is_none() {
            let key = match self.kind {
                FrameKind::HookEvent | FrameKind::CommandUpdate => "agentId",
                FrameKind::AgentStatus => "id",
                FrameKind::Connected | FrameKind::Error => return self,
            };
            self.agent_id = self.data[key].as_str().map(str::to_string);
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
