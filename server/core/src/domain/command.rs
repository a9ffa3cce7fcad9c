// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Remote command aggregate
//!
//! A [`RemoteCommand`] is an operator decision (approve, deny, inject context,
//! continue, stop, interrupt) addressed to one agent and optionally one of its
//! sessions. Status only ever moves forward:
//!
//! ```text
//! pending ──claim──► processing ──complete──► completed | expired
//!    └──────────── expiry / complete(expired) ──────────► expired
//! ```
//!
//! The transition methods on [`RemoteCommand`] are the only place status is
//! written; the broker calls them while holding its table lock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Generate a collision-resistant id of the form `<prefix>-<base36 millis>-<8 hex>`.
///
/// Ids combine wall time with random bits so concurrent callers never share a counter.
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, to_base36(millis), &random[..8])
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub String);

impl CommandId {
    pub fn new() -> Self {
        Self(generate_id("cmd"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Approve,
    Deny,
    /// Proceed, carrying operator instructions back as feedback
    #[serde(rename = "context", alias = "inject-context", alias = "inject_context")]
    InjectContext,
    Continue,
    Stop,
    Interrupt,
    /// Any type this build does not know about
    #[serde(other)]
    Unknown,
}

impl CommandType {
    /// Types that steer the stop lifecycle point
    pub fn is_session_control(&self) -> bool {
        matches!(self, Self::Continue | Self::Stop | Self::Interrupt)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
            Self::InjectContext => "context",
            Self::Continue => "continue",
            Self::Stop => "stop",
            Self::Interrupt => "interrupt",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Processing,
    Completed,
    Expired,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Terminal status requested by `complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Expired,
}

impl From<CompletionStatus> for CommandStatus {
    fn from(value: CompletionStatus) -> Self {
        match value {
            CompletionStatus::Completed => CommandStatus::Completed,
            CompletionStatus::Expired => CommandStatus::Expired,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl CommandPayload {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn instructions(instructions: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommand {
    pub id: CommandId,
    pub agent_id: String,
    /// Empty means "any session of this agent"
    #[serde(default)]
    pub session_id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub payload: CommandPayload,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl RemoteCommand {
    pub fn new(request: CreateCommandRequest, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: CommandId::new(),
            agent_id: request.agent_id,
            session_id: request.session_id,
            command_type: request.command_type,
            payload: request.payload,
            status: CommandStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            related_event_id: request.related_event_id,
            result: None,
        }
    }

    /// Pending and not yet past its expiry
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == CommandStatus::Pending && self.expires_at > now
    }

    /// A command without a session id applies to every session of its agent.
    pub fn matches_session(&self, session_id: &str) -> bool {
        self.session_id.is_empty() || self.session_id == session_id
    }

    /// pending -> processing. A pending command already past its expiry is
    /// expired instead and the claim is refused.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), BrokerError> {
        if self.status == CommandStatus::Pending && self.expires_at <= now {
            self.status = CommandStatus::Expired;
        }
        if self.status != CommandStatus::Pending {
            return Err(self.invalid_state());
        }
        self.status = CommandStatus::Processing;
        Ok(())
    }

    /// processing -> completed|expired, or pending -> expired.
    pub fn complete(
        &mut self,
        status: CompletionStatus,
        result: Option<String>,
    ) -> Result<(), BrokerError> {
        let allowed = match (self.status, status) {
            (CommandStatus::Processing, _) => true,
            (CommandStatus::Pending, CompletionStatus::Expired) => true,
            _ => false,
        };
        if !allowed {
            return Err(self.invalid_state());
        }
        self.status = status.into();
        if result.is_some() {
            self.result = result;
        }
        Ok(())
    }

    /// Expire a pending command whose deadline has passed. Returns whether the
    /// status changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == CommandStatus::Pending && self.expires_at <= now {
            self.status = CommandStatus::Expired;
            return true;
        }
        false
    }

    fn invalid_state(&self) -> BrokerError {
        BrokerError::InvalidState {
            id: self.id.clone(),
            status: self.status,
        }
    }
}

/// Creation fields accepted from observers (`POST /api/commands`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommandRequest {
    pub agent_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub payload: CommandPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_event_id: Option<String>,
}

impl CreateCommandRequest {
    pub fn new(
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        command_type: CommandType,
        payload: CommandPayload,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            command_type,
            payload,
            related_event_id: None,
        }
    }

    pub fn with_related_event(mut self, event_id: impl Into<String>) -> Self {
        self.related_event_id = Some(event_id.into());
        self
    }

    pub fn approve(agent_id: &str, session_id: &str, reason: Option<String>) -> Self {
        Self::new(
            agent_id,
            session_id,
            CommandType::Approve,
            CommandPayload::reason(reason.unwrap_or_else(|| "Approved from dashboard".to_string())),
        )
    }

    pub fn deny(
        agent_id: &str,
        session_id: &str,
        reason: Option<String>,
        feedback: Option<String>,
    ) -> Self {
        Self::new(
            agent_id,
            session_id,
            CommandType::Deny,
            CommandPayload {
                reason: Some(reason.unwrap_or_else(|| "Denied from dashboard".to_string())),
                feedback,
                instructions: None,
            },
        )
    }

    pub fn inject_context(agent_id: &str, session_id: &str, instructions: impl Into<String>) -> Self {
        Self::new(
            agent_id,
            session_id,
            CommandType::InjectContext,
            CommandPayload::instructions(instructions),
        )
    }

    pub fn continue_session(agent_id: &str, session_id: &str, instructions: Option<String>) -> Self {
        Self::new(
            agent_id,
            session_id,
            CommandType::Continue,
            CommandPayload {
                instructions,
                ..CommandPayload::default()
            },
        )
    }

    pub fn stop_session(agent_id: &str, session_id: &str, reason: Option<String>) -> Self {
        Self::new(
            agent_id,
            session_id,
            CommandType::Stop,
            CommandPayload {
                reason,
                ..CommandPayload::default()
            },
        )
    }

    pub fn interrupt(agent_id: &str, session_id: &str, reason: Option<String>) -> Self {
        Self::new(
            agent_id,
            session_id,
            CommandType::Interrupt,
            CommandPayload::reason(reason.unwrap_or_else(|| "Interrupted from dashboard".to_string())),
        )
    }
}

/// Body of `PUT /api/commands/{id}/complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteCommandRequest {
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Command {0} not found")]
    NotFound(CommandId),

    #[error("Command {id} is {status}, transition not allowed")]
    InvalidState { id: CommandId, status: CommandStatus },

    #[error("Invalid command request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(now: DateTime<Utc>) -> RemoteCommand {
        RemoteCommand::new(
            CreateCommandRequest::deny("a1", "s1", Some("no".to_string()), None),
            now,
            Duration::seconds(30),
        )
    }

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("cmd");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "cmd");
        assert_eq!(parts[2].len(), 8);
        assert_ne!(generate_id("cmd"), generate_id("cmd"));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_forward_transitions() {
        let now = Utc::now();
        let mut cmd = pending(now);
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert_eq!(cmd.expires_at, now + Duration::seconds(30));

        cmd.claim(now).unwrap();
        assert_eq!(cmd.status, CommandStatus::Processing);

        cmd.complete(CompletionStatus::Completed, Some("Executed by hook".to_string()))
            .unwrap();
        assert_eq!(cmd.status, CommandStatus::Completed);
        assert_eq!(cmd.result.as_deref(), Some("Executed by hook"));
    }

    #[test]
    fn test_transitions_never_reverse() {
        let now = Utc::now();
        let mut cmd = pending(now);
        cmd.claim(now).unwrap();

        let err = cmd.claim(now).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidState { status: CommandStatus::Processing, .. }));

        cmd.complete(CompletionStatus::Expired, None).unwrap();
        assert!(cmd.complete(CompletionStatus::Completed, None).is_err());
        assert!(cmd.claim(now).is_err());
        assert_eq!(cmd.status, CommandStatus::Expired);
    }

    #[test]
    fn test_pending_cannot_complete_without_claim() {
        let now = Utc::now();
        let mut cmd = pending(now);
        assert!(cmd.complete(CompletionStatus::Completed, None).is_err());
        assert_eq!(cmd.status, CommandStatus::Pending);

        cmd.complete(CompletionStatus::Expired, None).unwrap();
        assert_eq!(cmd.status, CommandStatus::Expired);
    }

    #[test]
    fn test_claim_after_deadline_expires_instead() {
        let now = Utc::now();
        let mut cmd = pending(now);
        let err = cmd.claim(now + Duration::seconds(30)).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidState { status: CommandStatus::Expired, .. }));
        assert_eq!(cmd.status, CommandStatus::Expired);
    }

    #[test]
    fn test_session_wildcard() {
        let now = Utc::now();
        let mut cmd = pending(now);
        assert!(cmd.matches_session("s1"));
        assert!(!cmd.matches_session("s2"));

        cmd.session_id.clear();
        assert!(cmd.matches_session("s2"));
        assert!(cmd.matches_session(""));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::json!({
            "agentId": "a1",
            "sessionId": "s1",
            "type": "context",
            "payload": { "instructions": "use the staging db" }
        });
        let request: CreateCommandRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.command_type, CommandType::InjectContext);
        assert_eq!(request.payload.instructions.as_deref(), Some("use the staging db"));

        let alias: CommandType = serde_json::from_str("\"inject-context\"").unwrap();
        assert_eq!(alias, CommandType::InjectContext);

        let unknown: CommandType = serde_json::from_str("\"reboot\"").unwrap();
        assert_eq!(unknown, CommandType::Unknown);

        let cmd = RemoteCommand::new(request, Utc::now(), Duration::seconds(30));
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["type"], "context");
        assert_eq!(value["status"], "pending");
        assert!(value.get("expiresAt").is_some());
        assert!(value.get("relatedEventId").is_none());
    }

    #[test]
    fn test_missing_session_means_any() {
        let request: CreateCommandRequest =
            serde_json::from_str(r#"{"agentId":"a1","type":"interrupt"}"#).unwrap();
        assert!(request.session_id.is_empty());
        assert_eq!(request.payload, CommandPayload::default());
    }
}
