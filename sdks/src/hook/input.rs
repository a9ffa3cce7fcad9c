// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lifecycle payload read from the hook's standard input

use serde_json::Value;

use afk_core::domain::events::{EventData, HookType};

use crate::context::AgentContext;

const STOP_MESSAGE: &str = "Session stopping";
const NOTIFICATION_MESSAGE: &str = "Agent notification";

/// The JSON document handed to a hook. Input that is not JSON is kept
/// verbatim under `rawData`.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInput {
    raw: Value,
}

impl Default for HookInput {
    fn default() -> Self {
        Self {
            raw: Value::Object(Default::default()),
        }
    }
}

impl HookInput {
    pub fn parse(input: &str) -> Self {
        if input.trim().is_empty() {
            return Self::default();
        }
        let raw = serde_json::from_str::<Value>(input)
            .unwrap_or_else(|_| serde_json::json!({ "rawData": input }));
        Self { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn text(&self, key: &str) -> Option<String> {
        self.raw.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.raw.get(key).filter(|v| !v.is_null()).cloned()
    }

    pub fn tool_name(&self) -> Option<String> {
        self.text("tool_name")
    }

    pub fn session_id(&self) -> Option<String> {
        self.text("session_id")
    }

    pub fn message(&self) -> Option<String> {
        self.text("message")
    }

    /// Build the event payload for `point`, enriched with the agent context.
    pub fn to_event_data(&self, point: HookType, context: &AgentContext) -> EventData {
        let mut data = EventData {
            session_id: self.session_id(),
            transcript_path: self.text("transcript_path"),
            cwd: self.text("cwd"),
            raw_input: Some(self.raw.clone()),
            ..EventData::default()
        };

        match point {
            HookType::PreToolUse => {
                data.tool_name = self.tool_name();
                data.tool_args = self.value("tool_input");
            }
            HookType::PostToolUse => {
                data.tool_name = self.tool_name();
                data.result = self.value("tool_result").or_else(|| self.value("tool_response"));
            }
            HookType::Stop => {
                data.message = Some(self.message().unwrap_or_else(|| STOP_MESSAGE.to_string()));
            }
            HookType::Notification => {
                data.message =
                    Some(self.message().unwrap_or_else(|| NOTIFICATION_MESSAGE.to_string()));
            }
        }

        context.apply_to(&mut data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostIdentity;
    use std::path::Path;

    fn context() -> AgentContext {
        AgentContext::detect_from(
            &HostIdentity {
                hostname: "devbox".into(),
                username: "sam".into(),
                platform: "linux".into(),
                computer_name: None,
            },
            Path::new("/"),
        )
    }

    #[test]
    fn test_pre_tool_use_payload() {
        let input = HookInput::parse(
            r#"{"tool_name":"Bash","tool_input":{"command":"rm -rf build"},"session_id":"s1","cwd":"/work"}"#,
        );
        let data = input.to_event_data(HookType::PreToolUse, &context());
        assert_eq!(data.tool_name.as_deref(), Some("Bash"));
        assert_eq!(data.tool_args.unwrap()["command"], "rm -rf build");
        assert_eq!(data.session_id.as_deref(), Some("s1"));
        assert_eq!(data.cwd.as_deref(), Some("/work"));
        assert_eq!(data.hostname.as_deref(), Some("devbox"));
        assert!(data.result.is_none());
    }

    #[test]
    fn test_non_json_kept_raw() {
        let input = HookInput::parse("not json at all");
        assert_eq!(input.raw()["rawData"], "not json at all");
        assert!(input.tool_name().is_none());
    }

    #[test]
    fn test_empty_input() {
        let input = HookInput::parse("  \n");
        assert!(input.raw().as_object().unwrap().is_empty());
        let data = input.to_event_data(HookType::Stop, &context());
        assert_eq!(data.message.as_deref(), Some(STOP_MESSAGE));
    }

    #[test]
    fn test_notification_message() {
        let input = HookInput::parse(r#"{"message":"Waiting for input"}"#);
        let data = input.to_event_data(HookType::Notification, &context());
        assert_eq!(data.message.as_deref(), Some("Waiting for input"));
        assert!(data.tool_name.is_none());
    }
}
