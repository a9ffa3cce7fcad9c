// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for the AFK server
//!
//! Every request carries its own deadline: lifecycle events use the event
//! timeout, command calls use the command timeout, and the push stream has
//! none so it can stay open indefinitely.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use afk_core::domain::agent::AgentPresence;
use afk_core::domain::command::{
    CommandId, CompleteCommandRequest, CompletionStatus, CreateCommandRequest, RemoteCommand,
};
use afk_core::domain::config::{HookConfig, ObserverConfig};
use afk_core::domain::events::{HookResponse, LifecycleEvent};

use crate::observer::sse::{frame_stream, FrameStream};

/// Failures seen by callers of the server API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Timeout, refused connection, unexpected status or undecodable body
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The command is not in a state that allows the transition
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::NetworkFailure(format!("request timed out: {}", err))
        } else {
            ClientError::NetworkFailure(err.to_string())
        }
    }
}

/// Broker operations the hook decision client depends on
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn emit_event(&self, event: &LifecycleEvent) -> Result<HookResponse, ClientError>;

    async fn pending_commands(&self, agent_id: &str) -> Result<Vec<RemoteCommand>, ClientError>;

    async fn interrupt_commands(&self, agent_id: &str)
        -> Result<Vec<RemoteCommand>, ClientError>;

    async fn claim_command(&self, id: &CommandId) -> Result<RemoteCommand, ClientError>;

    async fn complete_command(
        &self,
        id: &CommandId,
        status: CompletionStatus,
        result: Option<String>,
    ) -> Result<RemoteCommand, ClientError>;
}

/// Server operations the observer connection manager depends on
#[async_trait]
pub trait ObserverTransport: Send + Sync {
    async fn open_stream(&self, agent_filter: Option<String>) -> Result<FrameStream, ClientError>;

    async fn send_command(
        &self,
        request: &CreateCommandRequest,
    ) -> Result<RemoteCommand, ClientError>;
}

/// Client for the AFK server HTTP API
#[derive(Debug, Clone)]
pub struct AfkClient {
    base_url: String,
    client: Client,
    token: Option<String>,
    event_timeout: Duration,
    command_timeout: Duration,
}

impl AfkClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let defaults = HookConfig::default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            token: None,
            event_timeout: defaults.event_timeout(),
            command_timeout: defaults.command_timeout(),
        }
    }

    pub fn from_hook_config(config: &HookConfig) -> Self {
        let mut client = Self::new(&config.server_url)
            .with_timeouts(config.event_timeout(), config.command_timeout());
        client.token = config.resolved_token();
        client
    }

    pub fn from_observer_config(config: &ObserverConfig) -> Self {
        let mut client = Self::new(&config.server_url);
        client.token = config.resolved_token();
        client
    }

    /// Set the bearer token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeouts(mut self, event_timeout: Duration, command_timeout: Duration) -> Self {
        self.event_timeout = event_timeout;
        self.command_timeout = command_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        timeout: Duration,
    ) -> Result<T, ClientError> {
        let response = self.authorize(req).timeout(timeout).send().await?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(ClientError::from)
    }

    /// Check server liveness via `/health`.
    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        self.execute(self.client.get(self.url("/health")), self.command_timeout)
            .await
    }

    pub async fn heartbeat(&self, agent_id: &str) -> Result<(), ClientError> {
        let body = serde_json::json!({ "agentId": agent_id });
        let _: serde_json::Value = self
            .execute(
                self.client.post(self.url("/api/hooks/heartbeat")).json(&body),
                self.event_timeout,
            )
            .await?;
        Ok(())
    }

    pub async fn create_command(
        &self,
        request: &CreateCommandRequest,
    ) -> Result<RemoteCommand, ClientError> {
        self.execute(
            self.client.post(self.url("/api/commands")).json(request),
            self.command_timeout,
        )
        .await
    }

    pub async fn list_commands(&self) -> Result<Vec<RemoteCommand>, ClientError> {
        self.execute(self.client.get(self.url("/api/commands")), self.command_timeout)
            .await
    }

    pub async fn agent_commands(&self, agent_id: &str) -> Result<Vec<RemoteCommand>, ClientError> {
        self.execute(
            self.client
                .get(self.url(&format!("/api/commands/agent/{}", agent_id))),
            self.command_timeout,
        )
        .await
    }

    pub async fn agents(&self) -> Result<Vec<AgentPresence>, ClientError> {
        #[derive(serde::Deserialize)]
        struct AgentsResponse {
            agents: Vec<AgentPresence>,
        }

        let response: AgentsResponse = self
            .execute(self.client.get(self.url("/api/events/agents")), self.command_timeout)
            .await?;
        Ok(response.agents)
    }

    /// Open the push stream. The request has no deadline; the returned
    /// stream ends when the server closes the connection.
    pub async fn stream_events(&self, agent_filter: Option<&str>) -> Result<FrameStream, ClientError> {
        let mut req = self
            .client
            .get(self.url("/api/events/stream"))
            .header("Accept", "text/event-stream");
        if let Some(agent_id) = agent_filter {
            req = req.query(&[("agentId", agent_id)]);
        }
        let response = self.authorize(req).send().await?;
        let response = check_status(response).await?;
        debug!(url = %self.base_url, "Event stream open");

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed();
        Ok(frame_stream(bytes))
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status));

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(detail),
        StatusCode::CONFLICT => ClientError::InvalidState(detail),
        _ => ClientError::NetworkFailure(detail),
    })
}

#[async_trait]
impl BrokerApi for AfkClient {
    async fn emit_event(&self, event: &LifecycleEvent) -> Result<HookResponse, ClientError> {
        self.execute(
            self.client.post(self.url("/api/hooks/events")).json(event),
            self.event_timeout,
        )
        .await
    }

    async fn pending_commands(&self, agent_id: &str) -> Result<Vec<RemoteCommand>, ClientError> {
        self.execute(
            self.client.get(self.url(&format!("/api/commands/{}", agent_id))),
            self.command_timeout,
        )
        .await
    }

    async fn interrupt_commands(
        &self,
        agent_id: &str,
    ) -> Result<Vec<RemoteCommand>, ClientError> {
        self.execute(
            self.client
                .get(self.url(&format!("/api/commands/{}/interrupt", agent_id))),
            self.command_timeout,
        )
        .await
    }

    async fn claim_command(&self, id: &CommandId) -> Result<RemoteCommand, ClientError> {
        self.execute(
            self.client
                .put(self.url(&format!("/api/commands/{}/processing", id))),
            self.command_timeout,
        )
        .await
    }

    async fn complete_command(
        &self,
        id: &CommandId,
        status: CompletionStatus,
        result: Option<String>,
    ) -> Result<RemoteCommand, ClientError> {
        let body = CompleteCommandRequest { status, result };
        self.execute(
            self.client
                .put(self.url(&format!("/api/commands/{}/complete", id)))
                .json(&body),
            self.command_timeout,
        )
        .await
    }
}

#[async_trait]
impl ObserverTransport for AfkClient {
    async fn open_stream(&self, agent_filter: Option<String>) -> Result<FrameStream, ClientError> {
        self.stream_events(agent_filter.as_deref()).await
    }

    async fn send_command(
        &self,
        request: &CreateCommandRequest,
    ) -> Result<RemoteCommand, ClientError> {
        self.create_command(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afk_core::domain::command::{CommandStatus, CommandType};
    use afk_core::domain::events::{EventData, FrameKind, HookType};

    fn command_json(id: &str, kind: &str, status: &str) -> String {
        serde_json::json!({
            "id": id,
            "agentId": "a1",
            "sessionId": "s1",
            "type": kind,
            "payload": { "reason": "no" },
            "status": status,
            "createdAt": "2026-01-01T00:00:00Z",
            "expiresAt": "2026-01-01T00:00:30Z"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_pending_commands_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/commands/a1")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!("[{}]", command_json("cmd-1", "deny", "pending")))
            .create_async()
            .await;

        let client = AfkClient::new(server.url()).with_token("secret");
        let commands = client.pending_commands("a1").await.unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command_type, CommandType::Deny);
        assert_eq!(commands[0].status, CommandStatus::Pending);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/api/commands/cmd-1/processing")
            .with_status(409)
            .with_body(r#"{"error":"Command cmd-1 is processing, transition not allowed"}"#)
            .create_async()
            .await;
        server
            .mock("PUT", "/api/commands/cmd-2/processing")
            .with_status(404)
            .with_body(r#"{"error":"Command cmd-2 not found"}"#)
            .create_async()
            .await;
        server
            .mock("PUT", "/api/commands/cmd-3/processing")
            .with_status(500)
            .create_async()
            .await;

        let client = AfkClient::new(server.url());
        assert!(matches!(
            client.claim_command(&CommandId::from("cmd-1")).await,
            Err(ClientError::InvalidState(msg)) if msg.contains("processing")
        ));
        assert!(matches!(
            client.claim_command(&CommandId::from("cmd-2")).await,
            Err(ClientError::NotFound(_))
        ));
        assert!(matches!(
            client.claim_command(&CommandId::from("cmd-3")).await,
            Err(ClientError::NetworkFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_sends_status_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/commands/cmd-1/complete")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "status": "completed",
                "result": "Executed by hook"
            })))
            .with_status(200)
            .with_body(command_json("cmd-1", "deny", "completed"))
            .create_async()
            .await;

        let client = AfkClient::new(server.url());
        let done = client
            .complete_command(
                &CommandId::from("cmd-1"),
                CompletionStatus::Completed,
                Some("Executed by hook".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(done.status, CommandStatus::Completed);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_failure() {
        let client = AfkClient::new("http://127.0.0.1:9")
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        let event = LifecycleEvent::new("a1", "s1", HookType::Stop, EventData::default());
        assert!(matches!(
            client.emit_event(&event).await,
            Err(ClientError::NetworkFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_decodes_frames() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"type\":\"connected\",\"data\":{\"message\":\"Connected to event stream\"},\"timestamp\":\"2026-01-01T00:00:00Z\"}\n\n",
            ": keepalive\n\n",
            "data: {\"type\":\"hook_event\",\"data\":{\"agentId\":\"a1\"},\"timestamp\":\"2026-01-01T00:00:01Z\"}\n\n",
        );
        server
            .mock("GET", "/api/events/stream")
            .match_query(mockito::Matcher::UrlEncoded("agentId".into(), "a1".into()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = AfkClient::new(server.url());
        let frames: Vec<_> = client
            .stream_events(Some("a1"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        let first = frames[0].as_ref().unwrap();
        assert_eq!(first.kind, FrameKind::Connected);
        let second = frames[1].as_ref().unwrap();
        assert_eq!(second.agent_id.as_deref(), Some("a1"));
    }
}
