// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hook ingest - entry point for lifecycle events sent by agents
//!
//! Ingest never blocks an agent: every outcome, including an internal
//! failure, answers with an approving [`HookResponse`].

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::domain::clock::SharedClock;
use crate::domain::events::{HookResponse, LifecycleEvent, StreamFrame};
use crate::infrastructure::agent_registry::AgentRegistry;
use crate::infrastructure::event_hub::EventHub;

pub const EVENT_RECEIVED: &str = "Event received";
pub const SERVER_ERROR_PROCEEDING: &str = "Server error, proceeding";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("event is missing {0}")]
    MissingField(&'static str),
}

pub struct HookIngestService {
    registry: Arc<AgentRegistry>,
    hub: Arc<EventHub>,
    clock: SharedClock,
}

impl HookIngestService {
    pub fn new(registry: Arc<AgentRegistry>, hub: Arc<EventHub>, clock: SharedClock) -> Self {
        Self { registry, hub, clock }
    }

    /// Record presence and broadcast the event. Always approves.
    pub fn handle(&self, event: LifecycleEvent) -> HookResponse {
        match self.ingest(&event) {
            Ok(()) => HookResponse::proceed(EVENT_RECEIVED),
            Err(err) => {
                error!(agent_id = %event.agent_id, error = %err, "Failed to process hook event");
                self.hub.publish_error(&format!("Failed to process hook event: {}", err));
                HookResponse::proceed(SERVER_ERROR_PROCEEDING)
            }
        }
    }

    fn ingest(&self, event: &LifecycleEvent) -> Result<(), IngestError> {
        if event.agent_id.trim().is_empty() {
            return Err(IngestError::MissingField("agentId"));
        }
        if event.session_id.trim().is_empty() {
            return Err(IngestError::MissingField("sessionId"));
        }

        info!(
            agent_id = %event.agent_id,
            session_id = %event.session_id,
            hook_type = %event.hook_type,
            tool = event.data.tool_name.as_deref().unwrap_or("-"),
            "Processing hook event"
        );
        metrics::counter!("afk_hook_events_total", "hook_type" => event.hook_type.to_string())
            .increment(1);

        self.registry.record_event(event);
        self.hub
            .publish(StreamFrame::hook_event(event, self.clock.now()));
        Ok(())
    }

    pub fn heartbeat(&self, agent_id: &str) {
        self.registry.heartbeat(agent_id);
    }
}
