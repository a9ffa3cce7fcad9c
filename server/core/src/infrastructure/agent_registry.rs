// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Presence Registry
//
// Tracks which agents have been heard from recently. Presence is rebuilt
// from incoming events and heartbeats; nothing is persisted. Every status
// change is published to the hub as an `agent_status` frame.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::agent::{AgentPresence, AgentStatus};
use crate::domain::clock::SharedClock;
use crate::domain::events::{LifecycleEvent, StreamFrame};
use crate::infrastructure::event_hub::EventHub;

pub struct AgentRegistry {
    agents: Mutex<HashMap<String, AgentPresence>>,
    hub: Arc<EventHub>,
    clock: SharedClock,
    idle_timeout: chrono::Duration,
}

impl AgentRegistry {
    pub fn new(hub: Arc<EventHub>, clock: SharedClock, idle_timeout: chrono::Duration) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            hub,
            clock,
            idle_timeout,
        }
    }

    /// Refresh presence from an ingested lifecycle event
    pub fn record_event(&self, event: &LifecycleEvent) -> AgentPresence {
        let now = self.clock.now();
        let mut agents = self.agents.lock();
        let mut changed = false;
        let presence = agents.entry(event.agent_id.clone()).or_insert_with(|| {
            changed = true;
            AgentPresence::new(event.agent_id.clone(), now)
        });
        if presence.status != AgentStatus::Active {
            changed = true;
        }

        presence.status = AgentStatus::Active;
        presence.last_activity = now;
        presence.current_session_id = Some(event.session_id.clone());
        if let Some(name) = &event.data.agent_name {
            presence.name = Some(name.clone());
        }
        if let Some(dir) = event.data.working_directory.as_ref().or(event.data.cwd.as_ref()) {
            presence.working_directory = Some(dir.clone());
        }
        if let Some(computer) = &event.data.computer_id {
            presence.computer_id = Some(computer.clone());
        }

        let snapshot = presence.clone();
        if changed {
            info!(agent_id = %snapshot.id, "Agent active");
            self.hub.publish(StreamFrame::agent_status(&snapshot, now));
        }
        snapshot
    }

    /// Mark an agent active without an accompanying event
    pub fn heartbeat(&self, agent_id: &str) -> AgentPresence {
        let now = self.clock.now();
        let mut agents = self.agents.lock();
        let mut changed = false;
        let presence = agents.entry(agent_id.to_string()).or_insert_with(|| {
            changed = true;
            AgentPresence::new(agent_id, now)
        });
        if presence.status != AgentStatus::Active {
            changed = true;
        }
        presence.status = AgentStatus::Active;
        presence.last_activity = now;

        let snapshot = presence.clone();
        debug!(agent_id = %agent_id, "Heartbeat");
        if changed {
            self.hub.publish(StreamFrame::agent_status(&snapshot, now));
        }
        snapshot
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentPresence> {
        self.agents.lock().get(agent_id).cloned()
    }

    /// All known agents, most recently active first
    pub fn list(&self) -> Vec<AgentPresence> {
        let mut agents: Vec<AgentPresence> = self.agents.lock().values().cloned().collect();
        agents.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        agents
    }

    /// Mark agents without recent activity idle. Returns how many changed.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now - self.idle_timeout;
        let mut agents = self.agents.lock();
        let mut changed = 0;
        for presence in agents.values_mut() {
            if presence.status == AgentStatus::Active && presence.last_activity <= cutoff {
                presence.status = AgentStatus::Idle;
                changed += 1;
                info!(agent_id = %presence.id, "Agent idle");
                self.hub.publish(StreamFrame::agent_status(presence, now));
            }
        }
        changed
    }
}
