// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command Broker - single source of truth for outstanding remote decisions
//!
//! Owns every [`RemoteCommand`] and its per-agent index behind one mutex.
//! Each state change is published to the [`EventHub`] while that mutex is
//! held, so observers see a command's states in the order they happened.
//! Lock order is always broker then hub.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::clock::SharedClock;
use crate::domain::command::{
    BrokerError, CommandId, CommandStatus, CommandType, CompletionStatus, CreateCommandRequest,
    RemoteCommand,
};
use crate::domain::config::ServerConfig;
use crate::domain::events::StreamFrame;
use crate::infrastructure::event_hub::EventHub;

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Time a command stays claimable after creation
    pub ttl: chrono::Duration,
    /// Age after which a command is deleted whatever its status
    pub retention: chrono::Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for BrokerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            ttl: config.command_ttl(),
            retention: config.retention(),
        }
    }
}

/// What one maintenance pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
}

#[derive(Default)]
struct CommandTable {
    commands: HashMap<CommandId, RemoteCommand>,
    by_agent: HashMap<String, Vec<CommandId>>,
}

impl CommandTable {
    fn for_agent<'a>(&'a self, agent_id: &str) -> impl Iterator<Item = &'a RemoteCommand> + 'a {
        self.by_agent
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.commands.get(id))
    }

    fn remove(&mut self, id: &CommandId) -> Option<RemoteCommand> {
        let command = self.commands.remove(id)?;
        if let Some(ids) = self.by_agent.get_mut(&command.agent_id) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                self.by_agent.remove(&command.agent_id);
            }
        }
        Some(command)
    }
}

pub struct CommandBroker {
    table: Mutex<CommandTable>,
    hub: Arc<EventHub>,
    clock: SharedClock,
    settings: BrokerSettings,
}

impl CommandBroker {
    pub fn new(hub: Arc<EventHub>, clock: SharedClock, settings: BrokerSettings) -> Self {
        Self {
            table: Mutex::new(CommandTable::default()),
            hub,
            clock,
            settings,
        }
    }

    pub fn create(&self, request: CreateCommandRequest) -> Result<RemoteCommand, BrokerError> {
        if request.agent_id.trim().is_empty() {
            return Err(BrokerError::InvalidRequest("agentId is required".to_string()));
        }
        if request.command_type == CommandType::Unknown {
            return Err(BrokerError::InvalidRequest(
                "type must be one of approve, deny, context, continue, stop, interrupt".to_string(),
            ));
        }

        let now = self.clock.now();
        let command = RemoteCommand::new(request, now, self.settings.ttl);

        let mut table = self.table.lock();
        table
            .by_agent
            .entry(command.agent_id.clone())
            .or_default()
            .push(command.id.clone());
        table.commands.insert(command.id.clone(), command.clone());

        info!(
            command_id = %command.id,
            agent_id = %command.agent_id,
            command_type = %command.command_type,
            "Created command"
        );
        metrics::counter!("afk_commands_created_total").increment(1);
        self.broadcast(&command, now);

        Ok(command)
    }

    /// Live pending commands for an agent, oldest first
    pub fn list_pending(&self, agent_id: &str) -> Vec<RemoteCommand> {
        self.pending_where(agent_id, |_| true)
    }

    /// Pending `interrupt` commands for an agent: the priority lane the hook checks first
    pub fn list_interrupts(&self, agent_id: &str) -> Vec<RemoteCommand> {
        self.pending_where(agent_id, |command| {
            command.command_type == CommandType::Interrupt
        })
    }

    fn pending_where(
        &self,
        agent_id: &str,
        predicate: impl Fn(&RemoteCommand) -> bool,
    ) -> Vec<RemoteCommand> {
        let now = self.clock.now();
        let table = self.table.lock();
        let mut pending: Vec<RemoteCommand> = table
            .for_agent(agent_id)
            .filter(|command| command.is_live(now) && predicate(command))
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Atomically move a command out of pending. Only one caller can win.
    pub fn claim(&self, id: &CommandId) -> Result<RemoteCommand, BrokerError> {
        let now = self.clock.now();
        let mut table = self.table.lock();
        let command = table
            .commands
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;

        let before = command.status;
        match command.claim(now) {
            Ok(()) => {
                let snapshot = command.clone();
                info!(command_id = %id, agent_id = %snapshot.agent_id, "Command claimed");
                metrics::counter!("afk_commands_claimed_total").increment(1);
                self.broadcast(&snapshot, now);
                Ok(snapshot)
            }
            Err(err) => {
                if before == CommandStatus::Pending && command.status == CommandStatus::Expired {
                    let snapshot = command.clone();
                    debug!(command_id = %id, "Claim arrived after expiry");
                    metrics::counter!("afk_commands_expired_total").increment(1);
                    self.broadcast(&snapshot, now);
                }
                warn!(command_id = %id, error = %err, "Claim rejected");
                Err(err)
            }
        }
    }

    pub fn complete(
        &self,
        id: &CommandId,
        status: CompletionStatus,
        result: Option<String>,
    ) -> Result<RemoteCommand, BrokerError> {
        let now = self.clock.now();
        let mut table = self.table.lock();
        let command = table
            .commands
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotFound(id.clone()))?;

        command.complete(status, result)?;
        let snapshot = command.clone();

        info!(command_id = %id, status = %snapshot.status, "Command completed");
        match status {
            CompletionStatus::Completed => {
                metrics::counter!("afk_commands_completed_total").increment(1)
            }
            CompletionStatus::Expired => metrics::counter!("afk_commands_expired_total").increment(1),
        }
        self.broadcast(&snapshot, now);
        Ok(snapshot)
    }

    pub fn get(&self, id: &CommandId) -> Result<RemoteCommand, BrokerError> {
        self.table
            .lock()
            .commands
            .get(id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(id.clone()))
    }

    /// Every retained command regardless of status, newest first
    pub fn list_all(&self) -> Vec<RemoteCommand> {
        let mut all: Vec<RemoteCommand> = self.table.lock().commands.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Every retained command for one agent regardless of status, oldest first
    pub fn list_by_agent(&self, agent_id: &str) -> Vec<RemoteCommand> {
        let table = self.table.lock();
        let mut commands: Vec<RemoteCommand> = table.for_agent(agent_id).cloned().collect();
        commands.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        commands
    }

    /// Expire overdue pending commands, then drop everything past retention.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let cutoff = now - self.settings.retention;
        let mut report = SweepReport::default();
        let mut table = self.table.lock();

        let mut expired: Vec<RemoteCommand> = Vec::new();
        for command in table.commands.values_mut() {
            if command.expire_if_due(now) {
                expired.push(command.clone());
            }
        }
        expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for command in &expired {
            debug!(command_id = %command.id, "Command expired");
            self.broadcast(command, now);
        }
        report.expired = expired.len();

        let stale: Vec<CommandId> = table
            .commands
            .values()
            .filter(|command| command.created_at < cutoff)
            .map(|command| command.id.clone())
            .collect();
        for id in &stale {
            table.remove(id);
        }
        report.purged = stale.len();

        if report.expired > 0 || report.purged > 0 {
            info!(expired = report.expired, purged = report.purged, "Command sweep");
            metrics::counter!("afk_commands_expired_total").increment(report.expired as u64);
            metrics::counter!("afk_commands_purged_total").increment(report.purged as u64);
        }
        report
    }

    pub fn len(&self) -> usize {
        self.table.lock().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn broadcast(&self, command: &RemoteCommand, now: DateTime<Utc>) {
        self.hub.publish(StreamFrame::command_update(command, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::command::CommandPayload;
    use crate::domain::events::FrameKind;
    use crate::infrastructure::event_hub::HubSettings;
    use chrono::Duration;

    fn broker() -> (CommandBroker, Arc<EventHub>, ManualClock) {
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock.clone());
        let hub = Arc::new(EventHub::new(HubSettings::default(), shared.clone()));
        let broker = CommandBroker::new(hub.clone(), shared, BrokerSettings::default());
        (broker, hub, clock)
    }

    fn updates_for(hub: &EventHub, id: &CommandId) -> Vec<String> {
        hub.history()
            .iter()
            .filter(|f| f.kind == FrameKind::CommandUpdate && f.data["id"] == id.as_str())
            .map(|f| f.data["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_deny_round_trip() {
        let (broker, hub, _) = broker();
        let created = broker
            .create(CreateCommandRequest::new(
                "a1",
                "s1",
                CommandType::Deny,
                CommandPayload::reason("no"),
            ))
            .unwrap();
        assert_eq!(created.status, CommandStatus::Pending);

        let pending = broker.list_pending("a1");
        assert_eq!(pending.len(), 1);
        assert!(pending[0].matches_session("s1"));

        broker.claim(&created.id).unwrap();
        let done = broker
            .complete(&created.id, CompletionStatus::Completed, Some("Executed by hook".into()))
            .unwrap();
        assert_eq!(done.status, CommandStatus::Completed);
        assert!(broker.list_pending("a1").is_empty());
        assert_eq!(
            updates_for(&hub, &created.id),
            vec!["pending", "processing", "completed"]
        );
    }

    #[test]
    fn test_create_rejects_bad_requests() {
        let (broker, _, _) = broker();
        let missing_agent = CreateCommandRequest::approve("", "s1", None);
        assert!(matches!(
            broker.create(missing_agent),
            Err(BrokerError::InvalidRequest(_))
        ));

        let unknown = CreateCommandRequest::new("a1", "", CommandType::Unknown, CommandPayload::default());
        assert!(broker.create(unknown).is_err());
        assert!(broker.is_empty());
    }

    #[test]
    fn test_only_one_claim_wins() {
        let (broker, _, _) = broker();
        let cmd = broker
            .create(CreateCommandRequest::approve("a1", "s1", None))
            .unwrap();
        assert!(broker.claim(&cmd.id).is_ok());
        assert!(matches!(
            broker.claim(&cmd.id),
            Err(BrokerError::InvalidState { status: CommandStatus::Processing, .. })
        ));
    }

    #[test]
    fn test_unknown_id() {
        let (broker, _, _) = broker();
        let id = CommandId::from("cmd-missing");
        assert!(matches!(broker.claim(&id), Err(BrokerError::NotFound(_))));
        assert!(matches!(
            broker.complete(&id, CompletionStatus::Completed, None),
            Err(BrokerError::NotFound(_))
        ));
    }

    #[test]
    fn test_interrupts_are_a_view_of_pending() {
        let (broker, _, _) = broker();
        broker.create(CreateCommandRequest::approve("a1", "s1", None)).unwrap();
        let interrupt = broker
            .create(CreateCommandRequest::interrupt("a1", "", None))
            .unwrap();
        broker.create(CreateCommandRequest::interrupt("a2", "", None)).unwrap();

        let interrupts = broker.list_interrupts("a1");
        assert_eq!(interrupts.len(), 1);
        assert_eq!(interrupts[0].id, interrupt.id);
        assert_eq!(broker.list_pending("a1").len(), 2);

        broker.claim(&interrupt.id).unwrap();
        assert!(broker.list_interrupts("a1").is_empty());
    }

    #[test]
    fn test_expired_broadcast_exactly_once() {
        let (broker, hub, clock) = broker();
        let cmd = broker
            .create(CreateCommandRequest::continue_session("a1", "s1", None))
            .unwrap();

        clock.advance(Duration::seconds(29));
        assert_eq!(broker.sweep().expired, 0);
        assert_eq!(broker.list_pending("a1").len(), 1);

        clock.advance(Duration::seconds(1));
        assert!(broker.list_pending("a1").is_empty());
        assert_eq!(broker.sweep().expired, 1);
        assert_eq!(broker.sweep().expired, 0);

        assert_eq!(updates_for(&hub, &cmd.id), vec!["pending", "expired"]);
        assert_eq!(broker.get(&cmd.id).unwrap().status, CommandStatus::Expired);
    }

    #[test]
    fn test_claim_past_deadline_expires_once() {
        let (broker, hub, clock) = broker();
        let cmd = broker.create(CreateCommandRequest::approve("a1", "", None)).unwrap();
        clock.advance(Duration::seconds(45));

        assert!(broker.claim(&cmd.id).is_err());
        assert_eq!(broker.sweep().expired, 0);
        assert_eq!(updates_for(&hub, &cmd.id), vec!["pending", "expired"]);
    }

    #[test]
    fn test_retention_purges_any_status() {
        let (broker, _, clock) = broker();
        let done = broker.create(CreateCommandRequest::approve("a1", "s1", None)).unwrap();
        broker.claim(&done.id).unwrap();
        broker.complete(&done.id, CompletionStatus::Completed, None).unwrap();
        broker.create(CreateCommandRequest::deny("a1", "s1", None, None)).unwrap();

        clock.advance(Duration::minutes(30));
        let fresh = broker.create(CreateCommandRequest::approve("a2", "", None)).unwrap();

        clock.advance(Duration::minutes(31));
        let report = broker.sweep();
        assert_eq!(report.purged, 2);
        assert!(broker.list_by_agent("a1").is_empty());
        assert_eq!(broker.list_all().len(), 1);
        assert_eq!(broker.list_all()[0].id, fresh.id);
    }

    #[test]
    fn test_pending_order_is_creation_order() {
        let (broker, _, clock) = broker();
        let first = broker.create(CreateCommandRequest::approve("a1", "s1", None)).unwrap();
        clock.advance(Duration::milliseconds(10));
        let second = broker.create(CreateCommandRequest::approve("a1", "s2", None)).unwrap();

        let ids: Vec<CommandId> = broker.list_pending("a1").into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
