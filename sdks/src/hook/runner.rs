// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hook decision client
//!
//! Runs inside the monitored process at a lifecycle point and always comes
//! back with a [`HookResponse`]. The wait window for a lifecycle point starts
//! when [`HookRunner::run`] is entered; every network call carries its own
//! deadline and no new call is started once the window has closed, so the
//! worst case is the window plus one network deadline.
//!
//! Pre-use points check the interrupt lane before doing anything else, even
//! before the hook payload is read. The payload read is bounded by the event
//! timeout. After that, the event is emitted (best effort) and decision
//! points poll:
//!
//! ```text
//! Waiting ──candidate claimed──► Found ──► decision
//!    │ ▲
//!    │ └── nothing yet, sleep poll interval
//!    └──── window closed ──────► Default ──► default decision
//! ```

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use afk_core::domain::command::{CompletionStatus, RemoteCommand};
use afk_core::domain::config::HookConfig;
use afk_core::domain::events::{EventData, HookResponse, HookType, LifecycleEvent};

use crate::client::{BrokerApi, ClientError};
use crate::hook::input::HookInput;
use crate::hook::decision::{
    claimable_at, completion_result, decide, default_decision, interrupt_decision,
    INTERRUPTED_EXECUTION,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSettings {
    pub event_timeout: Duration,
    pub command_timeout: Duration,
    pub poll_interval: Duration,
    pub pre_tool_use_max_wait: Duration,
    pub stop_max_wait: Duration,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self::from(&HookConfig::default())
    }
}

impl From<&HookConfig> for HookSettings {
    fn from(config: &HookConfig) -> Self {
        Self {
            event_timeout: config.event_timeout(),
            command_timeout: config.command_timeout(),
            poll_interval: config.poll_interval(),
            pre_tool_use_max_wait: config.pre_tool_use_max_wait(),
            stop_max_wait: config.stop_max_wait(),
        }
    }
}

impl HookSettings {
    /// Length of the decision window at `point`; zero where nothing is awaited.
    pub fn max_wait(&self, point: HookType) -> Duration {
        match point {
            HookType::PreToolUse => self.pre_tool_use_max_wait,
            HookType::Stop => self.stop_max_wait,
            HookType::PostToolUse | HookType::Notification => Duration::ZERO,
        }
    }
}

/// One lifecycle point as seen by the hook
#[derive(Debug, Clone, PartialEq)]
pub struct HookInvocation {
    pub agent_id: String,
    pub session_id: String,
    pub data: EventData,
}

enum PollState {
    Waiting,
    Found(RemoteCommand),
    Default,
}

pub struct HookRunner<B> {
    broker: B,
    settings: HookSettings,
}

impl<B: BrokerApi> HookRunner<B> {
    pub fn new(broker: B, settings: HookSettings) -> Self {
        Self { broker, settings }
    }

    pub fn settings(&self) -> &HookSettings {
        &self.settings
    }

    /// Resolve the lifecycle point. Never fails: every error, including a
    /// panic inside the pipeline, degrades to the default decision.
    pub async fn run(&self, point: HookType, invocation: HookInvocation) -> HookResponse {
        let agent_id = invocation.agent_id.clone();
        self.guarded(point, &agent_id, async move { invocation }).await
    }

    /// Like [`run`](Self::run), for a payload that may still be arriving
    /// (the agent's stdin). The interrupt lane is checked first; the payload
    /// then gets the event timeout to arrive and is treated as empty if it
    /// does not. `prepare` turns the parsed payload into the invocation.
    pub async fn run_with_payload<P, F>(
        &self,
        point: HookType,
        agent_id: &str,
        payload: P,
        prepare: F,
    ) -> HookResponse
    where
        P: Future<Output = std::io::Result<String>>,
        F: FnOnce(HookInput) -> HookInvocation,
    {
        let limit = self.settings.event_timeout;
        self.guarded(point, agent_id, async move {
            prepare(read_payload(payload, limit).await)
        })
        .await
    }

    async fn guarded(
        &self,
        point: HookType,
        agent_id: &str,
        invocation: impl Future<Output = HookInvocation>,
    ) -> HookResponse {
        let deadline = Instant::now() + self.settings.max_wait(point);
        match AssertUnwindSafe(self.execute(point, agent_id, invocation, deadline))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                error!(hook = %point, agent_id = %agent_id, "Hook pipeline panicked, using default decision");
                default_decision(point)
            }
        }
    }

    async fn execute(
        &self,
        point: HookType,
        agent_id: &str,
        invocation: impl Future<Output = HookInvocation>,
        deadline: Instant,
    ) -> HookResponse {
        if point == HookType::PreToolUse {
            if let Some(response) = self.check_interrupts(agent_id).await {
                return response;
            }
        }

        let invocation = invocation.await;
        self.emit(point, &invocation).await;

        if !point.awaits_decision() {
            return HookResponse::allow();
        }
        self.poll(point, &invocation, deadline).await
    }

    /// Priority lane: any interrupt addressed to the agent wins over
    /// everything else, whichever session it names.
    async fn check_interrupts(&self, agent_id: &str) -> Option<HookResponse> {
        let interrupts = match self
            .call(self.settings.command_timeout, self.broker.interrupt_commands(agent_id))
            .await
        {
            Ok(list) => list,
            Err(err) => {
                debug!(error = %err, "Interrupt lookup failed, continuing");
                return None;
            }
        };

        for command in interrupts {
            if !self.try_claim(&command).await {
                continue;
            }
            info!(command_id = %command.id, agent_id = %agent_id, "Interrupt received");
            self.finish(&command, INTERRUPTED_EXECUTION).await;
            return Some(interrupt_decision(&command));
        }
        None
    }

    async fn emit(&self, point: HookType, invocation: &HookInvocation) {
        let event = LifecycleEvent::new(
            invocation.agent_id.clone(),
            invocation.session_id.clone(),
            point,
            invocation.data.clone(),
        );
        match self
            .call(self.settings.event_timeout, self.broker.emit_event(&event))
            .await
        {
            Ok(ack) => debug!(hook = %point, approved = ack.approved, "Event delivered"),
            Err(err) => debug!(hook = %point, error = %err, "Event delivery failed, proceeding"),
        }
    }

    async fn poll(
        &self,
        point: HookType,
        invocation: &HookInvocation,
        deadline: Instant,
    ) -> HookResponse {
        let mut state = PollState::Waiting;
        loop {
            state = match state {
                PollState::Waiting => {
                    let now = Instant::now();
                    if now >= deadline {
                        PollState::Default
                    } else if let Some(command) =
                        self.next_candidate(point, invocation, deadline).await
                    {
                        PollState::Found(command)
                    } else {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        tokio::time::sleep(self.settings.poll_interval.min(remaining)).await;
                        PollState::Waiting
                    }
                }
                PollState::Found(command) => {
                    info!(
                        hook = %point,
                        command_id = %command.id,
                        command_type = %command.command_type,
                        "Applying remote command"
                    );
                    let response = decide(point, &command);
                    self.finish(&command, completion_result(point)).await;
                    return response;
                }
                PollState::Default => {
                    debug!(hook = %point, "Decision window closed without a command");
                    return default_decision(point);
                }
            };
        }
    }

    /// Fetch pending commands and claim the first one this point may apply.
    async fn next_candidate(
        &self,
        point: HookType,
        invocation: &HookInvocation,
        deadline: Instant,
    ) -> Option<RemoteCommand> {
        let pending = match self
            .call(self.settings.command_timeout, self.broker.pending_commands(&invocation.agent_id))
            .await
        {
            Ok(list) => list,
            Err(err) => {
                debug!(error = %err, "Pending command lookup failed");
                return None;
            }
        };

        for command in pending.into_iter().filter(|c| {
            c.matches_session(&invocation.session_id) && claimable_at(point, c)
        }) {
            if Instant::now() >= deadline {
                return None;
            }
            if self.try_claim(&command).await {
                return Some(command);
            }
        }
        None
    }

    /// Claim `command`. Losing the race (or the command vanishing) means skip
    /// it; a network failure is tolerated and the command is applied anyway.
    async fn try_claim(&self, command: &RemoteCommand) -> bool {
        match self
            .call(self.settings.command_timeout, self.broker.claim_command(&command.id))
            .await
        {
            Ok(_) => true,
            Err(ClientError::NetworkFailure(err)) => {
                warn!(command_id = %command.id, error = %err, "Claim not confirmed, applying command");
                true
            }
            Err(err) => {
                debug!(command_id = %command.id, error = %err, "Command taken elsewhere, skipping");
                false
            }
        }
    }

    async fn finish(&self, command: &RemoteCommand, result: &str) {
        let outcome = self
            .call(
                self.settings.command_timeout,
                self.broker.complete_command(
                    &command.id,
                    CompletionStatus::Completed,
                    Some(result.to_string()),
                ),
            )
            .await;
        if let Err(err) = outcome {
            warn!(command_id = %command.id, error = %err, "Failed to mark command completed");
        }
    }

    async fn call<T>(
        &self,
        limit: Duration,
        fut: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::NetworkFailure(format!(
                "no response within {}ms",
                limit.as_millis()
            ))),
        }
    }
}

/// Wait up to `limit` for the raw hook payload. A payload that fails or
/// does not arrive in time yields an empty input.
pub async fn read_payload<P>(payload: P, limit: Duration) -> HookInput
where
    P: Future<Output = std::io::Result<String>>,
{
    match tokio::time::timeout(limit, payload).await {
        Ok(Ok(raw)) => HookInput::parse(&raw),
        Ok(Err(err)) => {
            debug!(error = %err, "Hook payload unreadable, continuing without it");
            HookInput::default()
        }
        Err(_) => {
            warn!(
                limit_ms = limit.as_millis() as u64,
                "Hook payload not received in time, continuing without it"
            );
            HookInput::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afk_core::application::command_broker::{BrokerSettings, CommandBroker};
    use afk_core::domain::clock::{ManualClock, SharedClock};
    use afk_core::domain::command::{
        BrokerError, CommandId, CommandPayload, CommandStatus, CommandType, CreateCommandRequest,
    };
    use afk_core::infrastructure::event_hub::{EventHub, HubSettings};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Broker API served straight from an in-process broker
    struct LocalBroker {
        broker: Arc<CommandBroker>,
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl LocalBroker {
        fn new() -> Arc<Self> {
            let clock: SharedClock = Arc::new(ManualClock::default());
            let hub = Arc::new(EventHub::new(HubSettings::default(), clock.clone()));
            Arc::new(Self {
                broker: Arc::new(CommandBroker::new(hub, clock, BrokerSettings::default())),
                events: Mutex::new(Vec::new()),
            })
        }
    }

    fn map(err: BrokerError) -> ClientError {
        match err {
            BrokerError::NotFound(id) => ClientError::NotFound(id.to_string()),
            BrokerError::InvalidState { id, .. } => ClientError::InvalidState(id.to_string()),
            BrokerError::InvalidRequest(msg) => ClientError::NetworkFailure(msg),
        }
    }

    #[async_trait]
    impl BrokerApi for Arc<LocalBroker> {
        async fn emit_event(&self, event: &LifecycleEvent) -> Result<HookResponse, ClientError> {
            self.events.lock().push(event.clone());
            Ok(HookResponse::proceed("Event received"))
        }

        async fn pending_commands(&self, agent_id: &str) -> Result<Vec<RemoteCommand>, ClientError> {
            Ok(self.broker.list_pending(agent_id))
        }

        async fn interrupt_commands(
            &self,
            agent_id: &str,
        ) -> Result<Vec<RemoteCommand>, ClientError> {
            Ok(self.broker.list_interrupts(agent_id))
        }

        async fn claim_command(&self, id: &CommandId) -> Result<RemoteCommand, ClientError> {
            self.broker.claim(id).map_err(map)
        }

        async fn complete_command(
            &self,
            id: &CommandId,
            status: CompletionStatus,
            result: Option<String>,
        ) -> Result<RemoteCommand, ClientError> {
            self.broker.complete(id, status, result).map_err(map)
        }
    }

    /// Broker that never answers
    struct Unreachable;

    #[async_trait]
    impl BrokerApi for Unreachable {
        async fn emit_event(&self, _: &LifecycleEvent) -> Result<HookResponse, ClientError> {
            futures::future::pending().await
        }

        async fn pending_commands(&self, _: &str) -> Result<Vec<RemoteCommand>, ClientError> {
            futures::future::pending().await
        }

        async fn interrupt_commands(&self, _: &str) -> Result<Vec<RemoteCommand>, ClientError> {
            futures::future::pending().await
        }

        async fn claim_command(&self, _: &CommandId) -> Result<RemoteCommand, ClientError> {
            futures::future::pending().await
        }

        async fn complete_command(
            &self,
            _: &CommandId,
            _: CompletionStatus,
            _: Option<String>,
        ) -> Result<RemoteCommand, ClientError> {
            futures::future::pending().await
        }
    }

    /// Broker whose pending lookup panics
    struct Exploding;

    #[async_trait]
    impl BrokerApi for Exploding {
        async fn emit_event(&self, _: &LifecycleEvent) -> Result<HookResponse, ClientError> {
            Ok(HookResponse::allow())
        }

        async fn pending_commands(&self, _: &str) -> Result<Vec<RemoteCommand>, ClientError> {
            panic!("corrupt response");
        }

        async fn interrupt_commands(&self, _: &str) -> Result<Vec<RemoteCommand>, ClientError> {
            Ok(Vec::new())
        }

        async fn claim_command(&self, id: &CommandId) -> Result<RemoteCommand, ClientError> {
            Err(ClientError::NotFound(id.to_string()))
        }

        async fn complete_command(
            &self,
            id: &CommandId,
            _: CompletionStatus,
            _: Option<String>,
        ) -> Result<RemoteCommand, ClientError> {
            Err(ClientError::NotFound(id.to_string()))
        }
    }

    fn invocation(session: &str) -> HookInvocation {
        HookInvocation {
            agent_id: "a1".to_string(),
            session_id: session.to_string(),
            data: EventData::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_is_applied_and_completed() {
        let local = LocalBroker::new();
        let command = local
            .broker
            .create(CreateCommandRequest::new(
                "a1",
                "s1",
                CommandType::Deny,
                CommandPayload::reason("no"),
            ))
            .unwrap();
        assert_eq!(command.status, CommandStatus::Pending);

        let runner = HookRunner::new(local.clone(), HookSettings::default());
        let response = runner.run(HookType::PreToolUse, invocation("s1")).await;

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({ "approved": false, "reason": "no" })
        );
        let done = local.broker.get(&command.id).unwrap();
        assert_eq!(done.status, CommandStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("Executed by hook"));
        assert_eq!(local.events.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_precedes_ordinary_commands() {
        let local = LocalBroker::new();
        let approve = local
            .broker
            .create(CreateCommandRequest::approve("a1", "s1", None))
            .unwrap();
        let interrupt = local
            .broker
            .create(CreateCommandRequest::interrupt("a1", "", None))
            .unwrap();

        let runner = HookRunner::new(local.clone(), HookSettings::default());
        let response = runner.run(HookType::PreToolUse, invocation("s1")).await;

        assert!(!response.approved);
        assert_eq!(response.reason.as_deref(), Some("Interrupted from dashboard"));
        let done = local.broker.get(&interrupt.id).unwrap();
        assert_eq!(done.status, CommandStatus::Completed);
        assert_eq!(done.result.as_deref(), Some(INTERRUPTED_EXECUTION));
        assert_eq!(local.broker.get(&approve.id).unwrap().status, CommandStatus::Pending);
        // The priority path returns before the event is emitted.
        assert!(local.events.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_for_another_session_still_applies() {
        let local = LocalBroker::new();
        let interrupt = local
            .broker
            .create(CreateCommandRequest::interrupt("a1", "s2", None))
            .unwrap();

        let runner = HookRunner::new(local.clone(), HookSettings::default());
        let started = Instant::now();
        let response = runner.run(HookType::PreToolUse, invocation("s1")).await;

        assert!(!response.approved);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            local.broker.get(&interrupt.id).unwrap().status,
            CommandStatus::Completed
        );
    }

    /// Payload reader whose writer stays open, so it never reaches EOF
    fn stalled_payload() -> (
        tokio::io::DuplexStream,
        impl Future<Output = std::io::Result<String>>,
    ) {
        use tokio::io::AsyncReadExt;
        let (writer, mut reader) = tokio::io::duplex(64);
        let payload = async move {
            let mut raw = String::new();
            reader.read_to_string(&mut raw).await.map(|_| raw)
        };
        (writer, payload)
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_is_checked_before_payload_is_read() {
        use tokio::io::AsyncWriteExt;
        let local = LocalBroker::new();
        local
            .broker
            .create(CreateCommandRequest::interrupt("a1", "", None))
            .unwrap();
        let (mut writer, payload) = stalled_payload();
        writer.write_all(b"{\"session_id\":").await.unwrap();

        let runner = HookRunner::new(local.clone(), HookSettings::default());
        let started = Instant::now();
        let response = runner
            .run_with_payload(HookType::PreToolUse, "a1", payload, |_| invocation("s1"))
            .await;

        assert!(!response.approved);
        assert_eq!(response.reason.as_deref(), Some("Interrupted from dashboard"));
        assert!(started.elapsed() < HookSettings::default().event_timeout);
        drop(writer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_payload_falls_back_to_empty_input() {
        let local = LocalBroker::new();
        let (writer, payload) = stalled_payload();
        let settings = HookSettings::default();
        let limit = settings.event_timeout;

        let runner = HookRunner::new(local.clone(), settings);
        let started = Instant::now();
        let response = runner
            .run_with_payload(HookType::PostToolUse, "a1", payload, |input| {
                assert_eq!(input, HookInput::default());
                invocation("s1")
            })
            .await;

        assert_eq!(response, HookResponse::allow());
        assert!(started.elapsed() >= limit);
        assert!(started.elapsed() < limit + Duration::from_secs(1));
        assert_eq!(local.events.lock()[0].session_id, "s1");
        drop(writer);
    }

    #[tokio::test]
    async fn test_payload_is_parsed_when_it_arrives() {
        let input = read_payload(
            async { Ok(r#"{"session_id":"s9","tool_name":"Bash"}"#.to_string()) },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(input.session_id().as_deref(), Some("s9"));

        let broken = read_payload(
            async { Err(std::io::Error::other("closed")) },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(broken, HookInput::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_point_leaves_tool_commands_pending() {
        let local = LocalBroker::new();
        let approve = local
            .broker
            .create(CreateCommandRequest::approve("a1", "", None))
            .unwrap();
        local
            .broker
            .create(CreateCommandRequest::continue_session("a1", "", Some("keep going".into())))
            .unwrap();

        let runner = HookRunner::new(local.clone(), HookSettings::default());
        let response = runner.run(HookType::Stop, invocation("s1")).await;

        assert!(!response.approved);
        assert_eq!(response.feedback.as_deref(), Some("keep going"));
        assert_eq!(local.broker.get(&approve.id).unwrap().status, CommandStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_session_is_ignored_until_window_closes() {
        let local = LocalBroker::new();
        let other = local
            .broker
            .create(CreateCommandRequest::stop_session("a1", "s2", None))
            .unwrap();

        let runner = HookRunner::new(local.clone(), HookSettings::default());
        let started = Instant::now();
        let response = runner.run(HookType::Stop, invocation("s1")).await;

        assert_eq!(response, default_decision(HookType::Stop));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(local.broker.get(&other.id).unwrap().status, CommandStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_arriving_mid_window() {
        let local = LocalBroker::new();
        let late = local.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            late.broker
                .create(CreateCommandRequest::approve("a1", "", Some("go ahead".into())))
                .unwrap();
        });

        let runner = HookRunner::new(local.clone(), HookSettings::default());
        let started = Instant::now();
        let response = runner.run(HookType::PreToolUse, invocation("s1")).await;

        assert_eq!(response, HookResponse::proceed("go ahead"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_broker_is_bounded() {
        let settings = HookSettings::default();
        let bound = settings.pre_tool_use_max_wait + settings.command_timeout;
        let runner = HookRunner::new(Unreachable, settings);

        let started = Instant::now();
        let response = runner.run(HookType::PreToolUse, invocation("s1")).await;

        assert_eq!(response, default_decision(HookType::PreToolUse));
        assert!(started.elapsed() <= bound, "took {:?}", started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_use_does_not_poll() {
        let local = LocalBroker::new();
        local
            .broker
            .create(CreateCommandRequest::deny("a1", "", None, None))
            .unwrap();
        let runner = HookRunner::new(local.clone(), HookSettings::default());

        let response = runner.run(HookType::PostToolUse, invocation("s1")).await;
        assert_eq!(response, HookResponse::allow());
        assert_eq!(local.events.lock()[0].hook_type, HookType::PostToolUse);
        assert_eq!(local.broker.list_pending("a1").len(), 1);
    }

    #[tokio::test]
    async fn test_panic_degrades_to_default() {
        let runner = HookRunner::new(Exploding, HookSettings::default());
        let response = runner.run(HookType::Stop, invocation("s1")).await;
        assert_eq!(response, default_decision(HookType::Stop));
    }
}
