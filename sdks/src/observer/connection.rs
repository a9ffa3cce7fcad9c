// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Observer connection manager
//!
//! Keeps the push stream open across network failures:
//!
//! ```text
//! disconnected ─connect─► connecting ─► connected
//!      ▲                      ▲            │ stream error / end
//!      │                      │            ▼
//!      └── attempts spent ── reconnecting ◄── disconnected
//! ```
//!
//! Listeners are invoked synchronously on every status change, outside the
//! state lock. Entering `connected` starts a flush of the offline queue on a
//! separate task so incoming frames keep flowing while commands are resent.

use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use afk_core::domain::command::{CreateCommandRequest, RemoteCommand};
use afk_core::domain::config::ObserverConfig;
use afk_core::domain::events::StreamFrame;

use crate::client::ObserverTransport;
use crate::observer::backoff::{Backoff, ReconnectPolicy};
use crate::observer::queue::{FlushReport, OfflineCommandQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Result of issuing a command through the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(RemoteCommand),
    /// Held in the offline queue under this id
    Queued(String),
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub agent_filter: Option<String>,
    pub policy: ReconnectPolicy,
    pub max_command_retries: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ObserverConfig::default())
    }
}

impl From<&ObserverConfig> for ConnectionSettings {
    fn from(config: &ObserverConfig) -> Self {
        Self {
            agent_filter: config.agent_filter.clone(),
            policy: ReconnectPolicy::from(config),
            max_command_retries: config.max_command_retries,
        }
    }
}

type StatusListener = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;
type FrameListener = Arc<dyn Fn(&StreamFrame) + Send + Sync>;

struct State {
    status: ConnectionStatus,
    status_listeners: Vec<(ListenerId, StatusListener)>,
    frame_listeners: Vec<(ListenerId, FrameListener)>,
    next_listener: u64,
    run: Option<CancellationToken>,
}

struct Inner {
    transport: Arc<dyn ObserverTransport>,
    settings: ConnectionSettings,
    queue: OfflineCommandQueue,
    state: Mutex<State>,
    flushing: AtomicBool,
}

pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn ObserverTransport>, settings: ConnectionSettings) -> Self {
        let queue = OfflineCommandQueue::new(settings.max_command_retries);
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                queue,
                state: Mutex::new(State {
                    status: ConnectionStatus::Disconnected,
                    status_listeners: Vec::new(),
                    frame_listeners: Vec::new(),
                    next_listener: 0,
                    run: None,
                }),
                flushing: AtomicBool::new(false),
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn queue(&self) -> &OfflineCommandQueue {
        &self.inner.queue
    }

    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = next_listener_id(&mut state);
        state.status_listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn on_frame<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StreamFrame) + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = next_listener_id(&mut state);
        state.frame_listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.status_listeners.len() + state.frame_listeners.len();
        state.status_listeners.retain(|(lid, _)| *lid != id);
        state.frame_listeners.retain(|(lid, _)| *lid != id);
        before != state.status_listeners.len() + state.frame_listeners.len()
    }

    /// Start the connection loop. Does nothing if a loop is already running.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Option<JoinHandle<()>> {
        let token = {
            let mut state = self.inner.state.lock();
            if state.run.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return None;
            }
            let token = CancellationToken::new();
            state.run = Some(token.clone());
            token
        };
        info!(filter = ?self.inner.settings.agent_filter, "Starting observer connection");
        Some(tokio::spawn(run_loop(self.inner.clone(), token)))
    }

    /// Stop the connection loop and settle in `disconnected`.
    pub fn disconnect(&self) {
        let notify = {
            let mut state = self.inner.state.lock();
            if let Some(token) = state.run.take() {
                token.cancel();
            }
            apply_status(&mut state, ConnectionStatus::Disconnected)
        };
        if let Some((status, listeners)) = notify {
            notify_status(status, &listeners);
        }
    }

    /// Manual reconnect, also used after the attempt budget is spent.
    pub fn reconnect(&self) -> Option<JoinHandle<()>> {
        self.disconnect();
        self.connect()
    }

    /// Issue a command. While offline, or when the immediate send fails, the
    /// command goes to the offline queue instead of surfacing an error.
    pub async fn send_command(&self, request: CreateCommandRequest) -> SendOutcome {
        if self.status() != ConnectionStatus::Connected {
            return SendOutcome::Queued(self.inner.queue.enqueue(request));
        }
        match self.inner.transport.send_command(&request).await {
            Ok(command) => SendOutcome::Sent(command),
            Err(err) => {
                warn!(error = %err, agent_id = %request.agent_id, "Command send failed, queueing");
                SendOutcome::Queued(self.inner.queue.enqueue(request))
            }
        }
    }

    /// Flush the offline queue now. Returns `None` if a flush is already running.
    pub async fn flush_queue(&self) -> Option<FlushReport> {
        self.inner.flush_guarded().await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(token) = self.inner.state.lock().run.take() {
            token.cancel();
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

fn next_listener_id(state: &mut State) -> ListenerId {
    state.next_listener += 1;
    ListenerId(state.next_listener)
}

/// Set the status under the lock, returning what to notify once the lock is released.
fn apply_status(
    state: &mut State,
    status: ConnectionStatus,
) -> Option<(ConnectionStatus, Vec<StatusListener>)> {
    if state.status == status {
        return None;
    }
    state.status = status;
    let listeners = state.status_listeners.iter().map(|(_, l)| l.clone()).collect();
    Some((status, listeners))
}

fn notify_status(status: ConnectionStatus, listeners: &[StatusListener]) {
    debug!(%status, "Connection status changed");
    for listener in listeners {
        listener(status);
    }
}

impl Inner {
    /// Transition on behalf of the loop owning `token`; ignored once that loop is cancelled.
    fn transition(self: &Arc<Self>, token: &CancellationToken, status: ConnectionStatus) {
        let notify = {
            let mut state = self.state.lock();
            if token.is_cancelled() {
                return;
            }
            apply_status(&mut state, status)
        };
        if let Some((status, listeners)) = notify {
            notify_status(status, &listeners);
            if status == ConnectionStatus::Connected {
                let inner = self.clone();
                tokio::spawn(async move {
                    inner.flush_guarded().await;
                });
            }
        }
    }

    fn dispatch(&self, frame: &StreamFrame) {
        let listeners: Vec<FrameListener> = self
            .state
            .lock()
            .frame_listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(frame);
        }
    }

    async fn flush_guarded(&self) -> Option<FlushReport> {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return None;
        }
        let _guard = FlushGuard(&self.flushing);
        Some(self.queue.flush(self.transport.as_ref()).await)
    }
}

/// Clears the in-flight flag however the flush ends, unwinding included.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn run_loop(inner: Arc<Inner>, token: CancellationToken) {
    let mut backoff = Backoff::new(inner.settings.policy.clone());
    inner.transition(&token, ConnectionStatus::Connecting);

    loop {
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            opened = inner.transport.open_stream(inner.settings.agent_filter.clone()) => opened,
        };

        match opened {
            Ok(mut stream) => {
                backoff.reset();
                inner.transition(&token, ConnectionStatus::Connected);
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(frame)) => inner.dispatch(&frame),
                        Some(Err(err)) => {
                            warn!(error = %err, "Event stream failed");
                            break;
                        }
                        None => {
                            info!("Event stream closed by server");
                            break;
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "Failed to open event stream"),
        }

        inner.transition(&token, ConnectionStatus::Disconnected);
        let Some(delay) = backoff.next_delay() else {
            warn!(
                attempts = backoff.attempts(),
                "Reconnect attempts exhausted, staying disconnected"
            );
            // Retire this loop so a later connect() starts a fresh one.
            token.cancel();
            return;
        };
        inner.transition(&token, ConnectionStatus::Reconnecting);
        debug!(delay_ms = delay.as_millis() as u64, attempt = backoff.attempts(), "Reconnecting");
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        inner.transition(&token, ConnectionStatus::Connecting);
    }
}
