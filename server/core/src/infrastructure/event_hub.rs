// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Hub Implementation - Fan-out of stream frames to observers
//
// Each observer owns a bounded mpsc channel. `publish` appends the frame to a
// bounded history ring and writes it to every matching observer while holding
// the hub lock, so observers receive publishes in invocation order. A full or
// closed channel means the observer is gone: it is removed and the broadcast
// carries on with the rest.
//
// In-memory only: history and subscribers are lost on restart.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::clock::SharedClock;
use crate::domain::command::generate_id;
use crate::domain::config::ServerConfig;
use crate::domain::events::StreamFrame;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new() -> Self {
        Self(generate_id("client"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capacities and timeouts for the hub
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub history_capacity: usize,
    pub replay_count: usize,
    pub subscriber_buffer: usize,
    pub idle_timeout: chrono::Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for HubSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            history_capacity: config.history_capacity,
            replay_count: config.replay_count,
            subscriber_buffer: config.subscriber_buffer,
            idle_timeout: config.subscriber_idle(),
        }
    }
}

/// Outcome of writing one frame to one observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Delivered,
    Disconnected,
}

struct Subscriber {
    sink: mpsc::Sender<StreamFrame>,
    filter: Option<String>,
    token: Option<String>,
    last_activity: DateTime<Utc>,
}

/// Read-only view of one registered observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub filter: Option<String>,
    /// Bearer token presented when the stream was opened
    pub token: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl Subscriber {
    fn send(&mut self, frame: &StreamFrame, now: DateTime<Utc>) -> SendResult {
        match self.sink.try_send(frame.clone()) {
            Ok(()) => {
                self.last_activity = now;
                SendResult::Delivered
            }
            Err(_) => SendResult::Disconnected,
        }
    }
}

/// Receiving half handed to the transport that streams frames to one observer
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<StreamFrame>,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<SubscriberId, Subscriber>,
    history: VecDeque<StreamFrame>,
}

pub struct EventHub {
    state: Mutex<HubState>,
    clock: SharedClock,
    settings: HubSettings,
}

impl EventHub {
    pub fn new(settings: HubSettings, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            clock,
            settings,
        }
    }

    /// Register an observer. The channel starts with a `connected` greeting
    /// followed by the most recent history frames that match `filter`.
    pub fn subscribe(&self, filter: Option<String>, token: Option<String>) -> Subscription {
        let filter = filter.filter(|f| !f.is_empty());
        let capacity = self
            .settings
            .subscriber_buffer
            .max(self.settings.replay_count + 1);
        let (sink, receiver) = mpsc::channel(capacity);
        let now = self.clock.now();
        let id = SubscriberId::new();

        let mut state = self.state.lock();

        // Fits: capacity covers greeting plus full replay
        let _ = sink.try_send(StreamFrame::connected(now));
        let replay: Vec<&StreamFrame> = state
            .history
            .iter()
            .rev()
            .filter(|frame| frame.matches_filter(filter.as_deref()))
            .take(self.settings.replay_count)
            .collect();
        let replayed = replay.len();
        for frame in replay.into_iter().rev() {
            let _ = sink.try_send(frame.clone());
        }

        info!(
            subscriber_id = %id,
            filter = filter.as_deref().unwrap_or("all"),
            replayed,
            "Observer subscribed"
        );

        state.subscribers.insert(
            id.clone(),
            Subscriber {
                sink,
                filter,
                token,
                last_activity: now,
            },
        );
        metrics::gauge!("afk_hub_subscribers").set(state.subscribers.len() as f64);

        Subscription { id, receiver }
    }

    /// Record the frame in history and write it to every matching observer.
    /// Returns how many observers received it.
    pub fn publish(&self, frame: StreamFrame) -> usize {
        let mut state = self.state.lock();
        state.history.push_back(frame.clone());
        while state.history.len() > self.settings.history_capacity {
            state.history.pop_front();
        }
        self.broadcast(&mut state, &frame)
    }

    /// Broadcast an `error` frame to all observers without recording it in history
    pub fn publish_error(&self, message: &str) -> usize {
        let frame = StreamFrame::error(message, self.clock.now());
        let mut state = self.state.lock();
        self.broadcast(&mut state, &frame)
    }

    fn broadcast(&self, state: &mut HubState, frame: &StreamFrame) -> usize {
        metrics::counter!("afk_hub_frames_published_total").increment(1);
        let now = self.clock.now();
        let mut delivered = 0;
        let mut disconnected = Vec::new();

        for (id, subscriber) in state.subscribers.iter_mut() {
            if !frame.matches_filter(subscriber.filter.as_deref()) {
                continue;
            }
            match subscriber.send(frame, now) {
                SendResult::Delivered => delivered += 1,
                SendResult::Disconnected => disconnected.push(id.clone()),
            }
        }

        for id in disconnected {
            warn!(subscriber_id = %id, "Observer stopped receiving, removing");
            state.subscribers.remove(&id);
            metrics::counter!("afk_hub_subscribers_dropped_total").increment(1);
        }
        metrics::gauge!("afk_hub_subscribers").set(state.subscribers.len() as f64);

        if delivered == 0 {
            debug!(kind = ?frame.kind, "No observers received frame");
        }
        delivered
    }

    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let mut state = self.state.lock();
        let removed = state.subscribers.remove(id).is_some();
        if removed {
            info!(subscriber_id = %id, "Observer unsubscribed");
            metrics::gauge!("afk_hub_subscribers").set(state.subscribers.len() as f64);
        }
        removed
    }

    /// Mark an observer as active without sending it anything
    pub fn touch(&self, id: &SubscriberId) {
        let now = self.clock.now();
        if let Some(subscriber) = self.state.lock().subscribers.get_mut(id) {
            subscriber.last_activity = now;
        }
    }

    /// Drop observers with no activity inside the idle timeout, and any whose
    /// receiver is already gone. Returns the number removed.
    pub fn sweep_idle(&self) -> usize {
        let cutoff = self.clock.now() - self.settings.idle_timeout;
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|id, subscriber| {
            let keep = subscriber.last_activity > cutoff && !subscriber.sink.is_closed();
            if !keep {
                info!(subscriber_id = %id, "Removing idle observer");
            }
            keep
        });
        let removed = before - state.subscribers.len();
        if removed > 0 {
            metrics::counter!("afk_hub_subscribers_dropped_total").increment(removed as u64);
            metrics::gauge!("afk_hub_subscribers").set(state.subscribers.len() as f64);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Registered observers, least recently active first
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        let mut all: Vec<SubscriberInfo> = self
            .state
            .lock()
            .subscribers
            .iter()
            .map(|(id, subscriber)| SubscriberInfo {
                id: id.clone(),
                filter: subscriber.filter.clone(),
                token: subscriber.token.clone(),
                last_activity: subscriber.last_activity,
            })
            .collect();
        all.sort_by(|a, b| a.last_activity.cmp(&b.last_activity));
        all
    }

    /// Snapshot of the history ring, oldest first
    pub fn history(&self) -> Vec<StreamFrame> {
        self.state.lock().history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::events::{EventData, FrameKind, HookType, LifecycleEvent};
    use std::sync::Arc;

    fn hub_with(settings: HubSettings) -> (EventHub, ManualClock) {
        let clock = ManualClock::default();
        (EventHub::new(settings, Arc::new(clock.clone())), clock)
    }

    fn event_frame(agent: &str, message: &str) -> StreamFrame {
        let data = EventData {
            message: Some(message.to_string()),
            ..EventData::default()
        };
        let event = LifecycleEvent::new(agent, "s1", HookType::Notification, data);
        StreamFrame::hook_event(&event, Utc::now())
    }

    fn drain(subscription: &mut Subscription) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = subscription.receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn messages(frames: &[StreamFrame]) -> Vec<String> {
        frames
            .iter()
            .filter(|f| f.kind == FrameKind::HookEvent)
            .map(|f| f.data["data"]["message"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_subscribe_starts_with_greeting() {
        let (hub, _) = hub_with(HubSettings::default());
        let mut sub = hub.subscribe(None, None);
        let frames = drain(&mut sub);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::Connected);
        assert!(sub.id.as_str().starts_with("client-"));
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_publish_order_and_filtering() {
        let (hub, _) = hub_with(HubSettings::default());
        let mut all = hub.subscribe(None, None);
        let mut only_a1 = hub.subscribe(Some("a1".to_string()), None);
        drain(&mut all);
        drain(&mut only_a1);

        for (agent, msg) in [("a1", "1"), ("a2", "2"), ("a1", "3"), ("a2", "4"), ("a1", "5")] {
            hub.publish(event_frame(agent, msg));
        }

        assert_eq!(messages(&drain(&mut all)), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(messages(&drain(&mut only_a1)), vec!["1", "3", "5"]);
    }

    #[test]
    fn test_replay_is_filtered_and_bounded() {
        let settings = HubSettings {
            replay_count: 3,
            ..HubSettings::default()
        };
        let (hub, _) = hub_with(settings);
        for i in 0..6 {
            let agent = if i % 2 == 0 { "a1" } else { "a2" };
            hub.publish(event_frame(agent, &i.to_string()));
        }

        let mut all = hub.subscribe(None, None);
        let frames = drain(&mut all);
        assert_eq!(frames[0].kind, FrameKind::Connected);
        assert_eq!(messages(&frames), vec!["3", "4", "5"]);

        let mut a1 = hub.subscribe(Some("a1".to_string()), None);
        assert_eq!(messages(&drain(&mut a1)), vec!["0", "2", "4"]);
    }

    #[test]
    fn test_history_ring_drops_oldest() {
        let settings = HubSettings {
            history_capacity: 3,
            replay_count: 3,
            ..HubSettings::default()
        };
        let (hub, _) = hub_with(settings);
        for i in 0..5 {
            hub.publish(event_frame("a1", &i.to_string()));
        }
        assert_eq!(messages(&hub.history()), vec!["2", "3", "4"]);
    }

    #[test]
    fn test_vanished_observer_does_not_break_broadcast() {
        let (hub, _) = hub_with(HubSettings::default());
        let gone = hub.subscribe(None, None);
        let mut alive = hub.subscribe(None, None);
        drain(&mut alive);
        drop(gone.receiver);

        let delivered = hub.publish(event_frame("a1", "after"));
        assert_eq!(delivered, 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(messages(&drain(&mut alive)), vec!["after"]);
    }

    #[test]
    fn test_full_buffer_counts_as_disconnect() {
        let settings = HubSettings {
            subscriber_buffer: 2,
            replay_count: 1,
            ..HubSettings::default()
        };
        let (hub, _) = hub_with(settings);
        let _slow = hub.subscribe(None, None);
        hub.publish(event_frame("a1", "1"));
        assert_eq!(hub.subscriber_count(), 1);
        hub.publish(event_frame("a1", "2"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_error_frames_skip_history() {
        let (hub, _) = hub_with(HubSettings::default());
        let mut sub = hub.subscribe(Some("a1".to_string()), None);
        drain(&mut sub);

        assert_eq!(hub.publish_error("storage unavailable"), 1);
        let frames = drain(&mut sub);
        assert_eq!(frames[0].kind, FrameKind::Error);
        assert!(hub.history().is_empty());
    }

    #[test]
    fn test_subscriber_snapshot_keeps_filter_and_token() {
        let (hub, clock) = hub_with(HubSettings::default());
        let dashboard = hub.subscribe(Some("a1".to_string()), Some("secret".to_string()));
        clock.advance(chrono::Duration::seconds(5));
        let anonymous = hub.subscribe(Some(String::new()), None);

        let subscribers = hub.subscribers();
        assert_eq!(subscribers.len(), 2);
        assert_eq!(subscribers[0].id, dashboard.id);
        assert_eq!(subscribers[0].filter.as_deref(), Some("a1"));
        assert_eq!(subscribers[0].token.as_deref(), Some("secret"));
        assert_eq!(subscribers[1].id, anonymous.id);
        assert_eq!(subscribers[1].filter, None);
        assert_eq!(subscribers[1].token, None);
    }

    #[test]
    fn test_idle_sweep() {
        let (hub, clock) = hub_with(HubSettings::default());
        let idle = hub.subscribe(None, None);
        let active = hub.subscribe(Some("a1".to_string()), None);

        clock.advance(chrono::Duration::minutes(9));
        hub.touch(&active.id);
        clock.advance(chrono::Duration::minutes(2));

        assert_eq!(hub.sweep_idle(), 1);
        assert!(!hub.unsubscribe(&idle.id));
        assert!(hub.unsubscribe(&active.id));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
