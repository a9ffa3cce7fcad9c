// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Periodic maintenance: command expiry and retention, idle observers, idle agents.
//!
//! Sweeps read time from the injected clock, so tests call [`MaintenanceScheduler::run_once`]
//! after moving a [`crate::domain::clock::ManualClock`] instead of waiting on timers.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::command_broker::{CommandBroker, SweepReport};
use crate::infrastructure::agent_registry::AgentRegistry;
use crate::infrastructure::event_hub::EventHub;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub commands: SweepReport,
    pub observers_dropped: usize,
    pub agents_idled: usize,
}

pub struct MaintenanceScheduler {
    broker: Arc<CommandBroker>,
    hub: Arc<EventHub>,
    registry: Arc<AgentRegistry>,
    interval: Duration,
}

impl MaintenanceScheduler {
    pub fn new(
        broker: Arc<CommandBroker>,
        hub: Arc<EventHub>,
        registry: Arc<AgentRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            broker,
            hub,
            registry,
            interval,
        }
    }

    pub fn run_once(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            commands: self.broker.sweep(),
            observers_dropped: self.hub.sweep_idle(),
            agents_idled: self.registry.sweep_idle(),
        };
        debug!(?report, "Maintenance pass");
        report
    }

    /// Run sweeps on a fixed cadence until `shutdown` is cancelled
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            info!(interval_ms = self.interval.as_millis() as u64, "Maintenance scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Maintenance scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once();
                    }
                }
            }
        })
    }
}
