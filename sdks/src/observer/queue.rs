// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Offline command queue
//!
//! Commands the operator issues while the stream is down wait here. A flush
//! pass walks a snapshot of the queue front to back and never holds the lock
//! across a network call, so enqueues from the UI are never blocked by it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use afk_core::domain::command::{generate_id, CreateCommandRequest, RemoteCommand};

use crate::client::ObserverTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub id: String,
    pub request: CreateCommandRequest,
    pub queued_at: DateTime<Utc>,
    pub retries: u32,
}

/// Outcome of one flush pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: Vec<RemoteCommand>,
    pub retried: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct OfflineCommandQueue {
    items: Mutex<VecDeque<QueuedCommand>>,
    max_retries: u32,
}

impl OfflineCommandQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_retries,
        }
    }

    pub fn enqueue(&self, request: CreateCommandRequest) -> String {
        let id = generate_id("queued");
        debug!(queued_id = %id, agent_id = %request.agent_id, "Queued command while offline");
        self.items.lock().push_back(QueuedCommand {
            id: id.clone(),
            request,
            queued_at: Utc::now(),
            retries: 0,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueuedCommand> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Send every queued command in FIFO order. A failed send bumps the
    /// command's retry counter and drops it once the counter reaches the limit.
    pub async fn flush(&self, transport: &dyn ObserverTransport) -> FlushReport {
        let pass = self.snapshot();
        let mut report = FlushReport::default();
        if pass.is_empty() {
            return report;
        }
        info!(count = pass.len(), "Flushing offline command queue");

        for queued in pass {
            match transport.send_command(&queued.request).await {
                Ok(command) => {
                    self.remove(&queued.id);
                    debug!(queued_id = %queued.id, command_id = %command.id, "Queued command sent");
                    report.sent.push(command);
                }
                Err(err) => {
                    if self.record_failure(&queued.id) {
                        warn!(queued_id = %queued.id, error = %err, "Dropping queued command after repeated failures");
                        report.dropped += 1;
                    } else {
                        debug!(queued_id = %queued.id, error = %err, "Queued command send failed, will retry");
                        report.retried += 1;
                    }
                }
            }
        }
        report
    }

    fn remove(&self, id: &str) {
        self.items.lock().retain(|item| item.id != id);
    }

    /// Returns true when the command was dropped.
    fn record_failure(&self, id: &str) -> bool {
        let mut items = self.items.lock();
        let Some(pos) = items.iter().position(|item| item.id == id) else {
            return false;
        };
        items[pos].retries += 1;
        if items[pos].retries >= self.max_retries {
            items.remove(pos);
            return true;
        }
        false
    }
}
