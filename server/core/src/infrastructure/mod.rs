// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_registry;
pub mod event_hub;

pub use agent_registry::AgentRegistry;
pub use event_hub::{EventHub, HubSettings, SendResult, SubscriberId, Subscription};
