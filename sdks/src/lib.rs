// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! AFK Rust SDK
//!
//! Client side of the AFK protocol: the hook decision client that runs at
//! an agent's lifecycle points, and the observer connection manager that
//! keeps a dashboard attached to the event stream.

pub mod client;
pub mod context;
pub mod hook;
pub mod observer;

pub use client::{AfkClient, BrokerApi, ClientError, ObserverTransport};
pub use context::AgentContext;
pub use hook::{HookInput, HookInvocation, HookRunner, HookSettings};
pub use observer::{ConnectionManager, ConnectionSettings, ConnectionStatus, SendOutcome};
