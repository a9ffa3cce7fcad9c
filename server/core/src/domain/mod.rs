// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model
//!
//! Wire-level types shared by the server, the hook client and observers.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Commands, lifecycle events, presence, configuration and time

pub mod agent;
pub mod clock;
pub mod command;
pub mod config;
pub mod events;

pub use agent::{AgentPresence, AgentStatus};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use command::{
    BrokerError, CommandId, CommandPayload, CommandStatus, CommandType, CompleteCommandRequest,
    CompletionStatus, CreateCommandRequest, RemoteCommand,
};
pub use config::AfkConfigManifest;
pub use events::{EventData, FrameKind, HookResponse, HookType, LifecycleEvent, StreamFrame};
