// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod command_broker;
pub mod hook_ingest;
pub mod maintenance;

pub use command_broker::{BrokerSettings, CommandBroker, SweepReport};
pub use hook_ingest::HookIngestService;
pub use maintenance::{MaintenanceReport, MaintenanceScheduler};
