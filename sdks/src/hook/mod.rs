// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent side of the protocol: what a hook does at each lifecycle point.

pub mod decision;
pub mod input;
pub mod runner;

pub use decision::{decide, default_decision, interrupt_decision};
pub use input::HookInput;
pub use runner::{read_payload, HookInvocation, HookRunner, HookSettings};
