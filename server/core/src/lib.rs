// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AFK core
//!
//! Server side of the remote command and event coordination protocol.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Command broker, event hub, presence and the HTTP surface

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
