// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`afk-core`)
//!
//! HTTP surface that translates external requests into broker, hub and
//! ingest calls. No coordination logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP/SSE (Axum) | Hook ingest, command endpoints, observer event stream |

pub mod api;

pub use api::{app, AppState};
