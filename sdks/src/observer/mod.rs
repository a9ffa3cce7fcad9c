// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dashboard side of the protocol: push-stream decoding, reconnection and
//! the offline command queue.

pub mod backoff;
pub mod connection;
pub mod queue;
pub mod sse;

pub use backoff::{Backoff, ReconnectPolicy};
pub use connection::{
    ConnectionManager, ConnectionSettings, ConnectionStatus, ListenerId, SendOutcome,
};
pub use queue::{FlushReport, OfflineCommandQueue, QueuedCommand};
pub use sse::{frame_stream, FrameStream, SseDecoder};
