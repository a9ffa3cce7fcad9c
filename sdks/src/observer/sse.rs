// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server-sent events decoding for the push stream
//!
//! Chunks from the network are not aligned to event boundaries, so the
//! decoder buffers until it sees a blank line and only then emits the
//! joined `data:` payload. Comment lines (`: keepalive`) are dropped.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::warn;

use afk_core::domain::events::StreamFrame;

use crate::client::ClientError;

pub type FrameStream = BoxStream<'static, Result<StreamFrame, ClientError>>;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the payload of every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }
        events
    }
}

/// Turn a byte stream into decoded frames. Payloads that are not frames are
/// logged and skipped; transport errors are passed through.
pub fn frame_stream(bytes: BoxStream<'static, Result<Bytes, ClientError>>) -> FrameStream {
    bytes
        .scan(SseDecoder::new(), |decoder, chunk| {
            let items: Vec<Result<StreamFrame, ClientError>> = match chunk {
                Ok(chunk) => decoder
                    .push(&chunk)
                    .into_iter()
                    .filter_map(|payload| match serde_json::from_str::<StreamFrame>(&payload) {
                        Ok(frame) => Some(Ok(frame.with_agent_from_data())),
                        Err(err) => {
                            warn!(error = %err, "Skipping undecodable stream frame");
                            None
                        }
                    })
                    .collect(),
                Err(err) => vec![Err(err)],
            };
            futures::future::ready(Some(stream::iter(items)))
        })
        .flatten()
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"type\":").is_empty());
        assert!(decoder.push(b"\"connected\"}\n").is_empty());
        let events = decoder.push(b"\ndata: second\n\n");
        assert_eq!(events, vec!["{\"type\":\"connected\"}", "second"]);
    }

    #[test]
    fn test_comments_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\r\n\r\nevent: message\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(events, vec!["a\nb"]);
    }

    #[tokio::test]
    async fn test_frame_stream_skips_garbage() {
        let chunks: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"data: not json\n\n")),
            Ok(Bytes::from_static(
                b"data: {\"type\":\"error\",\"data\":{\"message\":\"x\"},\"timestamp\":\"2026-01-01T00:00:00Z\"}\n\n",
            )),
            Err(ClientError::NetworkFailure("reset".into())),
        ];
        let frames: Vec<_> = frame_stream(stream::iter(chunks).boxed()).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(frames[1].is_err());
    }
}
