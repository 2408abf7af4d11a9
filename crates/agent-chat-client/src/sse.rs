//! Incremental decoder for the live event stream (server-sent events).

use agent_chat_core::{Event, EventPatch, StreamChunk};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StatusPayload {
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

/// Incremental parser for SSE byte streams.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed arbitrary bytes into the parser and drain complete chunks.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut chunks = Vec::new();

        while let Some(split) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            let frame = String::from_utf8_lossy(&frame[..split]);
            if let Some(chunk) = parse_frame(&frame) {
                chunks.push(chunk);
            }
        }

        chunks
    }

    /// Parse a complete SSE payload in one shot.
    #[must_use]
    pub fn parse_frames(input: &str) -> Vec<StreamChunk> {
        Self::default().feed(input.as_bytes())
    }

    #[must_use]
    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn parse_frame(frame: &str) -> Option<StreamChunk> {
    let mut name = "";
    let mut data_lines = Vec::new();

    for line in frame.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = value.trim();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        return (name == "done").then_some(StreamChunk::Done);
    }
    let data = data_lines.join("\n");
    if data.trim() == "[DONE]" {
        return Some(StreamChunk::Done);
    }

    let decoded = match name {
        "done" => Ok(StreamChunk::Done),
        "chunk" => serde_json::from_str::<EventPatch>(&data).map(StreamChunk::Patch),
        "status" => serde_json::from_str::<StatusPayload>(&data).map(|payload| {
            StreamChunk::Status {
                status: payload.status,
                detail: payload.detail,
            }
        }),
        "error" => serde_json::from_str::<ErrorPayload>(&data).map(|payload| StreamChunk::Error {
            message: payload
                .message
                .unwrap_or_else(|| "stream error".to_owned()),
        }),
        "" | "event" | "message" => serde_json::from_str::<Event>(&data).map(StreamChunk::Event),
        other => {
            tracing::debug!("Ignoring unknown live stream event {other:?}");
            return None;
        }
    };

    match decoded {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            tracing::warn!("Ignoring malformed {name:?} frame: {e}");
            None
        }
    }
}
