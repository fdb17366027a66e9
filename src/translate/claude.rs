//! Claude upstream adapter.
//!
//! Claude-native upstreams already speak the canonical protocol, so both
//! directions are passthrough: the request is re-targeted with the channel's
//! key, and response bytes are forwarded unmodified. A projection decoder
//! still walks the streamed events so the request log can record what flowed
//! through (text volume, tool calls), without touching the bytes.

use std::collections::HashMap;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;

use crate::logging::SharedLogger;

/// Per-stream accumulation of one streamed tool call, keyed by block index.
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Projection over a Claude SSE stream: recognizes text deltas, tool-use block
/// starts, and input_json deltas. Purely observational.
#[derive(Debug, Default)]
pub struct ClaudeStreamObserver {
    text_chars: usize,
    tool_calls: HashMap<usize, ToolCallAccumulator>,
}

impl ClaudeStreamObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one SSE payload line (the part after `data:`).
    pub fn observe(&mut self, payload: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return;
        };

        match value.get("type").and_then(|t| t.as_str()) {
            Some("content_block_start") => {
                let index = value.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                let block = &value["content_block"];
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    self.tool_calls.insert(
                        index,
                        ToolCallAccumulator {
                            id: block
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            arguments: String::new(),
                        },
                    );
                }
            }
            Some("content_block_delta") => {
                let index = value.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                let delta = &value["delta"];
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        self.text_chars += delta
                            .get("text")
                            .and_then(|t| t.as_str())
                            .map_or(0, str::len);
                    }
                    Some("input_json_delta") => {
                        if let Some(fragment) = delta.get("partial_json").and_then(|p| p.as_str()) {
                            self.tool_calls.entry(index).or_default().arguments
                                .push_str(fragment);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    pub fn text_chars(&self) -> usize {
        self.text_chars
    }

    pub fn tool_calls(&self) -> &HashMap<usize, ToolCallAccumulator> {
        &self.tool_calls
    }

    fn summary(&self) -> String {
        let mut names: Vec<&str> = self
            .tool_calls
            .values()
            .map(|t| t.name.as_str())
            .collect();
        names.sort_unstable();
        format!(
            "passthrough stream done: text_chars={} tool_calls=[{}]",
            self.text_chars,
            names.join(",")
        )
    }
}

/// Forward a Claude SSE byte stream unmodified while observing its events.
///
/// Output bytes are the input bytes. A read error surfaces as an `io::Error`
/// so the client sees a truncated transfer.
pub fn passthrough_stream<S, E>(
    byte_stream: S,
    logger: SharedLogger,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut observer = ClaudeStreamObserver::new();
        let mut buffer: Vec<u8> = Vec::new();

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim();
                        if let Some(payload) = line.strip_prefix("data:") {
                            observer.observe(payload.trim());
                        }
                    }
                    yield Ok(chunk);
                }
                Err(e) => {
                    logger.error("claude", format!("passthrough read error: {e}"));
                    yield Err(std::io::Error::other(format!("upstream read error: {e}")));
                    return;
                }
            }
        }

        logger.debug("claude", observer.summary());
    }
}
