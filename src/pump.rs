//! SSE stream pump.
//!
//! Reads an upstream byte stream, frames it into SSE `data:` payload lines,
//! hands each payload to a per-provider [`ChunkDecoder`], and forwards the
//! decoded canonical events downstream. Decoders own the `message_start` /
//! `message_stop` framing through their lazy-start and `finish` paths, which
//! the pump invokes on every normal end of stream. On an upstream read error
//! or a decoder failure the pump yields an `io::Error` and returns without
//! `finish()`, so the client observes a truncated stream with no
//! `message_stop`.

use crate::logging::SharedLogger;
use crate::translate::claude_types::StreamEvent;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

/// One SSE frame ready for the wire.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn from_event(event: &StreamEvent) -> Option<Self> {
        let data = serde_json::to_string(event).ok()?;
        Some(Self {
            event: event.event_name().to_string(),
            data,
        })
    }

    /// Wire form: `event: <name>\ndata: <json>\n\n`.
    pub fn to_wire(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.event, self.data))
    }
}

/// Stream of SSE frames for a streaming response.
pub type SseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<SseFrame, std::io::Error>> + Send>>;

/// Per-provider stream decoder.
///
/// `decode` receives one SSE payload (the text after `data:`, or a bare line
/// when the upstream does not use `data:` framing) and returns the canonical
/// events it produces. Payloads that are not parseable JSON chunks should be
/// skipped by returning an empty vec; an `Err` aborts the stream. `finish`
/// flushes the terminal frames and is called exactly once on normal EOF.
pub trait ChunkDecoder: Send {
    fn decode(&mut self, data: &str) -> crate::Result<Vec<StreamEvent>>;
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Pump an upstream SSE byte stream through a decoder into canonical frames.
pub fn pump_sse<S, E>(
    byte_stream: S,
    mut decoder: Box<dyn ChunkDecoder>,
    logger: SharedLogger,
) -> SseStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    logger.error("pump", format!("upstream read error: {e}"));
                    yield Err(std::io::Error::other(format!("upstream read error: {e}")));
                    return;
                }
            };

            buffer.extend_from_slice(&chunk);

            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                let line = String::from_utf8_lossy(&line);

                match decode_line(line.trim(), decoder.as_mut()) {
                    Ok(events) => {
                        for frame in events.iter().filter_map(SseFrame::from_event) {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        logger.error("pump", format!("decoder error: {e}"));
                        yield Err(std::io::Error::other(format!("decoder error: {e}")));
                        return;
                    }
                }
            }
        }

        // Drain whatever is left in the carry buffer through one final decode.
        let tail = String::from_utf8_lossy(&buffer).trim().to_string();
        if !tail.is_empty() {
            match decode_line(&tail, decoder.as_mut()) {
                Ok(events) => {
                    for frame in events.iter().filter_map(SseFrame::from_event) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    logger.error("pump", format!("decoder error on tail: {e}"));
                    yield Err(std::io::Error::other(format!("decoder error: {e}")));
                    return;
                }
            }
        }

        for frame in decoder.finish().iter().filter_map(SseFrame::from_event) {
            yield Ok(frame);
        }

        logger.debug("pump", "stream completed");
    };

    Box::pin(stream)
}

fn decode_line(line: &str, decoder: &mut dyn ChunkDecoder) -> crate::Result<Vec<StreamEvent>> {
    if line.is_empty() {
        return Ok(Vec::new());
    }

    // `data:` lines carry the payload; anything else is tried as bare JSON,
    // which lets the pump cope with upstreams that skip SSE framing.
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => line,
    };

    if payload.is_empty() || payload == "[DONE]" {
        return Ok(Vec::new());
    }

    decoder.decode(payload)
}
