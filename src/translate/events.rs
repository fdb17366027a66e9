//! Canonical Claude stream frame construction.
//!
//! All stream translators build their output from these helpers so the event
//! sequence has one shape: exactly one `message_start` first, block trios with
//! monotonic indices, a `message_delta` with usage, then one `message_stop`.

use super::claude_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};

pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}

/// The opening `message_start` frame: fresh id, assistant role, empty content.
pub fn message_start(msg_id: &str, model: &str, input_tokens: u64) -> StreamEvent {
    StreamEvent::MessageStart {
        message: MessagesResponse {
            id: msg_id.to_string(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content: Vec::new(),
            model: model.to_string(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage {
                input_tokens,
                output_tokens: 0,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        },
    }
}

pub fn text_block_start(index: usize) -> StreamEvent {
    StreamEvent::ContentBlockStart {
        index,
        content_block: ResponseContentBlock::Text {
            text: String::new(),
        },
    }
}

pub fn text_delta(index: usize, text: impl Into<String>) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: Delta::TextDelta { text: text.into() },
    }
}

pub fn tool_use_start(index: usize, id: impl Into<String>, name: impl Into<String>) -> StreamEvent {
    StreamEvent::ContentBlockStart {
        index,
        content_block: ResponseContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input: serde_json::Value::Object(serde_json::Map::new()),
        },
    }
}

pub fn input_json_delta(index: usize, partial_json: impl Into<String>) -> StreamEvent {
    StreamEvent::ContentBlockDelta {
        index,
        delta: Delta::InputJsonDelta {
            partial_json: partial_json.into(),
        },
    }
}

pub fn block_stop(index: usize) -> StreamEvent {
    StreamEvent::ContentBlockStop { index }
}

/// A whole text block as a start/delta/stop trio.
pub fn text_block(index: usize, text: impl Into<String>) -> Vec<StreamEvent> {
    vec![
        text_block_start(index),
        text_delta(index, text),
        block_stop(index),
    ]
}

/// A whole `tool_use` block as a start/delta/stop trio. The args arrive as one
/// `input_json_delta` payload. `id` is used when the upstream supplied one;
/// otherwise a fresh tool-use id is generated.
pub fn tool_use_block(
    index: usize,
    id: Option<String>,
    name: &str,
    args: &serde_json::Value,
) -> Vec<StreamEvent> {
    let id = id.unwrap_or_else(new_tool_use_id);
    let args_json = serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
    vec![
        tool_use_start(index, id, name),
        input_json_delta(index, args_json),
        block_stop(index),
    ]
}

/// Closing frames: `message_delta` carrying the stop reason and output usage,
/// then `message_stop`.
pub fn finish(stop_reason: &str, output_tokens: u64) -> Vec<StreamEvent> {
    vec![
        StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage { output_tokens },
        },
        StreamEvent::MessageStop,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_long_and_unique() {
        let a = new_message_id();
        let b = new_message_id();
        assert_ne!(a, b);
        assert!(a.len() > 10);
        assert!(a.starts_with("msg_"));
        assert!(new_tool_use_id().starts_with("toolu_"));
    }

    #[test]
    fn text_block_is_a_trio() {
        let events = text_block(0, "hello");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_name(), "content_block_start");
        match &events[1] {
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta::TextDelta { text },
            } => assert_eq!(text, "hello"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[2].event_name(), "content_block_stop");
    }

    #[test]
    fn tool_use_block_is_a_trio() {
        let events = tool_use_block(3, None, "lookup", &serde_json::json!({"q": 1}));
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_name(), "content_block_start");
        assert_eq!(events[1].event_name(), "content_block_delta");
        assert_eq!(events[2].event_name(), "content_block_stop");

        match &events[1] {
            StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json },
            } => {
                assert_eq!(*index, 3);
                assert_eq!(partial_json, r#"{"q":1}"#);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn finish_carries_usage() {
        let events = finish("end_turn", 42);
        assert_eq!(events[0].event_name(), "message_delta");
        assert_eq!(events[1].event_name(), "message_stop");
        match &events[0] {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
                assert_eq!(usage.output_tokens, 42);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
