//! State machines translating OpenAI-family streaming chunks into the
//! canonical Claude event stream.
//!
//! [`StreamTranslator`] processes chat-completions chunks one at a time,
//! tracking which content blocks are open and the per-index tool-call
//! argument accumulation; [`LegacyStreamTranslator`] handles the text-only
//! legacy wire. Both plug into the stream pump as [`ChunkDecoder`]s.

use std::collections::HashMap;

use super::claude_types::StreamEvent;
use super::events;
use super::openai_types::{ChatCompletionChunk, CompletionChunk};
use super::response::map_finish_reason;
use crate::pump::ChunkDecoder;

/// An in-progress tool call being streamed.
#[derive(Debug, Clone)]
struct OpenToolCall {
    block_index: usize,
}

#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    next_block_index: usize,
    open_text_block: Option<usize>,
    /// OpenAI tool_call index -> open Claude block, insertion-ordered closing.
    open_tool_calls: HashMap<u64, OpenToolCall>,
    open_order: Vec<u64>,
    input_tokens: u64,
    output_tokens: u64,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: events::new_message_id(),
            started: false,
            finished: false,
            next_block_index: 0,
            open_text_block: None,
            open_tool_calls: HashMap::new(),
            open_order: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Process a single chat-completions chunk, returning zero or more
    /// canonical events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut out = Vec::new();

        if let Some(ref usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        if !self.started {
            out.push(events::message_start(
                &self.msg_id,
                &self.model,
                self.input_tokens,
            ));
            out.push(StreamEvent::Ping);
            self.started = true;
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        // Reasoning models stream chain-of-thought in `reasoning_content` and
        // the answer in `content`; both surface as text deltas.
        let effective_content = choice
            .delta
            .content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                choice
                    .delta
                    .reasoning_content
                    .as_deref()
                    .filter(|s| !s.is_empty())
            });

        if let Some(content) = effective_content {
            let index = match self.open_text_block {
                Some(i) => i,
                None => {
                    let i = self.next_block_index;
                    self.next_block_index += 1;
                    self.open_text_block = Some(i);
                    out.push(events::text_block_start(i));
                    i
                }
            };
            out.push(events::text_delta(index, content));
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                if !self.open_tool_calls.contains_key(&tc.index) {
                    // A tool call begins: any open text block is complete.
                    if let Some(i) = self.open_text_block.take() {
                        out.push(events::block_stop(i));
                    }

                    let block_index = self.next_block_index;
                    self.next_block_index += 1;

                    let id = tc
                        .id
                        .clone()
                        .unwrap_or_else(events::new_tool_use_id);
                    let name = tc
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();

                    out.push(events::tool_use_start(block_index, id, name));
                    self.open_tool_calls
                        .insert(tc.index, OpenToolCall { block_index });
                    self.open_order.push(tc.index);
                }

                if let Some(args) = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.arguments.as_deref())
                    .filter(|a| !a.is_empty())
                {
                    let block_index = self.open_tool_calls[&tc.index].block_index;
                    out.push(events::input_json_delta(block_index, args));
                }
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            out.append(&mut self.finish_with(reason));
        }

        out
    }

    fn finish_with(&mut self, reason: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut out = Vec::new();

        if let Some(i) = self.open_text_block.take() {
            out.push(events::block_stop(i));
        }

        for idx in self.open_order.drain(..) {
            if let Some(open) = self.open_tool_calls.remove(&idx) {
                out.push(events::block_stop(open.block_index));
            }
        }

        out.extend(events::finish(
            &map_finish_reason(reason),
            self.output_tokens,
        ));
        out
    }

    /// Flush terminal frames when the upstream ends without a finish_reason.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        if !self.started {
            self.started = true;
            let mut out = vec![events::message_start(
                &self.msg_id,
                &self.model,
                self.input_tokens,
            )];
            out.append(&mut self.finish_with("stop"));
            return out;
        }

        self.finish_with("stop")
    }
}

impl ChunkDecoder for StreamTranslator {
    fn decode(&mut self, data: &str) -> crate::Result<Vec<StreamEvent>> {
        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => Ok(self.process_chunk(&chunk)),
            // Unparseable payloads (keep-alive comments, truncated tails) are
            // skipped rather than treated as stream failures.
            Err(_) => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        self.flush()
    }
}

/// Translator for the legacy completions wire: text deltas only.
#[derive(Debug)]
pub struct LegacyStreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    text_block_open: bool,
    output_tokens: u64,
}

impl LegacyStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: events::new_message_id(),
            started: false,
            finished: false,
            text_block_open: false,
            output_tokens: 0,
        }
    }

    pub fn process_chunk(&mut self, chunk: &CompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut out = Vec::new();

        if let Some(ref usage) = chunk.usage {
            self.output_tokens = usage.completion_tokens;
        }

        if !self.started {
            out.push(events::message_start(&self.msg_id, &self.model, 0));
            out.push(StreamEvent::Ping);
            self.started = true;
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if !choice.text.is_empty() {
            if !self.text_block_open {
                out.push(events::text_block_start(0));
                self.text_block_open = true;
            }
            out.push(events::text_delta(0, choice.text.clone()));
        }

        if let Some(ref reason) = choice.finish_reason {
            out.append(&mut self.finish_with(reason));
        }

        out
    }

    fn finish_with(&mut self, reason: &str) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut out = Vec::new();
        if self.text_block_open {
            out.push(events::block_stop(0));
            self.text_block_open = false;
        }
        out.extend(events::finish(
            &map_finish_reason(reason),
            self.output_tokens,
        ));
        out
    }
}

impl ChunkDecoder for LegacyStreamTranslator {
    fn decode(&mut self, data: &str) -> crate::Result<Vec<StreamEvent>> {
        match serde_json::from_str::<CompletionChunk>(data) {
            Ok(chunk) => Ok(self.process_chunk(&chunk)),
            Err(_) => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if !self.started {
            self.started = true;
            let mut out = vec![events::message_start(&self.msg_id, &self.model, 0)];
            out.append(&mut self.finish_with("stop"));
            return out;
        }
        self.finish_with("stop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::claude_types::Delta;
    use crate::translate::openai_types::*;

    fn text_chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.to_string()),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn tool_chunk(
        index: u64,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "test".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: None,
                    reasoning_content: None,
                    tool_calls: Some(vec![ChunkToolCall {
                        index,
                        id: id.map(String::from),
                        call_type: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: name.map(String::from),
                            arguments: args.map(String::from),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    #[test]
    fn simple_text_stream() {
        let mut translator = StreamTranslator::new("test-model");

        let events = translator.process_chunk(&text_chunk("Hello", None));
        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta"
            ]
        );

        let events = translator.process_chunk(&text_chunk(" world", None));
        assert_eq!(names(&events), vec!["content_block_delta"]);

        let events = translator.process_chunk(&text_chunk("", Some("stop")));
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "message_delta", "message_stop"]
        );
    }

    /// Text, then a tool call whose arguments arrive in two fragments.
    #[test]
    fn text_then_fragmented_tool_call() {
        let mut translator = StreamTranslator::new("test-model");

        let mut all = Vec::new();
        all.extend(translator.process_chunk(&text_chunk("Hi", None)));
        all.extend(translator.process_chunk(&text_chunk(" there", None)));
        all.extend(translator.process_chunk(&tool_chunk(
            0,
            Some("t_1"),
            Some("f"),
            Some("{\"a\":"),
        )));
        all.extend(translator.process_chunk(&tool_chunk(0, None, None, Some("1}"))));
        all.extend(translator.process_chunk(&ChatCompletionChunk {
            id: "c1".into(),
            object: String::new(),
            created: 0,
            model: "test".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }));

        assert_eq!(
            names(&all),
            vec![
                "message_start",
                "ping",
                "content_block_start",  // text, index 0
                "content_block_delta",  // "Hi"
                "content_block_delta",  // " there"
                "content_block_stop",   // text closes when the tool call begins
                "content_block_start",  // tool_use, index 1
                "content_block_delta",  // {"a":
                "content_block_delta",  // 1}
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        // The tool block landed at index 1 with the upstream id, and the
        // concatenated fragments parse to the original arguments.
        let mut tool_index = None;
        let mut fragments = String::new();
        for ev in &all {
            match ev {
                StreamEvent::ContentBlockStart {
                    index,
                    content_block:
                        crate::translate::claude_types::ResponseContentBlock::ToolUse {
                            id, name, ..
                        },
                } => {
                    assert_eq!(id, "t_1");
                    assert_eq!(name, "f");
                    tool_index = Some(*index);
                }
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta { partial_json },
                } if Some(*index) == tool_index => {
                    fragments.push_str(partial_json);
                }
                _ => {}
            }
        }
        assert_eq!(tool_index, Some(1));
        let parsed: serde_json::Value = serde_json::from_str(&fragments).unwrap();
        assert_eq!(parsed, serde_json::json!({"a": 1}));
    }

    /// Fragments sharing one OpenAI index accumulate into exactly one block.
    #[test]
    fn same_index_fragments_share_one_block() {
        let mut translator = StreamTranslator::new("m");

        let mut all = Vec::new();
        all.extend(translator.process_chunk(&tool_chunk(0, Some("t"), Some("f"), Some("{"))));
        all.extend(translator.process_chunk(&tool_chunk(0, None, None, Some("}"))));
        all.extend(translator.flush());

        let starts = all
            .iter()
            .filter(|e| e.event_name() == "content_block_start")
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn parallel_tool_calls_get_distinct_blocks() {
        let mut translator = StreamTranslator::new("m");

        let mut all = Vec::new();
        all.extend(translator.process_chunk(&tool_chunk(0, Some("a"), Some("f"), Some("{}"))));
        all.extend(translator.process_chunk(&tool_chunk(1, Some("b"), Some("g"), Some("{}"))));
        all.extend(translator.flush());

        let start_indices: Vec<usize> = all
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(start_indices, vec![0, 1]);

        let stop_indices: Vec<usize> = all
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockStop { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(stop_indices, vec![0, 1]);
    }

    #[test]
    fn flush_without_chunks_still_frames_message() {
        let mut translator = StreamTranslator::new("m");
        let events = translator.flush();
        let ns = names(&events);
        assert!(ns.contains(&"message_start"));
        assert!(ns.contains(&"message_delta"));
        assert!(ns.contains(&"message_stop"));
    }

    #[test]
    fn decoder_skips_unparseable_payloads() {
        let mut translator = StreamTranslator::new("m");
        assert!(translator.decode(": keep-alive").unwrap().is_empty());
        assert!(translator.decode("{\"truncated\":").unwrap().is_empty());
    }

    #[test]
    fn legacy_text_stream() {
        let mut translator = LegacyStreamTranslator::new("m");

        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"id":"cmpl-1","choices":[{"index":0,"text":"hi","finish_reason":null}]}"#)
                .unwrap();
        let events = translator.process_chunk(&chunk);
        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta"
            ]
        );

        let done: CompletionChunk =
            serde_json::from_str(r#"{"id":"cmpl-1","choices":[{"index":0,"text":"","finish_reason":"stop"}]}"#)
                .unwrap();
        let events = translator.process_chunk(&done);
        assert_eq!(
            names(&events),
            vec!["content_block_stop", "message_delta", "message_stop"]
        );
    }
}
