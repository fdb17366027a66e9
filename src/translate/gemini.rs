//! Claude <-> Gemini translation.
//!
//! Requests map Claude messages onto Gemini `contents`/`parts` with roles
//! renamed (`assistant` -> `model`) and system text hoisted into
//! `systemInstruction`. The stream translator walks candidate parts: text
//! arrives as deltas, while a `functionCall` part is atomic, so it becomes a
//! complete `tool_use` block trio with the args as one `input_json_delta`.

use std::collections::HashMap;

use super::claude_types::{ContentBlock, MessagesRequest, Role, StreamEvent};
use super::events;
use super::gemini_types::{
    FunctionCall, FunctionResponse, GeminiContent, GeminiFunctionDeclaration, GeminiPart,
    GeminiRequest, GeminiResponseChunk, GeminiSystemInstruction, GeminiTool, GenerationConfig,
    InlineData,
};
use super::request::map_model;
use super::schema::clean_json_schema;
use crate::pump::ChunkDecoder;

/// Translate a Claude Messages request into a Gemini generateContent request.
pub fn claude_to_gemini(req: &MessagesRequest) -> GeminiRequest {
    // functionResponse parts need the function name; recover it from the
    // tool_use blocks earlier in the conversation.
    let mut tool_names: HashMap<&str, &str> = HashMap::new();
    for msg in &req.messages {
        if let super::claude_types::MessageContent::Blocks(blocks) = &msg.content {
            for block in blocks {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    tool_names.insert(id.as_str(), name.as_str());
                }
            }
        }
    }

    let mut system_texts: Vec<String> = Vec::new();
    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            system_texts.push(text);
        }
    }

    let mut contents: Vec<GeminiContent> = Vec::new();

    for msg in &req.messages {
        if msg.role == Role::System {
            let text = msg.content.plain_text();
            if !text.is_empty() {
                system_texts.push(text);
            }
            continue;
        }

        let role = match msg.role {
            Role::Assistant => "model",
            _ => "user",
        };

        let mut parts: Vec<GeminiPart> = Vec::new();
        for block in msg.content.blocks() {
            match block {
                ContentBlock::Text { text } => parts.push(GeminiPart::Text { text }),
                ContentBlock::Image { source } => parts.push(GeminiPart::InlineData {
                    inline_data: InlineData {
                        mime_type: source.media_type,
                        data: source.data,
                    },
                }),
                ContentBlock::ToolUse { name, input, .. } => parts.push(GeminiPart::FunctionCall {
                    function_call: FunctionCall { name, args: input },
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let name = tool_names
                        .get(tool_use_id.as_str())
                        .map_or_else(|| tool_use_id.clone(), |n| (*n).to_string());
                    let result_text = match content {
                        Some(super::claude_types::ToolResultContent::Text(t)) => t,
                        Some(super::claude_types::ToolResultContent::Blocks(blocks)) => blocks
                            .iter()
                            .filter_map(|b| match b {
                                ContentBlock::Text { text } => Some(text.as_str()),
                                _ => None,
                            })
                            .collect::<Vec<_>>()
                            .join("\n"),
                        None => String::new(),
                    };
                    parts.push(GeminiPart::FunctionResponse {
                        function_response: FunctionResponse {
                            name,
                            response: serde_json::json!({
                                "result": result_text,
                                "error": is_error.unwrap_or(false),
                            }),
                        },
                    });
                }
                ContentBlock::Thinking { .. } => {}
            }
        }

        if !parts.is_empty() {
            contents.push(GeminiContent {
                role: Some(role.to_string()),
                parts,
            });
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(GeminiSystemInstruction {
            parts: vec![GeminiPart::Text {
                text: system_texts.join("\n\n"),
            }],
        })
    };

    let tools = req.tools.as_ref().map(|tools| {
        vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|t| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: clean_json_schema(&t.input_schema),
                })
                .collect(),
        }]
    });

    GeminiRequest {
        contents,
        system_instruction,
        generation_config: Some(GenerationConfig {
            max_output_tokens: Some(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            stop_sequences: req.stop_sequences.clone(),
        }),
        tools,
    }
}

/// Build the generateContent URL for a channel.
///
/// Streaming uses `:streamGenerateContent?alt=sse`; authentication goes in the
/// `x-goog-api-key` header, never the query string.
pub fn gemini_url(
    base_url: &str,
    model: &str,
    model_map: &HashMap<String, String>,
    stream: bool,
) -> String {
    let model = map_model(model, model_map);
    let base = base_url.trim_end_matches('/');
    if stream {
        format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse")
    } else {
        format!("{base}/v1beta/models/{model}:generateContent")
    }
}

#[derive(Debug)]
pub struct GeminiStreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    next_block_index: usize,
    open_text_block: Option<usize>,
    saw_tool_use: bool,
    output_tokens: u64,
}

impl GeminiStreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: events::new_message_id(),
            started: false,
            finished: false,
            next_block_index: 0,
            open_text_block: None,
            saw_tool_use: false,
            output_tokens: 0,
        }
    }

    pub fn process_chunk(&mut self, chunk: &GeminiResponseChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut out = Vec::new();

        if let Some(ref usage) = chunk.usage_metadata {
            if let Some(n) = usage.candidates_token_count {
                self.output_tokens = n;
            }
        }

        if !self.started {
            let input_tokens = chunk
                .usage_metadata
                .as_ref()
                .and_then(|u| u.prompt_token_count)
                .unwrap_or(0);
            out.push(events::message_start(&self.msg_id, &self.model, input_tokens));
            out.push(StreamEvent::Ping);
            self.started = true;
        }

        let Some(candidate) = chunk.candidates.first() else {
            return out;
        };

        if let Some(ref body) = candidate.content {
            for part in &body.parts {
                match part {
                    GeminiPart::Text { text } => {
                        if text.is_empty() {
                            continue;
                        }
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
                        out.push(events::text_delta(index, text.clone()));
                    }
                    GeminiPart::FunctionCall { function_call } => {
                        if let Some(i) = self.open_text_block.take() {
                            out.push(events::block_stop(i));
                        }
                        let index = self.next_block_index;
                        self.next_block_index += 1;
                        self.saw_tool_use = true;
                        out.extend(events::tool_use_block(
                            index,
                            None,
                            &function_call.name,
                            &function_call.args,
                        ));
                    }
                    GeminiPart::FunctionResponse { .. } | GeminiPart::InlineData { .. } => {}
                }
            }
        }

        if let Some(reason) = candidate.finish_reason.clone() {
            out.append(&mut self.finish_with(&reason));
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

        let stop_reason = if self.saw_tool_use {
            "tool_use".to_string()
        } else {
            super::response::map_gemini_finish_reason(reason)
        };
        out.extend(events::finish(&stop_reason, self.output_tokens));
        out
    }
}

impl ChunkDecoder for GeminiStreamTranslator {
    fn decode(&mut self, data: &str) -> crate::Result<Vec<StreamEvent>> {
        match serde_json::from_str::<GeminiResponseChunk>(data) {
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
            out.append(&mut self.finish_with("STOP"));
            return out;
        }
        self.finish_with("STOP")
    }
}
