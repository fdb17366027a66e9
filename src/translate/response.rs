//! Non-streaming response translation: OpenAI-family bodies into Claude
//! Messages responses.

use super::claude_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::events::new_tool_use_id;
use super::openai_types::{ChatCompletionResponse, CompletionResponse};

/// Translate an OpenAI Chat Completion response into a Claude Messages
/// response. `original_model` is what the caller asked for.
pub fn openai_to_claude(resp: &ChatCompletionResponse, original_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        let text = c
            .message
            .content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(c.message.reasoning_content.as_deref().filter(|s| !s.is_empty()));
        if let Some(text) = text {
            content.push(ResponseContentBlock::Text {
                text: text.to_string(),
            });
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                let input: serde_json::Value =
                    serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::Value::Null);

                content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    // Callers expect a non-empty content array
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(map_finish_reason)
        .unwrap_or_else(|| "end_turn".to_string());

    MessagesResponse {
        id: format!("msg_{}", resp.id.trim_start_matches("chatcmpl-")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: usage_from(resp.usage.as_ref()),
    }
}

/// Translate a legacy Completions response. Only text comes back on this wire.
pub fn legacy_to_claude(resp: &CompletionResponse, original_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let text = choice.map(|c| c.text.clone()).unwrap_or_default();
    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(map_finish_reason)
        .unwrap_or_else(|| "end_turn".to_string());

    let id = if resp.id.is_empty() {
        super::events::new_message_id()
    } else {
        format!("msg_{}", resp.id.trim_start_matches("cmpl-"))
    };

    MessagesResponse {
        id,
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ResponseContentBlock::Text { text }],
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: usage_from(resp.usage.as_ref()),
    }
}

/// Translate a Gemini generateContent response.
pub fn gemini_to_claude(
    resp: &super::gemini_types::GeminiResponseChunk,
    original_model: &str,
) -> MessagesResponse {
    use super::gemini_types::GeminiPart;

    let mut content: Vec<ResponseContentBlock> = Vec::new();
    let mut saw_tool_use = false;

    if let Some(candidate) = resp.candidates.first() {
        if let Some(ref body) = candidate.content {
            for part in &body.parts {
                match part {
                    GeminiPart::Text { text } => {
                        if !text.is_empty() {
                            content.push(ResponseContentBlock::Text { text: text.clone() });
                        }
                    }
                    GeminiPart::FunctionCall { function_call } => {
                        saw_tool_use = true;
                        content.push(ResponseContentBlock::ToolUse {
                            id: new_tool_use_id(),
                            name: function_call.name.clone(),
                            input: function_call.args.clone(),
                        });
                    }
                    GeminiPart::FunctionResponse { .. } | GeminiPart::InlineData { .. } => {}
                }
            }
        }
    }

    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = if saw_tool_use {
        "tool_use".to_string()
    } else {
        resp.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .map(map_gemini_finish_reason)
            .unwrap_or_else(|| "end_turn".to_string())
    };

    let usage = resp
        .usage_metadata
        .as_ref()
        .map_or_else(Usage::default, |u| Usage {
            input_tokens: u.prompt_token_count.unwrap_or(0),
            output_tokens: u.candidates_token_count.unwrap_or(0),
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        });

    MessagesResponse {
        id: super::events::new_message_id(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

fn usage_from(usage: Option<&super::openai_types::ChatUsage>) -> Usage {
    usage.map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    })
}

/// Map an OpenAI finish_reason onto a Claude stop_reason.
pub fn map_finish_reason(reason: &str) -> String {
    match reason {
        "stop" | "content_filter" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" | "function_call" => "tool_use".to_string(),
        other => other.to_string(),
    }
}

/// Map a Gemini finishReason onto a Claude stop_reason.
pub fn map_gemini_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "end_turn".to_string(),
        "MAX_TOKENS" => "max_tokens".to_string(),
        other => other.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;

    fn make_response(
        content: Option<String>,
        finish_reason: Option<String>,
    ) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content,
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason,
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
        }
    }

    #[test]
    fn simple_text_response() {
        let resp = make_response(Some("Hello!".to_string()), Some("stop".to_string()));
        let result = openai_to_claude(&resp, "claude-sonnet-4-20250514");

        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "claude-sonnet-4-20250514");
        assert_eq!(result.stop_reason, Some("end_turn".to_string()));
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn tool_call_response() {
        let mut resp = make_response(Some("Let me check.".to_string()), Some("tool_calls".into()));
        resp.choices[0].message.tool_calls = Some(vec![ChatToolCall {
            id: "call_abc".to_string(),
            call_type: "function".to_string(),
            function: ChatToolCallFunction {
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"London\"}".to_string(),
            },
        }]);

        let result = openai_to_claude(&resp, "test-model");

        assert_eq!(result.content.len(), 2);
        assert_eq!(result.stop_reason, Some("tool_use".to_string()));

        match &result.content[1] {
            ResponseContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call_abc");
                assert_eq!(name, "get_weather");
                assert_eq!(input["city"], "London");
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn empty_response_gets_empty_text_block() {
        let resp = make_response(None, Some("stop".to_string()));
        let result = openai_to_claude(&resp, "m");
        assert_eq!(result.content.len(), 1);
        assert!(matches!(
            result.content[0],
            ResponseContentBlock::Text { .. }
        ));
    }

    #[test]
    fn legacy_text_response() {
        let resp = CompletionResponse {
            id: "cmpl-7".to_string(),
            model: "davinci".to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                text: " four".to_string(),
                finish_reason: Some("length".to_string()),
            }],
            usage: None,
        };

        let result = legacy_to_claude(&resp, "claude-3-haiku");
        assert_eq!(result.stop_reason, Some("max_tokens".to_string()));
        match &result.content[0] {
            ResponseContentBlock::Text { text } => assert_eq!(text, " four"),
            other => panic!("expected text block, got {other:?}"),
        }
    }

    #[test]
    fn gemini_function_call_response() {
        let resp: crate::translate::gemini_types::GeminiResponseChunk =
            serde_json::from_value(serde_json::json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{"functionCall": {"name": "g", "args": {"x": 2}}}]
                    },
                    "finishReason": "STOP"
                }]
            }))
            .unwrap();

        let result = gemini_to_claude(&resp, "claude-sonnet-4-20250514");
        assert_eq!(result.stop_reason, Some("tool_use".to_string()));
        match &result.content[0] {
            ResponseContentBlock::ToolUse { id, name, input } => {
                assert!(id.starts_with("toolu_"));
                assert_eq!(name, "g");
                assert_eq!(input["x"], 2);
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), "end_turn");
        assert_eq!(map_finish_reason("length"), "max_tokens");
        assert_eq!(map_finish_reason("tool_calls"), "tool_use");
        assert_eq!(map_finish_reason("weird"), "weird");
        assert_eq!(map_gemini_finish_reason("STOP"), "end_turn");
        assert_eq!(map_gemini_finish_reason("MAX_TOKENS"), "max_tokens");
    }
}
