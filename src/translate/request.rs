//! Translate Claude Messages requests into OpenAI-family requests.
//!
//! Handles system messages, multi-part content (text, images), tool use, tool
//! results, and tool choice mapping. A single Claude message can expand into
//! multiple OpenAI messages (e.g. a user message with `tool_result` blocks
//! becomes separate `tool`-role messages). The legacy variant flattens the
//! whole conversation into one `prompt` string.

use std::collections::HashMap;

use super::claude_types::{
    ContentBlock, Message, MessagesRequest, Role, ToolChoice, ToolChoiceAuto, ToolChoiceSpecific,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    CompletionRequest, ContentPart, ImageUrlDetail, StreamOptions,
};
use super::schema::clean_json_schema;

/// Resolve the upstream model name through the channel's mapping table.
/// Unmapped models pass through unchanged.
pub fn map_model(model: &str, model_map: &HashMap<String, String>) -> String {
    model_map
        .get(model)
        .cloned()
        .unwrap_or_else(|| model.to_string())
}

/// Translate a Claude Messages request into an OpenAI Chat Completions
/// request. Pure function: takes the request + model mapping, returns the
/// translated request.
pub fn claude_to_openai(
    req: &MessagesRequest,
    model_map: &HashMap<String, String>,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(system.as_text())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    for msg in &req.messages {
        messages.append(&mut translate_message(msg));
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: clean_json_schema(&t.input_schema),
                },
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    ChatCompletionRequest {
        model: map_model(&req.model, model_map),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user,
    }
}

/// Translate a Claude Messages request into a legacy Completions request.
///
/// The conversation collapses to a single prompt: system text first, then
/// each turn prefixed by its role, with a trailing "Assistant:" cue. Tools do
/// not exist on this wire; tool blocks degrade to their textual content.
pub fn claude_to_legacy(
    req: &MessagesRequest,
    model_map: &HashMap<String, String>,
) -> CompletionRequest {
    let mut prompt = String::new();

    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            prompt.push_str(&text);
            prompt.push_str("\n\n");
        }
    }

    for msg in &req.messages {
        let label = match msg.role {
            Role::Assistant => "Assistant",
            Role::System => "System",
            _ => "Human",
        };
        let text = msg.content.plain_text();
        if !text.is_empty() {
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(&text);
            prompt.push('\n');
        }
    }
    prompt.push_str("Assistant:");

    CompletionRequest {
        model: map_model(&req.model, model_map),
        prompt,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stop: req.stop_sequences.clone(),
    }
}

/// A single Claude message can expand to multiple OpenAI messages.
fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::Assistant => translate_assistant_message(&blocks),
        Role::System => vec![ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(msg.content.plain_text())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }],
        // Tool-role messages carry tool_result blocks the same way user
        // messages do; both walk the user path.
        Role::User | Role::Tool => translate_user_message(&blocks),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                let data_uri = format!("data:{};base64,{}", source.media_type, source.data);
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: data_uri,
                        detail: None,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                // Flush accumulated content as a user message first
                if !content_parts.is_empty() {
                    messages.push(user_message(collapse_content_parts(&content_parts)));
                    content_parts.clear();
                }

                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(user_message(collapse_content_parts(&content_parts)));
    }

    if messages.is_empty() {
        messages.push(user_message(ChatContent::Text(String::new())));
    }

    messages
}

fn user_message(content: ChatContent) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                text_parts.push(text.clone());
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text_parts.join("")))
    };

    vec![ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    }]
}

fn collapse_content_parts(parts: &[ContentPart]) -> ChatContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return ChatContent::Text(text.clone());
        }
    }
    ChatContent::Parts(parts.to_vec())
}

fn tool_result_to_string(
    content: Option<&super::claude_types::ToolResultContent>,
    is_error: Option<bool>,
) -> String {
    let prefix = if is_error == Some(true) {
        "ERROR: "
    } else {
        ""
    };

    match content {
        Some(super::claude_types::ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(super::claude_types::ToolResultContent::Blocks(blocks)) => {
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => format!("{prefix}(no content)"),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}
