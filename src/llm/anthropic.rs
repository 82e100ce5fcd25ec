//! Anthropic-dialect request building and stream decoding.
//!
//! Requests use content-block messages with a top-level `system` field.
//! The stream decoder accumulates `text_delta` into the running response
//! and `input_json_delta` into a per-block JSON buffer that is flushed into
//! a finalized tool call at `content_block_stop`.

use crate::llm::types::{
    ChatMessage, ChatOptions, ContentBlock, LlmEvent, MessageContent, Role, ToolCall,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;

pub fn build_request(
    messages: &[ChatMessage],
    options: &ChatOptions,
    model: &str,
    max_tokens: u32,
) -> Value {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut wire_messages: Vec<Value> = Vec::new();

    for message in messages {
        match (&message.role, &message.content) {
            (Role::System, MessageContent::Text(text)) => system_parts.push(text),
            (Role::System, MessageContent::Blocks(_)) => {
                warn!("Dropping block-structured system message")
            }
            (role, content) => {
                let wire_role = match role {
                    Role::Assistant => "assistant",
                    // Tool results travel as user messages in this dialect.
                    _ => "user",
                };
                wire_messages.push(json!({
                    "role": wire_role,
                    "content": render_content(content),
                }));
            }
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": wire_messages,
        "stream": true,
    });

    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(tools) = &options.tools {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect(),
        );
    }

    body
}

fn render_content(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => json!([{ "type": "text", "text": text }]),
        MessageContent::Blocks(blocks) => Value::Array(
            blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                    ContentBlock::ToolUse { id, name, input } => json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    }),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": render_result_content(content),
                        "is_error": is_error,
                    }),
                })
                .collect(),
        ),
    }
}

fn render_result_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One tool_use block being assembled from `input_json_delta` chunks.
struct PendingBlock {
    id: String,
    name: String,
    json_buffer: String,
}

pub struct StreamDecoder {
    full_response: String,
    pending: HashMap<u64, PendingBlock>,
    tool_calls: Vec<ToolCall>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder {
            full_response: String::new(),
            pending: HashMap::new(),
            tool_calls: Vec::new(),
            finished: false,
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn feed(&mut self, event: &Value) -> Vec<LlmEvent> {
        let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match event_type {
            "content_block_start" => {
                let index = event.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(block) = event.get("content_block") {
                    if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                        self.pending.insert(
                            index,
                            PendingBlock {
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
                                json_buffer: String::new(),
                            },
                        );
                    }
                }
                vec![]
            }
            "content_block_delta" => {
                let index = event.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let delta = match event.get("delta") {
                    Some(d) => d,
                    None => return vec![],
                };
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        let text = delta.get("text").and_then(|t| t.as_str()).unwrap_or("");
                        self.full_response.push_str(text);
                        vec![LlmEvent::Token {
                            content: text.to_string(),
                            full_response: self.full_response.clone(),
                        }]
                    }
                    Some("input_json_delta") => {
                        if let Some(block) = self.pending.get_mut(&index) {
                            block.json_buffer.push_str(
                                delta
                                    .get("partial_json")
                                    .and_then(|p| p.as_str())
                                    .unwrap_or(""),
                            );
                        }
                        vec![]
                    }
                    _ => vec![],
                }
            }
            "content_block_stop" => {
                let index = event.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                if let Some(block) = self.pending.remove(&index) {
                    let arguments = if block.json_buffer.is_empty() {
                        json!({})
                    } else {
                        match serde_json::from_str(&block.json_buffer) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!("Unparseable tool_use input for {}: {}", block.name, e);
                                json!({})
                            }
                        }
                    };
                    self.tool_calls.push(ToolCall {
                        id: block.id,
                        name: block.name,
                        arguments,
                    });
                }
                vec![]
            }
            "message_stop" => {
                self.finished = true;
                vec![]
            }
            "error" => {
                let message = event
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("stream error")
                    .to_string();
                vec![LlmEvent::Error {
                    error: message,
                    full_response: self.full_response.clone(),
                }]
            }
            _ => vec![],
        }
    }

    /// Terminal events after the body ends: tool calls if any, then done.
    pub fn finish(&mut self) -> Vec<LlmEvent> {
        let mut events = Vec::new();
        if !self.tool_calls.is_empty() {
            events.push(LlmEvent::ToolCall {
                tool_calls: std::mem::take(&mut self.tool_calls),
                full_response: self.full_response.clone(),
            });
        }
        events.push(LlmEvent::Done {
            full_response: self.full_response.clone(),
        });
        events
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
