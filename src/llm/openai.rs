//! OpenAI-compatible request building and stream decoding.
//!
//! Assistant tool use travels as `tool_calls`; results reply with role
//! `tool`. The stream decoder merges incremental `delta.tool_calls[index]`
//! fragments (id, function name, argument chunks) and finalizes them when
//! the stream ends.

use crate::llm::types::{
    ChatMessage, ChatOptions, ContentBlock, LlmEvent, MessageContent, Role, ToolCall,
};
use serde_json::{json, Value};
use tracing::warn;

pub fn build_request(messages: &[ChatMessage], options: &ChatOptions, model: &str) -> Value {
    let mut wire_messages: Vec<Value> = Vec::new();

    for message in messages {
        match (&message.role, &message.content) {
            (Role::System, content) => wire_messages.push(json!({
                "role": "system",
                "content": text_of(content),
            })),
            (Role::User, content) => wire_messages.push(json!({
                "role": "user",
                "content": text_of(content),
            })),
            (Role::Assistant, MessageContent::Text(text)) => wire_messages.push(json!({
                "role": "assistant",
                "content": text,
            })),
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                wire_messages.push(render_assistant(blocks))
            }
            (Role::Tool, MessageContent::Blocks(blocks)) => {
                for block in blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        wire_messages.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": stringify(content),
                        }));
                    }
                }
            }
            (Role::Tool, MessageContent::Text(text)) => wire_messages.push(json!({
                "role": "tool",
                "content": text,
            })),
        }
    }

    let mut body = json!({
        "model": model,
        "messages": wire_messages,
        "stream": true,
    });

    if let Some(max_tokens) = options.max_tokens {
        body["max_tokens"] = json!(max_tokens);
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
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect(),
        );
    }

    body
}

fn text_of(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn stringify(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_assistant(blocks: &[ContentBlock]) -> Value {
    let text = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let tool_calls: Vec<Value> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": input.to_string(),
                }
            })),
            _ => None,
        })
        .collect();

    let mut message = json!({ "role": "assistant" });
    message["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

/// One tool call being assembled from streamed fragments.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments_buffer: String,
}

pub struct StreamDecoder {
    full_response: String,
    pending: Vec<PendingToolCall>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder {
            full_response: String::new(),
            pending: Vec::new(),
        }
    }

    pub fn feed(&mut self, event: &Value) -> Vec<LlmEvent> {
        let delta = match event
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("delta"))
        {
            Some(d) => d,
            None => return vec![],
        };

        let mut events = Vec::new();

        if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
            if !content.is_empty() {
                self.full_response.push_str(content);
                events.push(LlmEvent::Token {
                    content: content.to_string(),
                    full_response: self.full_response.clone(),
                });
            }
        }

        if let Some(calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for fragment in calls {
                let index = fragment
                    .get("index")
                    .and_then(|i| i.as_u64())
                    .unwrap_or(0) as usize;
                while self.pending.len() <= index {
                    self.pending.push(PendingToolCall::default());
                }
                let slot = &mut self.pending[index];

                if let Some(id) = fragment.get("id").and_then(|i| i.as_str()) {
                    slot.id = id.to_string();
                }
                if let Some(function) = fragment.get("function") {
                    if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                        slot.name.push_str(name);
                    }
                    if let Some(args) = function.get("arguments").and_then(|a| a.as_str()) {
                        slot.arguments_buffer.push_str(args);
                    }
                }
            }
        }

        events
    }

    /// Terminal events at `[DONE]`: finalized tool calls if any, then done.
    pub fn finish(&mut self) -> Vec<LlmEvent> {
        let mut events = Vec::new();

        let pending = std::mem::take(&mut self.pending);
        let tool_calls: Vec<ToolCall> = pending
            .into_iter()
            .filter(|p| !p.name.is_empty())
            .map(|p| {
                let arguments = if p.arguments_buffer.is_empty() {
                    json!({})
                } else {
                    match serde_json::from_str(&p.arguments_buffer) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Unparseable tool call arguments for {}: {}", p.name, e);
                            json!({})
                        }
                    }
                };
                ToolCall {
                    id: p.id,
                    name: p.name,
                    arguments,
                }
            })
            .collect();

        if !tool_calls.is_empty() {
            events.push(LlmEvent::ToolCall {
                tool_calls,
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
