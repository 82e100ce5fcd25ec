//! Shared test fixtures: a scripted provider double and skill builders.

#![allow(dead_code)]

use async_trait::async_trait;
use openevo::agent::context::CallFrame;
use openevo::core::registry::SkillRegistry;
use openevo::core::{Result as SkillResult, Skill, SkillError, SkillMeta};
use openevo::execution::SkillExecutor;
use openevo::llm::types::{ChatMessage, ChatOptions, LlmEvent, ToolCall};
use openevo::llm::{LlmError, LlmProvider, LlmStream};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One canned model turn.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Error(String),
}

/// Provider double that replays a fixed list of turns and records every
/// request it receives.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Arc<Self> {
        Arc::new(ScriptedProvider {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn text(reply: impl Into<String>) -> ScriptedReply {
        ScriptedReply::Text(reply.into())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        _options: ChatOptions,
    ) -> Result<LlmStream, LlmError> {
        self.requests.lock().push(messages);

        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(ScriptedReply::Text(String::new()));

        let events = match reply {
            ScriptedReply::Text(text) => {
                vec![
                    LlmEvent::Token {
                        content: text.clone(),
                        full_response: text.clone(),
                    },
                    LlmEvent::Done {
                        full_response: text,
                    },
                ]
            }
            ScriptedReply::ToolCalls(tool_calls) => vec![
                LlmEvent::ToolCall {
                    tool_calls,
                    full_response: String::new(),
                },
                LlmEvent::Done {
                    full_response: String::new(),
                },
            ],
            ScriptedReply::Error(error) => vec![LlmEvent::Error {
                error,
                full_response: String::new(),
            }],
        };

        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Executor backed by a plain function pointer.
pub struct FnExecutor(pub fn(Value) -> Value);

#[async_trait]
impl SkillExecutor for FnExecutor {
    async fn execute(&self, input: Value, _frame: &CallFrame) -> SkillResult<Value> {
        Ok((self.0)(input))
    }
}

/// Executor that always fails.
pub struct FailExecutor(pub String);

#[async_trait]
impl SkillExecutor for FailExecutor {
    async fn execute(&self, _input: Value, _frame: &CallFrame) -> SkillResult<Value> {
        Err(SkillError::Execution(self.0.clone()))
    }
}

/// Executor that records its last input and returns a fixed output.
pub struct CaptureExecutor {
    pub seen: Arc<Mutex<Option<Value>>>,
    pub output: Value,
}

#[async_trait]
impl SkillExecutor for CaptureExecutor {
    async fn execute(&self, input: Value, _frame: &CallFrame) -> SkillResult<Value> {
        *self.seen.lock() = Some(input);
        Ok(self.output.clone())
    }
}

/// Executor that fails the first `fail_times` invocations, then succeeds.
pub struct FlakyExecutor {
    pub calls: Arc<AtomicU32>,
    pub fail_times: u32,
    pub output: Value,
}

#[async_trait]
impl SkillExecutor for FlakyExecutor {
    async fn execute(&self, _input: Value, _frame: &CallFrame) -> SkillResult<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_times {
            Err(SkillError::Execution(format!("transient failure {}", n)))
        } else {
            Ok(self.output.clone())
        }
    }
}

/// Executor that re-enters the runtime by calling another skill.
pub struct RecursiveExecutor {
    pub target: String,
}

#[async_trait]
impl SkillExecutor for RecursiveExecutor {
    async fn execute(&self, input: Value, frame: &CallFrame) -> SkillResult<Value> {
        frame.call(&self.target, input).await
    }
}

/// Build a code-mode skill with the given schemas and executor.
pub fn make_skill(
    name: &str,
    input_schema: Value,
    output_schema: Value,
    executor: Arc<dyn SkillExecutor>,
) -> Skill {
    let meta: SkillMeta = serde_json::from_value(serde_json::json!({
        "name": name,
        "description": format!("test skill {}", name),
        "mode": "code",
        "input": input_schema,
        "output": output_schema,
    }))
    .expect("test manifest must parse");
    Skill::new(meta, executor)
}

/// Build a composite skill from a pipeline declaration.
pub fn make_composite(name: &str, pipeline: Value) -> Skill {
    let meta: SkillMeta = serde_json::from_value(serde_json::json!({
        "name": name,
        "description": format!("test pipeline {}", name),
        "mode": "composite",
        "pipeline": pipeline,
    }))
    .expect("test manifest must parse");
    let executor = Arc::new(openevo::execution::CompositeExecutor::new(meta.clone()));
    Skill::new(meta, executor)
}

pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn open_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Root frame over a fresh registry and the given provider.
pub fn frame_with(
    registry: Arc<SkillRegistry>,
    provider: Arc<dyn LlmProvider>,
    message: &str,
) -> CallFrame {
    CallFrame::root(registry, provider, "task-1".to_string(), message.to_string())
}
