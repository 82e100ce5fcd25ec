//! Per-request call frames.
//!
//! A frame is the capability a skill executes under: registry lookups, the
//! LLM handle, the shared `scratch`/`env` stores, depth accounting, and the
//! event sink. `scratch` and `env` are request-scoped records shared by
//! handle across all frames; they are never copied on descent.

use crate::agent::events::{AgentEvent, EventSink};
use crate::core::registry::SkillRegistry;
use crate::core::{Result, Skill, SkillError, SkillMode, ValidationDirection};
use crate::llm::LlmProvider;
use crate::resolver;
use crate::validation::validate_schema;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Request-scoped mutable store shared across frames.
pub type SharedMap = Arc<RwLock<Map<String, Value>>>;

pub fn shared_map() -> SharedMap {
    Arc::new(RwLock::new(Map::new()))
}

#[derive(Clone)]
pub struct CallFrame {
    pub registry: Arc<SkillRegistry>,
    pub llm: Arc<dyn LlmProvider>,
    pub env: SharedMap,
    pub scratch: SharedMap,
    pub depth: usize,
    pub max_depth: usize,
    pub parent_skill: Option<String>,
    pub task_id: String,
    /// Original user utterance, backing the `input.*` resolver namespace.
    pub message: String,
    pub model: Option<String>,
    pub provider_id: Option<String>,
    pub events: EventSink,
    pub cancel: CancellationToken,
}

impl CallFrame {
    pub fn root(
        registry: Arc<SkillRegistry>,
        llm: Arc<dyn LlmProvider>,
        task_id: String,
        message: String,
    ) -> Self {
        CallFrame {
            registry,
            llm,
            env: shared_map(),
            scratch: shared_map(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            parent_skill: None,
            task_id,
            message,
            model: None,
            provider_id: None,
            events: EventSink::null(),
            cancel: CancellationToken::new(),
        }
    }

    /// Child frame for a nested skill invocation. Stores are shared, only
    /// depth and lineage change.
    fn child(&self, skill_name: &str) -> Self {
        let mut frame = self.clone();
        frame.depth = self.depth + 1;
        frame.parent_skill = Some(skill_name.to_string());
        frame
    }

    /// Read a value out of the request environment.
    pub fn env_get(&self, key: &str) -> Option<Value> {
        self.env.read().get(key).cloned()
    }

    pub fn env_set(&self, key: &str, value: Value) {
        self.env.write().insert(key.to_string(), value);
    }

    pub fn scratch_get(&self, key: &str) -> Option<Value> {
        self.scratch.read().get(key).cloned()
    }

    pub fn scratch_set(&self, key: &str, value: Value) {
        self.scratch.write().insert(key.to_string(), value);
    }

    /// The shared call path used by routing, pipelines, the resolver, and
    /// the tool-call executor.
    ///
    /// Performs, in order: depth gate, directive resolution with
    /// caller-supplied values winning, Gate 1 input validation, executor
    /// invocation under the skill timeout, Gate 2 output validation for
    /// code mode, and `$returnSkill` post-processing.
    pub fn call<'a>(
        &'a self,
        name: &'a str,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(SkillError::Cancelled);
            }

            if self.depth >= self.max_depth {
                return Err(SkillError::DepthExceeded {
                    name: name.to_string(),
                    current: self.depth,
                    max: self.max_depth,
                });
            }

            let skill = self
                .registry
                .get(name)
                .ok_or_else(|| SkillError::NotFound(name.to_string()))?;

            let resolved = resolver::resolve_input(&skill, input, self).await?;

            let violations = validate_schema(&resolved, &skill.meta.input, "");
            if !violations.is_empty() {
                warn!(
                    "Gate 1 rejected input for {}: {} violation(s)",
                    name,
                    violations.len()
                );
                return Err(SkillError::validation(
                    name,
                    ValidationDirection::Input,
                    violations,
                ));
            }

            self.events.emit(AgentEvent::skill_call(name));
            debug!("Calling skill {} at depth {}", name, self.depth);

            let child = self.child(name);
            let started = Instant::now();

            let output = self.run_executor(&skill, resolved, &child).await?;

            let mut output = output;
            if skill.meta.mode == SkillMode::Code {
                let violations = validate_schema(&output, &skill.meta.output, "");
                if !violations.is_empty() {
                    warn!(
                        "Gate 2 rejected output of {}: {} violation(s)",
                        name,
                        violations.len()
                    );
                    return Err(SkillError::validation(
                        name,
                        ValidationDirection::Output,
                        violations,
                    ));
                }
            }

            resolver::apply_return_skills(&skill.meta.output, &mut output);

            let duration_ms = started.elapsed().as_millis() as u64;
            self.events
                .emit(AgentEvent::skill_result(name, duration_ms));

            Ok(output)
        })
    }

    async fn run_executor(
        &self,
        skill: &Arc<Skill>,
        input: Value,
        child: &CallFrame,
    ) -> Result<Value> {
        let timeout = Duration::from_millis(skill.meta.timeout_ms);
        match tokio::time::timeout(timeout, skill.executor.execute(input, child)).await {
            Ok(result) => result,
            Err(_) => Err(SkillError::Timeout {
                name: skill.meta.name.clone(),
                timeout_ms: skill.meta.timeout_ms,
            }),
        }
    }

    /// Invoke a `$returnSkill`/`$skill:` handle produced earlier in the
    /// request. Re-enters [`CallFrame::call`] with all gates.
    pub async fn invoke_handle(&self, handle: &Value, input: Value) -> Result<Value> {
        let name = resolver::handle_name(handle).ok_or_else(|| {
            SkillError::Execution("Value is not a skill handle".to_string())
        })?;
        self.call(&name, input).await
    }
}
