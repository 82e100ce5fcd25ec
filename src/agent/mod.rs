//! Agent kernel: the end-to-end request lifecycle.
//!
//! A request flows through environment construction, memory prefetch,
//! intent recognition, routing execution (direct answer, clarify, single
//! skill, parallel multi skill, or serial pipeline), optional secondary
//! routing after a hot install, hook skills, and final response synthesis,
//! emitting events along the way.

pub mod context;
pub mod events;

use crate::core::registry::SkillRegistry;
use crate::core::{Result, SkillError};
use crate::llm::types::{ChatMessage, ChatOptions, LlmEvent, ToolDefinition, ToolOutcome};
use crate::llm::{chat_with_tools, LlmProvider};
use crate::validation::{
    apply_field_mapping, build_field_mapping, resolve_pipeline_input, validate_pipeline_interface,
};
use context::{CallFrame, DEFAULT_MAX_DEPTH};
use events::{AgentEvent, EventCallback, EventSink, EventStream};
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Intent confidence below which recognition is retried once.
const LOW_CONFIDENCE: f64 = 0.6;

/// Output fields probed, in order, when rendering a skill result as text.
const READABLE_FIELDS: [&str; 6] = [
    "formatted_text",
    "summary",
    "text",
    "content",
    "result",
    "message",
];

/// Composes the system prompt from the active tool catalog.
pub trait PromptCompiler: Send + Sync {
    fn compose(&self, tools: &[ToolDefinition]) -> String;
}

/// Minimal compiler: identity, capability list, answer style.
pub struct DefaultPromptCompiler;

impl PromptCompiler for DefaultPromptCompiler {
    fn compose(&self, tools: &[ToolDefinition]) -> String {
        let mut prompt = String::from(
            "You are an assistant that can call skills to complete tasks. \
             Answer directly when no skill is needed.\n",
        );
        if !tools.is_empty() {
            prompt.push_str("\nAvailable skills:\n");
            for tool in tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
        }
        prompt
    }
}

/// Per-request input to [`Agent::run`].
#[derive(Clone, Default)]
pub struct AgentInput {
    pub message: String,
    pub task_id: Option<String>,
    pub model: Option<String>,
    pub provider_id: Option<String>,
    /// Push callback; when set, events bypass the returned stream.
    pub on_event: Option<EventCallback>,
    pub cancel: Option<CancellationToken>,
}

impl AgentInput {
    pub fn message(message: impl Into<String>) -> Self {
        AgentInput {
            message: message.into(),
            ..Default::default()
        }
    }
}

pub type EnvBuilder = Arc<dyn Fn(&AgentInput) -> Map<String, Value> + Send + Sync>;

#[derive(Clone)]
pub struct Agent {
    registry: Arc<SkillRegistry>,
    llm: Arc<dyn LlmProvider>,
    prompt_compiler: Arc<dyn PromptCompiler>,
    before_skills: Vec<String>,
    after_skills: Vec<String>,
    env_builder: Option<EnvBuilder>,
    max_depth: usize,
}

/// One routed skill reference from an intent result.
#[derive(Debug, Clone)]
struct RoutedSkill {
    name: String,
    input: Value,
}

/// Outcome of one routed skill; failures never abort the batch.
#[derive(Debug, Clone)]
struct RoutedOutcome {
    name: String,
    result: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct RoutingDecision {
    strategy: String,
    skills: Vec<RoutedSkill>,
    direct_response: Option<String>,
    clarification: Option<String>,
}

impl Agent {
    pub fn new(registry: Arc<SkillRegistry>, llm: Arc<dyn LlmProvider>) -> Self {
        Agent {
            registry,
            llm,
            prompt_compiler: Arc::new(DefaultPromptCompiler),
            before_skills: Vec::new(),
            after_skills: Vec::new(),
            env_builder: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_prompt_compiler(mut self, compiler: Arc<dyn PromptCompiler>) -> Self {
        self.prompt_compiler = compiler;
        self
    }

    pub fn with_hooks(mut self, before: Vec<String>, after: Vec<String>) -> Self {
        self.before_skills = before;
        self.after_skills = after;
        self
    }

    pub fn with_env_builder(mut self, builder: EnvBuilder) -> Self {
        self.env_builder = Some(builder);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    /// Run a request, returning its event stream.
    ///
    /// Uncaught errors become an `error` event followed by `done`; the
    /// stream always terminates.
    pub fn run(&self, input: AgentInput) -> EventStream {
        let (sink, stream) = EventSink::channel(input.on_event.clone());
        let agent = self.clone();

        tokio::spawn(async move {
            if let Err(e) = agent.run_inner(input, sink.clone()).await {
                warn!("Request failed: {}", e);
                sink.emit(AgentEvent::error(e.to_string()));
                sink.emit(AgentEvent::done(String::new()));
            }
        });

        stream
    }

    async fn run_inner(&self, input: AgentInput, sink: EventSink) -> Result<()> {
        let task_id = input
            .task_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!("Running task {}", task_id);

        // 1. Environment construction.
        let mut frame = CallFrame::root(
            self.registry.clone(),
            self.llm.clone(),
            task_id,
            input.message.clone(),
        );
        frame.max_depth = self.max_depth;
        frame.model = input.model.clone();
        frame.provider_id = input.provider_id.clone();
        frame.events = sink.clone();
        if let Some(cancel) = &input.cancel {
            frame.cancel = cancel.clone();
        }
        if let Some(builder) = &self.env_builder {
            let seed = builder(&input);
            let mut env = frame.env.write();
            for (k, v) in seed {
                env.insert(k, v);
            }
        }

        // 2. Memory prefetch.
        self.prefetch_memory(&frame).await;

        // 3. Intent recognition.
        let intent = self.recognize_intent(&frame).await;
        if let Some(intent) = &intent {
            frame.scratch_set("intent", intent.clone());
        }

        // 4. Routing execution.
        let routing = intent.as_ref().and_then(parse_routing);
        let mut outcomes: Vec<RoutedOutcome> = Vec::new();

        if let Some(decision) = &routing {
            match decision.strategy.as_str() {
                "direct_answer" => {
                    let text = decision.direct_response.clone().unwrap_or_default();
                    sink.emit(AgentEvent::token(text.clone()));
                    sink.emit(AgentEvent::done(text));
                    return Ok(());
                }
                "clarify" => {
                    let text = decision.clarification.clone().unwrap_or_default();
                    sink.emit(AgentEvent::token(text.clone()));
                    sink.emit(AgentEvent::done(text));
                    return Ok(());
                }
                _ => {
                    outcomes = self
                        .execute_routed(&frame, &decision.skills, &decision.strategy)
                        .await;
                }
            }
        }

        // 5. Secondary routing after a hot install.
        if planner_ready(&outcomes) {
            info!("Planner installed new skills, re-routing");
            if let Some(second) = self.recognize_intent_once(&frame).await {
                if let Some(decision) = parse_routing(&second) {
                    let skills: Vec<RoutedSkill> = decision
                        .skills
                        .into_iter()
                        .filter(|s| s.name != "task_planner")
                        .collect();
                    let more = self
                        .execute_routed(&frame, &skills, &decision.strategy)
                        .await;
                    outcomes.extend(more);
                }
            }
        }

        // 6. Before-hooks, auto-injected input, intent recognition excluded.
        for hook in &self.before_skills {
            if hook == "intent_recognize" {
                continue;
            }
            if let Err(e) = frame.call(hook, json!({})).await {
                warn!("Before-hook {} failed: {}", hook, e);
            }
        }

        // 7. System prompt composition.
        let system_prompt = self
            .prompt_compiler
            .compose(&self.registry.to_tool_definitions());

        // 8. Final response synthesis.
        let response = if outcomes.iter().any(|o| o.result.is_some()) {
            self.summarize_results(&frame, &sink, &system_prompt, &outcomes)
                .await
        } else {
            self.tool_call_loop(&frame, &sink, &system_prompt).await?
        };

        // 9. After-hooks.
        for hook in &self.after_skills {
            let hook_input = json!({
                "message": frame.message,
                "response": response,
            });
            if let Err(e) = frame.call(hook, hook_input).await {
                warn!("After-hook {} failed: {}", hook, e);
            }
        }

        // 10. Done.
        sink.emit(AgentEvent::done(response));
        Ok(())
    }

    async fn prefetch_memory(&self, frame: &CallFrame) {
        if !self.registry.has("memory_search") {
            return;
        }
        match frame.call("memory_search", json!({})).await {
            Ok(result) => {
                let memories = result
                    .get("memories")
                    .cloned()
                    .unwrap_or(result);
                frame.env_set("relevantMemories", memories);
            }
            Err(e) => {
                warn!("Memory prefetch failed: {}", e);
                frame.env_set("relevantMemories", Value::Array(vec![]));
            }
        }
    }

    /// Intent recognition with one low-confidence retry.
    async fn recognize_intent(&self, frame: &CallFrame) -> Option<Value> {
        let first = self.recognize_intent_once(frame).await?;

        let confidence = top_confidence(&first);
        let strategy = first
            .get("routing")
            .and_then(|r| r.get("strategy"))
            .and_then(|s| s.as_str())
            .unwrap_or("");

        if confidence < LOW_CONFIDENCE && strategy != "clarify" {
            debug!(
                "Intent confidence {:.2} below threshold, retrying once",
                confidence
            );
            let feedback = json!({
                "retry_feedback": format!(
                    "The previous classification scored {:.2}, below the 0.6 \
                     confidence threshold. Reconsider the intent or choose \
                     the clarify strategy.",
                    confidence
                )
            });
            if let Ok(second) = frame.call("intent_recognize", feedback).await {
                return Some(second);
            }
        }
        Some(first)
    }

    async fn recognize_intent_once(&self, frame: &CallFrame) -> Option<Value> {
        if !self.registry.has("intent_recognize") {
            return None;
        }
        match frame.call("intent_recognize", json!({})).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Intent recognition failed: {}", e);
                None
            }
        }
    }

    /// Execute routed skills. `multi_skill` with two or more entries runs in
    /// parallel; results are delivered in input order either way. `pipeline`
    /// derives each step's input from the previous result.
    async fn execute_routed(
        &self,
        frame: &CallFrame,
        skills: &[RoutedSkill],
        strategy: &str,
    ) -> Vec<RoutedOutcome> {
        if skills.is_empty() {
            return Vec::new();
        }

        if strategy == "multi_skill" && skills.len() >= 2 {
            let calls = skills
                .iter()
                .map(|routed| async move {
                    outcome_of(&routed.name, frame.call(&routed.name, routed.input.clone()).await)
                });
            return futures::future::join_all(calls).await;
        }

        let mut outcomes: Vec<RoutedOutcome> = Vec::new();
        let mut prev_success: Option<(String, Value)> = None;

        for routed in skills {
            let input = if strategy == "pipeline" {
                match &prev_success {
                    Some((prev_name, prev_value)) => {
                        self.derive_pipeline_input(prev_name, prev_value, routed)
                    }
                    None => routed.input.clone(),
                }
            } else {
                routed.input.clone()
            };

            let outcome = outcome_of(&routed.name, frame.call(&routed.name, input).await);
            if let Some(result) = &outcome.result {
                prev_success = Some((routed.name.clone(), result.clone()));
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Bridge a pipeline neighbor pair: deep extraction from the previous
    /// result, then interface remapping for still-missing fields. Declared
    /// routing input wins over both.
    fn derive_pipeline_input(
        &self,
        prev_name: &str,
        prev_value: &Value,
        next: &RoutedSkill,
    ) -> Value {
        let next_skill = match self.registry.get(&next.name) {
            Some(s) => s,
            // No schema to bridge against, carry the result as-is.
            None => return prev_value.clone(),
        };
        if next_skill.meta.input_properties().map(|p| p.is_empty()).unwrap_or(true) {
            return prev_value.clone();
        }

        let mut merged = resolve_pipeline_input(prev_value, &next_skill.meta.input);

        let upstream_schema = self
            .registry
            .get(prev_name)
            .map(|s| s.meta.output.clone())
            .unwrap_or_else(|| json!({}));
        let issues = validate_pipeline_interface(&upstream_schema, &next_skill.meta.input);
        let mapping = build_field_mapping(&issues);
        for (field, value) in apply_field_mapping(prev_value, &mapping) {
            merged.entry(field).or_insert(value);
        }

        if let Some(declared) = next.input.as_object() {
            for (k, v) in declared {
                merged.insert(k.clone(), v.clone());
            }
        }
        Value::Object(merged)
    }

    /// Stream a summary of successful results; on failure fall back to the
    /// last success's human-readable field.
    async fn summarize_results(
        &self,
        frame: &CallFrame,
        sink: &EventSink,
        system_prompt: &str,
        outcomes: &[RoutedOutcome],
    ) -> String {
        let results_json: Vec<Value> = outcomes
            .iter()
            .map(|o| {
                json!({
                    "skill": o.name,
                    "result": o.result,
                    "error": o.error,
                })
            })
            .collect();

        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(frame.message.clone()),
            ChatMessage::user(format!(
                "The following skills ran for this request. Summarize the \
                 results into one direct answer for the user.\n{}",
                serde_json::to_string_pretty(&results_json).unwrap_or_default()
            )),
        ];

        let options = ChatOptions {
            model: frame.model.clone(),
            ..Default::default()
        };

        match self.stream_plain(frame, sink, messages, options).await {
            Ok(full) => full,
            Err(e) => {
                warn!("Summary synthesis failed, rendering raw result: {}", e);
                let fallback = outcomes
                    .iter()
                    .rev()
                    .find_map(|o| o.result.as_ref())
                    .map(readable_text)
                    .unwrap_or_default();
                sink.emit(AgentEvent::token(fallback.clone()));
                fallback
            }
        }
    }

    async fn stream_plain(
        &self,
        frame: &CallFrame,
        sink: &EventSink,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<String> {
        let mut stream = frame
            .llm
            .chat(messages, options)
            .await
            .map_err(|e| SkillError::Llm(e.to_string()))?;

        let mut full = String::new();
        while let Some(event) = stream.next().await {
            match event {
                LlmEvent::Token {
                    content,
                    full_response,
                } => {
                    full = full_response;
                    sink.emit(AgentEvent::token(content));
                }
                LlmEvent::Done { full_response } => return Ok(full_response),
                LlmEvent::Error { error, .. } => return Err(SkillError::Llm(error)),
                LlmEvent::ToolCall { .. } => {}
            }
        }
        Ok(full)
    }

    /// No routed results: let the model drive skills through tool calls.
    async fn tool_call_loop(
        &self,
        frame: &CallFrame,
        sink: &EventSink,
        system_prompt: &str,
    ) -> Result<String> {
        let tools = self.registry.to_tool_definitions();
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(frame.message.clone()),
        ];
        let options = ChatOptions {
            model: frame.model.clone(),
            tools: Some(tools),
            ..Default::default()
        };

        let exec = |call: crate::llm::types::ToolCall| async move {
            match frame.call(&call.name, call.arguments).await {
                Ok(output) => ToolOutcome {
                    tool_use_id: call.id,
                    output,
                    is_error: false,
                },
                // Wrapped so the model can see the failure and recover.
                Err(e) => ToolOutcome {
                    tool_use_id: call.id,
                    output: json!({ "error": e.to_string() }),
                    is_error: true,
                },
            }
        };

        let token_sink = sink.clone();
        chat_with_tools(
            self.llm.as_ref(),
            messages,
            options,
            exec,
            &frame.cancel,
            move |content| token_sink.emit(AgentEvent::token(content)),
        )
        .await
        .map_err(|e| match e {
            crate::llm::LlmError::Cancelled => SkillError::Cancelled,
            other => SkillError::Llm(other.to_string()),
        })
    }
}

fn outcome_of(name: &str, result: Result<Value>) -> RoutedOutcome {
    match result {
        Ok(value) => RoutedOutcome {
            name: name.to_string(),
            result: Some(value),
            error: None,
        },
        Err(e) => {
            warn!("Routed skill {} failed: {}", name, e);
            RoutedOutcome {
                name: name.to_string(),
                result: None,
                error: Some(e.to_string()),
            }
        }
    }
}

fn top_confidence(intent: &Value) -> f64 {
    intent
        .get("intents")
        .and_then(|i| i.as_array())
        .and_then(|i| i.first())
        .and_then(|i| i.get("confidence"))
        .and_then(|c| c.as_f64())
        .unwrap_or(0.0)
}

fn planner_ready(outcomes: &[RoutedOutcome]) -> bool {
    outcomes.iter().any(|o| {
        o.name == "task_planner"
            && o.result
                .as_ref()
                .and_then(|r| r.get("ready"))
                .and_then(|r| r.as_bool())
                .unwrap_or(false)
    })
}

/// Render a skill result as plain text for the no-summary fallback.
fn readable_text(result: &Value) -> String {
    for field in READABLE_FIELDS {
        if let Some(text) = result.get(field).and_then(|v| v.as_str()) {
            return text.to_string();
        }
    }
    serde_json::to_string_pretty(result).unwrap_or_default()
}

fn parse_routing(intent: &Value) -> Option<RoutingDecision> {
    let routing = intent.get("routing")?;
    let strategy = routing.get("strategy")?.as_str()?.to_string();

    // The classifier sometimes leaves the skill list at the result's top
    // level; accept it but flag the drift.
    let raw_skills = routing.get("skills").or_else(|| {
        let top = intent.get("skills");
        if top.is_some() {
            warn!("Routing skills found at intent top level instead of routing.skills");
        }
        top
    });

    let skills = raw_skills
        .and_then(|s| s.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(RoutedSkill {
                        name: name.clone(),
                        input: json!({}),
                    }),
                    Value::Object(obj) => Some(RoutedSkill {
                        name: obj.get("name")?.as_str()?.to_string(),
                        input: obj.get("input").cloned().unwrap_or_else(|| json!({})),
                    }),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(RoutingDecision {
        strategy,
        skills,
        direct_response: routing
            .get("direct_response")
            .and_then(|v| v.as_str())
            .map(String::from),
        clarification: routing
            .get("clarification")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}
