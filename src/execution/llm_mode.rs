//! LLM-mode executor with the Gate-2 self-repair loop.
//!
//! The model gets up to `min(retry + 1, 3)` attempts to produce output that
//! satisfies the skill's output schema. Each failed attempt feeds the
//! violation report back into the prompt and lowers the temperature.

use crate::agent::context::CallFrame;
use crate::agent::events::AgentEvent;
use crate::core::{Result, SkillError, SkillMeta, ValidationDirection};
use crate::execution::{prompt, SkillExecutor};
use crate::llm::types::{ChatMessage, ChatOptions};
use crate::llm::collect_text;
use crate::validation::{
    format_report_for_llm, validate_schema, ValidationReport, Violation, ViolationRule,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

const MAX_REPAIR_ATTEMPTS: u32 = 3;
const FIRST_ATTEMPT_TEMPERATURE: f32 = 0.3;
const REPAIR_TEMPERATURE: f32 = 0.1;
const MAX_OUTPUT_TOKENS: u32 = 2000;

pub struct LlmModeExecutor {
    meta: SkillMeta,
    template: String,
}

impl LlmModeExecutor {
    pub fn new(meta: SkillMeta, template: String) -> Self {
        LlmModeExecutor { meta, template }
    }
}

#[async_trait]
impl SkillExecutor for LlmModeExecutor {
    async fn execute(&self, input: Value, frame: &CallFrame) -> Result<Value> {
        let max_attempts = (self.meta.retry + 1).min(MAX_REPAIR_ATTEMPTS);
        let base_prompt = prompt::compile(&self.template, &input);
        let mut last_report: Option<ValidationReport> = None;

        for attempt in 1..=max_attempts {
            let mut text = base_prompt.clone();
            if let Some(report) = &last_report {
                text.push_str("\n\n");
                text.push_str(&format_report_for_llm(report));
            }

            let temperature = if attempt == 1 {
                FIRST_ATTEMPT_TEMPERATURE
            } else {
                REPAIR_TEMPERATURE
            };

            let options = ChatOptions {
                model: frame.model.clone(),
                max_tokens: Some(MAX_OUTPUT_TOKENS),
                temperature: Some(temperature),
                tools: None,
            };

            debug!(
                "LLM skill {} attempt {}/{}",
                self.meta.name, attempt, max_attempts
            );

            let reply = collect_text(
                frame.llm.as_ref(),
                vec![ChatMessage::user(text)],
                options,
            )
            .await
            .map_err(|e| SkillError::Llm(e.to_string()))?;

            let violations = match crate::validation::extract_json(&reply) {
                Some(candidate) => {
                    let violations = validate_schema(&candidate, &self.meta.output, "");
                    if violations.is_empty() {
                        return Ok(candidate);
                    }
                    violations
                }
                None => vec![Violation {
                    path: String::new(),
                    rule: ViolationRule::Format,
                    expected: "a JSON object".to_string(),
                    actual: "unparseable text".to_string(),
                    suggestion: "Respond with a single JSON object and nothing else"
                        .to_string(),
                }],
            };

            warn!(
                "LLM skill {} attempt {} invalid: {} violation(s)",
                self.meta.name,
                attempt,
                violations.len()
            );

            let report = ValidationReport {
                skill: self.meta.name.clone(),
                direction: ValidationDirection::Output.to_string(),
                violations,
            };
            frame.events.emit(AgentEvent::validation_retry(
                &self.meta.name,
                attempt,
                format_report_for_llm(&report),
            ));
            last_report = Some(report);
        }

        let violations = last_report.map(|r| r.violations).unwrap_or_default();
        Err(SkillError::validation(
            &self.meta.name,
            ValidationDirection::Output,
            violations,
        ))
    }
}
