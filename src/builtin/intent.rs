//! Intent recognition skill.
//!
//! An llm-mode skill whose inputs are entirely `$resolve`-injected: the
//! user message, the routable skill catalog, and prefetched memories. Its
//! output drives the agent's routing strategy.

use crate::core::{Skill, SkillMeta, SYSTEM_CATEGORY};
use crate::execution::LlmModeExecutor;
use serde_json::json;
use std::sync::Arc;

const PROMPT: &str = r#"You are the intent router of an assistant runtime.

User message:
{{input.message}}

Available skills (JSON):
{{input.available_skills}}

Relevant memories (JSON):
{{input.relevant_memories}}
{{#if input.retry_feedback}}
Note on your previous attempt:
{{input.retry_feedback}}
{{/if}}

Classify the message and choose a routing strategy:
- "direct_answer" when no skill is needed; put the reply in routing.direct_response.
- "clarify" when the request is ambiguous; put the question in routing.clarification.
- "single_skill" for exactly one skill.
- "multi_skill" for independent skills that can run in parallel.
- "pipeline" for skills that must run in order, each feeding the next.

List chosen skills under routing.skills as {"name", "input"} objects, using
only fields the skill declares. Extract entities you noticed into "entities".

Respond with JSON only:
{"intents": [{"name": "...", "confidence": 0.0}], "entities": {}, "routing": {"strategy": "...", "skills": [], "direct_response": null, "clarification": null}}
"#;

pub fn intent_recognize_skill() -> Skill {
    let meta: SkillMeta = serde_json::from_value(json!({
        "name": "intent_recognize",
        "description": "Classify a user message into intents and choose a routing strategy",
        "category": SYSTEM_CATEGORY,
        "mode": "llm",
        "retry": 1,
        "input": {
            "type": "object",
            "properties": {
                "message": { "type": "string", "$resolve": "input.message" },
                "available_skills": { "type": "array", "$resolve": "skills.list" },
                "relevant_memories": { "type": "array", "$resolve": "memory.relevantMemories" },
                "retry_feedback": { "type": "string" }
            },
            "required": ["message"]
        },
        "output": {
            "type": "object",
            "properties": {
                "intents": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                        },
                        "required": ["name", "confidence"]
                    }
                },
                "entities": { "type": "object" },
                "routing": {
                    "type": "object",
                    "properties": {
                        "strategy": {
                            "type": "string",
                            "enum": ["direct_answer", "single_skill", "multi_skill", "pipeline", "clarify"]
                        },
                        "skills": { "type": "array" },
                        "direct_response": { "type": "string" },
                        "clarification": { "type": "string" }
                    },
                    "required": ["strategy"]
                }
            },
            "required": ["intents", "routing"]
        }
    }))
    .expect("builtin manifest must parse");

    let executor = Arc::new(LlmModeExecutor::new(meta.clone(), PROMPT.to_string()));
    Skill::new(meta, executor)
}
