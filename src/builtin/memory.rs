//! Memory search stub.
//!
//! Long-term memory persistence is an external collaborator; this stub
//! keeps the prefetch path and the `memory.relevantMemories` resolver
//! namespace working until a real backend skill overrides it.

use crate::agent::context::CallFrame;
use crate::core::{Result, Skill, SkillMeta, SYSTEM_CATEGORY};
use crate::execution::SkillExecutor;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

struct MemorySearchStub;

#[async_trait]
impl SkillExecutor for MemorySearchStub {
    async fn execute(&self, _input: Value, _frame: &CallFrame) -> Result<Value> {
        Ok(json!({ "memories": [] }))
    }
}

pub fn memory_search_skill() -> Skill {
    let meta: SkillMeta = serde_json::from_value(json!({
        "name": "memory_search",
        "description": "Search long-term memory for entries relevant to the current message",
        "category": SYSTEM_CATEGORY,
        "mode": "code",
        "input": {
            "type": "object",
            "properties": {
                "query": { "type": "string", "$resolve": "input.message" }
            }
        },
        "output": {
            "type": "object",
            "properties": {
                "memories": { "type": "array" }
            },
            "required": ["memories"]
        }
    }))
    .expect("builtin manifest must parse");

    Skill::new(meta, Arc::new(MemorySearchStub))
}
