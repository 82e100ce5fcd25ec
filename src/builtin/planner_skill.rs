//! Task planner skill.
//!
//! Routable entry point over [`crate::market::plan_task`]. A `ready: true`
//! result tells the agent to run its secondary routing pass against the
//! freshly expanded catalog.

use crate::agent::context::CallFrame;
use crate::builtin::MarketContext;
use crate::core::{Result, Skill, SkillError, SkillMeta};
use crate::execution::SkillExecutor;
use crate::market::plan_task;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

struct TaskPlannerExecutor {
    market: MarketContext,
}

#[async_trait]
impl SkillExecutor for TaskPlannerExecutor {
    async fn execute(&self, input: Value, frame: &CallFrame) -> Result<Value> {
        let task = input
            .get("task")
            .and_then(|t| t.as_str())
            .unwrap_or(&frame.message);

        let plan = plan_task(task, frame, &self.market.host, &self.market.store).await;
        serde_json::to_value(plan).map_err(SkillError::from)
    }
}

pub fn task_planner(market: MarketContext) -> Skill {
    let meta: SkillMeta = serde_json::from_value(json!({
        "name": "task_planner",
        "description": "Plan a task the current skills cannot serve: find, install, or develop the missing capabilities",
        "category": "planning",
        "mode": "code",
        "timeout": 300000,
        "input": {
            "type": "object",
            "properties": {
                "task": { "type": "string", "$resolve": "input.message" }
            }
        },
        "output": {
            "type": "object",
            "properties": {
                "capabilities": { "type": "array" },
                "ready": { "type": "boolean" }
            },
            "required": ["capabilities", "ready"]
        }
    }))
    .expect("builtin manifest must parse");

    Skill::new(meta, Arc::new(TaskPlannerExecutor { market }))
}
