//! Marketplace skills: search, validate, install.
//!
//! Thin skill-shaped wrappers over the `market` module so the router and
//! the tool-call loop can drive catalog expansion like any other work.

use crate::agent::context::CallFrame;
use crate::builtin::MarketContext;
use crate::core::{Result, Skill, SkillError, SkillMeta};
use crate::execution::SkillExecutor;
use crate::market::{install_skill, validate_skill_dir};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

struct SkillSearchExecutor {
    market: MarketContext,
}

#[async_trait]
impl SkillExecutor for SkillSearchExecutor {
    async fn execute(&self, input: Value, _frame: &CallFrame) -> Result<Value> {
        let query = input
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or_default();
        let limit = input
            .get("limit")
            .and_then(|l| l.as_u64())
            .unwrap_or(5) as usize;

        let results = self
            .market
            .host
            .search_skills(query, limit)
            .await
            .map_err(|e| SkillError::Execution(e.to_string()))?;

        Ok(json!({ "results": results }))
    }
}

pub fn skill_search(market: MarketContext) -> Skill {
    let meta: SkillMeta = serde_json::from_value(json!({
        "name": "skill_search",
        "description": "Search the remote marketplace for installable skill packages",
        "category": "market",
        "mode": "code",
        "timeout": 60000,
        "input": {
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 20 }
            },
            "required": ["query"]
        },
        "output": {
            "type": "object",
            "properties": {
                "results": { "type": "array" }
            },
            "required": ["results"]
        }
    }))
    .expect("builtin manifest must parse");

    Skill::new(meta, Arc::new(SkillSearchExecutor { market }))
}

struct SkillValidateExecutor;

#[async_trait]
impl SkillExecutor for SkillValidateExecutor {
    async fn execute(&self, input: Value, _frame: &CallFrame) -> Result<Value> {
        let path = input
            .get("path")
            .and_then(|p| p.as_str())
            .ok_or_else(|| SkillError::Execution("Missing package path".to_string()))?;

        let report = validate_skill_dir(Path::new(path))
            .map_err(|e| SkillError::Execution(e.to_string()))?;

        serde_json::to_value(report).map_err(SkillError::from)
    }
}

pub fn skill_validate() -> Skill {
    let meta: SkillMeta = serde_json::from_value(json!({
        "name": "skill_validate",
        "description": "Statically validate a skill package for structure and safety",
        "category": "market",
        "mode": "code",
        "input": {
            "type": "object",
            "properties": {
                "path": { "type": "string", "minLength": 1 }
            },
            "required": ["path"]
        },
        "output": {
            "type": "object",
            "properties": {
                "safe": { "type": "boolean" },
                "skill_json_valid": { "type": "boolean" },
                "issues": { "type": "array" },
                "warnings": { "type": "array" }
            },
            "required": ["safe", "skill_json_valid", "issues", "warnings"]
        }
    }))
    .expect("builtin manifest must parse");

    Skill::new(meta, Arc::new(SkillValidateExecutor))
}

struct SkillInstallExecutor {
    market: MarketContext,
}

#[async_trait]
impl SkillExecutor for SkillInstallExecutor {
    async fn execute(&self, input: Value, frame: &CallFrame) -> Result<Value> {
        let repo = input
            .get("repo")
            .and_then(|r| r.as_str())
            .ok_or_else(|| SkillError::Execution("Missing repo".to_string()))?;
        let name = input
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| SkillError::Execution("Missing skill name".to_string()))?;
        let git_ref = input.get("ref").and_then(|r| r.as_str());

        let outcome = install_skill(
            &self.market.host,
            &self.market.store,
            &frame.registry,
            repo,
            name,
            git_ref,
        )
        .await
        .map_err(|e| SkillError::Execution(e.to_string()))?;

        Ok(json!({
            "skill_name": outcome.skill_name,
            "installed_path": outcome.installed_path,
            "warnings": outcome.report.warnings,
        }))
    }
}

pub fn skill_install(market: MarketContext) -> Skill {
    let meta: SkillMeta = serde_json::from_value(json!({
        "name": "skill_install",
        "description": "Download, validate, and hot-install a skill package from the marketplace",
        "category": "market",
        "mode": "code",
        "timeout": 120000,
        "input": {
            "type": "object",
            "properties": {
                "repo": { "type": "string", "minLength": 1 },
                "name": { "type": "string", "minLength": 1 },
                "ref": { "type": "string" }
            },
            "required": ["repo", "name"]
        },
        "output": {
            "type": "object",
            "properties": {
                "skill_name": { "type": "string" },
                "installed_path": { "type": "string" },
                "warnings": { "type": "array" }
            },
            "required": ["skill_name"]
        }
    }))
    .expect("builtin manifest must parse");

    Skill::new(meta, Arc::new(SkillInstallExecutor { market }))
}
