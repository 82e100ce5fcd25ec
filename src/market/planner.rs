//! Task planner: capability closure over the registry and the marketplace.
//!
//! Classifies a task into required capabilities, then tries to satisfy each
//! one (up to three concurrently): an already-registered skill, a searched
//! and hot-installed package, or a `skill_develop` fallback when that skill
//! is available. The returned `ready` flag is what triggers the agent's
//! secondary routing pass.

use crate::agent::context::CallFrame;
use crate::llm::types::{ChatMessage, ChatOptions};
use crate::llm::collect_text;
use crate::market::{install_skill, CodeHostClient};
use crate::storage::SkillStore;
use crate::validation::extract_json;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

/// Capabilities resolved concurrently at a time.
const PLANNER_CONCURRENCY: usize = 3;

/// Minimum search score worth installing.
const INSTALL_SCORE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStatus {
    Existing,
    Installed,
    Developed,
    Unsatisfied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityPlan {
    pub capability: String,
    pub status: CapabilityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub capabilities: Vec<CapabilityPlan>,
    pub ready: bool,
}

/// Build an execution plan for a task the current catalog cannot serve.
pub async fn plan_task(
    task: &str,
    frame: &CallFrame,
    host: &CodeHostClient,
    store: &SkillStore,
) -> TaskPlan {
    let capabilities = classify_capabilities(task, frame).await;
    if capabilities.is_empty() {
        warn!("Planner could not derive capabilities for task");
        return TaskPlan {
            capabilities: vec![],
            ready: false,
        };
    }

    info!("Planning {} capabilit(ies)", capabilities.len());

    let plans: Vec<CapabilityPlan> = stream::iter(
        capabilities
            .into_iter()
            .map(|capability| satisfy_capability(capability, frame, host, store)),
    )
    .buffered(PLANNER_CONCURRENCY)
    .collect()
    .await;

    let ready = plans
        .iter()
        .all(|p| p.status != CapabilityStatus::Unsatisfied);

    TaskPlan {
        capabilities: plans,
        ready,
    }
}

/// Ask the model which capabilities the task needs.
async fn classify_capabilities(task: &str, frame: &CallFrame) -> Vec<String> {
    let prompt = format!(
        "Classify the following task into the minimal list of distinct \
         capabilities needed to complete it. A capability is a short \
         snake_case identifier such as \"translate_zh_en\" or \
         \"stock_quote\". Respond with JSON only: \
         {{\"capabilities\": [\"...\"]}}\n\nTask: {}",
        task
    );

    let options = ChatOptions {
        model: frame.model.clone(),
        max_tokens: Some(500),
        temperature: Some(0.1),
        tools: None,
    };

    match collect_text(frame.llm.as_ref(), vec![ChatMessage::user(prompt)], options).await {
        Ok(reply) => extract_json(&reply)
            .and_then(|v| {
                v.get("capabilities").and_then(|c| c.as_array()).map(|c| {
                    c.iter()
                        .filter_map(|item| item.as_str().map(String::from))
                        .collect()
                })
            })
            .unwrap_or_default(),
        Err(e) => {
            warn!("Capability classification failed: {}", e);
            vec![]
        }
    }
}

async fn satisfy_capability(
    capability: String,
    frame: &CallFrame,
    host: &CodeHostClient,
    store: &SkillStore,
) -> CapabilityPlan {
    // Already in the catalog?
    if let Some(existing) = find_registered(&capability, frame) {
        debug!("Capability {} served by registered {}", capability, existing);
        return CapabilityPlan {
            capability,
            status: CapabilityStatus::Existing,
            skill: Some(existing),
            detail: None,
        };
    }

    // Search the marketplace and install the best safe candidate.
    match host.search_skills(&capability, 3).await {
        Ok(candidates) => {
            let best = candidates
                .into_iter()
                .find(|c| c.has_manifest && c.score >= INSTALL_SCORE_THRESHOLD);
            if let Some(candidate) = best {
                info!(
                    "Installing {} (score {:.2}) for capability {}",
                    candidate.full_name, candidate.score, capability
                );
                match install_skill(
                    host,
                    store,
                    &frame.registry,
                    &candidate.full_name,
                    &capability,
                    None,
                )
                .await
                {
                    Ok(outcome) => {
                        return CapabilityPlan {
                            capability,
                            status: CapabilityStatus::Installed,
                            skill: Some(outcome.skill_name),
                            detail: Some(candidate.full_name),
                        }
                    }
                    Err(e) => warn!("Install for {} failed: {}", capability, e),
                }
            }
        }
        Err(e) => warn!("Marketplace search for {} failed: {}", capability, e),
    }

    // Last resort: develop the skill when a developer skill exists.
    if frame.registry.has("skill_develop") {
        match frame
            .call("skill_develop", json!({ "capability": capability }))
            .await
        {
            Ok(result) => {
                let skill = result
                    .get("skill")
                    .and_then(|s| s.as_str())
                    .map(String::from);
                return CapabilityPlan {
                    capability,
                    status: CapabilityStatus::Developed,
                    skill,
                    detail: None,
                };
            }
            Err(e) => warn!("skill_develop for {} failed: {}", capability, e),
        }
    }

    CapabilityPlan {
        capability,
        status: CapabilityStatus::Unsatisfied,
        skill: None,
        detail: Some("No registered, installable, or developable skill".to_string()),
    }
}

fn find_registered(capability: &str, frame: &CallFrame) -> Option<String> {
    let needle = capability.to_lowercase();
    frame
        .registry
        .list()
        .iter()
        .find(|skill| {
            let name = skill.meta.name.to_lowercase();
            name == needle
                || name.contains(&needle)
                || needle.contains(&name)
                || skill
                    .meta
                    .tags
                    .iter()
                    .any(|t| t.to_lowercase() == needle)
        })
        .map(|skill| skill.meta.name.clone())
}
