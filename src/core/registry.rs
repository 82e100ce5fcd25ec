//! In-memory skill registry.
//!
//! The registry is the single owner of loaded skills. Hot-load paths
//! (marketplace install, custom-layer reload) are the only writers;
//! registration and removal are atomic at entry granularity, so a reader
//! never observes a half-inserted skill.

use crate::core::{is_valid_skill_name, Result, Skill, SkillError};
use crate::llm::types::ToolDefinition;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<Skill>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        SkillRegistry {
            skills: RwLock::new(HashMap::new()),
        }
    }

    /// Register a skill, replacing any existing entry with the same name.
    ///
    /// Layered loading relies on the replacement semantics: later layers
    /// override earlier ones on name collision.
    pub fn register(&self, skill: Skill) -> Result<()> {
        if !is_valid_skill_name(&skill.meta.name) {
            return Err(SkillError::Execution(format!(
                "Invalid skill name: {}",
                skill.meta.name
            )));
        }

        let name = skill.meta.name.clone();
        let version = skill.meta.version.clone();
        let previous = self.skills.write().insert(name.clone(), Arc::new(skill));
        match previous {
            Some(old) => info!(
                "Registered skill {} v{} (overrides v{})",
                name, version, old.meta.version
            ),
            None => debug!("Registered skill {}", name),
        }
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Skill>> {
        let removed = self.skills.write().remove(name);
        if removed.is_some() {
            info!("Unregistered skill {}", name);
        } else {
            warn!("Unregister of unknown skill {}", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.skills.read().contains_key(name)
    }

    /// All registered skills, sorted by name for stable listings.
    pub fn list(&self) -> Vec<Arc<Skill>> {
        let mut all: Vec<Arc<Skill>> = self.skills.read().values().cloned().collect();
        all.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        all
    }

    pub fn list_by_category(&self, category: &str) -> Vec<Arc<Skill>> {
        self.list()
            .into_iter()
            .filter(|s| s.meta.category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.skills.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.read().is_empty()
    }

    /// Project the catalog into tool definitions for the tool-call loop.
    pub fn to_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .iter()
            .map(|skill| ToolDefinition {
                name: skill.meta.name.clone(),
                description: skill.meta.description.clone(),
                parameters: skill.meta.input.clone(),
            })
            .collect()
    }
}
