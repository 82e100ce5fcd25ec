//! Built-in skills registered at boot.
//!
//! These are native Rust executors carrying the same manifest shape as
//! disk-loaded skills, so every gate and directive applies to them too.

mod intent;
mod market_skills;
mod memory;
mod planner_skill;

use crate::core::registry::SkillRegistry;
use crate::core::Result;
use crate::market::CodeHostClient;
use crate::storage::SkillStore;
use std::sync::Arc;
use tracing::info;

/// Marketplace handles shared by the market-facing builtins.
#[derive(Clone)]
pub struct MarketContext {
    pub host: Arc<CodeHostClient>,
    pub store: Arc<SkillStore>,
}

/// Register every built-in skill.
pub fn register_builtins(registry: &SkillRegistry, market: &MarketContext) -> Result<()> {
    registry.register(intent::intent_recognize_skill())?;
    registry.register(memory::memory_search_skill())?;
    registry.register(market_skills::skill_search(market.clone()))?;
    registry.register(market_skills::skill_validate())?;
    registry.register(market_skills::skill_install(market.clone()))?;
    registry.register(planner_skill::task_planner(market.clone()))?;
    info!("Registered built-in skills");
    Ok(())
}
