//! openEvo - Skill Execution Runtime
//!
//! A pipeline engine that takes a user utterance, classifies intent, routes
//! the request across a dynamically loaded catalog of skills, executes them
//! individually, in parallel, or as a DAG, validates and repairs their
//! inputs and outputs against JSON-schema contracts, and funnels results
//! back into a streaming tool-call loop. When no skill satisfies a
//! capability, the task planner searches a remote registry, safety-checks a
//! candidate package, installs and hot-loads it, then re-routes.

pub mod agent;
pub mod builtin;
pub mod config;
pub mod core;
pub mod execution;
pub mod llm;
pub mod market;
pub mod pipeline;
pub mod resolver;
pub mod storage;
pub mod validation;

pub use crate::agent::{Agent, AgentInput, DefaultPromptCompiler, PromptCompiler};
pub use crate::core::registry::SkillRegistry;
pub use crate::core::{Skill, SkillError, SkillMeta, SkillMode};
pub use crate::storage::SkillStore;
