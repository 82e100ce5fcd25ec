//! Core types and data structures for the skill runtime.
//!
//! This module defines the fundamental types used across the system:
//! - Skill metadata, execution modes, and manifest normalization
//! - Pipeline step declarations
//! - The in-memory skill registry
//! - The shared error taxonomy

pub mod error;
pub mod registry;

use crate::execution::SkillExecutor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub use error::{Result, SkillError, ValidationDirection};

/// Default per-skill execution timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default semver assigned to manifests that omit one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Category reserved for runtime-internal skills; hidden from `skills.list`.
pub const SYSTEM_CATEGORY: &str = "system";

/// How a skill executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SkillMode {
    /// Executable artifact (`index.js` / `index.ts`) run as a subprocess.
    Code,
    /// Prompt template (`prompt.md`) with a schema-repair loop.
    Llm,
    /// Declarative pipeline of other skills, or a bundled executor.
    Composite,
}

impl fmt::Display for SkillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkillMode::Code => write!(f, "code"),
            SkillMode::Llm => write!(f, "llm"),
            SkillMode::Composite => write!(f, "composite"),
        }
    }
}

impl FromStr for SkillMode {
    type Err = SkillError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "code" => Ok(SkillMode::Code),
            "llm" => Ok(SkillMode::Llm),
            "composite" => Ok(SkillMode::Composite),
            other => Err(SkillError::Execution(format!(
                "Unknown skill mode: {}",
                other
            ))),
        }
    }
}

/// One step of a declarative composite pipeline.
///
/// `input` values may embed `{{ path | pipe }}` templates resolved against
/// `{input, steps, item}`. A step carrying `depends` promotes the whole
/// pipeline to DAG scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step name, the key under which its result is stored.
    pub step: String,

    /// Skill to invoke.
    pub skill: String,

    #[serde(default)]
    pub input: Option<Value>,

    /// Template expression; a falsy result skips the step.
    #[serde(default)]
    pub condition: Option<String>,

    /// Template that must resolve to an array; the step runs per element.
    #[serde(default)]
    pub foreach: Option<String>,

    /// Names of steps that must complete before this one starts.
    #[serde(default)]
    pub depends: Option<Vec<String>>,

    /// Fan-out bound for `foreach`. 1 is sequential, 0 is unbounded.
    #[serde(default, rename = "maxConcurrency")]
    pub max_concurrency: Option<usize>,

    #[serde(default, rename = "continueOnError")]
    pub continue_on_error: bool,

    #[serde(default)]
    pub retry: Option<u32>,

    /// Base backoff delay in milliseconds (default 1000).
    #[serde(default, rename = "retryDelay")]
    pub retry_delay_ms: Option<u64>,

    #[serde(default, rename = "timeout")]
    pub timeout_ms: Option<u64>,
}

/// Declarative description of a skill, parsed from `skill.json`.
///
/// Input and output schemas are JSON-schema trees (object at the root) and
/// are immutable once the skill is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMeta {
    pub name: String,

    pub description: String,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_object_schema")]
    pub input: Value,

    #[serde(default = "default_object_schema")]
    pub output: Value,

    pub mode: SkillMode,

    #[serde(default = "default_timeout", rename = "timeout")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: u32,

    #[serde(default)]
    pub author: Option<String>,

    /// Names of skills this one is expected to call through its context.
    #[serde(default)]
    pub calls: Vec<String>,

    /// Composite mode: ordered steps.
    #[serde(default)]
    pub pipeline: Option<Vec<PipelineStep>>,

    /// Composite mode: named-output projection evaluated after the last step.
    #[serde(default, rename = "outputMapping")]
    pub output_mapping: Option<serde_json::Map<String, Value>>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl SkillMeta {
    /// Top-level property schemas of the input schema.
    pub fn input_properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.input.get("properties").and_then(|p| p.as_object())
    }

    /// Top-level property schemas of the output schema.
    pub fn output_properties(&self) -> Option<&serde_json::Map<String, Value>> {
        self.output.get("properties").and_then(|p| p.as_object())
    }
}

/// Skill names: lowercase, underscores, leading letter.
pub fn is_valid_skill_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A loaded skill: metadata, an executor, and the directory it came from.
///
/// The registry exclusively owns skills; call frames hold name lookups.
#[derive(Clone)]
pub struct Skill {
    pub meta: SkillMeta,
    pub executor: Arc<dyn SkillExecutor>,
    /// Source directory, used to resolve script directives and artifacts.
    pub dir: Option<PathBuf>,
}

impl Skill {
    pub fn new(meta: SkillMeta, executor: Arc<dyn SkillExecutor>) -> Self {
        Skill {
            meta,
            executor,
            dir: None,
        }
    }

    pub fn with_dir(mut self, dir: PathBuf) -> Self {
        self.dir = Some(dir);
        self
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

impl fmt::Debug for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.meta.name)
            .field("mode", &self.meta.mode)
            .field("dir", &self.dir)
            .finish()
    }
}

/// Compact summary of a skill, used by the `skills.list` resolver namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
    pub category: String,
    pub input: Vec<FieldSummary>,
}

/// One input field descriptor inside a [`SkillSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

impl SkillSummary {
    /// Summarize a skill for intent routing. Fields auto-filled by a
    /// `$resolve` directive are stripped, the model never supplies them.
    pub fn from_meta(meta: &SkillMeta) -> Self {
        let required: Vec<String> = meta
            .input
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| {
                r.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut fields = Vec::new();
        if let Some(props) = meta.input_properties() {
            for (key, schema) in props {
                if schema.get("$resolve").is_some() {
                    continue;
                }
                fields.push(FieldSummary {
                    name: key.clone(),
                    field_type: schema
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("any")
                        .to_string(),
                    description: schema
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(String::from),
                    required: required.contains(key),
                });
            }
        }

        SkillSummary {
            name: meta.name.clone(),
            description: meta.description.clone(),
            category: meta.category.clone(),
            input: fields,
        }
    }
}
