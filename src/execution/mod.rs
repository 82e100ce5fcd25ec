//! Skill executors.
//!
//! Every skill carries an executor chosen at load time from its mode:
//! - `code`: run the skill's artifact as a subprocess (JSON on stdin,
//!   JSON on stdout);
//! - `llm`: compile the prompt template and run the Gate-2 repair loop;
//! - `composite`: run the declarative pipeline, unless a bundled executor
//!   artifact supersedes it.
//!
//! Built-in skills implement [`SkillExecutor`] natively.

pub mod llm_mode;
pub mod prompt;

use crate::agent::context::CallFrame;
use crate::core::{Result, SkillError, SkillMeta};
use crate::validation::extract_json;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub use llm_mode::LlmModeExecutor;

/// Invocation contract for a loaded skill.
///
/// `execute` runs inside the caller's timeout race; implementations should
/// not install their own outer timeouts.
#[async_trait]
pub trait SkillExecutor: Send + Sync {
    async fn execute(&self, input: Value, frame: &CallFrame) -> Result<Value>;
}

/// Code-mode executor: the skill artifact is a subprocess.
///
/// The process receives `{"input", "context"}` on stdin and must print a
/// JSON object to stdout. Anything else fails Gate 2 upstream.
pub struct CodeExecutor {
    skill_name: String,
    artifact: PathBuf,
}

impl CodeExecutor {
    pub fn new(skill_name: impl Into<String>, artifact: PathBuf) -> Self {
        CodeExecutor {
            skill_name: skill_name.into(),
            artifact,
        }
    }
}

fn interpreter_for(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") | Some("mjs") | Some("cjs") | Some("ts") => Some("node"),
        Some("py") => Some("python3"),
        _ => None,
    }
}

#[async_trait]
impl SkillExecutor for CodeExecutor {
    async fn execute(&self, input: Value, frame: &CallFrame) -> Result<Value> {
        debug!("Executing code skill {} via {:?}", self.skill_name, self.artifact);

        let mut cmd = match interpreter_for(&self.artifact) {
            Some(program) => {
                let mut c = Command::new(program);
                c.arg(&self.artifact);
                c
            }
            None => Command::new(&self.artifact),
        };

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let payload = json!({
            "input": input,
            "context": {
                "taskId": frame.task_id,
                "parentSkill": frame.parent_skill,
            }
        });

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.to_string().as_bytes()).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Code skill {} exited nonzero: {}", self.skill_name, stderr.trim());
            return Err(SkillError::Execution(format!(
                "Skill {} process failed: {}",
                self.skill_name,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        extract_json(&stdout).ok_or_else(|| {
            SkillError::Execution(format!(
                "Skill {} produced no parseable JSON output",
                self.skill_name
            ))
        })
    }
}

/// Composite-mode executor: delegates to the pipeline engine.
pub struct CompositeExecutor {
    meta: SkillMeta,
}

impl CompositeExecutor {
    pub fn new(meta: SkillMeta) -> Self {
        CompositeExecutor { meta }
    }
}

#[async_trait]
impl SkillExecutor for CompositeExecutor {
    async fn execute(&self, input: Value, frame: &CallFrame) -> Result<Value> {
        crate::pipeline::execute_pipeline(&self.meta, input, frame).await
    }
}
