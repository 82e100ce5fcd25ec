//! Error taxonomy for the skill runtime.
//!
//! One enum covers the whole execution surface so that `ctx.call`, the
//! pipeline engine, and the tool-call loop share a single propagation type.
//! Validation failures carry their violation list and can be rendered as
//! model-facing repair feedback via [`SkillError::to_feedback`].

use crate::validation::Violation;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which validation gate produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationDirection {
    Input,
    Output,
}

impl fmt::Display for ValidationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationDirection::Input => write!(f, "input"),
            ValidationDirection::Output => write!(f, "output"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SkillError {
    #[error("Skill not found: {0}")]
    NotFound(String),

    #[error("Skill call depth exceeded at {name}: {current} >= {max}")]
    DepthExceeded {
        name: String,
        current: usize,
        max: usize,
    },

    #[error("Skill {name} timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Validation failed for {name} ({direction}): {message}")]
    Validation {
        name: String,
        direction: ValidationDirection,
        violations: Vec<Violation>,
        message: String,
    },

    #[error("Invalid pipeline in {skill}: {reason}")]
    InvalidPipeline { skill: String, reason: String },

    #[error("Pipeline step {step} timed out after {timeout_ms}ms")]
    PipelineTimeout { step: String, timeout_ms: u64 },

    #[error("Pipeline deadlock, unresolved steps: {remaining}")]
    DagDeadlock { remaining: String },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SkillError>;

impl SkillError {
    /// Build a validation error with a summary message derived from the
    /// violation list.
    pub fn validation(
        name: impl Into<String>,
        direction: ValidationDirection,
        violations: Vec<Violation>,
    ) -> Self {
        let name = name.into();
        let message = format!(
            "{} violation(s) against the {} schema",
            violations.len(),
            direction
        );
        SkillError::Validation {
            name,
            direction,
            violations,
            message,
        }
    }

    /// Human-readable repair feedback, one bullet per violation.
    ///
    /// This is the text appended to an LLM prompt when closing the
    /// self-repair loop, and what callers log when a gate rejects a payload.
    pub fn to_feedback(&self) -> String {
        match self {
            SkillError::Validation {
                name,
                direction,
                violations,
                ..
            } => {
                let mut out = format!(
                    "The {} of skill '{}' failed validation:\n",
                    direction, name
                );
                for v in violations {
                    out.push_str(&format!("- {}\n", v.describe()));
                }
                out
            }
            other => other.to_string(),
        }
    }

    /// True for failures the runtime must never retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SkillError::NotFound(_)
                | SkillError::DepthExceeded { .. }
                | SkillError::DagDeadlock { .. }
                | SkillError::InvalidPipeline { .. }
                | SkillError::AuthRequired(_)
                | SkillError::Cancelled
        )
    }
}
