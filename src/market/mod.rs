//! Skill marketplace: remote discovery, safety validation, hot install.
//!
//! The runtime can expand its own catalog: search a code host for skill
//! repositories, statically vet a candidate package, install it into the
//! `market` layer, and hot-load it without a restart.

pub mod install;
pub mod planner;
pub mod search;
pub mod validate;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use install::{install_skill, InstallOutcome};
pub use planner::{plan_task, CapabilityPlan, CapabilityStatus, TaskPlan};
pub use search::CodeHostClient;
pub use validate::validate_skill_dir;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote returned {status}: {detail}")]
    Remote { status: u16, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Package rejected: {0}")]
    Unsafe(String),

    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("Skill store error: {0}")]
    Store(#[from] crate::storage::SkillStoreError),
}

pub type Result<T> = std::result::Result<T, MarketError>;

/// One scored repository candidate from a marketplace search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoCandidate {
    pub full_name: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
    pub stars: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    pub default_branch: String,
    pub has_manifest: bool,
    pub score: f64,
}

/// Result of the static package safety scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub skill_json_valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl SafetyReport {
    pub fn new() -> Self {
        SafetyReport {
            safe: true,
            skill_json_valid: true,
            issues: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(message.into());
        self.safe = false;
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl Default for SafetyReport {
    fn default() -> Self {
        Self::new()
    }
}
