//! Skill store: disk discovery and layered loading.
//!
//! Skills are folder-based packages keyed by a `skill.json` manifest with
//! co-located artifacts (`prompt.md` for llm mode, `index.js`/`index.ts`
//! for code and bundled composite mode).
//!
//! Three layers with ascending precedence share one base directory:
//! `_builtin/`, `market/`, `custom/`. Later layers override earlier ones on
//! name collision. A persistent `installed.json` records marketplace
//! installs.

pub mod watch;

use crate::core::registry::SkillRegistry;
use crate::core::{is_valid_skill_name, Skill, SkillMeta, SkillMode};
use crate::execution::{CodeExecutor, CompositeExecutor, LlmModeExecutor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment override for the skills base directory.
pub const SKILLS_DIR_ENV: &str = "OPENEVO_SKILLS_DIR";

const LAYER_BUILTIN: &str = "_builtin";
const LAYER_MARKET: &str = "market";
const LAYER_CUSTOM: &str = "custom";

#[derive(Error, Debug)]
pub enum SkillStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid skill manifest: {0}")]
    InvalidManifest(String),
}

pub type Result<T> = std::result::Result<T, SkillStoreError>;

/// What one layer load produced.
#[derive(Debug, Clone, Default)]
pub struct LayerManifest {
    pub dir: PathBuf,
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
}

/// Persistent record of one marketplace install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRecord {
    #[serde(rename = "skillId")]
    pub skill_id: String,
    #[serde(rename = "installedAt")]
    pub installed_at: DateTime<Utc>,
    #[serde(rename = "installMethod")]
    pub install_method: String,
    pub enabled: bool,
    #[serde(rename = "disabledAt", skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstalledIndex {
    #[serde(default)]
    pub installed: Vec<InstallRecord>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Filesystem skill store rooted at the layered base directory.
pub struct SkillStore {
    base: PathBuf,
}

impl SkillStore {
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        for layer in [LAYER_BUILTIN, LAYER_MARKET, LAYER_CUSTOM] {
            let dir = base.join(layer);
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                debug!("Created layer directory {:?}", dir);
            }
        }
        Ok(SkillStore { base })
    }

    /// Default base: `$OPENEVO_SKILLS_DIR`, else `~/.openevo/skills`.
    pub fn default_base() -> PathBuf {
        if let Ok(dir) = std::env::var(SKILLS_DIR_ENV) {
            return PathBuf::from(dir);
        }
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".openevo").join("skills"))
            .unwrap_or_else(|| PathBuf::from(".openevo/skills"))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn builtin_dir(&self) -> PathBuf {
        self.base.join(LAYER_BUILTIN)
    }

    pub fn market_dir(&self) -> PathBuf {
        self.base.join(LAYER_MARKET)
    }

    pub fn custom_dir(&self) -> PathBuf {
        self.base.join(LAYER_CUSTOM)
    }

    /// Load all three layers in precedence order.
    pub fn load_layered(&self, registry: &SkillRegistry) -> Vec<LayerManifest> {
        self.load_layers(
            &[self.builtin_dir(), self.market_dir(), self.custom_dir()],
            registry,
        )
    }

    /// Load a list of directories in order; later directories override
    /// earlier ones on name collision.
    pub fn load_layers(&self, dirs: &[PathBuf], registry: &SkillRegistry) -> Vec<LayerManifest> {
        dirs.iter()
            .map(|dir| self.load_skills_from_dir(dir, registry))
            .collect()
    }

    /// Recursive discovery: load `dir` itself when it holds a `skill.json`,
    /// else each direct subdirectory, recursing one level for grouping
    /// folders. Malformed manifests are skipped, never fatal.
    pub fn load_skills_from_dir(&self, dir: &Path, registry: &SkillRegistry) -> LayerManifest {
        let mut manifest = LayerManifest {
            dir: dir.to_path_buf(),
            ..Default::default()
        };
        if !dir.exists() {
            warn!("Skill directory does not exist: {:?}", dir);
            return manifest;
        }

        if dir.join("skill.json").exists() {
            self.load_one(dir, registry, &mut manifest);
            return manifest;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read skill directory {:?}: {}", dir, e);
                return manifest;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || is_hidden(&path) {
                continue;
            }
            if path.join("skill.json").exists() {
                self.load_one(&path, registry, &mut manifest);
            } else if let Ok(nested) = std::fs::read_dir(&path) {
                for nested_entry in nested.flatten() {
                    let nested_path = nested_entry.path();
                    if nested_path.is_dir()
                        && !is_hidden(&nested_path)
                        && nested_path.join("skill.json").exists()
                    {
                        self.load_one(&nested_path, registry, &mut manifest);
                    }
                }
            }
        }

        info!(
            "Loaded {} skill(s) from {:?} ({} skipped)",
            manifest.loaded.len(),
            dir,
            manifest.skipped.len()
        );
        manifest
    }

    fn load_one(&self, dir: &Path, registry: &SkillRegistry, manifest: &mut LayerManifest) {
        match load_skill_dir(dir) {
            Ok(skill) => {
                let name = skill.meta.name.clone();
                match registry.register(skill) {
                    Ok(()) => manifest.loaded.push(name),
                    Err(e) => {
                        warn!("Registration of {:?} failed: {}", dir, e);
                        manifest.skipped.push(name);
                    }
                }
            }
            Err(e) => {
                warn!("Skipping malformed skill at {:?}: {}", dir, e);
                manifest
                    .skipped
                    .push(dir.file_name().and_then(|n| n.to_str()).unwrap_or("?").to_string());
            }
        }
    }

    fn installed_path(&self) -> PathBuf {
        self.base.join("installed.json")
    }

    pub fn read_installed(&self) -> InstalledIndex {
        let path = self.installed_path();
        if !path.exists() {
            return InstalledIndex::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Unreadable installed.json, starting fresh: {}", e);
                InstalledIndex::default()
            }),
            Err(e) => {
                warn!("Cannot read installed.json: {}", e);
                InstalledIndex::default()
            }
        }
    }

    /// Append or refresh an install record.
    pub fn record_install(&self, skill_id: &str, method: &str) -> Result<()> {
        let mut index = self.read_installed();
        index.installed.retain(|r| r.skill_id != skill_id);
        index.installed.push(InstallRecord {
            skill_id: skill_id.to_string(),
            installed_at: Utc::now(),
            install_method: method.to_string(),
            enabled: true,
            disabled_at: None,
        });
        index.updated_at = Some(Utc::now());

        let json = serde_json::to_string_pretty(&index)
            .map_err(|e| SkillStoreError::Parse(e.to_string()))?;
        std::fs::write(self.installed_path(), json)?;
        Ok(())
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Parse one skill directory into a [`Skill`] with its mode's executor.
///
/// Normalization fills `timeout=30000`, `retry=0`, `version="1.0.0"` and
/// empty tags through the serde defaults on [`SkillMeta`].
pub fn load_skill_dir(dir: &Path) -> Result<Skill> {
    let manifest_path = dir.join("skill.json");
    let raw = std::fs::read_to_string(&manifest_path)?;
    let meta: SkillMeta =
        serde_json::from_str(&raw).map_err(|e| SkillStoreError::Parse(e.to_string()))?;

    if !is_valid_skill_name(&meta.name) {
        return Err(SkillStoreError::InvalidManifest(format!(
            "Skill name '{}' must match ^[a-z][a-z0-9_]*$",
            meta.name
        )));
    }

    let executor: Arc<dyn crate::execution::SkillExecutor> = match meta.mode {
        SkillMode::Llm => {
            let prompt_path = dir.join("prompt.md");
            if !prompt_path.exists() {
                return Err(SkillStoreError::InvalidManifest(format!(
                    "llm skill '{}' has no prompt.md",
                    meta.name
                )));
            }
            let template = std::fs::read_to_string(&prompt_path)?;
            Arc::new(LlmModeExecutor::new(meta.clone(), template))
        }
        SkillMode::Code => {
            let artifact = code_artifact(dir).ok_or_else(|| {
                SkillStoreError::InvalidManifest(format!(
                    "code skill '{}' has no index.js or index.ts",
                    meta.name
                ))
            })?;
            Arc::new(CodeExecutor::new(&meta.name, artifact))
        }
        SkillMode::Composite => {
            // A bundled executor artifact supersedes the declarative pipeline.
            if let Some(artifact) = code_artifact(dir) {
                debug!(
                    "Composite skill '{}' uses its bundled executor {:?}",
                    meta.name, artifact
                );
                Arc::new(CodeExecutor::new(&meta.name, artifact))
            } else if meta.pipeline.as_ref().map(|p| !p.is_empty()).unwrap_or(false) {
                debug!("Composite skill '{}' uses its declarative pipeline", meta.name);
                Arc::new(CompositeExecutor::new(meta.clone()))
            } else {
                return Err(SkillStoreError::InvalidManifest(format!(
                    "composite skill '{}' has neither a pipeline nor an executor",
                    meta.name
                )));
            }
        }
    };

    Ok(Skill::new(meta, executor).with_dir(dir.to_path_buf()))
}

fn code_artifact(dir: &Path) -> Option<PathBuf> {
    for candidate in ["index.js", "index.ts"] {
        let path = dir.join(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}
