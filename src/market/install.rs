//! Tarball download, staged extraction, and hot load.
//!
//! The install path never leaves the registry or the market layer in a
//! partial state: the archive is extracted into a temp stage, validated
//! there, copied into a hidden staging directory next to the final
//! location, and made live with a single directory rename before the
//! registry registration.

use crate::core::registry::SkillRegistry;
use crate::market::{validate_skill_dir, CodeHostClient, MarketError, Result, SafetyReport};
use crate::storage::SkillStore;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Directories never copied out of a package.
const EXCLUDED_DIRS: [&str; 2] = [".git", "node_modules"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub skill_name: String,
    pub installed_path: PathBuf,
    pub report: SafetyReport,
}

/// Download, validate, and hot-install a skill from a repository.
pub async fn install_skill(
    host: &CodeHostClient,
    store: &SkillStore,
    registry: &SkillRegistry,
    repo: &str,
    skill_name: &str,
    git_ref: Option<&str>,
) -> Result<InstallOutcome> {
    info!("Installing {} from {}", skill_name, repo);

    let tarball = host.download_tarball(repo, git_ref).await?;
    debug!("Downloaded {} bytes", tarball.len());

    let stage = tempfile::tempdir()?;
    extract_tarball(&tarball, stage.path())?;

    let package_root = locate_package_root(stage.path())?;

    let report = validate_skill_dir(&package_root)?;
    if !report.safe {
        warn!(
            "Package {} rejected with {} issue(s)",
            repo,
            report.issues.len()
        );
        return Err(MarketError::Unsafe(report.issues.join("; ")));
    }

    let installed_path = promote_package(store, &package_root, skill_name)?;

    // Hot load: scan the new directory and register in one pass.
    let manifest = store.load_skills_from_dir(&installed_path, registry);
    if manifest.loaded.is_empty() {
        return Err(MarketError::Archive(format!(
            "Installed package at {:?} did not load as a skill",
            installed_path
        )));
    }

    store.record_install(skill_name, "market")?;

    info!("Installed skill {} at {:?}", skill_name, installed_path);
    Ok(InstallOutcome {
        skill_name: skill_name.to_string(),
        installed_path,
        report,
    })
}

/// Gunzip and unpack the archive into `dest`, refusing entries that would
/// escape it.
pub fn extract_tarball(bytes: &[u8], dest: &Path) -> Result<()> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = Archive::new(decoder);

    for entry in archive
        .entries()
        .map_err(|e| MarketError::Archive(format!("Unreadable tar stream: {}", e)))?
    {
        let mut entry =
            entry.map_err(|e| MarketError::Archive(format!("Corrupt tar entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| MarketError::Archive(format!("Bad entry path: {}", e)))?
            .into_owned();

        if path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(MarketError::Archive(format!(
                "Entry escapes the archive root: {:?}",
                path
            )));
        }

        let out_path = dest.join(&path);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MarketError::Archive(format!("Unpack of {:?} failed: {}", path, e)))?;
        }
        entry
            .unpack(&out_path)
            .map_err(|e| MarketError::Archive(format!("Unpack of {:?} failed: {}", path, e)))?;
    }
    Ok(())
}

/// Find the directory holding `skill.json`: the stage root, or a single
/// prefix directory one level down (code-host tarballs wrap everything in
/// `owner-repo-sha/`).
pub fn locate_package_root(stage: &Path) -> Result<PathBuf> {
    if stage.join("skill.json").exists() {
        return Ok(stage.to_path_buf());
    }

    for entry in std::fs::read_dir(stage)? {
        let path = entry?.path();
        if path.is_dir() && path.join("skill.json").exists() {
            return Ok(path);
        }
    }

    Err(MarketError::Archive(
        "Archive contains no skill.json".to_string(),
    ))
}

/// Copy the vetted package into the market layer via a hidden staging
/// directory and a single rename.
fn promote_package(store: &SkillStore, package_root: &Path, skill_name: &str) -> Result<PathBuf> {
    let market_dir = store.market_dir();
    std::fs::create_dir_all(&market_dir)?;

    let staging = market_dir.join(format!(".staging-{}", Uuid::new_v4()));
    copy_package(package_root, &staging)?;

    let final_path = market_dir.join(skill_name);
    if final_path.exists() {
        debug!("Replacing existing install at {:?}", final_path);
        std::fs::remove_dir_all(&final_path)?;
    }
    std::fs::rename(&staging, &final_path)?;
    Ok(final_path)
}

fn copy_package(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();

        if path.is_dir() {
            if EXCLUDED_DIRS
                .iter()
                .any(|excluded| name.to_str() == Some(excluded))
            {
                continue;
            }
            copy_package(&path, &dst.join(&name))?;
        } else {
            std::fs::copy(&path, dst.join(&name))?;
        }
    }
    Ok(())
}
