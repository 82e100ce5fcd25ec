//! Static safety validation of a skill package.
//!
//! The scan is conservative and best-effort: structural manifest checks, a
//! file walk rejecting unexpected extensions and oversized files, and regex
//! scans of script files for dangerous or suspicious constructs. Packages
//! execute in-process after install, so anything dubious is an issue, not a
//! warning.

use crate::core::is_valid_skill_name;
use crate::market::{Result, SafetyReport};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Extensions a skill package may contain.
const ALLOWED_EXTENSIONS: [&str; 7] = ["json", "md", "ts", "js", "txt", "yaml", "yml"];

/// Per-file size cap.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

const SCRIPT_EXTENSIONS: [&str; 2] = ["ts", "js"];

static DANGEROUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\beval\s*\(", "eval call"),
        (r"new\s+Function\s*\(", "dynamic Function construction"),
        (r#"['"]child_process['"]"#, "child_process module"),
        (r#"require\s*\(\s*['"]fs['"]\s*\)"#, "direct filesystem module"),
        (r#"from\s+['"](?:node:)?fs['"]"#, "direct filesystem module"),
        (r"process\.env", "environment access"),
        (r"\b(?:execSync|spawnSync|execFileSync)\s*\(", "subprocess exec"),
    ]
    .into_iter()
    .map(|(pattern, label)| {
        (
            Regex::new(pattern).expect("static pattern must compile"),
            label,
        )
    })
    .collect()
});

static SUSPICIOUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bfetch\s*\(", "network fetch"),
        (r#"['"](?:https?:)//"#, "hardcoded network endpoint"),
        (r"\bimport\s*\(", "dynamic import"),
        (r#"require\s*\(\s*[^'"]"#, "dynamic require"),
    ]
    .into_iter()
    .map(|(pattern, label)| {
        (
            Regex::new(pattern).expect("static pattern must compile"),
            label,
        )
    })
    .collect()
});

const VALID_MODES: [&str; 3] = ["code", "llm", "composite"];

/// Validate a skill package on disk.
///
/// `safe` requires zero issues; warnings alone do not block an install.
pub fn validate_skill_dir(dir: &Path) -> Result<SafetyReport> {
    let mut report = SafetyReport::new();

    validate_manifest(dir, &mut report)?;
    walk_files(dir, dir, &mut report)?;

    debug!(
        "Validated {:?}: safe={} issues={} warnings={}",
        dir,
        report.safe,
        report.issues.len(),
        report.warnings.len()
    );
    Ok(report)
}

fn validate_manifest(dir: &Path, report: &mut SafetyReport) -> Result<()> {
    let manifest_path = dir.join("skill.json");
    if !manifest_path.exists() {
        report.skill_json_valid = false;
        report.issue("skill.json is missing");
        return Ok(());
    }

    let raw = std::fs::read_to_string(&manifest_path)?;
    let manifest: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            report.skill_json_valid = false;
            report.issue(format!("skill.json is not valid JSON: {}", e));
            return Ok(());
        }
    };

    for field in ["name", "description", "mode"] {
        if manifest.get(field).and_then(|v| v.as_str()).is_none() {
            report.skill_json_valid = false;
            report.issue(format!("skill.json missing required field '{}'", field));
        }
    }

    if let Some(name) = manifest.get("name").and_then(|v| v.as_str()) {
        if !is_valid_skill_name(name) {
            report.skill_json_valid = false;
            report.issue(format!(
                "Skill name '{}' must match ^[a-z][a-z0-9_]*$",
                name
            ));
        }
    }

    if let Some(mode) = manifest.get("mode").and_then(|v| v.as_str()) {
        if !VALID_MODES.contains(&mode) {
            report.skill_json_valid = false;
            report.issue(format!("Unknown mode '{}'", mode));
        }
    }

    Ok(())
}

fn walk_files(root: &Path, dir: &Path, report: &mut SafetyReport) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).display().to_string();

        if path.is_dir() {
            walk_files(root, &path, report)?;
            continue;
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some(ext) if ALLOWED_EXTENSIONS.contains(&ext) => {}
            other => {
                report.issue(format!(
                    "Forbidden file type {:?} at {}",
                    other.unwrap_or("none"),
                    relative
                ));
                continue;
            }
        }

        let size = entry.metadata()?.len();
        if size > MAX_FILE_BYTES {
            report.issue(format!(
                "File {} is {} bytes, over the {} byte limit",
                relative, size, MAX_FILE_BYTES
            ));
            continue;
        }

        if let Some(ext) = extension.as_deref() {
            if SCRIPT_EXTENSIONS.contains(&ext) {
                scan_script(&path, &relative, report)?;
            }
        }
    }
    Ok(())
}

fn scan_script(path: &Path, relative: &str, report: &mut SafetyReport) -> Result<()> {
    let content = std::fs::read_to_string(path)?;

    for (pattern, label) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(&content) {
            report.issue(format!("Dangerous pattern in {}: {}", relative, label));
        }
    }
    for (pattern, label) in SUSPICIOUS_PATTERNS.iter() {
        if pattern.is_match(&content) {
            report.warning(format!("Suspicious pattern in {}: {}", relative, label));
        }
    }
    Ok(())
}
