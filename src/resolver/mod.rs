//! `$resolve` / `$skill` / `$returnSkill` directive resolution.
//!
//! Schema-embedded directives let a skill receive runtime-provided values
//! (the user message, the skill catalog, prefetched memories, scratch
//! entries) without the caller or the model ever supplying them. A
//! caller-supplied value always wins over a directive.
//!
//! Three directive forms on input properties:
//! - `"$resolve": "ns.key"` looks up the built-in namespace table;
//! - `"$resolve": {"type": "script", "path", "params"}` runs a script
//!   relative to the skill directory and injects its JSON output;
//! - `"$resolve": {"type": "skill", "name", "params"}` invokes another
//!   skill through the calling frame and injects its output.
//!
//! On output, `"$returnSkill": true` rewrites produced skill names into
//! invocable handles.

use crate::agent::context::CallFrame;
use crate::core::{Result, Skill, SkillError, SkillSummary, SYSTEM_CATEGORY};
use crate::validation::extract_json;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Marker key used to represent an invocable skill handle as JSON.
const HANDLE_KEY: &str = "$skill";

/// Build a handle value for a skill name.
pub fn skill_handle(name: &str) -> Value {
    json!({ HANDLE_KEY: name })
}

/// Extract the skill name from a handle value, if it is one.
pub fn handle_name(value: &Value) -> Option<String> {
    value
        .as_object()
        .filter(|obj| obj.len() == 1)
        .and_then(|obj| obj.get(HANDLE_KEY))
        .and_then(|n| n.as_str())
        .map(String::from)
}

/// Fill directive-bearing input properties that the caller left absent.
pub async fn resolve_input(skill: &Skill, input: Value, frame: &CallFrame) -> Result<Value> {
    let mut obj = match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => return Ok(other),
    };

    let props = match skill.meta.input_properties() {
        Some(p) => p.clone(),
        None => return Ok(Value::Object(obj)),
    };

    for (prop, schema) in props {
        // Caller wins over any directive.
        if obj.contains_key(&prop) {
            continue;
        }
        let directive = match schema.get("$resolve") {
            Some(d) => d,
            None => continue,
        };

        let value = resolve_directive(directive, skill, frame).await?;
        if !value.is_null() {
            obj.insert(prop, value);
        }
    }

    Ok(Value::Object(obj))
}

async fn resolve_directive(directive: &Value, skill: &Skill, frame: &CallFrame) -> Result<Value> {
    match directive {
        Value::String(key) => Ok(builtin_lookup(key, frame)),
        Value::Object(spec) => {
            let kind = spec.get("type").and_then(|t| t.as_str()).unwrap_or("");
            let params = spec.get("params").cloned().unwrap_or(Value::Null);
            let params = substitute_params(&params, frame);

            match kind {
                "script" => {
                    let path = spec
                        .get("path")
                        .and_then(|p| p.as_str())
                        .ok_or_else(|| {
                            SkillError::Execution(format!(
                                "Script directive without a path in skill {}",
                                skill.meta.name
                            ))
                        })?;
                    run_script(&script_path(path, skill), &params, frame).await
                }
                "skill" => {
                    let name = spec
                        .get("name")
                        .and_then(|n| n.as_str())
                        .ok_or_else(|| {
                            SkillError::Execution(format!(
                                "Skill directive without a name in skill {}",
                                skill.meta.name
                            ))
                        })?;
                    frame.call(name, params).await
                }
                other => {
                    warn!(
                        "Unknown $resolve directive type '{}' in skill {}",
                        other, skill.meta.name
                    );
                    Ok(Value::Null)
                }
            }
        }
        _ => Ok(Value::Null),
    }
}

/// Built-in namespace table for string directives.
fn builtin_lookup(key: &str, frame: &CallFrame) -> Value {
    match key {
        "input.message" => Value::String(frame.message.clone()),
        "input.taskId" => Value::String(frame.task_id.clone()),
        "input.model" => frame
            .model
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "input.providerId" => frame
            .provider_id
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "skills.list" => summarize_skills(frame, false),
        "skills.listAll" => summarize_skills(frame, true),
        "memory.relevantMemories" => frame
            .env_get("relevantMemories")
            .unwrap_or_else(|| Value::Array(vec![])),
        other => {
            if let Some(scratch_key) = other.strip_prefix("scratch.") {
                return frame.scratch_get(scratch_key).unwrap_or(Value::Null);
            }
            warn!("Unknown $resolve namespace: {}", other);
            Value::Null
        }
    }
}

fn summarize_skills(frame: &CallFrame, include_system: bool) -> Value {
    let summaries: Vec<SkillSummary> = frame
        .registry
        .list()
        .iter()
        .filter(|s| include_system || s.meta.category != SYSTEM_CATEGORY)
        .map(|s| SkillSummary::from_meta(&s.meta))
        .collect();
    serde_json::to_value(summaries).unwrap_or(Value::Null)
}

/// Substitute `$resolve:ns.key` and `$skill:name` references inside
/// directive params.
fn substitute_params(params: &Value, frame: &CallFrame) -> Value {
    match params {
        Value::String(s) => {
            if let Some(key) = s.strip_prefix("$resolve:") {
                builtin_lookup(key, frame)
            } else if let Some(name) = s.strip_prefix("$skill:") {
                skill_handle(name)
            } else {
                params.clone()
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_params(item, frame))
                .collect(),
        ),
        Value::Object(obj) => {
            let mut out = Map::new();
            for (k, v) in obj {
                out.insert(k.clone(), substitute_params(v, frame));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn script_path(path: &str, skill: &Skill) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match &skill.dir {
        Some(dir) => dir.join(p),
        None => p.to_path_buf(),
    }
}

/// Execute a resolver script as a subprocess.
///
/// The script receives `{"params", "context"}` on stdin and must print its
/// value (JSON preferred, raw text accepted) to stdout.
async fn run_script(path: &Path, params: &Value, frame: &CallFrame) -> Result<Value> {
    let program = match path.extension().and_then(|e| e.to_str()) {
        Some("js") | Some("mjs") | Some("cjs") | Some("ts") => "node",
        Some("py") => "python3",
        _ => path.to_str().unwrap_or_default(),
    };

    debug!("Running resolver script {:?}", path);

    let mut cmd = Command::new(program);
    if program != path.to_str().unwrap_or_default() {
        cmd.arg(path);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let payload = json!({
        "params": params,
        "context": {
            "taskId": frame.task_id,
            "parentSkill": frame.parent_skill,
            "message": frame.message,
        }
    });

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(payload.to_string().as_bytes()).await?;
        drop(stdin);
    }

    let output = tokio::time::timeout(SCRIPT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| SkillError::Execution(format!("Resolver script {:?} timed out", path)))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SkillError::Execution(format!(
            "Resolver script {:?} failed: {}",
            path,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(extract_json(&stdout)
        .unwrap_or_else(|| Value::String(stdout.trim().to_string())))
}

/// Rewrite `$returnSkill` output properties into invocable handles.
///
/// String values become a single handle; arrays are mapped element-wise.
pub fn apply_return_skills(output_schema: &Value, output: &mut Value) {
    let props = match output_schema.get("properties").and_then(|p| p.as_object()) {
        Some(p) => p,
        None => return,
    };
    let obj = match output.as_object_mut() {
        Some(o) => o,
        None => return,
    };

    for (prop, schema) in props {
        let flagged = schema
            .get("$returnSkill")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !flagged {
            continue;
        }
        if let Some(value) = obj.get_mut(prop) {
            match value {
                Value::String(name) => {
                    let handle = skill_handle(name);
                    *value = handle;
                }
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        if let Value::String(name) = item {
                            let handle = skill_handle(name);
                            *item = handle;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
