//! Composite pipeline engine.
//!
//! Executes a skill's declarative `pipeline`: sequentially by default, as a
//! DAG when any step declares `depends`. Steps support conditions, retry
//! with bounded exponential backoff, per-attempt timeouts, `foreach`
//! fan-out under a concurrency bound, and `continueOnError` capture.

pub mod template;

use crate::agent::context::CallFrame;
use crate::core::{PipelineStep, Result, SkillError, SkillMeta};
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use template::{eval_with_fallback, is_truthy, render_template, resolve_value, TemplateContext};
use tracing::{debug, warn};

const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Entry point for composite skills.
pub async fn execute_pipeline(meta: &SkillMeta, input: Value, frame: &CallFrame) -> Result<Value> {
    let steps = match &meta.pipeline {
        Some(steps) if !steps.is_empty() => steps,
        _ => {
            return Err(SkillError::InvalidPipeline {
                skill: meta.name.clone(),
                reason: "Pipeline is empty".to_string(),
            })
        }
    };

    let dag = steps.iter().any(|s| s.depends.is_some());
    debug!(
        "Executing pipeline {} ({} steps, {} mode)",
        meta.name,
        steps.len(),
        if dag { "dag" } else { "sequential" }
    );

    let mut results: Map<String, Value> = Map::new();
    let mut skipped: HashSet<String> = HashSet::new();

    if dag {
        run_dag(meta, steps, &input, frame, &mut results, &mut skipped).await?;
    } else {
        for step in steps {
            match execute_step(step, &input, &results, frame).await {
                Ok(Some(value)) => {
                    results.insert(step.step.clone(), value);
                }
                Ok(None) => {
                    skipped.insert(step.step.clone());
                }
                Err(e) if step.continue_on_error => {
                    warn!("Step {} failed, continuing: {}", step.step, e);
                    results.insert(step.step.clone(), failure_value(&e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(assemble_output(meta, steps, &input, &results))
}

async fn run_dag(
    meta: &SkillMeta,
    steps: &[PipelineStep],
    input: &Value,
    frame: &CallFrame,
    results: &mut Map<String, Value>,
    skipped: &mut HashSet<String>,
) -> Result<()> {
    let names: HashSet<&str> = steps.iter().map(|s| s.step.as_str()).collect();
    for step in steps {
        for dep in step.depends.iter().flatten() {
            if !names.contains(dep.as_str()) {
                return Err(SkillError::InvalidPipeline {
                    skill: meta.name.clone(),
                    reason: format!("Step {} depends on unknown step {}", step.step, dep),
                });
            }
        }
    }

    let mut pending: Vec<&PipelineStep> = steps.iter().collect();

    while !pending.is_empty() {
        let done: HashSet<&str> = results
            .keys()
            .map(String::as_str)
            .chain(skipped.iter().map(String::as_str))
            .collect();

        let (ready, rest): (Vec<&PipelineStep>, Vec<&PipelineStep>) =
            pending.into_iter().partition(|step| {
                step.depends
                    .iter()
                    .flatten()
                    .all(|dep| done.contains(dep.as_str()))
            });

        if ready.is_empty() {
            let remaining = rest
                .iter()
                .map(|s| {
                    format!(
                        "{} (depends on {})",
                        s.step,
                        s.depends.clone().unwrap_or_default().join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SkillError::DagDeadlock { remaining });
        }

        // One wave: every ready step runs concurrently against a shared
        // view of the results so far.
        let results_view: &Map<String, Value> = results;
        let wave = futures::future::join_all(ready.iter().map(|step| async move {
            (step, execute_step(step, input, results_view, frame).await)
        }))
        .await;

        for (step, outcome) in wave {
            match outcome {
                Ok(Some(value)) => {
                    results.insert(step.step.clone(), value);
                }
                Ok(None) => {
                    skipped.insert(step.step.clone());
                }
                Err(e) if step.continue_on_error => {
                    warn!("Step {} failed, continuing: {}", step.step, e);
                    results.insert(step.step.clone(), failure_value(&e));
                }
                Err(e) => return Err(e),
            }
        }

        pending = rest;
    }

    Ok(())
}

fn failure_value(error: &SkillError) -> Value {
    json!({ "_error": error.to_string(), "_failed": true })
}

/// Run one step through its condition, retry budget, and timeout.
///
/// Returns `Ok(None)` when the condition skipped the step.
async fn execute_step(
    step: &PipelineStep,
    input: &Value,
    results: &Map<String, Value>,
    frame: &CallFrame,
) -> Result<Option<Value>> {
    if frame.cancel.is_cancelled() {
        return Err(SkillError::Cancelled);
    }

    let ctx = TemplateContext::new(input, results);

    if let Some(condition) = &step.condition {
        let value = render_template(condition, &ctx);
        if !is_truthy(value.as_ref()) {
            debug!("Step {} skipped by condition", step.step);
            return Ok(None);
        }
    }

    let retries = step.retry.unwrap_or(0);
    let base_delay = step.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS);

    let mut last_err: Option<SkillError> = None;
    for attempt in 0..=retries {
        if attempt > 0 {
            let backoff = base_delay
                .saturating_mul(1u64 << (attempt - 1).min(30))
                .min(MAX_BACKOFF_MS);
            debug!(
                "Step {} retry {}/{} after {}ms",
                step.step, attempt, retries, backoff
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }

        let body = run_step_body(step, input, results, frame);
        let outcome = match step.timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), body).await {
                    Ok(result) => result,
                    Err(_) => Err(SkillError::PipelineTimeout {
                        step: step.step.clone(),
                        timeout_ms,
                    }),
                }
            }
            None => body.await,
        };

        match outcome {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| SkillError::Execution(format!("Step {} failed", step.step))))
}

async fn run_step_body(
    step: &PipelineStep,
    input: &Value,
    results: &Map<String, Value>,
    frame: &CallFrame,
) -> Result<Value> {
    match &step.foreach {
        Some(expr) => run_foreach(step, expr, input, results, frame).await,
        None => {
            let ctx = TemplateContext::new(input, results);
            let step_input = step
                .input
                .as_ref()
                .map(|declared| resolve_value(declared, &ctx))
                .unwrap_or_else(|| json!({}));
            frame.call(&step.skill, step_input).await
        }
    }
}

async fn run_foreach(
    step: &PipelineStep,
    expr: &str,
    input: &Value,
    results: &Map<String, Value>,
    frame: &CallFrame,
) -> Result<Value> {
    let ctx = TemplateContext::new(input, results);
    let items = match render_template(expr, &ctx) {
        Some(Value::Array(items)) => items,
        other => {
            return Err(SkillError::Execution(format!(
                "Step {} foreach did not resolve to an array (got {})",
                step.step,
                other.map(|v| v.to_string()).unwrap_or_else(|| "undefined".into())
            )))
        }
    };

    let concurrency = step.max_concurrency.unwrap_or(1);
    let continue_on_error = step.continue_on_error;

    let run_item = |item: Value| {
        async move {
            let item_ctx = TemplateContext::with_item(input, results, &item);
            let step_input = step
                .input
                .as_ref()
                .map(|declared| resolve_value(declared, &item_ctx))
                .unwrap_or_else(|| item.clone());
            match frame.call(&step.skill, step_input).await {
                Ok(value) => Ok(value),
                Err(e) if continue_on_error => {
                    warn!("Step {} item failed, continuing: {}", step.step, e);
                    Ok(failure_value(&e))
                }
                Err(e) => Err(e),
            }
        }
    };

    let outputs: Vec<Value> = if concurrency == 1 {
        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            outputs.push(run_item(item).await?);
        }
        outputs
    } else if concurrency == 0 {
        futures::future::join_all(items.into_iter().map(run_item))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?
    } else {
        stream::iter(items.into_iter().map(run_item))
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?
    };

    Ok(json!({ "results": outputs }))
}

/// Apply `outputMapping` when declared, otherwise return the last step's
/// stored result.
fn assemble_output(
    meta: &SkillMeta,
    steps: &[PipelineStep],
    input: &Value,
    results: &Map<String, Value>,
) -> Value {
    if let Some(mapping) = &meta.output_mapping {
        let ctx = TemplateContext::new(input, results);
        let mut out = Map::new();
        for (key, expr) in mapping {
            let value = match expr {
                Value::String(s) => eval_with_fallback(s, &ctx),
                other => resolve_value(other, &ctx),
            };
            out.insert(key.clone(), value);
        }
        return Value::Object(out);
    }

    steps
        .iter()
        .rev()
        .find_map(|step| results.get(&step.step))
        .cloned()
        .unwrap_or(Value::Null)
}
