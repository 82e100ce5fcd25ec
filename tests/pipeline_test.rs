//! Tests for the composite pipeline engine: sequencing, DAG scheduling,
//! foreach fan-out, retry backoff, and template evaluation.

mod common;

use common::*;
use openevo::core::registry::SkillRegistry;
use openevo::core::SkillError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn registry_with(skills: Vec<openevo::core::Skill>) -> Arc<SkillRegistry> {
    let registry = Arc::new(SkillRegistry::new());
    for skill in skills {
        registry.register(skill).unwrap();
    }
    registry
}

fn echo(input: Value) -> Value {
    input
}

fn tag_a(_input: Value) -> Value {
    json!({ "from": "a" })
}

fn tag_b(_input: Value) -> Value {
    json!({ "from": "b" })
}

#[tokio::test]
async fn sequential_pipeline_threads_step_results() {
    let registry = registry_with(vec![
        make_skill("first", open_schema(), open_schema(), Arc::new(FnExecutor(|_| {
            json!({ "greeting": "hello" })
        }))),
        make_skill("second", open_schema(), open_schema(), Arc::new(FnExecutor(echo))),
    ]);
    registry
        .register(make_composite(
            "combo",
            json!([
                { "step": "a", "skill": "first", "input": {} },
                { "step": "b", "skill": "second", "input": { "said": "{{steps.a.greeting}}" } }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let output = frame.call("combo", json!({})).await.unwrap();
    assert_eq!(output, json!({ "said": "hello" }));
}

#[tokio::test]
async fn empty_pipeline_is_invalid() {
    let registry = registry_with(vec![]);
    registry
        .register(make_composite("empty", json!([])))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    match frame.call("empty", json!({})).await {
        Err(SkillError::InvalidPipeline { .. }) => {}
        other => panic!("expected InvalidPipeline, got {:?}", other),
    }
}

#[tokio::test]
async fn dag_runs_dependents_after_parents() {
    let registry = registry_with(vec![
        make_skill("skill_a", open_schema(), open_schema(), Arc::new(FnExecutor(tag_a))),
        make_skill("skill_b", open_schema(), open_schema(), Arc::new(FnExecutor(tag_b))),
        make_skill("skill_c", open_schema(), open_schema(), Arc::new(FnExecutor(echo))),
    ]);
    registry
        .register(make_composite(
            "fanout",
            json!([
                { "step": "a", "skill": "skill_a" },
                { "step": "b", "skill": "skill_b" },
                {
                    "step": "c",
                    "skill": "skill_c",
                    "depends": ["a", "b"],
                    "input": { "left": "{{steps.a.from}}", "right": "{{steps.b.from}}" }
                }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let output = frame.call("fanout", json!({})).await.unwrap();
    assert_eq!(output, json!({ "left": "a", "right": "b" }));
}

#[tokio::test]
async fn dag_failure_aborts_dependents() {
    let c_calls = Arc::new(AtomicU32::new(0));

    let registry = registry_with(vec![
        make_skill("skill_a", open_schema(), open_schema(), Arc::new(FnExecutor(tag_a))),
        make_skill(
            "skill_b",
            open_schema(),
            open_schema(),
            Arc::new(FailExecutor("b exploded".to_string())),
        ),
        make_skill(
            "skill_c",
            open_schema(),
            open_schema(),
            Arc::new(FlakyExecutor {
                calls: c_calls.clone(),
                fail_times: 0,
                output: json!({}),
            }),
        ),
    ]);
    registry
        .register(make_composite(
            "doomed",
            json!([
                { "step": "a", "skill": "skill_a" },
                { "step": "b", "skill": "skill_b" },
                { "step": "c", "skill": "skill_c", "depends": ["a", "b"] }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let result = frame.call("doomed", json!({})).await;
    assert!(result.is_err());
    assert_eq!(c_calls.load(Ordering::SeqCst), 0, "c must never run");
}

#[tokio::test]
async fn dag_continue_on_error_stores_failure_marker() {
    let registry = registry_with(vec![
        make_skill(
            "skill_b",
            open_schema(),
            open_schema(),
            Arc::new(FailExecutor("soft failure".to_string())),
        ),
        make_skill("skill_c", open_schema(), open_schema(), Arc::new(FnExecutor(echo))),
    ]);
    registry
        .register(make_composite(
            "tolerant",
            json!([
                { "step": "b", "skill": "skill_b", "continueOnError": true },
                {
                    "step": "c",
                    "skill": "skill_c",
                    "depends": ["b"],
                    "input": { "upstream_failed": "{{steps.b._failed}}" }
                }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let output = frame.call("tolerant", json!({})).await.unwrap();
    assert_eq!(output, json!({ "upstream_failed": true }));
}

#[tokio::test]
async fn dangling_depends_is_invalid() {
    let registry = registry_with(vec![make_skill(
        "skill_a",
        open_schema(),
        open_schema(),
        Arc::new(FnExecutor(tag_a)),
    )]);
    registry
        .register(make_composite(
            "dangling",
            json!([
                { "step": "a", "skill": "skill_a", "depends": ["ghost"] }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    match frame.call("dangling", json!({})).await {
        Err(SkillError::InvalidPipeline { .. }) => {}
        other => panic!("expected InvalidPipeline, got {:?}", other),
    }
}

#[tokio::test]
async fn dependency_cycle_deadlocks() {
    let registry = registry_with(vec![
        make_skill("skill_a", open_schema(), open_schema(), Arc::new(FnExecutor(tag_a))),
        make_skill("skill_b", open_schema(), open_schema(), Arc::new(FnExecutor(tag_b))),
    ]);
    registry
        .register(make_composite(
            "cycle",
            json!([
                { "step": "a", "skill": "skill_a", "depends": ["b"] },
                { "step": "b", "skill": "skill_b", "depends": ["a"] }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    match frame.call("cycle", json!({})).await {
        Err(SkillError::DagDeadlock { remaining }) => {
            assert!(remaining.contains('a'));
            assert!(remaining.contains('b'));
        }
        other => panic!("expected DagDeadlock, got {:?}", other),
    }
}

#[tokio::test]
async fn condition_skips_step() {
    let registry = registry_with(vec![
        make_skill("skill_a", open_schema(), open_schema(), Arc::new(FnExecutor(|_| {
            json!({ "count": 0 })
        }))),
        make_skill("skill_b", open_schema(), open_schema(), Arc::new(FnExecutor(tag_b))),
    ]);
    registry
        .register(make_composite(
            "guarded",
            json!([
                { "step": "a", "skill": "skill_a" },
                { "step": "b", "skill": "skill_b", "condition": "{{steps.a.count > 0}}" }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    // Skipped b leaves a's result as the pipeline output.
    let output = frame.call("guarded", json!({})).await.unwrap();
    assert_eq!(output, json!({ "count": 0 }));
}

#[tokio::test(start_paused = true)]
async fn retry_backoff_doubles_and_caps() {
    let calls = Arc::new(AtomicU32::new(0));
    let registry = registry_with(vec![make_skill(
        "flaky",
        open_schema(),
        open_schema(),
        Arc::new(FlakyExecutor {
            calls: calls.clone(),
            fail_times: 2,
            output: json!({ "ok": true }),
        }),
    )]);
    registry
        .register(make_composite(
            "retrying",
            json!([
                { "step": "s", "skill": "flaky", "retry": 2, "retryDelay": 100 }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let started = tokio::time::Instant::now();
    let output = frame.call("retrying", json!({})).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(output, json!({ "ok": true }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Waits: 100ms before attempt 1 retry, 200ms before attempt 2 retry.
    assert!(elapsed >= std::time::Duration::from_millis(300));
    assert!(elapsed < std::time::Duration::from_millis(400));
}

#[tokio::test]
async fn foreach_runs_per_item_and_collects() {
    let registry = registry_with(vec![make_skill(
        "doubler",
        open_schema(),
        open_schema(),
        Arc::new(FnExecutor(|input| {
            let n = input.get("n").and_then(Value::as_i64).unwrap_or(0);
            json!({ "doubled": n * 2 })
        })),
    )]);
    registry
        .register(make_composite(
            "mapper",
            json!([
                {
                    "step": "each",
                    "skill": "doubler",
                    "foreach": "{{input.items}}",
                    "input": { "n": "{{item.n}}" }
                }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let output = frame
        .call("mapper", json!({ "items": [ { "n": 1 }, { "n": 2 }, { "n": 3 } ] }))
        .await
        .unwrap();
    assert_eq!(
        output,
        json!({ "results": [
            { "doubled": 2 }, { "doubled": 4 }, { "doubled": 6 }
        ]})
    );
}

#[tokio::test]
async fn foreach_requires_an_array() {
    let registry = registry_with(vec![make_skill(
        "noop",
        open_schema(),
        open_schema(),
        Arc::new(FnExecutor(echo)),
    )]);
    registry
        .register(make_composite(
            "bad_foreach",
            json!([
                { "step": "each", "skill": "noop", "foreach": "{{input.not_a_list}}" }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let result = frame
        .call("bad_foreach", json!({ "not_a_list": "scalar" }))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn output_mapping_projects_named_outputs() {
    let registry = registry_with(vec![make_skill(
        "skill_a",
        open_schema(),
        open_schema(),
        Arc::new(FnExecutor(|_| json!({ "value": 7 }))),
    )]);

    let meta: openevo::SkillMeta = serde_json::from_value(json!({
        "name": "mapped",
        "description": "pipeline with output mapping",
        "mode": "composite",
        "pipeline": [ { "step": "a", "skill": "skill_a" } ],
        "outputMapping": {
            "answer": "{{steps.a.value}}",
            "fallback": "{{steps.a.missing}} || 'none'"
        }
    }))
    .unwrap();
    let executor = Arc::new(openevo::execution::CompositeExecutor::new(meta.clone()));
    registry
        .register(openevo::Skill::new(meta, executor))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    let output = frame.call("mapped", json!({})).await.unwrap();
    assert_eq!(output, json!({ "answer": 7, "fallback": "none" }));
}

#[tokio::test]
async fn step_timeout_raises_pipeline_timeout() {
    struct SlowExecutor;

    #[async_trait::async_trait]
    impl openevo::execution::SkillExecutor for SlowExecutor {
        async fn execute(
            &self,
            _input: Value,
            _frame: &openevo::agent::context::CallFrame,
        ) -> openevo::core::Result<Value> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    let registry = registry_with(vec![make_skill(
        "slow",
        open_schema(),
        open_schema(),
        Arc::new(SlowExecutor),
    )]);
    registry
        .register(make_composite(
            "timed",
            json!([
                { "step": "s", "skill": "slow", "timeout": 50 }
            ]),
        ))
        .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(registry, provider, "hi");

    match frame.call("timed", json!({})).await {
        Err(SkillError::PipelineTimeout { step, timeout_ms }) => {
            assert_eq!(step, "s");
            assert_eq!(timeout_ms, 50);
        }
        other => panic!("expected PipelineTimeout, got {:?}", other),
    }
}
