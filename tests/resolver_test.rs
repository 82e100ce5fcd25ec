//! Tests for `$resolve` / `$skill` / `$returnSkill` directive handling.

mod common;

use common::*;
use openevo::core::registry::SkillRegistry;
use serde_json::{json, Value};
use std::sync::Arc;

fn registry() -> Arc<SkillRegistry> {
    Arc::new(SkillRegistry::new())
}

#[tokio::test]
async fn string_directive_injects_message() {
    let reg = registry();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    reg.register(make_skill(
        "wants_message",
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "$resolve": "input.message" }
            },
            "required": ["message"]
        }),
        open_schema(),
        Arc::new(CaptureExecutor {
            seen: seen.clone(),
            output: json!({}),
        }),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "查一下北京天气");

    frame.call("wants_message", json!({})).await.unwrap();
    let captured = seen.lock().clone().unwrap();
    assert_eq!(captured.get("message"), Some(&json!("查一下北京天气")));
}

#[tokio::test]
async fn caller_supplied_value_wins_over_directive() {
    let reg = registry();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    reg.register(make_skill(
        "wants_message",
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "$resolve": "input.message" }
            }
        }),
        open_schema(),
        Arc::new(CaptureExecutor {
            seen: seen.clone(),
            output: json!({}),
        }),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "original message");

    frame
        .call("wants_message", json!({ "message": "caller override" }))
        .await
        .unwrap();
    let captured = seen.lock().clone().unwrap();
    assert_eq!(captured.get("message"), Some(&json!("caller override")));
}

#[tokio::test]
async fn scratch_namespace_reads_request_state() {
    let reg = registry();
    let seen = Arc::new(parking_lot::Mutex::new(None));
    reg.register(make_skill(
        "wants_scratch",
        json!({
            "type": "object",
            "properties": {
                "intent": { "type": "object", "$resolve": "scratch.intent" }
            }
        }),
        open_schema(),
        Arc::new(CaptureExecutor {
            seen: seen.clone(),
            output: json!({}),
        }),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");
    frame.scratch_set("intent", json!({ "name": "greeting" }));

    frame.call("wants_scratch", json!({})).await.unwrap();
    let captured = seen.lock().clone().unwrap();
    assert_eq!(captured.get("intent"), Some(&json!({ "name": "greeting" })));
}

#[tokio::test]
async fn skills_list_excludes_system_and_directive_fields() {
    let reg = registry();
    reg.register(make_skill(
        "visible",
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "city to query" },
                "auto": { "type": "string", "$resolve": "input.message" }
            },
            "required": ["city"]
        }),
        open_schema(),
        Arc::new(FnExecutor(|v| v)),
    ))
    .unwrap();

    let mut hidden = make_skill("hidden", open_schema(), open_schema(), Arc::new(FnExecutor(|v| v)));
    hidden.meta.category = "system".to_string();
    reg.register(hidden).unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(None));
    reg.register(make_skill(
        "wants_catalog",
        json!({
            "type": "object",
            "properties": {
                "catalog": { "type": "array", "$resolve": "skills.list" }
            }
        }),
        open_schema(),
        Arc::new(CaptureExecutor {
            seen: seen.clone(),
            output: json!({}),
        }),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");
    frame.call("wants_catalog", json!({})).await.unwrap();

    let captured = seen.lock().clone().unwrap();
    let catalog = captured.get("catalog").unwrap().as_array().unwrap();

    let names: Vec<&str> = catalog
        .iter()
        .map(|s| s.get("name").unwrap().as_str().unwrap())
        .collect();
    assert!(names.contains(&"visible"));
    assert!(!names.contains(&"hidden"));

    let visible = catalog
        .iter()
        .find(|s| s.get("name").unwrap() == "visible")
        .unwrap();
    let fields = visible.get("input").unwrap().as_array().unwrap();
    let field_names: Vec<&str> = fields
        .iter()
        .map(|f| f.get("name").unwrap().as_str().unwrap())
        .collect();
    // Directive-injected fields are stripped from the summary.
    assert_eq!(field_names, vec!["city"]);
    assert_eq!(fields[0].get("required"), Some(&json!(true)));
}

#[tokio::test]
async fn skill_directive_invokes_other_skill() {
    let reg = registry();
    reg.register(make_skill(
        "source",
        open_schema(),
        open_schema(),
        Arc::new(FnExecutor(|_| json!({ "token": "abc123" }))),
    ))
    .unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(None));
    reg.register(make_skill(
        "consumer",
        json!({
            "type": "object",
            "properties": {
                "auth": {
                    "type": "object",
                    "$resolve": { "type": "skill", "name": "source", "params": {} }
                }
            }
        }),
        open_schema(),
        Arc::new(CaptureExecutor {
            seen: seen.clone(),
            output: json!({}),
        }),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");
    frame.call("consumer", json!({})).await.unwrap();

    let captured = seen.lock().clone().unwrap();
    assert_eq!(captured.get("auth"), Some(&json!({ "token": "abc123" })));
}

#[tokio::test]
async fn return_skill_wraps_names_into_handles() {
    let reg = registry();
    reg.register(make_skill(
        "chooser",
        open_schema(),
        json!({
            "type": "object",
            "properties": {
                "selected": { "type": "string", "$returnSkill": true },
                "all": { "type": "array", "$returnSkill": true }
            }
        }),
        Arc::new(FnExecutor(|_| {
            json!({ "selected": "target", "all": ["target", "other"] })
        })),
    ))
    .unwrap();
    reg.register(make_skill(
        "target",
        open_schema(),
        open_schema(),
        Arc::new(FnExecutor(|_| json!({ "ran": true }))),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");

    let output = frame.call("chooser", json!({})).await.unwrap();
    assert_eq!(output.get("selected"), Some(&json!({ "$skill": "target" })));
    assert_eq!(
        output.get("all"),
        Some(&json!([{ "$skill": "target" }, { "$skill": "other" }]))
    );

    // A handle is invocable and re-enters the gated call path.
    let handle = output.get("selected").unwrap();
    let result = frame.invoke_handle(handle, json!({})).await.unwrap();
    assert_eq!(result, json!({ "ran": true }));
}

#[tokio::test]
async fn depth_limit_stops_recursion() {
    let reg = registry();
    reg.register(make_skill(
        "recurse",
        open_schema(),
        open_schema(),
        Arc::new(RecursiveExecutor {
            target: "recurse".to_string(),
        }),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");

    match frame.call("recurse", json!({})).await {
        Err(openevo::SkillError::DepthExceeded { current, max, .. }) => {
            assert_eq!(max, 10);
            assert!(current >= max);
        }
        other => panic!("expected DepthExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn gate_one_rejects_invalid_input() {
    let reg = registry();
    reg.register(make_skill(
        "strict",
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" }
            },
            "required": ["city"]
        }),
        open_schema(),
        Arc::new(FnExecutor(|v| v)),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");

    match frame.call("strict", json!({})).await {
        Err(openevo::SkillError::Validation {
            direction,
            violations,
            ..
        }) => {
            assert_eq!(direction, openevo::core::ValidationDirection::Input);
            assert_eq!(violations.len(), 1);
        }
        other => panic!("expected input validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn gate_two_rejects_invalid_code_output() {
    let reg = registry();
    reg.register(make_skill(
        "liar",
        open_schema(),
        json!({
            "type": "object",
            "properties": {
                "count": { "type": "number" }
            },
            "required": ["count"]
        }),
        Arc::new(FnExecutor(|_| json!({ "count": "not a number" }))),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");

    match frame.call("liar", json!({})).await {
        Err(openevo::SkillError::Validation { direction, .. }) => {
            assert_eq!(direction, openevo::core::ValidationDirection::Output);
        }
        other => panic!("expected output validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn unknown_skill_is_not_found() {
    let reg = registry();
    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");

    match frame.call("ghost", json!({})).await {
        Err(openevo::SkillError::NotFound(name)) => assert_eq!(name, "ghost"),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn shared_scratch_is_visible_across_frames() {
    let reg = registry();

    struct ScratchWriter;
    #[async_trait::async_trait]
    impl openevo::execution::SkillExecutor for ScratchWriter {
        async fn execute(
            &self,
            _input: Value,
            frame: &openevo::agent::context::CallFrame,
        ) -> openevo::core::Result<Value> {
            frame.scratch_set("written_by_child", json!(42));
            Ok(json!({}))
        }
    }

    reg.register(make_skill(
        "writer",
        open_schema(),
        open_schema(),
        Arc::new(ScratchWriter),
    ))
    .unwrap();

    let provider = ScriptedProvider::new(vec![]);
    let frame = frame_with(reg, provider, "hi");

    frame.call("writer", json!({})).await.unwrap();
    // The child frame mutated the same request-scoped store.
    assert_eq!(frame.scratch_get("written_by_child"), Some(json!(42)));
}
