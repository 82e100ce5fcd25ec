//! Tests for the registry and the layered disk loader.

mod common;

use common::*;
use openevo::core::registry::SkillRegistry;
use openevo::storage::{load_skill_dir, SkillStore};
use openevo::SkillMode;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn write_skill(dir: &Path, name: &str, manifest: serde_json::Value) {
    let skill_dir = dir.join(name);
    std::fs::create_dir_all(&skill_dir).unwrap();
    std::fs::write(
        skill_dir.join("skill.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
    // Give every fixture a code artifact so mode invariants hold.
    std::fs::write(skill_dir.join("index.js"), "// test artifact\n").unwrap();
}

fn manifest(name: &str, description: &str) -> serde_json::Value {
    json!({
        "name": name,
        "description": description,
        "mode": "code",
    })
}

#[test]
fn registry_register_get_unregister() {
    let registry = SkillRegistry::new();
    registry
        .register(make_skill("alpha", open_schema(), open_schema(), Arc::new(FnExecutor(|v| v))))
        .unwrap();

    assert!(registry.has("alpha"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("alpha").unwrap().meta.name, "alpha");

    assert!(registry.unregister("alpha").is_some());
    assert!(!registry.has("alpha"));
    assert!(registry.unregister("alpha").is_none());
}

#[test]
fn registry_rejects_bad_names() {
    let registry = SkillRegistry::new();
    for bad in ["CamelCase", "1leading", "with-dash", "with space", ""] {
        let mut skill = make_skill("placeholder", open_schema(), open_schema(), Arc::new(FnExecutor(|v| v)));
        skill.meta.name = bad.to_string();
        assert!(registry.register(skill).is_err(), "accepted {:?}", bad);
    }
}

#[test]
fn registry_lists_by_category() {
    let registry = SkillRegistry::new();
    let mut weather = make_skill("weather", open_schema(), open_schema(), Arc::new(FnExecutor(|v| v)));
    weather.meta.category = "data".to_string();
    let mut news = make_skill("news", open_schema(), open_schema(), Arc::new(FnExecutor(|v| v)));
    news.meta.category = "data".to_string();
    let chat = make_skill("chat", open_schema(), open_schema(), Arc::new(FnExecutor(|v| v)));

    registry.register(weather).unwrap();
    registry.register(news).unwrap();
    registry.register(chat).unwrap();

    let data = registry.list_by_category("data");
    assert_eq!(data.len(), 2);
    assert_eq!(registry.list().len(), 3);
}

#[test]
fn tool_definitions_project_input_schemas() {
    let registry = SkillRegistry::new();
    let input = json!({
        "type": "object",
        "properties": { "q": { "type": "string" } },
        "required": ["q"]
    });
    registry
        .register(make_skill("searcher", input.clone(), open_schema(), Arc::new(FnExecutor(|v| v))))
        .unwrap();

    let tools = registry.to_tool_definitions();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "searcher");
    assert_eq!(tools[0].parameters, input);
}

#[test]
fn loader_normalizes_manifest_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    write_skill(tmp.path(), "minimal", manifest("minimal", "smallest manifest"));

    let skill = load_skill_dir(&tmp.path().join("minimal")).unwrap();
    assert_eq!(skill.meta.timeout_ms, 30_000);
    assert_eq!(skill.meta.retry, 0);
    assert_eq!(skill.meta.version, "1.0.0");
    assert!(skill.meta.tags.is_empty());
    assert_eq!(skill.meta.mode, SkillMode::Code);
    assert_eq!(skill.dir.as_deref(), Some(tmp.path().join("minimal").as_path()));
}

#[test]
fn loader_requires_mode_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("promptless");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("skill.json"),
        json!({ "name": "promptless", "description": "llm without prompt", "mode": "llm" })
            .to_string(),
    )
    .unwrap();

    assert!(load_skill_dir(&dir).is_err());
}

#[test]
fn discovery_recurses_one_grouping_level() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();

    write_skill(base, "top_level", manifest("top_level", "directly under the root"));
    let group = base.join("finance");
    write_skill(&group, "nested", manifest("nested", "inside a grouping folder"));

    let store = SkillStore::new(base.join("store")).unwrap();
    let registry = SkillRegistry::new();
    let layer = store.load_skills_from_dir(base, &registry);

    assert!(layer.loaded.contains(&"top_level".to_string()));
    assert!(layer.loaded.contains(&"nested".to_string()));
}

#[test]
fn malformed_manifest_is_skipped_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();

    write_skill(base, "good", manifest("good", "fine skill"));
    let broken = base.join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("skill.json"), "{ not json").unwrap();

    let store = SkillStore::new(base.join("store")).unwrap();
    let registry = SkillRegistry::new();
    let layer = store.load_skills_from_dir(base, &registry);

    assert_eq!(layer.loaded, vec!["good".to_string()]);
    assert_eq!(layer.skipped, vec!["broken".to_string()]);
    assert!(registry.has("good"));
}

#[test]
fn later_layers_override_earlier_ones() {
    let tmp = tempfile::tempdir().unwrap();
    let store = SkillStore::new(tmp.path()).unwrap();

    write_skill(
        &store.builtin_dir(),
        "shared_name",
        json!({
            "name": "shared_name",
            "description": "builtin layer copy",
            "mode": "code",
            "version": "1.0.0",
        }),
    );
    write_skill(
        &store.custom_dir(),
        "shared_name",
        json!({
            "name": "shared_name",
            "description": "custom layer copy",
            "mode": "code",
            "version": "2.0.0",
        }),
    );

    let registry = SkillRegistry::new();
    let manifests = store.load_layered(&registry);

    assert_eq!(manifests.len(), 3);
    let winner = registry.get("shared_name").unwrap();
    assert_eq!(winner.meta.version, "2.0.0");
    assert_eq!(winner.meta.description, "custom layer copy");
}

#[test]
fn install_records_persist() {
    let tmp = tempfile::tempdir().unwrap();
    let store = SkillStore::new(tmp.path()).unwrap();

    store.record_install("translate_zh_en", "market").unwrap();
    store.record_install("stock_quote", "market").unwrap();
    // Re-recording replaces, not duplicates.
    store.record_install("translate_zh_en", "market").unwrap();

    let index = store.read_installed();
    assert_eq!(index.installed.len(), 2);
    assert!(index.updated_at.is_some());
    let entry = index
        .installed
        .iter()
        .find(|r| r.skill_id == "translate_zh_en")
        .unwrap();
    assert!(entry.enabled);
    assert_eq!(entry.install_method, "market");
}
