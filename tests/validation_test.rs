//! Tests for the schema walker, JSON extraction, and interface mapping.

use openevo::validation::{
    apply_field_mapping, build_field_mapping, extract_json, resolve_pipeline_input,
    validate_pipeline_interface, validate_schema, InterfaceIssueKind, ViolationRule,
};
use serde_json::json;

#[test]
fn accepts_valid_object() {
    let schema = json!({
        "type": "object",
        "properties": {
            "name": { "type": "string", "minLength": 2 },
            "count": { "type": "number", "minimum": 0 }
        },
        "required": ["name"]
    });
    let data = json!({ "name": "beijing", "count": 3 });
    assert!(validate_schema(&data, &schema, "").is_empty());
}

#[test]
fn top_level_type_failure_returns_early() {
    let schema = json!({
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"]
    });
    let violations = validate_schema(&json!("not an object"), &schema, "");
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule, ViolationRule::Type);
}

#[test]
fn aggregates_all_violations() {
    let schema = json!({
        "type": "object",
        "properties": {
            "kind": { "type": "string", "enum": ["a", "b"] },
            "size": { "type": "number", "maximum": 10 },
            "label": { "type": "string", "maxLength": 3 }
        },
        "required": ["kind", "size", "label", "missing_one"]
    });
    let data = json!({ "kind": "c", "size": 99, "label": "too long" });
    let violations = validate_schema(&data, &schema, "");

    let rules: Vec<ViolationRule> = violations.iter().map(|v| v.rule).collect();
    assert!(rules.contains(&ViolationRule::Enum));
    assert!(rules.contains(&ViolationRule::Maximum));
    assert!(rules.contains(&ViolationRule::MaxLength));
    assert!(rules.contains(&ViolationRule::Required));
    assert_eq!(violations.len(), 4);
}

#[test]
fn skips_directive_properties() {
    let schema = json!({
        "type": "object",
        "properties": {
            "injected": { "type": "string", "$resolve": "input.message" },
            "handle": { "type": "string", "$returnSkill": true }
        },
        "required": ["injected"]
    });
    // Neither present, neither typed right; both must be ignored.
    let data = json!({ "handle": 42 });
    assert!(validate_schema(&data, &schema, "").is_empty());
}

#[test]
fn validates_array_items_with_paths() {
    let schema = json!({
        "type": "array",
        "items": { "type": "number", "minimum": 0 }
    });
    let violations = validate_schema(&json!([1, -2, 3]), &schema, "values");
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].path, "values[1]");
    assert_eq!(violations[0].rule, ViolationRule::Minimum);
}

#[test]
fn integer_type_accepts_whole_numbers_only() {
    let schema = json!({ "type": "integer" });
    assert!(validate_schema(&json!(5), &schema, "").is_empty());
    assert_eq!(validate_schema(&json!(5.5), &schema, "").len(), 1);
}

#[test]
fn extract_json_roundtrips_serialized_objects() {
    let original = json!({
        "nested": { "list": [1, 2, 3], "flag": true },
        "text": "with \"quotes\" and {braces}"
    });
    let serialized = serde_json::to_string(&original).unwrap();
    assert_eq!(extract_json(&serialized), Some(original));
}

#[test]
fn extract_json_reads_fenced_blocks() {
    let text = "Here is the result:\n```json\n{\"ok\": true}\n```\nDone.";
    assert_eq!(extract_json(text), Some(json!({ "ok": true })));
}

#[test]
fn extract_json_finds_first_balanced_span() {
    let text = "The answer is {\"a\": {\"b\": 1}} and more prose after.";
    assert_eq!(extract_json(text), Some(json!({ "a": { "b": 1 } })));
}

#[test]
fn extract_json_rejects_plain_prose() {
    assert_eq!(extract_json("no json here at all"), None);
}

#[test]
fn interface_flags_missing_required_fields() {
    let upstream = json!({
        "type": "object",
        "properties": {
            "city_name": { "type": "string", "description": "name of the city" }
        }
    });
    let downstream = json!({
        "type": "object",
        "properties": {
            "city": { "type": "string", "description": "city name to look up" },
            "units": { "type": "string" }
        },
        "required": ["city"]
    });

    let issues = validate_pipeline_interface(&upstream, &downstream);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].field, "city");
    assert_eq!(issues[0].issue, InterfaceIssueKind::Missing);
    // Substring name match plus shared description words clears the bar.
    assert_eq!(issues[0].candidate.as_deref(), Some("city_name"));
}

#[test]
fn interface_candidate_requires_type_match() {
    let upstream = json!({
        "type": "object",
        "properties": {
            "city_name": { "type": "number", "description": "city name" }
        }
    });
    let downstream = json!({
        "type": "object",
        "properties": {
            "city": { "type": "string", "description": "city name" }
        },
        "required": ["city"]
    });

    let issues = validate_pipeline_interface(&upstream, &downstream);
    assert_eq!(issues.len(), 1);
    assert!(issues[0].candidate.is_none());
}

#[test]
fn interface_ignores_resolve_fields_and_optionals() {
    let upstream = json!({ "type": "object", "properties": {} });
    let downstream = json!({
        "type": "object",
        "properties": {
            "auto": { "type": "string", "$resolve": "input.message" },
            "optional": { "type": "string" }
        },
        "required": ["auto"]
    });
    assert!(validate_pipeline_interface(&upstream, &downstream).is_empty());
}

#[test]
fn field_mapping_applies_candidates() {
    let upstream_schema = json!({
        "type": "object",
        "properties": {
            "city_name": { "type": "string", "description": "the city name" }
        }
    });
    let downstream_schema = json!({
        "type": "object",
        "properties": {
            "city": { "type": "string", "description": "city name" }
        },
        "required": ["city"]
    });
    let issues = validate_pipeline_interface(&upstream_schema, &downstream_schema);
    let mapping = build_field_mapping(&issues);

    let upstream_value = json!({ "city_name": "Beijing" });
    let mapped = apply_field_mapping(&upstream_value, &mapping);
    assert_eq!(mapped.get("city"), Some(&json!("Beijing")));
}

#[test]
fn deep_extraction_walks_nested_objects_and_arrays() {
    let upstream = json!({
        "payload": {
            "quotes": [ { "price": 12.34 } ]
        }
    });
    let downstream = json!({
        "type": "object",
        "properties": {
            "price": { "type": "number" }
        }
    });
    let resolved = resolve_pipeline_input(&upstream, &downstream);
    assert_eq!(resolved.get("price"), Some(&json!(12.34)));
}

#[test]
fn composite_split_derives_enum_suffix() {
    // Scenario: stock code "000001.SH" feeding {code, market_type}.
    let upstream = json!({
        "stock_code": "000001.SH",
        "quotes": [ { "price": 12.34 } ]
    });
    let downstream = json!({
        "type": "object",
        "properties": {
            "code": { "type": "string" },
            "market_type": { "type": "string", "enum": ["SH", "SZ"] }
        },
        "required": ["code", "market_type"]
    });

    let resolved = resolve_pipeline_input(&upstream, &downstream);
    assert_eq!(resolved.get("code"), Some(&json!("000001")));
    assert_eq!(resolved.get("market_type"), Some(&json!("SH")));
}

#[test]
fn extraction_never_violates_enum_constraints() {
    let upstream = json!({ "market_type": "NASDAQ" });
    let downstream = json!({
        "type": "object",
        "properties": {
            "market_type": { "type": "string", "enum": ["SH", "SZ"] }
        }
    });
    let resolved = resolve_pipeline_input(&upstream, &downstream);
    assert!(resolved.get("market_type").is_none());
}
