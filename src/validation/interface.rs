//! Interface mapping between loosely coupled pipeline neighbors.
//!
//! An upstream skill's output rarely matches the next skill's input schema
//! field-for-field. Two mechanisms bridge the gap:
//!
//! - [`validate_pipeline_interface`] compares the schemas and proposes a
//!   field mapping for missing required inputs.
//! - [`resolve_pipeline_input`] deep-extracts values from the concrete
//!   upstream object, including composite-value splitting for enum fields
//!   (`"000001.SH"` -> `code="000001"`, `market_type="SH"`).

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use super::json_type_of;

const COMPOSITE_SEPARATORS: [char; 4] = ['.', '-', '_', '/'];

/// Minimum candidate score for a proposed field mapping.
const CANDIDATE_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceIssueKind {
    Missing,
    TypeMismatch,
}

/// One incompatibility between an upstream output and a downstream input.
#[derive(Debug, Clone)]
pub struct InterfaceIssue {
    pub field: String,
    pub issue: InterfaceIssueKind,
    pub expected: String,
    pub actual: Option<String>,
    /// Upstream field proposed as a substitute, when one scores highly enough.
    pub candidate: Option<String>,
}

/// Compare an upstream output schema against a downstream input schema.
///
/// Only downstream required fields are examined; properties bearing
/// `$resolve` are runtime-injected and skipped. For missing fields, upstream
/// properties are scored on description-word overlap plus substring-matched
/// names; a candidate needs a score of at least 2 and a matching type.
pub fn validate_pipeline_interface(upstream_output: &Value, downstream_input: &Value) -> Vec<InterfaceIssue> {
    let mut issues = Vec::new();

    let down_props = match downstream_input.get("properties").and_then(|p| p.as_object()) {
        Some(p) => p,
        None => return issues,
    };
    let required: Vec<&str> = downstream_input
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    let up_props = upstream_output
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    for field in required {
        let down_schema = match down_props.get(field) {
            Some(s) => s,
            None => continue,
        };
        if down_schema.get("$resolve").is_some() {
            continue;
        }
        let expected_type = down_schema
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("any");

        match up_props.get(field) {
            Some(up_schema) => {
                let actual_type = up_schema
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("any");
                if expected_type != "any" && actual_type != "any" && expected_type != actual_type {
                    issues.push(InterfaceIssue {
                        field: field.to_string(),
                        issue: InterfaceIssueKind::TypeMismatch,
                        expected: expected_type.to_string(),
                        actual: Some(actual_type.to_string()),
                        candidate: best_candidate(field, down_schema, &up_props),
                    });
                }
            }
            None => {
                issues.push(InterfaceIssue {
                    field: field.to_string(),
                    issue: InterfaceIssueKind::Missing,
                    expected: expected_type.to_string(),
                    actual: None,
                    candidate: best_candidate(field, down_schema, &up_props),
                });
            }
        }
    }

    issues
}

/// Score upstream properties as substitutes for a missing downstream field.
fn best_candidate(
    field: &str,
    down_schema: &Value,
    up_props: &Map<String, Value>,
) -> Option<String> {
    let expected_type = down_schema.get("type").and_then(|t| t.as_str());
    let down_words = description_words(down_schema);
    let field_lower = field.to_lowercase();

    let mut best: Option<(String, u32)> = None;
    for (up_name, up_schema) in up_props {
        if let (Some(expected), Some(actual)) =
            (expected_type, up_schema.get("type").and_then(|t| t.as_str()))
        {
            if expected != actual {
                continue;
            }
        }

        let mut score = 0u32;
        let up_lower = up_name.to_lowercase();
        if up_lower.contains(&field_lower) || field_lower.contains(&up_lower) {
            score += 2;
        }
        let up_words = description_words(up_schema);
        score += down_words.iter().filter(|w| up_words.contains(*w)).count() as u32;

        if score >= CANDIDATE_THRESHOLD
            && best.as_ref().map(|(_, s)| score > *s).unwrap_or(true)
        {
            best = Some((up_name.clone(), score));
        }
    }

    best.map(|(name, score)| {
        debug!("Interface candidate for '{}': '{}' (score {})", field, name, score);
        name
    })
}

fn description_words(schema: &Value) -> Vec<String> {
    schema
        .get("description")
        .and_then(|d| d.as_str())
        .map(|d| {
            d.to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| w.len() > 2)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// `{downstream field -> upstream field}` from the candidates in a report.
pub fn build_field_mapping(issues: &[InterfaceIssue]) -> HashMap<String, String> {
    issues
        .iter()
        .filter_map(|issue| {
            issue
                .candidate
                .as_ref()
                .map(|c| (issue.field.clone(), c.clone()))
        })
        .collect()
}

/// Copy mapped upstream values onto their downstream field names.
pub fn apply_field_mapping(upstream: &Value, mapping: &HashMap<String, String>) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(obj) = upstream.as_object() {
        for (down_field, up_field) in mapping {
            if let Some(value) = obj.get(up_field) {
                out.insert(down_field.clone(), value.clone());
            }
        }
    }
    out
}

/// Deep-extract values for each downstream property from a concrete
/// upstream object.
///
/// Search order per property: exact top-level name, recursive walk (nested
/// objects and first array elements, same-name or substring keys), then
/// top-level substring match. A second pass derives missing enum-valued
/// fields by splitting composite string values on `.`/`-`/`_`/`/`.
pub fn resolve_pipeline_input(upstream: &Value, downstream_schema: &Value) -> Map<String, Value> {
    let mut resolved = Map::new();
    let props = match downstream_schema.get("properties").and_then(|p| p.as_object()) {
        Some(p) => p,
        None => return resolved,
    };
    let up_obj = match upstream.as_object() {
        Some(o) => o,
        None => return resolved,
    };

    for (field, schema) in props {
        if schema.get("$resolve").is_some() {
            continue;
        }

        // (a) exact top-level match under type and enum constraints
        if let Some(value) = up_obj.get(field) {
            if satisfies(value, schema) {
                resolved.insert(field.clone(), value.clone());
                continue;
            }
        }

        // (b) recursive walk into nested objects and first array elements
        if let Some(value) = deep_find(upstream, field, schema, 0) {
            resolved.insert(field.clone(), value);
            continue;
        }

        // (c) top-level substring match
        let field_lower = field.to_lowercase();
        for (key, value) in up_obj {
            let key_lower = key.to_lowercase();
            if key != field
                && (key_lower.contains(&field_lower) || field_lower.contains(&key_lower))
                && satisfies(value, schema)
            {
                resolved.insert(field.clone(), value.clone());
                break;
            }
        }
    }

    split_composite_values(&mut resolved, props);
    resolved
}

/// Type plus enum admission check for an extracted value.
fn satisfies(value: &Value, schema: &Value) -> bool {
    if let Some(declared) = schema.get("type").and_then(|t| t.as_str()) {
        let matches = match declared {
            "integer" => value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false),
            "number" => value.is_number(),
            other => json_type_of(value) == other,
        };
        if !matches {
            return false;
        }
    }
    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return false;
        }
    }
    true
}

fn deep_find(value: &Value, field: &str, schema: &Value, depth: usize) -> Option<Value> {
    if depth > 4 {
        return None;
    }
    let field_lower = field.to_lowercase();
    match value {
        Value::Object(obj) => {
            for (key, nested) in obj {
                let key_lower = key.to_lowercase();
                let name_match = key == field
                    || key_lower.contains(&field_lower)
                    || field_lower.contains(&key_lower);
                if name_match && depth > 0 && satisfies(nested, schema) {
                    return Some(nested.clone());
                }
                if let Some(found) = deep_find(nested, field, schema, depth + 1) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items
            .first()
            .and_then(|first| deep_find(first, field, schema, depth + 1)),
        _ => None,
    }
}

/// Derive missing enum-valued fields by splitting already-extracted strings.
///
/// A value like `"000001.SH"` satisfies a sibling `enum ["SH", "SZ"]` field
/// through its suffix; the prefix stays behind in the original field.
fn split_composite_values(resolved: &mut Map<String, Value>, props: &Map<String, Value>) {
    let missing_enum_fields: Vec<(String, Vec<Value>)> = props
        .iter()
        .filter(|(field, _)| !resolved.contains_key(*field))
        .filter_map(|(field, schema)| {
            schema
                .get("enum")
                .and_then(|e| e.as_array())
                .map(|allowed| (field.clone(), allowed.clone()))
        })
        .collect();

    for (field, allowed) in missing_enum_fields {
        let mut derived: Option<(String, String, String)> = None;

        'outer: for (source_field, value) in resolved.iter() {
            let text = match value.as_str() {
                Some(t) => t,
                None => continue,
            };
            for sep in COMPOSITE_SEPARATORS {
                if let Some((prefix, suffix)) = text.rsplit_once(sep) {
                    if allowed.iter().any(|a| a.as_str() == Some(suffix)) {
                        derived = Some((
                            source_field.clone(),
                            prefix.to_string(),
                            suffix.to_string(),
                        ));
                        break 'outer;
                    }
                }
            }
        }

        if let Some((source_field, prefix, suffix)) = derived {
            debug!(
                "Split composite value: '{}' -> '{}' + {}='{}'",
                source_field, prefix, field, suffix
            );
            resolved.insert(source_field, Value::String(prefix));
            resolved.insert(field, Value::String(suffix));
        }
    }
}
