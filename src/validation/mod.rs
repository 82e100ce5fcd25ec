//! Schema validation for skill inputs and outputs.
//!
//! The walker checks data against the JSON-schema subset used by skill
//! manifests: declared types, required fields, enums, numeric and string
//! bounds, nested objects and array items. Properties carrying `$resolve`
//! or `$returnSkill` directives are injected by the runtime and skipped.
//!
//! Violations are aggregated (not first-failure) so a single repair round
//! can fix everything at once.

pub mod interface;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use interface::{
    apply_field_mapping, build_field_mapping, resolve_pipeline_input,
    validate_pipeline_interface, InterfaceIssue, InterfaceIssueKind,
};

/// Which schema rule a value broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationRule {
    Type,
    Required,
    Enum,
    Minimum,
    Maximum,
    MinLength,
    MaxLength,
    Pattern,
    Format,
}

impl fmt::Display for ViolationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationRule::Type => "type",
            ViolationRule::Required => "required",
            ViolationRule::Enum => "enum",
            ViolationRule::Minimum => "minimum",
            ViolationRule::Maximum => "maximum",
            ViolationRule::MinLength => "minLength",
            ViolationRule::MaxLength => "maxLength",
            ViolationRule::Pattern => "pattern",
            ViolationRule::Format => "format",
        };
        write!(f, "{}", s)
    }
}

/// One schema violation at a JSON path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted path into the payload, empty at the root.
    pub path: String,
    pub rule: ViolationRule,
    pub expected: String,
    pub actual: String,
    pub suggestion: String,
}

impl Violation {
    /// Single-line rendering used in repair feedback.
    pub fn describe(&self) -> String {
        let at = if self.path.is_empty() {
            "root".to_string()
        } else {
            format!("'{}'", self.path)
        };
        format!(
            "{} at {}: expected {}, got {}. {}",
            self.rule, at, self.expected, self.actual, self.suggestion
        )
    }
}

/// A full gate report for one skill payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub skill: String,
    pub direction: String,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Runtime type name of a JSON value, as schemas spell them.
pub fn json_type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "integer" => value
            .as_f64()
            .map(|f| f.fract() == 0.0)
            .unwrap_or(false),
        "number" => value.is_number(),
        other => json_type_of(value) == other,
    }
}

fn preview(value: &Value) -> String {
    let s = value.to_string();
    if s.len() > 80 {
        format!("{}...", &s[..80])
    } else {
        s
    }
}

fn is_directive_property(schema: &Value) -> bool {
    schema.get("$resolve").is_some() || schema.get("$returnSkill").is_some()
}

/// Validate `data` against `schema`, aggregating all violations.
///
/// Returns early only when the top-level type check fails; everything below
/// that is collected into one list.
pub fn validate_schema(data: &Value, schema: &Value, path: &str) -> Vec<Violation> {
    let mut violations = Vec::new();

    if let Some(declared) = schema.get("type").and_then(|t| t.as_str()) {
        if !type_matches(declared, data) {
            violations.push(Violation {
                path: path.to_string(),
                rule: ViolationRule::Type,
                expected: declared.to_string(),
                actual: json_type_of(data).to_string(),
                suggestion: format!("Provide a value of type '{}'", declared),
            });
            return violations;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(data) {
            violations.push(Violation {
                path: path.to_string(),
                rule: ViolationRule::Enum,
                expected: preview(&Value::Array(allowed.clone())),
                actual: preview(data),
                suggestion: format!(
                    "Use one of the allowed values: {}",
                    preview(&Value::Array(allowed.clone()))
                ),
            });
        }
    }

    match data {
        Value::Object(obj) => {
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for req in required.iter().filter_map(|r| r.as_str()) {
                    let prop_schema = schema
                        .get("properties")
                        .and_then(|p| p.get(req));
                    // Directive-injected fields are filled by the runtime,
                    // not the caller.
                    if prop_schema.map(is_directive_property).unwrap_or(false) {
                        continue;
                    }
                    if !obj.contains_key(req) {
                        violations.push(Violation {
                            path: join_path(path, req),
                            rule: ViolationRule::Required,
                            expected: format!("field '{}'", req),
                            actual: "missing".to_string(),
                            suggestion: format!("Add the required field '{}'", req),
                        });
                    }
                }
            }

            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, prop_schema) in props {
                    if is_directive_property(prop_schema) {
                        continue;
                    }
                    if let Some(value) = obj.get(key) {
                        violations.extend(validate_schema(
                            value,
                            prop_schema,
                            &join_path(path, key),
                        ));
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    violations.extend(validate_schema(
                        item,
                        item_schema,
                        &format!("{}[{}]", path, i),
                    ));
                }
            }
        }
        Value::Number(n) => {
            if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
                if n.as_f64().map(|v| v < min).unwrap_or(false) {
                    violations.push(Violation {
                        path: path.to_string(),
                        rule: ViolationRule::Minimum,
                        expected: format!(">= {}", min),
                        actual: n.to_string(),
                        suggestion: format!("Use a value of at least {}", min),
                    });
                }
            }
            if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
                if n.as_f64().map(|v| v > max).unwrap_or(false) {
                    violations.push(Violation {
                        path: path.to_string(),
                        rule: ViolationRule::Maximum,
                        expected: format!("<= {}", max),
                        actual: n.to_string(),
                        suggestion: format!("Use a value of at most {}", max),
                    });
                }
            }
        }
        Value::String(s) => {
            if let Some(min) = schema.get("minLength").and_then(|m| m.as_u64()) {
                if (s.chars().count() as u64) < min {
                    violations.push(Violation {
                        path: path.to_string(),
                        rule: ViolationRule::MinLength,
                        expected: format!("length >= {}", min),
                        actual: format!("length {}", s.chars().count()),
                        suggestion: format!("Provide at least {} characters", min),
                    });
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(|m| m.as_u64()) {
                if (s.chars().count() as u64) > max {
                    violations.push(Violation {
                        path: path.to_string(),
                        rule: ViolationRule::MaxLength,
                        expected: format!("length <= {}", max),
                        actual: format!("length {}", s.chars().count()),
                        suggestion: format!("Shorten to at most {} characters", max),
                    });
                }
            }
            if let Some(pattern) = schema.get("pattern").and_then(|p| p.as_str()) {
                if let Ok(re) = regex::Regex::new(pattern) {
                    if !re.is_match(s) {
                        violations.push(Violation {
                            path: path.to_string(),
                            rule: ViolationRule::Pattern,
                            expected: pattern.to_string(),
                            actual: preview(data),
                            suggestion: format!("Match the pattern {}", pattern),
                        });
                    }
                }
            }
        }
        _ => {}
    }

    violations
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

/// Render a gate report as natural-language feedback for a repair round.
pub fn format_report_for_llm(report: &ValidationReport) -> String {
    if report.violations.is_empty() {
        return format!("The {} of '{}' is valid.", report.direction, report.skill);
    }
    let mut out = format!(
        "The {} you produced for '{}' has {} problem(s):\n",
        report.direction,
        report.skill,
        report.violations.len()
    );
    for v in &report.violations {
        out.push_str(&format!("- {}\n", v.describe()));
    }
    out.push_str("Fix every problem above and re-emit the JSON object only.");
    out
}

/// Parse a JSON object out of raw language-model output.
///
/// Tries, in order: the text as-is, a fenced ```json block, the first
/// balanced `{...}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(block) = fenced_json_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Some(value);
        }
    }

    if let Some(span) = first_object_span(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Some(value);
        }
    }

    None
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// First balanced `{...}` span, tracking strings and escapes.
fn first_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
