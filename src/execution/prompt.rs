//! Prompt template compiler for llm-mode skills.
//!
//! Supports `{{input.x.y}}` substitution and one-level `{{#if input.x}}`
//! conditionals; a truthy value preserves the inner block, anything else
//! drops it.

use serde_json::Value;

/// Compile a prompt template against a skill input object.
pub fn compile(template: &str, input: &Value) -> String {
    substitute(&strip_conditionals(template, input), input)
}

fn strip_conditionals(template: &str, input: &Value) -> String {
    let mut out = String::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{#if") {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let header_end = match after.find("}}") {
            Some(i) => i,
            None => {
                out.push_str(after);
                return out;
            }
        };
        let condition = after[5..header_end].trim();
        let body_start = header_end + 2;
        let close = match after[body_start..].find("{{/if}}") {
            Some(i) => body_start + i,
            None => {
                out.push_str(after);
                return out;
            }
        };

        if is_truthy(lookup(condition, input).as_ref()) {
            out.push_str(&after[body_start..close]);
        }
        rest = &after[close + "{{/if}}".len()..];
    }

    out.push_str(rest);
    out
}

fn substitute(template: &str, input: &Value) -> String {
    let mut out = String::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let path = after[..close].trim();
                match lookup(path, input) {
                    Some(value) => out.push_str(&render(&value)),
                    None => {}
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn lookup(path: &str, input: &Value) -> Option<Value> {
    let rest = path.strip_prefix("input.")?;
    let mut current = input;
    for segment in rest.split('.') {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}
