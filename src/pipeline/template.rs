//! Template grammar for pipeline step inputs and conditions.
//!
//! `{{ path | pipe:arg | pipe }}` where `path` addresses `input.*`,
//! `steps.<name>.*`, or `item.*`, or is a comparison `lhs op rhs`.
//! Missing segments evaluate to undefined; the `default` pipe recovers.

use serde_json::{Map, Value};

/// Evaluation context: the pipeline input, accumulated step results, and
/// the current `foreach` element if any.
pub struct TemplateContext<'a> {
    pub input: &'a Value,
    pub steps: &'a Map<String, Value>,
    pub item: Option<&'a Value>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(input: &'a Value, steps: &'a Map<String, Value>) -> Self {
        TemplateContext {
            input,
            steps,
            item: None,
        }
    }

    pub fn with_item(input: &'a Value, steps: &'a Map<String, Value>, item: &'a Value) -> Self {
        TemplateContext {
            input,
            steps,
            item: Some(item),
        }
    }
}

/// Render a string that may contain template spans.
///
/// A string that is exactly one `{{...}}` span preserves the evaluated
/// value's type; anything else is string-interpolated.
pub fn render_template(text: &str, ctx: &TemplateContext<'_>) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(inner) = single_span(trimmed) {
        return eval_expr(inner, ctx);
    }

    if !text.contains("{{") {
        return Some(Value::String(text.to_string()));
    }

    let mut out = String::new();
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let value = eval_expr(&after[..close], ctx);
                out.push_str(&stringify(value.as_ref()));
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Some(Value::String(out))
}

/// Walk an arbitrary input declaration, rendering every embedded string.
pub fn resolve_value(value: &Value, ctx: &TemplateContext<'_>) -> Value {
    match value {
        Value::String(s) => render_template(s, ctx).unwrap_or(Value::Null),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect())
        }
        Value::Object(obj) => {
            let mut out = Map::new();
            for (k, v) in obj {
                out.insert(k.clone(), resolve_value(v, ctx));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Condition semantics: undefined, null, false, 0, and "" are falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn single_span(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("{{")?.strip_suffix("}}")?;
    // A second opener means this is interpolation, not a lone span.
    if inner.contains("{{") {
        return None;
    }
    Some(inner)
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn eval_expr(expr: &str, ctx: &TemplateContext<'_>) -> Option<Value> {
    let mut segments = expr.split('|').map(str::trim);
    let head = segments.next()?;

    let mut current = if let Some((lhs, op, rhs)) = parse_comparison(head) {
        let left = eval_path(lhs.trim(), ctx);
        let right = parse_literal(rhs.trim());
        Some(Value::Bool(compare(left.as_ref(), op, &right)))
    } else {
        eval_path(head, ctx)
    };

    for pipe in segments {
        current = apply_pipe(pipe, current, ctx);
    }
    current
}

const COMPARISON_OPS: [&str; 6] = [">=", "<=", "==", "!=", ">", "<"];

fn parse_comparison(expr: &str) -> Option<(&str, &str, &str)> {
    for op in COMPARISON_OPS {
        if let Some(idx) = expr.find(op) {
            let (lhs, rest) = expr.split_at(idx);
            return Some((lhs, op, &rest[op.len()..]));
        }
    }
    None
}

fn compare(left: Option<&Value>, op: &str, right: &Value) -> bool {
    match op {
        "==" => left == Some(right),
        "!=" => left != Some(right),
        _ => {
            let (l, r) = match (left.and_then(Value::as_f64), right.as_f64()) {
                (Some(l), Some(r)) => (l, r),
                _ => return false,
            };
            match op {
                ">" => l > r,
                "<" => l < r,
                ">=" => l >= r,
                "<=" => l <= r,
                _ => false,
            }
        }
    }
}

/// Right-hand literal: bool, null, number, quoted string, or raw text.
fn parse_literal(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    let quoted = (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
        || (text.starts_with('"') && text.ends_with('"') && text.len() >= 2);
    if quoted {
        return Value::String(text[1..text.len() - 1].to_string());
    }
    Value::String(text.to_string())
}

fn eval_path(path: &str, ctx: &TemplateContext<'_>) -> Option<Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;

    let mut current: &Value = match root {
        "input" => ctx.input,
        "steps" => {
            let step = segments.next()?;
            ctx.steps.get(step)?
        }
        "item" => ctx.item?,
        _ => return None,
    };

    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

fn apply_pipe(pipe: &str, value: Option<Value>, _ctx: &TemplateContext<'_>) -> Option<Value> {
    let mut parts = pipe.splitn(2, ':');
    let name = parts.next().unwrap_or_default().trim();
    let arg = parts.next().map(str::trim);

    match name {
        "pluck" => {
            let field = arg?;
            let items = value?.as_array()?.to_vec();
            Some(Value::Array(
                items
                    .into_iter()
                    .filter_map(|item| item.get(field).cloned())
                    .collect(),
            ))
        }
        "join" => {
            let sep = arg.unwrap_or(",").replace("\\n", "\n");
            let items = value?.as_array()?.to_vec();
            let joined = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(&sep);
            Some(Value::String(joined))
        }
        "slice" => {
            let spec = arg?;
            let mut bounds = spec.split(':');
            let start: usize = bounds.next()?.trim().parse().ok()?;
            let end: Option<usize> = bounds.next().and_then(|e| e.trim().parse().ok());
            match value? {
                Value::Array(items) => {
                    let end = end.unwrap_or(items.len()).min(items.len());
                    let start = start.min(end);
                    Some(Value::Array(items[start..end].to_vec()))
                }
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let end = end.unwrap_or(chars.len()).min(chars.len());
                    let start = start.min(end);
                    Some(Value::String(chars[start..end].iter().collect()))
                }
                _ => None,
            }
        }
        "default" => match value {
            None | Some(Value::Null) => Some(parse_literal(arg.unwrap_or(""))),
            some => some,
        },
        "json" => {
            let v = value?;
            serde_json::to_string_pretty(&v).ok().map(Value::String)
        }
        "format_skills" => {
            let items = value?.as_array()?.to_vec();
            let lines = items
                .iter()
                .map(|skill| {
                    let name = skill.get("name").and_then(|n| n.as_str()).unwrap_or("?");
                    let desc = skill
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("");
                    format!("- {}: {}", name, desc)
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(Value::String(lines))
        }
        _ => value,
    }
}

/// Evaluate an output-mapping expression with `||` fallback between
/// templates and literals. The first defined, non-null branch wins.
pub fn eval_with_fallback(expr: &str, ctx: &TemplateContext<'_>) -> Value {
    for branch in expr.split("||").map(str::trim) {
        let value = if branch.contains("{{") {
            render_template(branch, ctx)
        } else {
            Some(parse_literal(branch))
        };
        match value {
            Some(Value::Null) | None => continue,
            Some(v) => return v,
        }
    }
    Value::Null
}
