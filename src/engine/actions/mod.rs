mod delay;
mod http;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::engine::templating::templ_str;
use crate::models::workflow::{Action, ActionType};
use crate::models::workflow_run::{LogLevel, RunLogEntry};
use crate::state::AppState;

/// Result of one successful action.
#[derive(Debug)]
pub(crate) struct ActionOutcome {
    pub output: Value,
    /// Stop the run here, skipping the remaining actions.
    pub halt: bool,
    pub log: Option<RunLogEntry>,
}

impl ActionOutcome {
    fn output(output: Value) -> Self {
        Self {
            output,
            halt: false,
            log: None,
        }
    }
}

/// Runs one action. `input` is the action config after templating and `ctx`
/// the run context (trigger data plus earlier action outputs).
pub(crate) async fn execute_action(
    action: &Action,
    input: &Value,
    ctx: &Value,
    state: &AppState,
) -> Result<ActionOutcome, String> {
    match action.action_type {
        ActionType::Http => {
            http::execute_http(input, &state.http_client, state.config.http_action_timeout)
                .await
                .map(ActionOutcome::output)
        }
        ActionType::Delay => delay::execute_delay(input).await.map(ActionOutcome::output),
        ActionType::Log => Ok(execute_log(&action.name, input)),
        ActionType::Set => execute_set(input).map(ActionOutcome::output),
        ActionType::Condition => {
            let result = evaluate_condition(input, ctx)?;
            Ok(ActionOutcome {
                output: json!({ "result": result }),
                halt: !result,
                log: None,
            })
        }
    }
}

fn execute_log(action_name: &str, input: &Value) -> ActionOutcome {
    let message = match input.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let level = match input
        .get("level")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_lowercase())
        .as_deref()
    {
        Some("warn") | Some("warning") => LogLevel::Warn,
        Some("error") => LogLevel::Error,
        _ => LogLevel::Info,
    };

    match level {
        LogLevel::Info => info!(action = action_name, %message, "workflow log action"),
        LogLevel::Warn => warn!(action = action_name, %message, "workflow log action"),
        LogLevel::Error => error!(action = action_name, %message, "workflow log action"),
    }

    ActionOutcome {
        output: json!({ "message": message, "level": level }),
        halt: false,
        log: Some(RunLogEntry::new(level, format!("{action_name}: {message}"))),
    }
}

fn execute_set(input: &Value) -> Result<Value, String> {
    match input.get("values") {
        Some(Value::Object(values)) => Ok(Value::Object(values.clone())),
        _ => Err("Set action needs a `values` object".to_string()),
    }
}

fn evaluate_condition(input: &Value, ctx: &Value) -> Result<bool, String> {
    if let Some(expression) = input
        .get("expression")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return evaluate_expression(expression, ctx);
    }

    let left = input
        .get("left")
        .ok_or_else(|| "Missing condition `left` operand".to_string())?;
    let right = input.get("right").unwrap_or(&Value::Null);
    let operator = input
        .get("operator")
        .and_then(|v| v.as_str())
        .unwrap_or("==");
    let op = parse_operator(operator)
        .ok_or_else(|| format!("Unsupported condition operator `{operator}`"))?;

    Ok(apply(
        op,
        &resolve_value(left, ctx),
        &resolve_value(right, ctx),
    ))
}

fn evaluate_expression(expression: &str, ctx: &Value) -> Result<bool, String> {
    let (op, left_raw, right_raw) =
        parse_expression(expression).ok_or_else(|| "Unsupported condition expression".to_string())?;

    let left = resolve_operand(&left_raw, ctx);
    let right = resolve_operand(&right_raw, ctx);
    Ok(apply(op, &left, &right))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
}

fn parse_operator(raw: &str) -> Option<ConditionOperator> {
    Some(match raw.trim().to_lowercase().as_str() {
        "==" | "=" | "equals" => ConditionOperator::Equals,
        "!=" | "not equals" => ConditionOperator::NotEquals,
        ">" | "greater than" => ConditionOperator::GreaterThan,
        "<" | "less than" => ConditionOperator::LessThan,
        ">=" => ConditionOperator::GreaterThanOrEqual,
        "<=" => ConditionOperator::LessThanOrEqual,
        "contains" => ConditionOperator::Contains,
        _ => return None,
    })
}

fn parse_expression(expr: &str) -> Option<(ConditionOperator, String, String)> {
    const OPERATORS: &[(&str, ConditionOperator)] = &[
        (" contains ", ConditionOperator::Contains),
        (">=", ConditionOperator::GreaterThanOrEqual),
        ("<=", ConditionOperator::LessThanOrEqual),
        ("==", ConditionOperator::Equals),
        ("!=", ConditionOperator::NotEquals),
        (">", ConditionOperator::GreaterThan),
        ("<", ConditionOperator::LessThan),
    ];

    for (pattern, op) in OPERATORS {
        if let Some((left, right)) = expr.split_once(pattern) {
            return Some((*op, left.trim().to_string(), right.trim().to_string()));
        }
    }
    None
}

fn apply(op: ConditionOperator, left: &Value, right: &Value) -> bool {
    match op {
        ConditionOperator::Equals => values_equal(left, right),
        ConditionOperator::NotEquals => !values_equal(left, right),
        ConditionOperator::GreaterThan => compare_order(left, right, ValueOrdering::Greater),
        ConditionOperator::LessThan => compare_order(left, right, ValueOrdering::Less),
        ConditionOperator::GreaterThanOrEqual => {
            compare_order(left, right, ValueOrdering::Equal)
                || compare_order(left, right, ValueOrdering::Greater)
        }
        ConditionOperator::LessThanOrEqual => {
            compare_order(left, right, ValueOrdering::Equal)
                || compare_order(left, right, ValueOrdering::Less)
        }
        ConditionOperator::Contains => match left {
            Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
            _ => match (value_as_string(left), value_as_string(right)) {
                (Some(l), Some(r)) => l.contains(&r),
                _ => false,
            },
        },
    }
}

fn resolve_value(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => resolve_operand(s, ctx),
        other => other.clone(),
    }
}

fn resolve_operand(raw: &str, ctx: &Value) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Some(val) = lookup_path(ctx, trimmed) {
        return val;
    }
    let templated = templ_str(trimmed, ctx);
    parse_flexible_value(&templated)
}

fn lookup_path(ctx: &Value, path: &str) -> Option<Value> {
    // Bare literals such as `42` or `"done"` are not paths.
    if !path.contains('.') && ctx.get(path).is_none() {
        return None;
    }
    crate::engine::templating::lookup_value(path, ctx).cloned()
}

fn parse_flexible_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
        return json_val;
    }
    if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        let inner = &trimmed[1..trimmed.len() - 1];
        return Value::String(inner.replace("\\\"", "\"").replace("\\'", "'"));
    }
    Value::String(trimmed.to_string())
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => value_as_f64(left) == value_as_f64(right),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => left == right || value_as_string(left) == value_as_string(right),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ValueOrdering {
    Greater,
    Less,
    Equal,
}

fn compare_order(left: &Value, right: &Value, ordering: ValueOrdering) -> bool {
    if let (Some(a), Some(b)) = (value_as_f64(left), value_as_f64(right)) {
        return match ordering {
            ValueOrdering::Greater => a > b,
            ValueOrdering::Less => a < b,
            ValueOrdering::Equal => (a - b).abs() < f64::EPSILON,
        };
    }
    if let (Some(a), Some(b)) = (value_as_string(left), value_as_string(right)) {
        return match ordering {
            ValueOrdering::Greater => a > b,
            ValueOrdering::Less => a < b,
            ValueOrdering::Equal => a == b,
        };
    }
    false
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
