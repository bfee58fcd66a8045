use serde_json::Value;

/// Replaces every `{{path}}` in `s` with the value found in `ctx`. Missing
/// paths render as an empty string.
pub(crate) fn templ_str(s: &str, ctx: &Value) -> String {
    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        if let Some(end_rel) = tail.find("}}") {
            let (expr_with, new_rest) = tail.split_at(end_rel + 2);
            let expr = expr_with
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            let val = lookup_ctx(expr, ctx).unwrap_or_default();
            out.push_str(&val);
            rest = new_rest;
        } else {
            out.push_str(tail);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

pub(crate) fn lookup_value<'a>(path: &str, ctx: &'a Value) -> Option<&'a Value> {
    let mut cur = ctx;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        cur = match cur {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

pub(crate) fn lookup_ctx(path: &str, ctx: &Value) -> Option<String> {
    Some(match lookup_value(path, ctx)? {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Templates every string inside `value`. A string that is a single
/// `{{path}}` keeps the referenced value's JSON type.
pub(crate) fn templ_value(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => {
            if let Some(path) = single_expression(s) {
                if let Some(found) = lookup_value(path, ctx) {
                    return found.clone();
                }
            }
            Value::String(templ_str(s, ctx))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| templ_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), templ_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn single_expression(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}
