use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};

const MAX_ERROR_BODY_CHARS: usize = 300;

fn collect_headers(raw: Option<&Value>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut push = |k: &str, v: &str| {
        if let (Ok(name), Ok(val)) = (HeaderName::try_from(k), HeaderValue::from_str(v)) {
            headers.append(name, val);
        }
    };
    match raw {
        Some(Value::Object(map)) => {
            for (k, v) in map {
                if let Some(v) = v.as_str() {
                    push(k, v);
                }
            }
        }
        // [{"key": "...", "value": "..."}] as sent by form builders
        Some(Value::Array(items)) => {
            for item in items {
                if let (Some(k), Some(v)) = (
                    item.get("key").and_then(|v| v.as_str()),
                    item.get("value").and_then(|v| v.as_str()),
                ) {
                    push(k, v);
                }
            }
        }
        _ => {}
    }
    headers
}

pub(crate) async fn execute_http(
    input: &Value,
    client: &Client,
    default_timeout: Duration,
) -> Result<Value, String> {
    let url = input
        .get("url")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "HTTP url is required".to_string())?;
    let parsed = reqwest::Url::parse(url).map_err(|e| e.to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("Only http/https schemes are allowed".to_string());
    }

    let method_raw = input
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("GET")
        .to_uppercase();
    let method = Method::from_bytes(method_raw.as_bytes())
        .map_err(|_| format!("Unsupported HTTP method `{method_raw}`"))?;

    let timeout = input
        .get("timeoutMs")
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    let mut req = client
        .request(method.clone(), parsed)
        .timeout(timeout)
        .headers(collect_headers(input.get("headers")));

    if !matches!(method, Method::GET | Method::HEAD) {
        req = match input.get("body") {
            None | Some(Value::Null) => req,
            Some(Value::String(s)) => req.body(s.clone()),
            Some(other) => req.json(other),
        };
    }

    let resp = req.send().await.map_err(|e| e.to_string())?;
    let status = resp.status();

    let mut header_map = Map::new();
    for (k, v) in resp.headers().iter() {
        if let Ok(s) = v.to_str() {
            header_map.insert(k.as_str().to_string(), Value::String(s.to_string()));
        }
    }
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        let snippet: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return Err(format!("HTTP {}: {}", status.as_u16(), snippet));
    }

    let body = if content_type.contains("application/json") {
        serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    };

    Ok(json!({
        "status": status.as_u16(),
        "headers": header_map,
        "body": body,
    }))
}
