use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};

/// Longest a single delay action may hold a worker.
pub const MAX_DELAY: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    #[serde(default)]
    pub milliseconds: Option<u64>,
    #[serde(default)]
    pub seconds: Option<u64>,
    #[serde(default)]
    pub minutes: Option<u64>,
    #[serde(default)]
    pub jitter_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayPlan {
    pub base_delay: Duration,
    pub jitter_applied: Duration,
    pub total_delay: Duration,
    pub capped: bool,
}

pub fn parse_delay_config(value: &Value) -> Result<DelayConfig, String> {
    serde_json::from_value::<DelayConfig>(value.clone())
        .map_err(|_| "Invalid delay configuration".to_string())
}

pub fn compute_delay_plan(config: &DelayConfig, rng: &mut impl Rng) -> Result<DelayPlan, String> {
    if config.milliseconds.is_none() && config.seconds.is_none() && config.minutes.is_none() {
        return Err("Configure `milliseconds`, `seconds` or `minutes` for the delay".to_string());
    }

    let mut total_ms: u64 = 0;
    for part in [
        config.milliseconds,
        config.seconds.and_then(|s| s.checked_mul(1_000)),
        config.minutes.and_then(|m| m.checked_mul(60_000)),
    ]
    .into_iter()
    .flatten()
    {
        total_ms = total_ms.saturating_add(part);
    }
    let base_delay = Duration::from_millis(total_ms);

    let jitter_range = config.jitter_ms.unwrap_or(0);
    let jitter_applied = if jitter_range == 0 || base_delay.is_zero() {
        Duration::ZERO
    } else {
        Duration::from_millis(rng.random_range(0..=jitter_range))
    };

    let requested = base_delay.saturating_add(jitter_applied);
    let capped = requested > MAX_DELAY;
    Ok(DelayPlan {
        base_delay,
        jitter_applied,
        total_delay: requested.min(MAX_DELAY),
        capped,
    })
}

pub(crate) async fn execute_delay(input: &Value) -> Result<Value, String> {
    let config = parse_delay_config(input)?;
    let plan = compute_delay_plan(&config, &mut rand::rng())?;
    if !plan.total_delay.is_zero() {
        tokio::time::sleep(plan.total_delay).await;
    }
    Ok(json!({
        "waited_ms": plan.total_delay.as_millis() as u64,
        "jitter_ms": plan.jitter_applied.as_millis() as u64,
        "capped": plan.capped,
    }))
}
