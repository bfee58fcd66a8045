use time::macros::format_description;
use time::OffsetDateTime;

use crate::models::workflow_run::WorkflowRun;

/// Human-readable duration: `850ms`, `12.3s`, `1m 5.0s`, `2h 3m 4.0s`.
pub fn format_duration(ms: i64) -> String {
    let ms = ms.max(0);
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    if ms < 60_000 {
        return format!("{:.1}s", ms as f64 / 1000.0);
    }

    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) as f64 / 1000.0;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds:.1}s")
    } else {
        format!("{minutes}m {seconds:.1}s")
    }
}

/// Wall time of a run; unfinished runs measure up to `now`.
pub fn run_duration_ms(run: &WorkflowRun, now: OffsetDateTime) -> Option<i64> {
    let started = run.started_at?;
    let finished = run.finished_at.unwrap_or(now);
    Some((finished - started).whole_milliseconds().max(0) as i64)
}

pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    ts.format(&fmt).unwrap_or_else(|_| ts.to_string())
}
