use std::collections::{BTreeMap, HashMap};

use time::macros::format_description;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::models::workflow::Workflow;
use crate::models::workflow_run::{RunStatus, WorkflowRun};
use crate::models::workflow_stats::{DailyRunCount, WorkflowRunSummary, WorkflowStatsReport};
use crate::utils::format::run_duration_ms;

pub const DEFAULT_STATS_DAYS: i64 = 7;
pub const MAX_STATS_DAYS: i64 = 365;
const TOP_WORKFLOWS: usize = 5;

pub fn clamp_days(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_STATS_DAYS).clamp(1, MAX_STATS_DAYS)
}

/// Midnight (UTC) of the first day in a `days`-long window ending today.
pub fn window_start(days: i64, now: OffsetDateTime) -> OffsetDateTime {
    let days = days.clamp(1, MAX_STATS_DAYS);
    now.date().midnight().assume_utc() - Duration::days(days - 1)
}

fn day_key(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    ts.format(&fmt).unwrap_or_default()
}

/// Aggregates runs that started inside the last `days` days (the current day
/// included). Canceled runs count towards the total but not the success rate.
pub fn compute_stats(
    workflows: &[Workflow],
    runs: &[WorkflowRun],
    days: i64,
    now: OffsetDateTime,
) -> WorkflowStatsReport {
    let days = days.clamp(1, MAX_STATS_DAYS);
    let window_start = window_start(days, now);

    let mut daily: BTreeMap<String, DailyRunCount> = (0..days)
        .map(|offset| {
            let date = day_key(window_start + Duration::days(offset));
            (
                date.clone(),
                DailyRunCount {
                    date,
                    total: 0,
                    success: 0,
                    failed: 0,
                },
            )
        })
        .collect();

    let names: HashMap<Uuid, &str> = workflows.iter().map(|wf| (wf.id, wf.name.as_str())).collect();
    let mut per_workflow: HashMap<Uuid, (i64, i64)> = HashMap::new();

    let (mut success, mut failed, mut canceled, mut in_progress) = (0i64, 0i64, 0i64, 0i64);
    let mut durations: Vec<i64> = Vec::new();
    let mut total = 0i64;

    for run in runs {
        let started = run.started_at.unwrap_or(run.created_at);
        if started < window_start || started > now {
            continue;
        }
        total += 1;

        let bucket = daily.get_mut(&day_key(started));
        let entry = per_workflow.entry(run.workflow_id).or_default();
        entry.0 += 1;

        match run.status {
            RunStatus::Success => {
                success += 1;
                entry.1 += 1;
                if let Some(b) = bucket {
                    b.total += 1;
                    b.success += 1;
                }
            }
            RunStatus::Failed => {
                failed += 1;
                if let Some(b) = bucket {
                    b.total += 1;
                    b.failed += 1;
                }
            }
            RunStatus::Canceled => {
                canceled += 1;
                if let Some(b) = bucket {
                    b.total += 1;
                }
            }
            RunStatus::Queued | RunStatus::Running => {
                in_progress += 1;
                if let Some(b) = bucket {
                    b.total += 1;
                }
            }
        }

        if matches!(run.status, RunStatus::Success | RunStatus::Failed) {
            if let Some(ms) = run_duration_ms(run, now) {
                durations.push(ms);
            }
        }
    }

    let finished = success + failed;
    let success_rate = if finished == 0 {
        0.0
    } else {
        ((success as f64 / finished as f64) * 1000.0).round() / 10.0
    };
    let avg_duration_ms = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<i64>() / durations.len() as i64)
    };

    let mut top_workflows: Vec<WorkflowRunSummary> = per_workflow
        .into_iter()
        .map(|(workflow_id, (runs, success))| WorkflowRunSummary {
            workflow_id,
            name: names.get(&workflow_id).copied().unwrap_or("(deleted)").to_string(),
            runs,
            success,
        })
        .collect();
    top_workflows.sort_by(|a, b| b.runs.cmp(&a.runs).then_with(|| a.name.cmp(&b.name)));
    top_workflows.truncate(TOP_WORKFLOWS);

    WorkflowStatsReport {
        days,
        total_workflows: workflows.len() as i64,
        active_workflows: workflows.iter().filter(|wf| wf.is_active).count() as i64,
        runs_total: total,
        runs_success: success,
        runs_failed: failed,
        runs_canceled: canceled,
        runs_in_progress: in_progress,
        success_rate,
        avg_duration_ms,
        daily: daily.into_values().collect(),
        top_workflows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::WorkflowStats;
    use serde_json::json;
    use time::macros::datetime;

    fn workflow(name: &str, active: bool) -> Workflow {
        let now = datetime!(2025-03-01 00:00 UTC);
        Workflow {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            is_active: active,
            triggers: vec![],
            actions: vec![],
            stats: WorkflowStats::default(),
            template_id: None,
            webhook_salt: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    fn run(workflow_id: Uuid, status: RunStatus, started: OffsetDateTime, ms: i64) -> WorkflowRun {
        WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id,
            status,
            triggered_by: "manual".into(),
            trigger_data: json!({}),
            started_at: Some(started),
            finished_at: status
                .is_terminal()
                .then(|| started + Duration::milliseconds(ms)),
            executions: vec![],
            logs: vec![],
            error: None,
            created_at: started,
            updated_at: started,
        }
    }

    #[test]
    fn days_default_and_clamp() {
        assert_eq!(clamp_days(None), 7);
        assert_eq!(clamp_days(Some(0)), 1);
        assert_eq!(clamp_days(Some(10_000)), 365);
        assert_eq!(clamp_days(Some(30)), 30);
    }

    #[test]
    fn aggregates_window_only() {
        let now = datetime!(2025-03-10 12:00 UTC);
        let a = workflow("Alpha", true);
        let b = workflow("Beta", false);
        let runs = vec![
            run(a.id, RunStatus::Success, datetime!(2025-03-10 08:00 UTC), 1_000),
            run(a.id, RunStatus::Success, datetime!(2025-03-09 08:00 UTC), 3_000),
            run(a.id, RunStatus::Failed, datetime!(2025-03-08 08:00 UTC), 2_000),
            run(b.id, RunStatus::Canceled, datetime!(2025-03-08 09:00 UTC), 0),
            run(b.id, RunStatus::Running, datetime!(2025-03-10 11:00 UTC), 0),
            // outside a 3 day window
            run(b.id, RunStatus::Success, datetime!(2025-03-01 08:00 UTC), 500),
        ];

        let report = compute_stats(&[a.clone(), b.clone()], &runs, 3, now);

        assert_eq!(report.total_workflows, 2);
        assert_eq!(report.active_workflows, 1);
        assert_eq!(report.runs_total, 5);
        assert_eq!(report.runs_success, 2);
        assert_eq!(report.runs_failed, 1);
        assert_eq!(report.runs_canceled, 1);
        assert_eq!(report.runs_in_progress, 1);
        assert_eq!(report.success_rate, 66.7);
        assert_eq!(report.avg_duration_ms, Some(2_000));

        let dates: Vec<&str> = report.daily.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-03-08", "2025-03-09", "2025-03-10"]);
        assert_eq!(report.daily[0].total, 2);
        assert_eq!(report.daily[0].failed, 1);
        assert_eq!(report.daily[2].success, 1);

        assert_eq!(report.top_workflows[0].name, "Alpha");
        assert_eq!(report.top_workflows[0].runs, 3);
        assert_eq!(report.top_workflows[0].success, 2);
    }

    #[test]
    fn empty_history_has_zero_rate() {
        let report = compute_stats(&[], &[], 7, datetime!(2025-03-10 12:00 UTC));
        assert_eq!(report.runs_total, 0);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.avg_duration_ms, None);
        assert_eq!(report.daily.len(), 7);
    }
}
