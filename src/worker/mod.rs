use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::engine::execute_run;
use crate::models::workflow_run::{NewWorkflowRun, RunStatus};
use crate::models::workflow_schedule::WorkflowSchedule;
use crate::state::AppState;
use crate::utils::schedule::{
    compute_next_run, offset_to_utc, parse_schedule_config, utc_to_offset,
};
use crate::utils::validation::validate_activation;

const MAX_SCHEDULES_PER_TICK: i64 = 10;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub fn start_background_workers(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(worker_id = %state.worker_id, "background worker started");
        let mut last_cleanup = Instant::now();
        let mut last_schedule_check: Option<Instant> = None;
        loop {
            if last_schedule_check
                .is_none_or(|at| at.elapsed() >= state.config.schedule_check_interval)
            {
                if let Err(err) = process_due_schedules(&state, Utc::now()).await {
                    error!(?err, "worker: error processing schedules");
                }
                last_schedule_check = Some(Instant::now());
            }

            match work_once(&state).await {
                Ok(true) => {}
                Ok(false) => sleep(state.config.worker_poll_interval).await,
                Err(err) => {
                    error!(?err, "worker: error claiming run");
                    sleep(CLAIM_ERROR_BACKOFF).await;
                }
            }

            if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
                match state
                    .workflow_repo
                    .purge_old_runs(state.config.run_retention_days)
                    .await
                {
                    Ok(purged) if purged > 0 => info!(purged, "worker: purged old runs"),
                    Ok(_) => {}
                    Err(err) => warn!(?err, "worker: failed to purge old runs"),
                }
                last_cleanup = Instant::now();
            }
        }
    })
}

/// Claims and executes one queued run. Returns false when the queue was empty.
pub async fn work_once(state: &AppState) -> Result<bool, sqlx::Error> {
    let Some(run) = state.workflow_repo.claim_next_queued_run().await? else {
        return Ok(false);
    };
    let run_id = run.id;
    if let Err(err) = execute_run(state.clone(), run).await {
        error!(
            %run_id,
            operation = err.operation(),
            attempts = err.attempts(),
            %err,
            "worker: run execution aborted"
        );
        // Best effort; the run would otherwise stay `running`.
        if let Err(fail_err) = state
            .workflow_repo
            .complete_workflow_run(run_id, RunStatus::Failed, Some(err.to_string()))
            .await
        {
            warn!(%run_id, ?fail_err, "worker: failed to mark aborted run as failed");
        }
    }
    Ok(true)
}

/// Enqueues a run for every schedule due at `now` and advances it. Returns the
/// number of runs enqueued.
pub async fn process_due_schedules(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<usize, sqlx::Error> {
    let Some(now_offset) = utc_to_offset(now) else {
        return Ok(0);
    };
    let schedules = state
        .workflow_repo
        .list_due_schedules(now_offset, MAX_SCHEDULES_PER_TICK)
        .await?;

    let mut enqueued = 0;
    for schedule in schedules {
        let schedule_id = schedule.id;
        match trigger_schedule(state, schedule, now).await {
            Ok(true) => enqueued += 1,
            Ok(false) => {}
            Err(err) => {
                error!(%schedule_id, ?err, "worker: failed to trigger schedule");
            }
        }
    }
    Ok(enqueued)
}

async fn trigger_schedule(
    state: &AppState,
    schedule: WorkflowSchedule,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let repo = &state.workflow_repo;

    let config = match parse_schedule_config(&schedule.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!(workflow_id = %schedule.workflow_id, %err, "worker: disabling unparsable schedule");
            repo.disable_workflow_schedule(schedule.workflow_id).await?;
            return Ok(false);
        }
    };

    let Some(scheduled_for) = schedule.next_run_at.and_then(offset_to_utc) else {
        repo.disable_workflow_schedule(schedule.workflow_id).await?;
        return Ok(false);
    };

    let runnable = repo
        .find_workflow(schedule.workflow_id)
        .await?
        .filter(|wf| wf.is_active && validate_activation(wf).is_ok());
    if runnable.is_none() {
        warn!(workflow_id = %schedule.workflow_id, "worker: schedule points at an inactive workflow");
        repo.disable_workflow_schedule(schedule.workflow_id).await?;
        return Ok(false);
    }

    let run = repo
        .create_workflow_run(NewWorkflowRun {
            workflow_id: schedule.workflow_id,
            triggered_by: "schedule".to_string(),
            trigger_data: json!({
                "scheduled": true,
                "scheduleId": schedule.id,
                "scheduledFor": scheduled_for.to_rfc3339(),
            }),
        })
        .await?;
    info!(
        run_id = %run.id,
        workflow_id = %schedule.workflow_id,
        scheduled_for = %scheduled_for,
        "worker: enqueued scheduled run"
    );

    let next = match compute_next_run(&config, Some(scheduled_for), now) {
        Ok(next) => next,
        Err(err) => {
            warn!(workflow_id = %schedule.workflow_id, %err, "worker: cannot compute next run");
            None
        }
    };
    let Some(last_offset) = utc_to_offset(now) else {
        repo.disable_workflow_schedule(schedule.workflow_id).await?;
        return Ok(true);
    };
    repo.mark_schedule_run(schedule.id, last_offset, next.and_then(utc_to_offset))
        .await?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workflow::{
        Action, ActionType, NewWorkflow, Trigger, TriggerType, WorkflowDefinition,
    };
    use crate::db::workflow_repository::MockWorkflowRepository;
    use crate::models::workflow_run::WorkflowRun;
    use chrono::TimeZone;
    use mockall::predicate::{always, eq};
    use std::sync::Arc;
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn scheduled_workflow(state: &AppState, is_active: bool) -> Uuid {
        let config = json!({"frequency": "hourly", "timezone": "UTC"});
        let trigger = Trigger {
            id: Uuid::new_v4(),
            trigger_type: TriggerType::Schedule,
            enabled: true,
            config: config.clone(),
        };
        let workflow = state
            .workflow_repo
            .create_workflow(NewWorkflow {
                definition: WorkflowDefinition {
                    name: "Hourly digest".into(),
                    description: None,
                    triggers: vec![trigger.clone()],
                    actions: vec![Action {
                        id: Uuid::new_v4(),
                        name: "Note".into(),
                        action_type: ActionType::Log,
                        enabled: true,
                        stop_on_error: true,
                        config: json!({"message": "tick"}),
                    }],
                },
                is_active,
                template_id: None,
            })
            .await
            .unwrap();
        let due = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        state
            .workflow_repo
            .upsert_workflow_schedule(workflow.id, trigger.id, config, utc_to_offset(due))
            .await
            .unwrap();
        workflow.id
    }

    #[tokio::test]
    async fn due_schedule_enqueues_and_advances() {
        let state = AppState::for_tests();
        let workflow_id = scheduled_workflow(&state, true).await;
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 30).unwrap();

        assert_eq!(process_due_schedules(&state, now).await.unwrap(), 1);

        let runs = state
            .workflow_repo
            .list_runs_paged(Some(workflow_id), None, 10, 0)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].triggered_by, "schedule");
        assert_eq!(runs[0].status, RunStatus::Queued);

        let schedule = state
            .workflow_repo
            .get_schedule_for_workflow(workflow_id)
            .await
            .unwrap()
            .unwrap();
        let next = schedule.next_run_at.and_then(offset_to_utc).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());

        // Not due again until the next hour.
        assert_eq!(process_due_schedules(&state, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn inactive_workflow_schedule_is_disabled() {
        let state = AppState::for_tests();
        let workflow_id = scheduled_workflow(&state, false).await;
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 0).unwrap();

        assert_eq!(process_due_schedules(&state, now).await.unwrap(), 0);
        let schedule = state
            .workflow_repo
            .get_schedule_for_workflow(workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!schedule.enabled);
    }

    #[tokio::test]
    async fn work_once_drains_the_queue() {
        let state = AppState::for_tests();
        let workflow_id = scheduled_workflow(&state, true).await;
        state
            .workflow_repo
            .create_workflow_run(NewWorkflowRun {
                workflow_id,
                triggered_by: "manual".into(),
                trigger_data: json!({}),
            })
            .await
            .unwrap();

        assert!(work_once(&state).await.unwrap());
        assert!(!work_once(&state).await.unwrap());

        let runs = state
            .workflow_repo
            .list_runs_paged(Some(workflow_id), None, 10, 0)
            .await
            .unwrap();
        assert_eq!(runs[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn aborted_run_is_marked_failed() {
        let now = OffsetDateTime::now_utc();
        let run = WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            status: RunStatus::Running,
            triggered_by: "manual".into(),
            trigger_data: json!({}),
            started_at: Some(now),
            finished_at: None,
            executions: vec![],
            logs: vec![],
            error: None,
            created_at: now,
            updated_at: now,
        };
        let run_id = run.id;

        let mut repo = MockWorkflowRepository::new();
        repo.expect_claim_next_queued_run()
            .times(1)
            .returning(move || Ok(Some(run.clone())));
        repo.expect_find_workflow()
            .times(3)
            .returning(|_| Err(sqlx::Error::PoolTimedOut));
        repo.expect_complete_workflow_run()
            .with(eq(run_id), eq(RunStatus::Failed), always())
            .times(1)
            .returning(|_, _, error| {
                assert!(error.unwrap_or_default().contains("find_workflow"));
                Ok(true)
            });

        let state = AppState::with_repo(Arc::new(repo));
        assert!(work_once(&state).await.unwrap());
    }
}
