use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::workflow::{Action, Workflow};
use crate::models::workflow_run::{
    ActionExecution, ExecutionStatus, RunLogEntry, RunStatus, WorkflowRun,
};
use crate::state::AppState;
use crate::utils::validation::validate_activation;

use super::actions::execute_action;
use super::templating::templ_value;

const PERSISTENCE_MAX_ATTEMPTS: usize = 3;
#[cfg(test)]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(5);
#[cfg(not(test))]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const CANCELLATION_POLL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(
        "executor persistence operation `{operation}` failed for run {run_id} after {attempts} attempts: {source}"
    )]
    Persistence {
        run_id: Uuid,
        operation: &'static str,
        attempts: usize,
        #[source]
        source: sqlx::Error,
    },
}

impl ExecutorError {
    pub fn run_id(&self) -> Uuid {
        match self {
            ExecutorError::Persistence { run_id, .. } => *run_id,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            ExecutorError::Persistence { operation, .. } => operation,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            ExecutorError::Persistence { attempts, .. } => *attempts,
        }
    }
}

/// Progress of a run while its actions execute.
struct RunProgress {
    run_id: Uuid,
    executions: Vec<ActionExecution>,
    logs: Vec<RunLogEntry>,
}

impl RunProgress {
    fn log(&mut self, entry: RunLogEntry) {
        self.logs.push(entry);
    }

    async fn save(&self, state: &AppState) -> Result<(), ExecutorError> {
        let repo = state.workflow_repo.clone();
        let run_id = self.run_id;
        let executions = self.executions.clone();
        let logs = self.logs.clone();
        retry_with_backoff(run_id, "save_run_progress", move || {
            let repo = repo.clone();
            let executions = executions.clone();
            let logs = logs.clone();
            async move { repo.save_run_progress(run_id, executions, logs).await }
        })
        .await
    }
}

/// Executes a claimed run to completion and returns the status it ended in.
pub async fn execute_run(state: AppState, run: WorkflowRun) -> Result<RunStatus, ExecutorError> {
    let mut progress = RunProgress {
        run_id: run.id,
        executions: run.executions.clone(),
        logs: run.logs.clone(),
    };
    progress.log(RunLogEntry::info(format!(
        "Run started (triggered by {})",
        run.triggered_by
    )));

    let repo = state.workflow_repo.clone();
    let workflow_id = run.workflow_id;
    let workflow = retry_with_backoff(run.id, "find_workflow", || {
        let repo = repo.clone();
        async move { repo.find_workflow(workflow_id).await }
    })
    .await?;

    let Some(workflow) = workflow else {
        return fail_before_start(&state, &mut progress, "Workflow not found".to_string()).await;
    };
    if let Err(violations) = validate_activation(&workflow) {
        let reason = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return fail_before_start(&state, &mut progress, reason).await;
    }

    let mut context: Map<String, Value> = Map::new();
    context.insert("trigger".to_string(), run.trigger_data.clone());

    let mut halted = false;
    let mut failure: Option<String> = None;

    for action in &workflow.actions {
        if is_canceled(&state, run.id).await {
            info!(run_id = %run.id, workflow_id = %workflow.id, "run canceled between actions");
            return Ok(RunStatus::Canceled);
        }

        if halted || !action.enabled {
            progress.executions.push(skipped_execution(action));
            continue;
        }

        let context_value = Value::Object(context.clone());
        let input = templ_value(&action.config, &context_value);
        debug!(
            run_id = %run.id,
            action = %action.name,
            action_type = %action.action_type,
            "executing workflow action"
        );

        let index = progress.executions.len();
        progress.executions.push(ActionExecution {
            action_id: action.id,
            action_name: action.name.clone(),
            status: ExecutionStatus::Running,
            started_at: OffsetDateTime::now_utc(),
            finished_at: None,
            input: input.clone(),
            output: None,
            error: None,
        });
        progress.save(&state).await?;

        let result = execute_action(action, &input, &context_value, &state).await;
        let execution = &mut progress.executions[index];
        execution.finished_at = Some(OffsetDateTime::now_utc());

        match result {
            Ok(outcome) => {
                execution.status = ExecutionStatus::Success;
                execution.output = Some(outcome.output.clone());
                insert_action_output(&mut context, &action.name, outcome.output);
                if let Some(entry) = outcome.log {
                    progress.log(entry);
                }
                if outcome.halt {
                    halted = true;
                    progress.log(RunLogEntry::info(format!(
                        "Condition `{}` was false; remaining actions skipped",
                        action.name
                    )));
                }
            }
            Err(err) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(err.clone());
                warn!(run_id = %run.id, action = %action.name, %err, "workflow action failed");
                if action.stop_on_error {
                    halted = true;
                    progress.log(RunLogEntry::error(format!(
                        "Action `{}` failed: {err}",
                        action.name
                    )));
                    failure = Some(format!("Action `{}` failed: {err}", action.name));
                } else {
                    progress.log(RunLogEntry::warn(format!(
                        "Action `{}` failed: {err}; continuing",
                        action.name
                    )));
                }
            }
        }
        progress.save(&state).await?;
    }

    let status = if failure.is_some() {
        RunStatus::Failed
    } else {
        RunStatus::Success
    };
    progress.log(RunLogEntry::info(format!("Run finished: {status}")));
    progress.save(&state).await?;

    finish(&state, &workflow, run.id, status, failure).await
}

async fn fail_before_start(
    state: &AppState,
    progress: &mut RunProgress,
    reason: String,
) -> Result<RunStatus, ExecutorError> {
    warn!(run_id = %progress.run_id, %reason, "run failed before executing actions");
    progress.log(RunLogEntry::error(reason.clone()));
    progress.save(state).await?;
    complete_run_with_retry(state, progress.run_id, RunStatus::Failed, Some(reason)).await?;
    Ok(RunStatus::Failed)
}

async fn finish(
    state: &AppState,
    workflow: &Workflow,
    run_id: Uuid,
    status: RunStatus,
    error: Option<String>,
) -> Result<RunStatus, ExecutorError> {
    let transitioned = complete_run_with_retry(state, run_id, status, error).await?;
    if !transitioned {
        // Only a cancel request can finish a running run behind our back.
        info!(%run_id, "run was canceled before completion");
        return Ok(RunStatus::Canceled);
    }

    let repo = state.workflow_repo.clone();
    let workflow_id = workflow.id;
    let success = status == RunStatus::Success;
    let finished_at = OffsetDateTime::now_utc();
    retry_with_backoff(run_id, "record_run_outcome", move || {
        let repo = repo.clone();
        async move {
            repo.record_run_outcome(workflow_id, success, finished_at)
                .await
        }
    })
    .await?;

    info!(%run_id, workflow_id = %workflow.id, %status, "run completed");
    Ok(status)
}

async fn is_canceled(state: &AppState, run_id: Uuid) -> bool {
    match timeout(
        CANCELLATION_POLL_TIMEOUT,
        state.workflow_repo.get_run_status(run_id),
    )
    .await
    {
        Ok(Ok(Some(status))) => status == RunStatus::Canceled,
        Ok(Ok(None)) => false,
        Ok(Err(err)) => {
            warn!(%run_id, ?err, "executor: failed to fetch run status for cancellation poll");
            false
        }
        Err(_) => {
            warn!(
                %run_id,
                poll_timeout_ms = CANCELLATION_POLL_TIMEOUT.as_millis() as u64,
                "executor: cancellation status poll timed out"
            );
            false
        }
    }
}

fn skipped_execution(action: &Action) -> ActionExecution {
    let now = OffsetDateTime::now_utc();
    ActionExecution {
        action_id: action.id,
        action_name: action.name.clone(),
        status: ExecutionStatus::Skipped,
        started_at: now,
        finished_at: Some(now),
        input: action.config.clone(),
        output: None,
        error: None,
    }
}

/// Outputs are addressable as `{{<action name>.field}}`, also in lowercase.
fn insert_action_output(context: &mut Map<String, Value>, name: &str, output: Value) {
    let name = name.trim();
    let lower = name.to_lowercase();
    if lower != name {
        context.insert(lower, output.clone());
    }
    context.insert(name.to_string(), output);
}

async fn retry_with_backoff<T, Fut, F>(
    run_id: Uuid,
    operation: &'static str,
    mut op: F,
) -> Result<T, ExecutorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0usize;
    let mut backoff = PERSISTENCE_INITIAL_BACKOFF;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < PERSISTENCE_MAX_ATTEMPTS => {
                warn!(
                    %run_id,
                    operation,
                    attempt,
                    ?err,
                    "executor persistence operation failed; retrying"
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                error!(
                    %run_id,
                    operation,
                    attempt,
                    ?err,
                    "executor persistence operation exhausted retries"
                );
                return Err(ExecutorError::Persistence {
                    run_id,
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

/// Returns whether the run moved to `status`; false means it was already
/// terminal.
pub(crate) async fn complete_run_with_retry(
    state: &AppState,
    run_id: Uuid,
    status: RunStatus,
    error: Option<String>,
) -> Result<bool, ExecutorError> {
    let repo = state.workflow_repo.clone();

    retry_with_backoff(run_id, "complete_workflow_run", move || {
        let repo = repo.clone();
        let error = error.clone();
        async move { repo.complete_workflow_run(run_id, status, error).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::workflow_repository::{MockWorkflowRepository, WorkflowRepository};
    use crate::models::workflow::{
        ActionType, NewWorkflow, Trigger, TriggerType, WorkflowDefinition,
    };
    use crate::models::workflow_run::NewWorkflowRun;
    use serde_json::json;
    use std::sync::Arc;

    fn run_for(workflow_id: Uuid) -> WorkflowRun {
        let now = OffsetDateTime::now_utc();
        WorkflowRun {
            id: Uuid::new_v4(),
            workflow_id,
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
        }
    }

    fn action(name: &str, kind: ActionType, config: Value) -> Action {
        Action {
            id: Uuid::new_v4(),
            name: name.into(),
            action_type: kind,
            enabled: true,
            stop_on_error: true,
            config,
        }
    }

    async fn start_run(
        state: &AppState,
        actions: Vec<Action>,
        trigger_data: Value,
    ) -> (Uuid, WorkflowRun) {
        let workflow = state
            .workflow_repo
            .create_workflow(NewWorkflow {
                definition: WorkflowDefinition {
                    name: "Lead intake".into(),
                    description: None,
                    triggers: vec![Trigger {
                        id: Uuid::new_v4(),
                        trigger_type: TriggerType::Manual,
                        enabled: true,
                        config: json!({}),
                    }],
                    actions,
                },
                is_active: true,
                template_id: None,
            })
            .await
            .unwrap();
        state
            .workflow_repo
            .create_workflow_run(NewWorkflowRun {
                workflow_id: workflow.id,
                triggered_by: "manual".into(),
                trigger_data,
            })
            .await
            .unwrap();
        let run = state
            .workflow_repo
            .claim_next_queued_run()
            .await
            .unwrap()
            .unwrap();
        (workflow.id, run)
    }

    #[tokio::test]
    async fn find_workflow_failure_bubbles() {
        let run = run_for(Uuid::new_v4());

        let mut repo = MockWorkflowRepository::new();
        repo.expect_find_workflow()
            .times(PERSISTENCE_MAX_ATTEMPTS)
            .returning(|_| Err(sqlx::Error::RowNotFound));

        let state = AppState::with_repo(Arc::new(repo));
        let err = execute_run(state, run)
            .await
            .expect_err("should bubble error");
        assert_eq!(err.operation(), "find_workflow");
        assert_eq!(err.attempts(), PERSISTENCE_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn complete_workflow_run_failure_bubbles() {
        let run = run_for(Uuid::new_v4());
        let run_id = run.id;

        let mut repo = MockWorkflowRepository::new();
        repo.expect_find_workflow().returning(|_| Ok(None));
        repo.expect_save_run_progress().returning(|_, _, _| Ok(()));
        repo.expect_complete_workflow_run()
            .times(PERSISTENCE_MAX_ATTEMPTS)
            .returning(|_, _, _| Err(sqlx::Error::RowNotFound));

        let state = AppState::with_repo(Arc::new(repo));
        let err = execute_run(state, run)
            .await
            .expect_err("should bubble error");
        assert_eq!(err.operation(), "complete_workflow_run");
        assert_eq!(err.run_id(), run_id);
    }

    #[tokio::test]
    async fn missing_workflow_fails_the_run() {
        let state = AppState::for_tests();
        state
            .workflow_repo
            .create_workflow_run(NewWorkflowRun {
                workflow_id: Uuid::new_v4(),
                triggered_by: "manual".into(),
                trigger_data: json!({}),
            })
            .await
            .unwrap();
        let run = state
            .workflow_repo
            .claim_next_queued_run()
            .await
            .unwrap()
            .unwrap();
        let run_id = run.id;
        let workflow_id = run.workflow_id;

        let status = execute_run(state.clone(), run).await.unwrap();
        assert_eq!(status, RunStatus::Failed);
        let stored = state
            .workflow_repo
            .get_workflow_run(workflow_id, run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.error.as_deref(), Some("Workflow not found"));
    }

    #[tokio::test]
    async fn success_path_templates_and_records_stats() {
        let state = AppState::for_tests();
        let (workflow_id, run) = start_run(
            &state,
            vec![
                action(
                    "Enrich",
                    ActionType::Set,
                    json!({"values": {"greeting": "Hi {{trigger.name}}", "score": "{{trigger.score}}"}}),
                ),
                action(
                    "Announce",
                    ActionType::Log,
                    json!({"message": "{{Enrich.greeting}} ({{enrich.score}})"}),
                ),
            ],
            json!({"name": "Ada", "score": 42}),
        )
        .await;
        let run_id = run.id;

        let status = execute_run(state.clone(), run).await.unwrap();
        assert_eq!(status, RunStatus::Success);

        let stored = state
            .workflow_repo
            .get_workflow_run(workflow_id, run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RunStatus::Success);
        assert_eq!(stored.executions.len(), 2);
        assert_eq!(stored.executions[0].output.as_ref().unwrap()["score"], json!(42));
        assert_eq!(
            stored.executions[1].input["message"],
            json!("Hi Ada (42)")
        );
        assert!(stored
            .logs
            .iter()
            .any(|l| l.message == "Announce: Hi Ada (42)"));

        let workflow = state
            .workflow_repo
            .find_workflow(workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(workflow.stats.runs_total, 1);
        assert_eq!(workflow.stats.runs_success, 1);
        assert!(workflow.stats.last_run.is_some());
    }

    #[tokio::test]
    async fn stopping_failure_fails_run_and_skips_rest() {
        let state = AppState::for_tests();
        let mut tolerant = action("Optional", ActionType::Delay, json!({}));
        tolerant.stop_on_error = false;
        let (workflow_id, run) = start_run(
            &state,
            vec![
                tolerant,
                action("Broken", ActionType::Set, json!({"values": 3})),
                action("After", ActionType::Log, json!({"message": "never"})),
            ],
            json!({}),
        )
        .await;
        let run_id = run.id;

        let status = execute_run(state.clone(), run).await.unwrap();
        assert_eq!(status, RunStatus::Failed);

        let stored = state
            .workflow_repo
            .get_workflow_run(workflow_id, run_id)
            .await
            .unwrap()
            .unwrap();
        let statuses: Vec<_> = stored.executions.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Failed,
                ExecutionStatus::Failed,
                ExecutionStatus::Skipped
            ]
        );
        assert!(stored.error.unwrap().contains("Broken"));

        let workflow = state
            .workflow_repo
            .find_workflow(workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(workflow.stats.runs_total, 1);
        assert_eq!(workflow.stats.runs_success, 0);
    }

    #[tokio::test]
    async fn false_condition_ends_run_as_success() {
        let state = AppState::for_tests();
        let mut disabled = action("Disabled", ActionType::Log, json!({"message": "off"}));
        disabled.enabled = false;
        let (workflow_id, run) = start_run(
            &state,
            vec![
                disabled,
                action(
                    "Only pro",
                    ActionType::Condition,
                    json!({"left": "{{trigger.plan}}", "operator": "==", "right": "pro"}),
                ),
                action("Notify", ActionType::Log, json!({"message": "pro lead"})),
            ],
            json!({"plan": "free"}),
        )
        .await;
        let run_id = run.id;

        let status = execute_run(state.clone(), run).await.unwrap();
        assert_eq!(status, RunStatus::Success);

        let stored = state
            .workflow_repo
            .get_workflow_run(workflow_id, run_id)
            .await
            .unwrap()
            .unwrap();
        let statuses: Vec<_> = stored.executions.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Skipped,
                ExecutionStatus::Success,
                ExecutionStatus::Skipped
            ]
        );
    }

    #[tokio::test]
    async fn canceled_run_stops_without_touching_stats() {
        let state = AppState::for_tests();
        let (workflow_id, run) = start_run(
            &state,
            vec![action("Notify", ActionType::Log, json!({"message": "hi"}))],
            json!({}),
        )
        .await;
        let run_id = run.id;
        assert!(state
            .workflow_repo
            .cancel_workflow_run(workflow_id, run_id)
            .await
            .unwrap());

        let status = execute_run(state.clone(), run).await.unwrap();
        assert_eq!(status, RunStatus::Canceled);

        let stored = state
            .workflow_repo
            .get_workflow_run(workflow_id, run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RunStatus::Canceled);
        assert!(stored.executions.is_empty());

        let workflow = state
            .workflow_repo
            .find_workflow(workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(workflow.stats.runs_total, 0);
    }
}
