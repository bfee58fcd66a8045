use chrono::Utc;

use super::prelude::*;
use crate::models::workflow_run::{NewWorkflowRun, WorkflowRun};
use crate::utils::schedule::{
    compute_next_run, offset_to_utc, parse_schedule_config, utc_to_offset,
};

/// Loads a workflow or renders the 404 / 500 response for `failure`.
pub(crate) async fn load_workflow(
    state: &AppState,
    workflow_id: Uuid,
    failure: &str,
) -> Result<Workflow, Response> {
    match state.workflow_repo.find_workflow(workflow_id).await {
        Ok(Some(workflow)) => Ok(workflow),
        Ok(None) => Err(JsonResponse::not_found("Workflow not found")),
        Err(err) => {
            error!(%workflow_id, ?err, "{failure}");
            Err(JsonResponse::server_error(failure))
        }
    }
}

pub(crate) async fn enqueue_run(
    state: &AppState,
    workflow: &Workflow,
    triggered_by: &str,
    trigger_data: Value,
) -> Result<WorkflowRun, sqlx::Error> {
    let run = state
        .workflow_repo
        .create_workflow_run(NewWorkflowRun {
            workflow_id: workflow.id,
            triggered_by: triggered_by.to_string(),
            trigger_data,
        })
        .await?;
    info!(run_id = %run.id, workflow_id = %workflow.id, triggered_by, "run enqueued");
    Ok(run)
}

pub(crate) async fn sync_workflow_schedule(state: &AppState, workflow: &Workflow) {
    if let Err(err) = sync_workflow_schedule_inner(state, workflow).await {
        error!(workflow_id = %workflow.id, ?err, "Failed to sync schedule for workflow");
    }
}

async fn sync_workflow_schedule_inner(
    state: &AppState,
    workflow: &Workflow,
) -> Result<(), sqlx::Error> {
    let repo = &state.workflow_repo;
    let trigger = match workflow.schedule_trigger() {
        Some(trigger) if workflow.is_active => trigger,
        _ => return repo.disable_workflow_schedule(workflow.id).await,
    };

    let config = match parse_schedule_config(&trigger.config) {
        Ok(config) => config,
        Err(err) => {
            warn!(workflow_id = %workflow.id, %err, "schedule trigger config is invalid");
            return repo.disable_workflow_schedule(workflow.id).await;
        }
    };

    let last_run = repo
        .get_schedule_for_workflow(workflow.id)
        .await?
        .and_then(|s| s.last_run_at)
        .and_then(offset_to_utc);

    match compute_next_run(&config, last_run, Utc::now()) {
        Ok(Some(next)) => {
            repo.upsert_workflow_schedule(
                workflow.id,
                trigger.id,
                trigger.config.clone(),
                utc_to_offset(next),
            )
            .await
        }
        Ok(None) => repo.disable_workflow_schedule(workflow.id).await,
        Err(err) => {
            warn!(workflow_id = %workflow.id, %err, "cannot compute next scheduled run");
            repo.disable_workflow_schedule(workflow.id).await
        }
    }
}

/// Body parsed as JSON; anything else is kept as `{"raw": text}`. An empty
/// body becomes `{}`.
pub(crate) fn body_to_value(body: &Bytes) -> Value {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return json!({});
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(body) }))
}
