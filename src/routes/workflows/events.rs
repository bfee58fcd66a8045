use super::{helpers::enqueue_run, prelude::*};

#[derive(Debug, Deserialize)]
pub struct EmitEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Enqueues a run on every active workflow listening for `event`.
pub async fn emit_event(
    State(app_state): State<AppState>,
    Json(body): Json<EmitEvent>,
) -> Response {
    let event = body.event.trim();
    if event.is_empty() {
        return JsonResponse::bad_request("Failed to emit event: `event` is required");
    }

    let workflows = match app_state.workflow_repo.list_workflows().await {
        Ok(workflows) => workflows,
        Err(err) => {
            error!(?err, "DB error listing workflows for event");
            return JsonResponse::server_error("Failed to emit event");
        }
    };

    let triggered_by = format!("event:{event}");
    let mut run_ids = Vec::new();
    for wf in workflows
        .iter()
        .filter(|wf| wf.is_active && wf.listens_for_event(event))
        .filter(|wf| validate_activation(wf).is_ok())
    {
        match enqueue_run(&app_state, wf, &triggered_by, body.payload.clone()).await {
            Ok(run) => run_ids.push(run.id),
            Err(err) => {
                error!(workflow_id = %wf.id, ?err, "DB error enqueuing event run");
                return JsonResponse::server_error("Failed to emit event");
            }
        }
    }

    info!(event, runs = run_ids.len(), "event dispatched");
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "run_ids": run_ids
        })),
    )
        .into_response()
}
