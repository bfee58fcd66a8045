use super::{
    helpers::{load_workflow, sync_workflow_schedule},
    prelude::*,
};

async fn set_active(app_state: &AppState, workflow_id: Uuid, is_active: bool) -> Response {
    let failure = if is_active {
        "Failed to activate workflow"
    } else {
        "Failed to deactivate workflow"
    };

    let workflow = match load_workflow(app_state, workflow_id, failure).await {
        Ok(workflow) => workflow,
        Err(resp) => return resp,
    };
    if is_active {
        if let Err(errors) = validate_activation(&workflow) {
            return JsonResponse::validation_failed(failure, &errors);
        }
    }

    match app_state
        .workflow_repo
        .set_workflow_active(workflow_id, is_active)
        .await
    {
        Ok(Some(workflow)) => {
            sync_workflow_schedule(app_state, &workflow).await;
            info!(%workflow_id, is_active, "workflow activation changed");
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "workflow": workflow
                })),
            )
                .into_response()
        }
        Ok(None) => JsonResponse::not_found("Workflow not found"),
        Err(err) => {
            error!(%workflow_id, ?err, "{failure}");
            JsonResponse::server_error(failure)
        }
    }
}

pub async fn activate_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    set_active(&app_state, workflow_id, true).await
}

pub async fn deactivate_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    set_active(&app_state, workflow_id, false).await
}

/// Copies a workflow as "`<name>` (Copy)": inactive, fresh ids, empty stats.
pub async fn duplicate_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    let source = match load_workflow(&app_state, workflow_id, "Failed to duplicate workflow").await
    {
        Ok(workflow) => workflow,
        Err(resp) => return resp,
    };

    let mut definition = source.definition().with_fresh_ids();
    definition.name = format!("{} (Copy)", source.name);

    match app_state
        .workflow_repo
        .create_workflow(NewWorkflow {
            definition,
            is_active: false,
            template_id: source.template_id,
        })
        .await
    {
        Ok(copy) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "workflow": copy
            })),
        )
            .into_response(),
        Err(err) => {
            error!(%workflow_id, ?err, "DB error duplicating workflow");
            JsonResponse::server_error("Failed to duplicate workflow")
        }
    }
}
