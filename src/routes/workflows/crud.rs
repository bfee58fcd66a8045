use super::{
    helpers::{load_workflow, sync_workflow_schedule},
    prelude::*,
};
use crate::utils::filters::{filter_workflows, WorkflowStatusFilter};
use crate::utils::validation::ValidationError;

#[derive(Debug, Default, Deserialize)]
pub struct ListWorkflowsQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub status: WorkflowStatusFilter,
}

fn check_payload(payload: &CreateWorkflow) -> Result<(), Vec<ValidationError>> {
    let def = &payload.definition;
    validate_definition(&def.name, &def.triggers, &def.actions)?;
    if payload.is_active {
        validate_activatable(&def.triggers, &def.actions)?;
    }
    Ok(())
}

pub async fn list_workflows(
    State(app_state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Response {
    match app_state.workflow_repo.list_workflows().await {
        Ok(workflows) => {
            let visible = filter_workflows(&workflows, &query.search, query.status);
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "workflows": visible,
                })),
            )
                .into_response()
        }
        Err(err) => {
            error!(?err, "DB error listing workflows");
            JsonResponse::server_error("Failed to fetch workflows")
        }
    }
}

pub async fn create_workflow(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateWorkflow>,
) -> Response {
    if let Err(errors) = check_payload(&payload) {
        return JsonResponse::validation_failed("Failed to create workflow", &errors);
    }

    let CreateWorkflow {
        definition,
        is_active,
    } = payload;
    let result = app_state
        .workflow_repo
        .create_workflow(NewWorkflow {
            definition,
            is_active,
            template_id: None,
        })
        .await;

    match result {
        Ok(workflow) => {
            sync_workflow_schedule(&app_state, &workflow).await;
            info!(workflow_id = %workflow.id, "workflow created");
            (
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "workflow": workflow
                })),
            )
                .into_response()
        }
        Err(err) => {
            error!(?err, "DB error creating workflow");
            JsonResponse::server_error("Failed to create workflow")
        }
    }
}

pub async fn get_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    match load_workflow(&app_state, workflow_id, "Failed to fetch workflow").await {
        Ok(workflow) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "workflow": workflow
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

pub async fn update_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<CreateWorkflow>,
) -> Response {
    if let Err(errors) = check_payload(&payload) {
        return JsonResponse::validation_failed("Failed to update workflow", &errors);
    }

    match app_state
        .workflow_repo
        .update_workflow(workflow_id, payload.definition, payload.is_active)
        .await
    {
        Ok(Some(workflow)) => {
            sync_workflow_schedule(&app_state, &workflow).await;
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
            error!(%workflow_id, ?err, "DB error updating workflow");
            JsonResponse::server_error("Failed to update workflow")
        }
    }
}

pub async fn delete_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    match app_state.workflow_repo.delete_workflow(workflow_id).await {
        Ok(true) => {
            info!(%workflow_id, "workflow deleted");
            JsonResponse::success("Workflow deleted")
        }
        Ok(false) => JsonResponse::not_found("Workflow not found"),
        Err(err) => {
            error!(%workflow_id, ?err, "DB error deleting workflow");
            JsonResponse::server_error("Failed to delete workflow")
        }
    }
}
