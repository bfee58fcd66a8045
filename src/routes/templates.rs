use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::workflow::NewWorkflow;
use crate::models::workflow_template::NewWorkflowTemplate;
use crate::responses::JsonResponse;
use crate::routes::workflows::load_workflow;
use crate::state::AppState;
use crate::utils::validation::{validate_definition, ValidationError};

#[derive(Debug, Default, Deserialize)]
pub struct ListTemplatesQuery {
    pub category: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstantiateTemplate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveAsTemplate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn check_template(template: &NewWorkflowTemplate) -> Result<(), Vec<ValidationError>> {
    validate_definition(&template.name, &template.triggers, &template.actions)
}

fn normalized(mut template: NewWorkflowTemplate) -> NewWorkflowTemplate {
    template.tags = template.normalized_tags();
    template.category = match template.category.trim() {
        "" => "general".to_string(),
        category => category.to_lowercase(),
    };
    template
}

pub async fn list_templates(
    State(app_state): State<AppState>,
    Query(query): Query<ListTemplatesQuery>,
) -> Response {
    let category = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "all");
    let tag = query.tag.as_deref().map(str::trim).filter(|t| !t.is_empty());

    match app_state.workflow_repo.list_templates().await {
        Ok(templates) => {
            let visible: Vec<_> = templates
                .iter()
                .filter(|t| category.is_none_or(|c| t.category.eq_ignore_ascii_case(c)))
                .filter(|t| tag.is_none_or(|tag| t.has_tag(tag)))
                .collect();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "templates": visible
                })),
            )
                .into_response()
        }
        Err(err) => {
            error!(?err, "DB error listing templates");
            JsonResponse::server_error("Failed to fetch templates")
        }
    }
}

pub async fn get_template(
    State(app_state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Response {
    match app_state.workflow_repo.find_template(template_id).await {
        Ok(Some(template)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "template": template
            })),
        )
            .into_response(),
        Ok(None) => JsonResponse::not_found("Template not found"),
        Err(err) => {
            error!(%template_id, ?err, "DB error fetching template");
            JsonResponse::server_error("Failed to fetch template")
        }
    }
}

pub async fn create_template(
    State(app_state): State<AppState>,
    Json(payload): Json<NewWorkflowTemplate>,
) -> Response {
    if let Err(errors) = check_template(&payload) {
        return JsonResponse::validation_failed("Failed to create template", &errors);
    }
    match app_state
        .workflow_repo
        .create_template(normalized(payload))
        .await
    {
        Ok(template) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "template": template
            })),
        )
            .into_response(),
        Err(err) => {
            error!(?err, "DB error creating template");
            JsonResponse::server_error("Failed to create template")
        }
    }
}

pub async fn update_template(
    State(app_state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(payload): Json<NewWorkflowTemplate>,
) -> Response {
    if let Err(errors) = check_template(&payload) {
        return JsonResponse::validation_failed("Failed to update template", &errors);
    }
    match app_state
        .workflow_repo
        .update_template(template_id, normalized(payload))
        .await
    {
        Ok(Some(template)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "template": template
            })),
        )
            .into_response(),
        Ok(None) => JsonResponse::not_found("Template not found"),
        Err(err) => {
            error!(%template_id, ?err, "DB error updating template");
            JsonResponse::server_error("Failed to update template")
        }
    }
}

pub async fn delete_template(
    State(app_state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Response {
    match app_state.workflow_repo.delete_template(template_id).await {
        Ok(true) => JsonResponse::success("Template deleted"),
        Ok(false) => JsonResponse::not_found("Template not found"),
        Err(err) => {
            error!(%template_id, ?err, "DB error deleting template");
            JsonResponse::server_error("Failed to delete template")
        }
    }
}

/// New inactive workflow built from the template's blueprint.
pub async fn instantiate_template(
    State(app_state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(payload): Json<InstantiateTemplate>,
) -> Response {
    let repo = &app_state.workflow_repo;
    let template = match repo.find_template(template_id).await {
        Ok(Some(template)) => template,
        Ok(None) => return JsonResponse::not_found("Template not found"),
        Err(err) => {
            error!(%template_id, ?err, "DB error fetching template");
            return JsonResponse::server_error("Failed to create workflow from template");
        }
    };

    let name = payload
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| template.name.clone());
    let definition = template.blueprint(name, payload.description);

    let workflow = match repo
        .create_workflow(NewWorkflow {
            definition,
            is_active: false,
            template_id: Some(template.id),
        })
        .await
    {
        Ok(workflow) => workflow,
        Err(err) => {
            error!(%template_id, ?err, "DB error creating workflow from template");
            return JsonResponse::server_error("Failed to create workflow from template");
        }
    };

    if let Err(err) = repo.increment_template_usage(template.id).await {
        error!(%template_id, ?err, "Failed to bump template usage count");
    }
    info!(%template_id, workflow_id = %workflow.id, "workflow created from template");

    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "workflow": workflow
        })),
    )
        .into_response()
}

/// Saves an existing workflow's triggers and actions as a new template.
pub async fn create_template_from_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<SaveAsTemplate>,
) -> Response {
    let workflow = match load_workflow(&app_state, workflow_id, "Failed to save template").await {
        Ok(workflow) => workflow,
        Err(resp) => return resp,
    };

    let template = normalized(NewWorkflowTemplate {
        name: payload
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| workflow.name.clone()),
        description: payload.description.or(workflow.description.clone()),
        category: payload.category.unwrap_or_default(),
        tags: payload.tags,
        triggers: workflow.triggers.clone(),
        actions: workflow.actions.clone(),
    });

    match app_state.workflow_repo.create_template(template).await {
        Ok(template) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "template": template
            })),
        )
            .into_response(),
        Err(err) => {
            error!(%workflow_id, ?err, "DB error saving workflow as template");
            JsonResponse::server_error("Failed to save template")
        }
    }
}
