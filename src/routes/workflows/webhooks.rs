use super::{
    helpers::{body_to_value, enqueue_run, load_workflow},
    prelude::*,
};
use crate::utils::webhook::{compute_webhook_token, verify_webhook_token, webhook_path};

fn webhook_url_response(app_state: &AppState, workflow_id: Uuid, salt: Uuid) -> Response {
    match compute_webhook_token(&app_state.config.webhook_secret, workflow_id, salt) {
        Some(token) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "url": webhook_path(workflow_id, &token),
            })),
        )
            .into_response(),
        None => {
            error!(%workflow_id, "webhook secret rejected by HMAC");
            JsonResponse::server_error("Failed to get webhook URL")
        }
    }
}

pub async fn get_webhook_url(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    match load_workflow(&app_state, workflow_id, "Failed to get webhook URL").await {
        Ok(wf) => webhook_url_response(&app_state, wf.id, wf.webhook_salt),
        Err(resp) => resp,
    }
}

/// Rotates the salt, invalidating every previously issued webhook URL.
pub async fn regenerate_webhook_token(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Response {
    match app_state.workflow_repo.rotate_webhook_salt(workflow_id).await {
        Ok(Some(salt)) => {
            info!(%workflow_id, "webhook token regenerated");
            webhook_url_response(&app_state, workflow_id, salt)
        }
        Ok(None) => JsonResponse::not_found("Workflow not found"),
        Err(err) => {
            error!(%workflow_id, ?err, "DB error rotating webhook salt");
            JsonResponse::server_error("Failed to regenerate webhook URL")
        }
    }
}

pub async fn webhook_trigger(
    State(app_state): State<AppState>,
    Path((workflow_id, token)): Path<(Uuid, String)>,
    body: Bytes,
) -> Response {
    let wf = match load_workflow(&app_state, workflow_id, "Failed to enqueue").await {
        Ok(wf) => wf,
        Err(resp) => return resp,
    };

    if !verify_webhook_token(
        &app_state.config.webhook_secret,
        wf.id,
        wf.webhook_salt,
        &token,
    ) {
        warn!(%workflow_id, "webhook called with an invalid token");
        return JsonResponse::unauthorized("Invalid token");
    }

    if !wf.is_active || !wf.has_trigger(TriggerType::Webhook) {
        return JsonResponse::conflict("Workflow is not accepting webhooks");
    }
    if let Err(errors) = validate_activation(&wf) {
        return JsonResponse::validation_failed("Failed to enqueue", &errors);
    }

    match enqueue_run(&app_state, &wf, "webhook", body_to_value(&body)).await {
        Ok(run) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "run_id": run.id
            })),
        )
            .into_response(),
        Err(err) => {
            error!(%workflow_id, ?err, "DB error enqueuing webhook run");
            JsonResponse::server_error("Failed to enqueue")
        }
    }
}
