use super::{
    helpers::{body_to_value, enqueue_run, load_workflow},
    prelude::*,
};
use crate::utils::filters::filter_runs;
use crate::utils::format::{format_duration, run_duration_ms};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub search: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentRunsQuery {
    pub limit: Option<i64>,
}

fn page_size(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Manual trigger. The optional body `{ "context": {...} }` becomes the run's
/// trigger data. Inactive workflows may be run as long as they are valid.
pub async fn start_workflow_run(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let workflow = match load_workflow(&app_state, workflow_id, "Failed to start workflow run").await
    {
        Ok(workflow) => workflow,
        Err(resp) => return resp,
    };
    if let Err(errors) = validate_activation(&workflow) {
        return JsonResponse::validation_failed("Failed to start workflow run", &errors);
    }

    let context = body_to_value(&body)
        .get("context")
        .cloned()
        .unwrap_or_else(|| json!({}));

    match enqueue_run(&app_state, &workflow, "manual", context).await {
        Ok(run) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "run": run
            })),
        )
            .into_response(),
        Err(err) => {
            error!(%workflow_id, ?err, "DB error creating workflow run");
            JsonResponse::server_error("Failed to start workflow run")
        }
    }
}

pub async fn list_runs_for_workflow(
    State(app_state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Query(query): Query<ListRunsQuery>,
) -> Response {
    if let Err(resp) = load_workflow(&app_state, workflow_id, "Failed to fetch runs").await {
        return resp;
    }

    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => match raw.parse::<RunStatus>() {
            Ok(status) => Some(status),
            Err(err) => return JsonResponse::bad_request(&err.to_string()),
        },
    };
    let limit = page_size(query.limit);
    let offset = query.offset.unwrap_or(0).max(0);

    // Search is applied in memory and has to run before paging.
    let searching = !query.search.trim().is_empty();
    let (fetch_limit, fetch_offset) = if searching {
        (i64::MAX, 0)
    } else {
        (limit, offset)
    };

    match app_state
        .workflow_repo
        .list_runs_paged(
            Some(workflow_id),
            status.map(|s| vec![s]),
            fetch_limit,
            fetch_offset,
        )
        .await
    {
        Ok(runs) => {
            let mut visible = filter_runs(&runs, &query.search, status);
            if searching {
                visible = visible
                    .into_iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .collect();
            }
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "runs": visible,
                    "limit": limit,
                    "offset": offset,
                })),
            )
                .into_response()
        }
        Err(err) => {
            error!(%workflow_id, ?err, "DB error listing runs");
            JsonResponse::server_error("Failed to fetch runs")
        }
    }
}

/// Newest runs across every workflow.
pub async fn list_recent_runs(
    State(app_state): State<AppState>,
    Query(query): Query<RecentRunsQuery>,
) -> Response {
    match app_state
        .workflow_repo
        .list_runs_paged(None, None, page_size(query.limit), 0)
        .await
    {
        Ok(runs) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "runs": runs
            })),
        )
            .into_response(),
        Err(err) => {
            error!(?err, "DB error listing recent runs");
            JsonResponse::server_error("Failed to fetch runs")
        }
    }
}

pub async fn get_workflow_run(
    State(app_state): State<AppState>,
    Path((workflow_id, run_id)): Path<(Uuid, Uuid)>,
) -> Response {
    match app_state
        .workflow_repo
        .get_workflow_run(workflow_id, run_id)
        .await
    {
        Ok(Some(run)) => {
            let duration = run_duration_ms(&run, OffsetDateTime::now_utc()).map(format_duration);
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "run": run,
                    "duration": duration,
                })),
            )
                .into_response()
        }
        Ok(None) => JsonResponse::not_found("Run not found"),
        Err(err) => {
            error!(%workflow_id, %run_id, ?err, "DB error fetching run");
            JsonResponse::server_error("Failed to fetch run")
        }
    }
}

pub async fn cancel_workflow_run(
    State(app_state): State<AppState>,
    Path((workflow_id, run_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let repo = &app_state.workflow_repo;
    match repo.cancel_workflow_run(workflow_id, run_id).await {
        Ok(true) => {
            info!(%workflow_id, %run_id, "run canceled");
            JsonResponse::success("Run canceled")
        }
        Ok(false) => match repo.get_workflow_run(workflow_id, run_id).await {
            Ok(Some(_)) => JsonResponse::conflict("Failed to cancel run: run already finished"),
            Ok(None) => JsonResponse::not_found("Run not found"),
            Err(err) => {
                error!(%run_id, ?err, "DB error fetching run");
                JsonResponse::server_error("Failed to cancel run")
            }
        },
        Err(err) => {
            error!(%workflow_id, %run_id, ?err, "DB error canceling run");
            JsonResponse::server_error("Failed to cancel run")
        }
    }
}
