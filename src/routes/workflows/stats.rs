use super::prelude::*;
use crate::utils::stats::{clamp_days, compute_stats, window_start};

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

pub async fn get_workflow_stats(
    State(app_state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let days = clamp_days(query.days);
    let now = OffsetDateTime::now_utc();
    let since = window_start(days, now);

    let repo = &app_state.workflow_repo;
    let (workflows, runs) = match tokio::try_join!(repo.list_workflows(), repo.list_runs_since(since))
    {
        Ok(pair) => pair,
        Err(err) => {
            error!(?err, "DB error loading stats");
            return JsonResponse::server_error("Failed to fetch workflow stats");
        }
    };

    let report = compute_stats(&workflows, &runs, days, now);
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "stats": report
        })),
    )
        .into_response()
}
