use super::prelude::*;

const POLL_INTERVAL: Duration = Duration::from_millis(800);

/// Streams `run` events whenever the run changes and ends once it is terminal.
pub async fn sse_run_events(
    State(app_state): State<AppState>,
    Path((workflow_id, run_id)): Path<(Uuid, Uuid)>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let state = app_state.clone();
    let s = stream! {
        let mut last_run_updated: Option<OffsetDateTime> = None;
        let mut intv = tokio::time::interval(POLL_INTERVAL);
        loop {
            intv.tick().await;
            match state.workflow_repo.get_workflow_run(workflow_id, run_id).await {
                Ok(Some(run)) => {
                    if last_run_updated.is_none_or(|t| t < run.updated_at) {
                        last_run_updated = Some(run.updated_at);
                        match Event::default().event("run").json_data(&run) {
                            Ok(ev) => yield Ok::<Event, Infallible>(ev),
                            Err(err) => warn!(%run_id, ?err, "failed to encode run event"),
                        }
                    }
                    if run.status.is_terminal() {
                        break;
                    }
                }
                Ok(None) => {
                    yield Ok::<Event, Infallible>(Event::default().event("error").data("not_found"));
                    break;
                }
                Err(err) => {
                    warn!(%run_id, ?err, "failed to poll run for event stream");
                    yield Ok::<Event, Infallible>(Event::default().event("error").data("fetch_failed"));
                }
            }
        }
    };

    Sse::new(s).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    )
}
