pub mod templates;
pub mod workflows;

use axum::{
    response::Response,
    routing::{get, post},
    Router,
};

use crate::responses::JsonResponse;
use crate::state::AppState;

use templates::{
    create_template, create_template_from_workflow, delete_template, get_template,
    instantiate_template, list_templates, update_template,
};
use workflows::{
    activate_workflow, cancel_workflow_run, create_workflow, deactivate_workflow,
    delete_workflow, duplicate_workflow, emit_event, get_webhook_url, get_workflow,
    get_workflow_run, get_workflow_stats, list_recent_runs, list_runs_for_workflow,
    list_workflows, regenerate_webhook_token, sse_run_events, start_workflow_run,
    update_workflow, webhook_trigger,
};

/// Health check.
async fn root() -> Response {
    JsonResponse::success("Workflow automation backend is running")
}

/// Every route of the API, without the outer middleware stack.
pub fn app_router(state: AppState) -> Router {
    let workflow_routes = Router::new()
        .route("/", post(create_workflow).get(list_workflows))
        .route("/stats", get(get_workflow_stats))
        .route("/runs", get(list_recent_runs))
        .route(
            "/{workflow_id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/{workflow_id}/activate", post(activate_workflow))
        .route("/{workflow_id}/deactivate", post(deactivate_workflow))
        .route("/{workflow_id}/duplicate", post(duplicate_workflow))
        .route("/{workflow_id}/run", post(start_workflow_run))
        .route("/{workflow_id}/runs", get(list_runs_for_workflow))
        .route("/{workflow_id}/runs/{run_id}", get(get_workflow_run))
        .route(
            "/{workflow_id}/runs/{run_id}/cancel",
            post(cancel_workflow_run),
        )
        .route("/{workflow_id}/runs/{run_id}/events", get(sse_run_events))
        .route("/{workflow_id}/webhook-url", get(get_webhook_url))
        .route(
            "/{workflow_id}/webhook/regenerate",
            post(regenerate_webhook_token),
        )
        .route(
            "/{workflow_id}/save-as-template",
            post(create_template_from_workflow),
        );

    let template_routes = Router::new()
        .route("/", get(list_templates).post(create_template))
        .route(
            "/{template_id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/{template_id}/instantiate", post(instantiate_template));

    // Public trigger endpoints
    let trigger_routes = Router::new()
        .route("/hooks/{workflow_id}/{token}", post(webhook_trigger))
        .route("/events", post(emit_event));

    Router::new()
        .route("/", get(root))
        .nest("/api/workflows", workflow_routes)
        .nest("/api/templates", template_routes)
        .nest("/api", trigger_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::models::workflow_run::NewWorkflowRun;
    use crate::worker::work_once;

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn lead_workflow(is_active: bool) -> Value {
        json!({
            "name": "Lead intake",
            "description": "Routes new leads",
            "is_active": is_active,
            "triggers": [
                {"type": "webhook", "enabled": true, "config": {}},
                {"type": "event", "enabled": true, "config": {"event": "lead.created"}}
            ],
            "actions": [
                {"name": "Note", "type": "log", "config": {"message": "lead {{trigger.email}}"}}
            ]
        })
    }

    async fn create(app: &Router, body: Value) -> Value {
        let (status, json) = call(app, Method::POST, "/api/workflows", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["workflow"].clone()
    }

    #[tokio::test]
    async fn health_check_responds() {
        let app = app_router(AppState::for_tests());
        let (status, json) = call(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], json!(true));
    }

    #[tokio::test]
    async fn create_rejects_active_workflow_without_actions() {
        let app = app_router(AppState::for_tests());
        let (status, json) = call(
            &app,
            Method::POST,
            "/api/workflows",
            Some(json!({"name": "Empty", "is_active": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], json!("VALIDATION_FAILED"));
        assert_eq!(json["violations"].as_array().unwrap().len(), 2);

        // Drafts may be saved empty.
        create(&app, json!({"name": "Empty"})).await;
    }

    #[tokio::test]
    async fn list_filters_by_search_and_status() {
        let app = app_router(AppState::for_tests());
        create(&app, lead_workflow(true)).await;
        create(&app, json!({"name": "Weekly report"})).await;

        let (_, json) = call(&app, Method::GET, "/api/workflows?search=LEAD", None).await;
        assert_eq!(json["workflows"].as_array().unwrap().len(), 1);

        let (_, json) = call(&app, Method::GET, "/api/workflows?status=inactive", None).await;
        let names: Vec<_> = json["workflows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|w| w["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Weekly report"]);

        let (_, json) = call(&app, Method::GET, "/api/workflows?search=nothing", None).await;
        assert!(json["workflows"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn activation_lifecycle_and_duplicate() {
        let app = app_router(AppState::for_tests());
        let empty = create(&app, json!({"name": "Draft"})).await;
        let id = empty["id"].as_str().unwrap();

        let (status, _) = call(&app, Method::POST, &format!("/api/workflows/{id}/activate"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let wf = create(&app, lead_workflow(false)).await;
        let id = wf["id"].as_str().unwrap();
        let (status, json) = call(&app, Method::POST, &format!("/api/workflows/{id}/activate"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["workflow"]["is_active"], json!(true));

        let (status, json) = call(&app, Method::POST, &format!("/api/workflows/{id}/duplicate"), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["workflow"]["name"], json!("Lead intake (Copy)"));
        assert_eq!(json["workflow"]["is_active"], json!(false));
        assert_ne!(json["workflow"]["actions"][0]["id"], wf["actions"][0]["id"]);

        let (status, _) = call(&app, Method::DELETE, &format!("/api/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, &format!("/api/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_url_enqueues_run_and_rotates() {
        let state = AppState::for_tests();
        let app = app_router(state.clone());
        let wf = create(&app, lead_workflow(true)).await;
        let id = wf["id"].as_str().unwrap();

        let (_, json) = call(&app, Method::GET, &format!("/api/workflows/{id}/webhook-url"), None).await;
        let url = json["url"].as_str().unwrap().to_string();
        assert!(url.starts_with(&format!("/api/hooks/{id}/")));

        let (status, json) = call(&app, Method::POST, &url, Some(json!({"email": "a@b.co"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{json}");

        assert!(work_once(&state).await.unwrap());
        let (_, json) = call(&app, Method::GET, &format!("/api/workflows/{id}/runs"), None).await;
        let run = &json["runs"][0];
        assert_eq!(run["status"], json!("success"));
        assert_eq!(run["triggered_by"], json!("webhook"));
        assert_eq!(run["executions"][0]["input"]["message"], json!("lead a@b.co"));

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/workflows/{id}/webhook/regenerate"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::POST, &url, Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn events_reach_only_active_listeners() {
        let app = app_router(AppState::for_tests());
        create(&app, lead_workflow(true)).await;
        create(&app, lead_workflow(false)).await;

        let (status, json) = call(
            &app,
            Method::POST,
            "/api/events",
            Some(json!({"event": "Lead.Created", "payload": {"email": "x@y.z"}})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["run_ids"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn manual_run_cancel_and_stats() {
        let app = app_router(AppState::for_tests());
        let wf = create(&app, lead_workflow(false)).await;
        let id = wf["id"].as_str().unwrap();

        let (status, json) = call(
            &app,
            Method::POST,
            &format!("/api/workflows/{id}/run"),
            Some(json!({"context": {"email": "m@n.o"}})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["run"]["status"], json!("queued"));
        let run_id = json["run"]["id"].as_str().unwrap().to_string();

        let cancel = format!("/api/workflows/{id}/runs/{run_id}/cancel");
        let (status, _) = call(&app, Method::POST, &cancel, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::POST, &cancel, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, json) = call(&app, Method::GET, &format!("/api/workflows/{id}/runs?status=canceled"), None).await;
        assert_eq!(json["runs"].as_array().unwrap().len(), 1);
        let (status, _) = call(&app, Method::GET, &format!("/api/workflows/{id}/runs?status=bogus"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = call(&app, Method::GET, "/api/workflows/stats?days=3", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stats"]["days"], json!(3));
        assert_eq!(json["stats"]["total_workflows"], json!(1));
    }

    #[tokio::test]
    async fn run_search_covers_runs_beyond_the_first_page() {
        let state = AppState::for_tests();
        let app = app_router(state.clone());
        let wf = create(&app, lead_workflow(true)).await;
        let id = wf["id"].as_str().unwrap();
        let workflow_id: uuid::Uuid = id.parse().unwrap();

        for triggered_by in std::iter::once("webhook").chain(std::iter::repeat_n("manual", 60)) {
            state
                .workflow_repo
                .create_workflow_run(NewWorkflowRun {
                    workflow_id,
                    triggered_by: triggered_by.into(),
                    trigger_data: json!({}),
                })
                .await
                .unwrap();
        }

        let (_, json) = call(&app, Method::GET, &format!("/api/workflows/{id}/runs"), None).await;
        assert_eq!(json["runs"].as_array().unwrap().len(), 50);

        let (status, json) =
            call(&app, Method::GET, &format!("/api/workflows/{id}/runs?search=webhook"), None).await;
        assert_eq!(status, StatusCode::OK);
        let runs = json["runs"].as_array().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0]["triggered_by"], json!("webhook"));

        let (_, json) = call(
            &app,
            Method::GET,
            &format!("/api/workflows/{id}/runs?search=manual&limit=25&offset=50"),
            None,
        )
        .await;
        assert_eq!(json["runs"].as_array().unwrap().len(), 10);
        let (_, json) = call(
            &app,
            Method::GET,
            &format!("/api/workflows/{id}/runs?search=webhook&offset=1"),
            None,
        )
        .await;
        assert!(json["runs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn template_round_trip_through_workflow() {
        let app = app_router(AppState::for_tests());
        let wf = create(&app, lead_workflow(true)).await;
        let id = wf["id"].as_str().unwrap();

        let (status, json) = call(
            &app,
            Method::POST,
            &format!("/api/workflows/{id}/save-as-template"),
            Some(json!({"category": "Sales", "tags": ["Leads", "leads", " crm "]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["template"]["tags"], json!(["leads", "crm"]));
        let template_id = json["template"]["id"].as_str().unwrap().to_string();

        let (_, json) = call(&app, Method::GET, "/api/templates?category=sales&tag=CRM", None).await;
        assert_eq!(json["templates"].as_array().unwrap().len(), 1);
        let (_, json) = call(&app, Method::GET, "/api/templates?tag=billing", None).await;
        assert!(json["templates"].as_array().unwrap().is_empty());

        let (status, json) = call(
            &app,
            Method::POST,
            &format!("/api/templates/{template_id}/instantiate"),
            Some(json!({"name": "Lead intake EU"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["workflow"]["is_active"], json!(false));
        assert_eq!(json["workflow"]["template_id"], json!(template_id));

        let (_, json) = call(&app, Method::GET, &format!("/api/templates/{template_id}"), None).await;
        assert_eq!(json["template"]["usage_count"], json!(1));
    }
}
