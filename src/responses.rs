use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::utils::validation::ValidationError;

#[derive(Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl JsonResponse {
    fn build(status: StatusCode, msg: &str, code: Option<&str>) -> Response {
        let success = status.is_success();
        (
            status,
            Json(JsonResponse {
                status: if success { "success" } else { "error" }.to_string(),
                success,
                message: msg.to_string(),
                code: code.map(str::to_string),
                violations: Vec::new(),
            }),
        )
            .into_response()
    }

    pub fn success(msg: &str) -> Response {
        Self::build(StatusCode::OK, msg, None)
    }

    pub fn not_found(msg: &str) -> Response {
        Self::build(StatusCode::NOT_FOUND, msg, None)
    }

    pub fn conflict(msg: &str) -> Response {
        Self::build(StatusCode::CONFLICT, msg, None)
    }

    pub fn server_error(msg: &str) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, msg, None)
    }

    pub fn unauthorized(msg: &str) -> Response {
        Self::build(StatusCode::UNAUTHORIZED, msg, None)
    }

    pub fn bad_request(msg: &str) -> Response {
        Self::build(StatusCode::BAD_REQUEST, msg, None)
    }

    pub fn too_many_requests(msg: &str) -> Response {
        Self::build(StatusCode::TOO_MANY_REQUESTS, msg, Some("RATE_LIMITED"))
    }

    /// 400 listing every violated workflow rule.
    pub fn validation_failed(msg: &str, errors: &[ValidationError]) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: Some("VALIDATION_FAILED".to_string()),
                violations: errors.iter().map(ToString::to_string).collect(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::from_slice;

    use crate::responses::JsonResponse;
    use crate::utils::validation::ValidationError;

    #[tokio::test]
    async fn test_success_response() {
        let resp = JsonResponse::success("ok");
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert_eq!(json.status, "success");
        assert!(json.success);
        assert_eq!(json.message, "ok");
        assert!(json.violations.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_response() {
        let resp = JsonResponse::not_found("Workflow not found");
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert_eq!(json.status, "error");
        assert!(!json.success);
        assert_eq!(json.message, "Workflow not found");
    }

    #[tokio::test]
    async fn test_validation_response_lists_violations() {
        let resp = JsonResponse::validation_failed(
            "Failed to activate workflow",
            &[
                ValidationError::NoEnabledTrigger,
                ValidationError::NoEnabledAction,
            ],
        );
        assert_eq!(resp.status(), axum::http::StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert_eq!(json.code.as_deref(), Some("VALIDATION_FAILED"));
        assert_eq!(json.violations.len(), 2);
        assert!(json.violations[0].contains("trigger"));
    }
}
