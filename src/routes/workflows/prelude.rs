pub(crate) use std::{convert::Infallible, time::Duration};

pub(crate) use async_stream::stream;
pub(crate) use axum::body::Bytes;
pub(crate) use axum::response::sse::{Event, KeepAlive, Sse};
pub(crate) use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
pub(crate) use serde::Deserialize;
pub(crate) use serde_json::{json, Value};
pub(crate) use time::OffsetDateTime;
pub(crate) use tracing::{error, info, warn};
pub(crate) use uuid::Uuid;

pub(crate) use crate::{
    models::workflow::{CreateWorkflow, NewWorkflow, TriggerType, Workflow},
    models::workflow_run::RunStatus,
    responses::JsonResponse,
    state::AppState,
    utils::validation::{validate_activatable, validate_activation, validate_definition},
};
