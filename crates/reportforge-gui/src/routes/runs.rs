use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path},
    http::{StatusCode, header, request::Parts},
    response::sse::{KeepAlive, Sse},
    routing::{get, post},
};
use reportforge_core::RunPhase;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::AppError;
use crate::state::{AppState, RunStatus, RunSubmission, ServiceMetrics, SseStream};

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub topic: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: String,
    pub capacity: ServiceMetrics,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Free text; blank approves the plan as-is.
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub run_id: String,
    pub phase: RunPhase,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunStatus>,
    pub capacity: ServiceMetrics,
}

pub fn run_router() -> Router<AppState> {
    Router::new()
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/feedback", post(submit_feedback))
        .route("/runs/:id/stream", get(stream_run))
}

#[instrument(skip_all, fields(run_id = %payload.run_id.as_deref().unwrap_or("new")))]
async fn start_run(
    GuardedState(state): GuardedState,
    Json(payload): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), AppError> {
    if payload.topic.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "topic must not be empty",
        ));
    }

    let submission = RunSubmission::new(payload.topic)
        .with_run_id(payload.run_id)
        .with_overrides(payload.overrides);

    let service = state.run_service();
    let run_id = service.start_run(submission).await.map_err(AppError::from)?;

    let response = StartRunResponse {
        run_id,
        capacity: service.metrics(),
        message: "run started",
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_run(
    GuardedState(state): GuardedState,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, AppError> {
    match state.run_service().status(&run_id) {
        Some(status) => Ok(Json(status)),
        None => Err(AppError::new(StatusCode::NOT_FOUND, "run not found")),
    }
}

#[instrument(skip_all, fields(%run_id))]
async fn submit_feedback(
    GuardedState(state): GuardedState,
    Path(run_id): Path<String>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackResponse>), AppError> {
    let service = state.run_service();
    if service.status(&run_id).is_none() {
        return Err(AppError::new(StatusCode::NOT_FOUND, "run not found"));
    }

    service
        .submit_feedback(&run_id, payload.feedback)
        .await
        .map_err(AppError::from)?;

    let phase = service
        .status(&run_id)
        .map(|status| status.phase)
        .unwrap_or(RunPhase::Resuming);

    Ok((
        StatusCode::ACCEPTED,
        Json(FeedbackResponse {
            run_id,
            phase,
            message: "feedback accepted",
        }),
    ))
}

async fn stream_run(
    GuardedState(state): GuardedState,
    Path(run_id): Path<String>,
) -> Result<Sse<SseStream>, AppError> {
    match state.run_service().event_stream(&run_id) {
        Some(stream) => Ok(Sse::new(stream).keep_alive(KeepAlive::new())),
        None => Err(AppError::new(StatusCode::NOT_FOUND, "run not found")),
    }
}

async fn list_runs(
    GuardedState(state): GuardedState,
) -> Result<Json<ListRunsResponse>, AppError> {
    let service = state.run_service();
    Ok(Json(ListRunsResponse {
        runs: service.list(),
        capacity: service.metrics(),
    }))
}

/// Bearer-token guard applied to every API route when a token is configured.
pub struct GuardedState(pub AppState);

#[async_trait]
impl FromRequestParts<AppState> for GuardedState {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let app_state = state.clone();

        if let Some(expected) = app_state.auth_token() {
            let provided = parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim);

            match provided {
                Some(token) if token == expected.as_str() => {}
                _ => {
                    return Err(AppError::new(
                        StatusCode::UNAUTHORIZED,
                        "invalid auth token",
                    ));
                }
            }
        }

        Ok(GuardedState(app_state))
    }
}
