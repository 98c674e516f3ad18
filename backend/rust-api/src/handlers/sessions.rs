use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::ApiError,
    extractors::ValidatedJson,
    models::quiz::{StartSessionRequest, SubmitAnswerRequest},
    services::{quiz_service::QuizService, AppState},
};

pub async fn start_session(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<StartSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Starting quiz session for user_id={}", req.user_id);

    let response = QuizService::new(&state).start(&req.user_id).await?;
    Ok((StatusCode::OK, Json(response)))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ValidatedJson(req): ValidatedJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Submitting answer for session: {}", session_id);

    let response = QuizService::new(&state)
        .answer(&session_id, &req.answer)
        .await?;
    Ok(Json(response))
}

pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::debug!("Getting progress for session: {}", session_id);

    let response = QuizService::new(&state).progress(&session_id).await?;
    Ok(Json(response))
}

pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Ending session: {}", session_id);

    let response = QuizService::new(&state).end(&session_id).await?;
    Ok(Json(response))
}
