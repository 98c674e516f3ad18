use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::{
    error::ApiError,
    extractors::AppJson,
    models::analysis::{DrivingAnalysisRequest, SimpleDrivingAnalysisRequest},
    services::{analysis_service::AnalysisService, AppState},
};

pub async fn analyze_driving(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<DrivingAnalysisRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = AnalysisService::new(&state).analyze(req).await?;
    tracing::info!(
        "Driving analysis complete: score={}, passed={}",
        response.score.overall_score,
        response.score.passed
    );
    Ok(Json(response))
}

pub async fn analyze_driving_simple(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<SimpleDrivingAnalysisRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = AnalysisService::new(&state).analyze_simple(req).await?;
    tracing::info!(
        "Simple driving analysis complete: score={}, passed={}",
        response.score.overall_score,
        response.score.passed
    );
    Ok(Json(response))
}
