//! Scan endpoints: classification, feedback and record lookup

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use medscan_common::{Feedback, ScanIdentity, ScanRecord};
use serde::{Deserialize, Serialize};

use super::{run_detached, ScanPath};
use crate::services::PredictionOutcome;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub feedback: Feedback,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub scan: ScanRecord,
}

/// POST /scans/:owner_id/:scan_type/:custom_name/ai/predict
///
/// Runs the classifier and overwrites the scan's prediction.
pub async fn predict(
    State(state): State<AppState>,
    Path(path): Path<ScanPath>,
) -> ApiResult<Json<PredictionOutcome>> {
    let identity = ScanIdentity::from(path);
    let inference = state.inference.clone();

    let outcome = run_detached(async move { inference.predict(&identity).await }).await?;

    Ok(Json(outcome))
}

/// POST /scans/:owner_id/:scan_type/:custom_name/feedback
pub async fn record_feedback(
    State(state): State<AppState>,
    Path(path): Path<ScanPath>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> ApiResult<Json<FeedbackResponse>> {
    let Json(request) = payload?;
    let identity = ScanIdentity::from(path);
    let value = request
        .feedback
        .ok_or_else(|| ApiError::BadRequest("Missing feedback".to_string()))?;

    let feedback = state.feedback.record(&identity, &value).await?;

    Ok(Json(FeedbackResponse {
        feedback,
        message: "Feedback saved successfully".to_string(),
    }))
}

/// GET /scans/:owner_id/:scan_type/:custom_name
pub async fn get_scan(
    State(state): State<AppState>,
    Path(path): Path<ScanPath>,
) -> ApiResult<Json<ScanResponse>> {
    let identity = ScanIdentity::from(path);
    let scan = crate::db::scans::find_scan(&state.db, &identity)
        .await?
        .ok_or_else(|| ApiError::NotFound("Scan not found".to_string()))?;

    Ok(Json(ScanResponse { scan }))
}

pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scans/:owner_id/:scan_type/:custom_name", get(get_scan))
        .route(
            "/scans/:owner_id/:scan_type/:custom_name/ai/predict",
            post(predict),
        )
        .route(
            "/scans/:owner_id/:scan_type/:custom_name/feedback",
            post(record_feedback),
        )
}
