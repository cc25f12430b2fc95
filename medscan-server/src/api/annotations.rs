//! Annotation endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use medscan_common::{Annotation, ScanIdentity};
use serde::{Deserialize, Serialize};

use super::{files_base_url, run_detached, ScanPath};
use crate::services::AnnotationView;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotateRequest {
    #[serde(default)]
    pub mask_data: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnnotateResponse {
    pub success: bool,
    pub message: String,
    pub annotation: Annotation,
}

#[derive(Debug, Serialize)]
pub struct GetAnnotationResponse {
    pub annotation: Option<AnnotationView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// POST /annotations/:owner_id/:scan_type/:custom_name/annotate
///
/// Body: `{"maskData": "data:image/png;base64,...", "remarks": "..."}`
pub async fn annotate(
    State(state): State<AppState>,
    Path(path): Path<ScanPath>,
    payload: Result<Json<AnnotateRequest>, JsonRejection>,
) -> ApiResult<Json<AnnotateResponse>> {
    let Json(request) = payload?;
    let identity = ScanIdentity::from(path);
    let pipeline = state.annotations.clone();
    let mask_data = request.mask_data.unwrap_or_default();
    let remarks = request.remarks;

    let annotation = run_detached(async move {
        pipeline.submit(&identity, &mask_data, remarks).await
    })
    .await?;

    Ok(Json(AnnotateResponse {
        success: true,
        message: "Annotation saved successfully".to_string(),
        annotation,
    }))
}

/// GET /annotations/:owner_id/:scan_type/:custom_name
///
/// `{"annotation": null}` when the scan has not been annotated.
pub async fn get_annotation(
    State(state): State<AppState>,
    Path(path): Path<ScanPath>,
    headers: HeaderMap,
) -> ApiResult<Json<GetAnnotationResponse>> {
    let identity = ScanIdentity::from(path);
    let base_url = files_base_url(&state, &headers);

    let annotation = state.annotations.get(&identity, &base_url).await?;
    let message = annotation
        .is_none()
        .then(|| "No annotation found".to_string());

    Ok(Json(GetAnnotationResponse {
        annotation,
        message,
    }))
}

pub fn annotation_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/annotations/:owner_id/:scan_type/:custom_name",
            get(get_annotation),
        )
        .route(
            "/annotations/:owner_id/:scan_type/:custom_name/annotate",
            post(annotate),
        )
}
