//! HTTP API handlers for medscan-server

pub mod annotations;
pub mod health;
pub mod scans;
pub mod sse;

pub use annotations::annotation_routes;
pub use health::health_routes;
pub use scans::scan_routes;
pub use sse::event_stream;

use std::future::Future;

use axum::http::{header::HOST, HeaderMap};
use medscan_common::ScanIdentity;
use serde::Deserialize;
use tracing::error;

use crate::{ApiError, ApiResult, AppState, FILES_MOUNT};

/// `/:owner_id/:scan_type/:custom_name` path segments
#[derive(Debug, Deserialize)]
pub struct ScanPath {
    pub owner_id: String,
    pub scan_type: String,
    pub custom_name: String,
}

impl From<ScanPath> for ScanIdentity {
    fn from(p: ScanPath) -> Self {
        ScanIdentity::new(p.owner_id, p.scan_type, p.custom_name)
    }
}

/// Run a service operation on its own task
///
/// A client that disconnects mid-request drops the handler future; the
/// spawned task still runs the external process to completion and persists
/// the result.
pub(crate) async fn run_detached<F, T>(operation: F) -> ApiResult<T>
where
    F: Future<Output = medscan_common::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            error!("Service task failed: {}", e);
            Err(ApiError::Internal("Internal server error".to_string()))
        }
    }
}

/// Public URL prefix for stored artifacts
///
/// Uses the configured `public_base_url` when present, otherwise the
/// request's `X-Forwarded-Proto` and `Host` headers.
pub(crate) fn files_base_url(state: &AppState, headers: &HeaderMap) -> String {
    let origin = match &state.public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let proto = headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|p| *p == "http" || *p == "https")
                .unwrap_or("http");
            let host = headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .filter(|h| !h.is_empty())
                .unwrap_or("localhost");
            format!("{}://{}", proto, host)
        }
    };
    format!("{}{}", origin, FILES_MOUNT)
}
