//! Health check endpoint
//!
//! Reports build identity and checks the two things every request depends
//! on: the scan database and the artifact root. Either check failing turns the
//! response into `503` with `status: "degraded"`.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub build: BuildInfo,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
    /// Connected `/events` listeners
    pub event_subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub git_hash: &'static str,
    pub profile: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub database: CheckStatus,
    pub storage: CheckStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Unavailable,
}

async fn check_database(state: &AppState) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scans")
        .fetch_one(&state.db)
        .await
    {
        Ok(_) => CheckStatus::Ok,
        Err(e) => {
            warn!(error = %e, "Health: database check failed");
            CheckStatus::Unavailable
        }
    }
}

async fn check_storage(state: &AppState) -> CheckStatus {
    match tokio::fs::metadata(state.paths.root()).await {
        Ok(meta) if meta.is_dir() => CheckStatus::Ok,
        Ok(_) => {
            warn!(root = %state.paths.root().display(), "Health: storage root is not a directory");
            CheckStatus::Unavailable
        }
        Err(e) => {
            warn!(root = %state.paths.root().display(), error = %e, "Health: storage root unreachable");
            CheckStatus::Unavailable
        }
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let checks = HealthChecks {
        database: check_database(&state).await,
        storage: check_storage(&state).await,
    };
    let healthy = checks.database == CheckStatus::Ok && checks.storage == CheckStatus::Ok;

    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        module: "medscan-server",
        version: env!("CARGO_PKG_VERSION"),
        build: BuildInfo {
            git_hash: env!("GIT_HASH"),
            profile: env!("BUILD_PROFILE"),
        },
        uptime_seconds,
        checks,
        event_subscribers: state.event_bus.subscriber_count(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
