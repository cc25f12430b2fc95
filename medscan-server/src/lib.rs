//! medscan-server library interface
//!
//! Orchestrates the scan workflow: classification through an external
//! classifier, clinician feedback, and write-once annotation through an
//! external compositor. Exposed as a library so integration tests can drive
//! the router directly.

pub mod api;
pub mod db;
pub mod error;
pub mod process;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use medscan_common::config::TomlConfig;
use medscan_common::events::EventBus;
use medscan_common::StoragePathResolver;

use crate::process::ExternalCommand;
use crate::services::{AnnotationPipeline, FeedbackRecorder, InferenceOrchestrator};

/// Mount point of the read-only artifact file server
pub const FILES_MOUNT: &str = "/files";

/// Capacity of the scan event broadcast channel
pub const EVENT_BUS_CAPACITY: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Scan record store
    pub db: SqlitePool,
    /// Artifact root
    pub paths: Arc<StoragePathResolver>,
    pub inference: Arc<InferenceOrchestrator>,
    pub annotations: Arc<AnnotationPipeline>,
    pub feedback: Arc<FeedbackRecorder>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Origin for artifact URLs; derived from request headers when unset
    pub public_base_url: Option<String>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Request body limit (mask uploads)
    pub max_mask_bytes: usize,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        paths: StoragePathResolver,
        config: &TomlConfig,
        event_bus: EventBus,
    ) -> Self {
        let paths = Arc::new(paths);

        let inference = InferenceOrchestrator::new(
            db.clone(),
            Arc::clone(&paths),
            ExternalCommand::from_config(&config.classifier),
            event_bus.clone(),
        );
        let annotations = AnnotationPipeline::new(
            db.clone(),
            Arc::clone(&paths),
            ExternalCommand::from_config(&config.compositor),
            event_bus.clone(),
        );
        let feedback = FeedbackRecorder::new(db.clone(), event_bus.clone());

        Self {
            db,
            paths,
            inference: Arc::new(inference),
            annotations: Arc::new(annotations),
            feedback: Arc::new(feedback),
            event_bus,
            public_base_url: config.public_base_url.clone(),
            startup_time: Utc::now(),
            max_mask_bytes: config.max_mask_bytes,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let files = ServeDir::new(state.paths.root());
    let body_limit = state.max_mask_bytes;

    Router::new()
        .merge(api::scan_routes())
        .merge(api::annotation_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .nest_service(FILES_MOUNT, files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
