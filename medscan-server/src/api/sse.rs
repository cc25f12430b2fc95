//! Server-Sent Events for scan state changes

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams `PredictionUpdated`, `FeedbackRecorded` and `AnnotationCreated`
/// events, each as JSON under its event name.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    medscan_common::sse::create_scan_event_stream(&state.event_bus, "medscan-server")
}
