//! Scan lifecycle events
//!
//! Events are broadcast in-process over a tokio broadcast channel and
//! forwarded to SSE subscribers. Emitting never fails the operation that
//! produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::scan::{Feedback, PredictionResult, ScanIdentity};

/// Events emitted when a scan's persisted state changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// A classification completed and overwrote the prediction
    PredictionUpdated {
        identity: ScanIdentity,
        result: PredictionResult,
        timestamp: DateTime<Utc>,
    },

    /// A clinician recorded agreement with the prediction
    FeedbackRecorded {
        identity: ScanIdentity,
        feedback: Feedback,
        timestamp: DateTime<Utc>,
    },

    /// The write-once annotation was persisted
    AnnotationCreated {
        identity: ScanIdentity,
        processed_path: String,
        timestamp: DateTime<Utc>,
    },
}

impl ScanEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::PredictionUpdated { .. } => "PredictionUpdated",
            ScanEvent::FeedbackRecorded { .. } => "FeedbackRecorded",
            ScanEvent::AnnotationCreated { .. } => "AnnotationCreated",
        }
    }

    pub fn identity(&self) -> &ScanIdentity {
        match self {
            ScanEvent::PredictionUpdated { identity, .. }
            | ScanEvent::FeedbackRecorded { identity, .. }
            | ScanEvent::AnnotationCreated { identity, .. } => identity,
        }
    }
}

/// Broadcast bus for [`ScanEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers
    ///
    /// Returns the number of subscribers that received it. Having no
    /// subscribers is normal and only logged at debug level.
    pub fn emit(&self, event: ScanEvent) -> usize {
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(count) => count,
            Err(_) => {
                tracing::debug!(event_type, "No subscribers for scan event");
                0
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
