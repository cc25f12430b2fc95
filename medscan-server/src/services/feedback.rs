//! Clinician feedback on predictions

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use medscan_common::events::{EventBus, ScanEvent};
use medscan_common::{Error, Feedback, Result, ScanIdentity};

use crate::db::scans;

pub struct FeedbackRecorder {
    db: SqlitePool,
    events: EventBus,
}

impl FeedbackRecorder {
    pub fn new(db: SqlitePool, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Overwrite the feedback on a scan's prediction
    ///
    /// Accepts `Right`, `Wrong` or `Not sure`. Feedback against a scan that
    /// has never been classified is allowed.
    pub async fn record(&self, identity: &ScanIdentity, value: &str) -> Result<Feedback> {
        let feedback = Feedback::parse_recordable(value)?;

        if !scans::update_feedback(&self.db, identity, feedback).await? {
            return Err(Error::NotFound("Scan not found".to_string()));
        }

        info!(scan = %identity, feedback = feedback.as_str(), "Feedback recorded");

        self.events.emit(ScanEvent::FeedbackRecorded {
            identity: identity.clone(),
            feedback,
            timestamp: Utc::now(),
        });

        Ok(feedback)
    }
}
