//! Inference orchestration
//!
//! Runs the external classifier against a scan's source image, validates the
//! JSON document it prints, derives the binary verdict and persists it.
//!
//! Classifier contract: one argument (absolute image path), one JSON document
//! on stdout of the form
//! `{"probabilities": {"<label>": <0..1>, ...}, "gradcam": "<base64 png>" | null}`.
//! An `error` field in place of probabilities is the classifier's own failure
//! report.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use medscan_common::events::{EventBus, ScanEvent};
use medscan_common::{Error, PredictionResult, Result, ScanIdentity, StoragePathResolver};

use crate::db::scans;
use crate::process::ExternalCommand;

const INVALID_OUTPUT: &str = "Invalid model output";

/// Document printed by the classifier
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierOutput {
    #[serde(default)]
    pub probabilities: BTreeMap<String, f64>,
    #[serde(default)]
    pub gradcam: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Reported by some classifier builds; the verdict is always re-derived
    #[serde(default)]
    pub predicted_class: Option<String>,
}

impl ClassifierOutput {
    /// Parse and validate raw stdout
    pub fn parse(stdout: &[u8]) -> Result<Self> {
        let output: ClassifierOutput = serde_json::from_slice(stdout)
            .map_err(|e| Error::upstream(INVALID_OUTPUT, format!("JSON parse failed: {}", e)))?;
        output.validate()?;
        Ok(output)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(reported) = &self.error {
            return Err(Error::upstream(
                "Classifier reported an error",
                reported.clone(),
            ));
        }

        if self.probabilities.is_empty() {
            return Err(Error::upstream(INVALID_OUTPUT, "empty probabilities map"));
        }

        for (label, p) in &self.probabilities {
            if !p.is_finite() || !(0.0..=1.0).contains(p) {
                return Err(Error::upstream(
                    INVALID_OUTPUT,
                    format!("probability for {:?} out of range: {}", label, p),
                ));
            }
        }

        if let Some(gradcam) = &self.gradcam {
            BASE64.decode(gradcam.as_bytes()).map_err(|e| {
                Error::upstream(INVALID_OUTPUT, format!("gradcam is not base64: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Label with the highest probability
///
/// Ties go to the lexicographically smallest label, so the result does not
/// depend on the order the classifier emitted its keys.
pub fn select_top_label(probabilities: &BTreeMap<String, f64>) -> Option<&str> {
    let mut best: Option<(&str, f64)> = None;
    for (label, &p) in probabilities {
        match best {
            Some((_, best_p)) if p.total_cmp(&best_p).is_le() => {}
            _ => best = Some((label.as_str(), p)),
        }
    }
    best.map(|(label, _)| label)
}

/// Successful classification as returned to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionOutcome {
    pub final_result: PredictionResult,
    pub probabilities: BTreeMap<String, f64>,
    /// Attention heatmap; returned but never persisted
    pub gradcam: Option<String>,
}

/// Classifies scans and persists verdicts
pub struct InferenceOrchestrator {
    db: SqlitePool,
    paths: Arc<StoragePathResolver>,
    classifier: ExternalCommand,
    events: EventBus,
}

impl InferenceOrchestrator {
    pub fn new(
        db: SqlitePool,
        paths: Arc<StoragePathResolver>,
        classifier: ExternalCommand,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            paths,
            classifier,
            events,
        }
    }

    /// Classify a scan, overwrite its prediction and reset feedback
    ///
    /// Concurrent calls for one scan each run to completion; the last
    /// persisted verdict wins.
    pub async fn predict(&self, identity: &ScanIdentity) -> Result<PredictionOutcome> {
        let scan = scans::find_scan(&self.db, identity)
            .await?
            .ok_or_else(|| Error::NotFound("Scan not found".to_string()))?;

        let image_path = self.paths.resolve(&scan.file_path)?;
        if !tokio::fs::try_exists(&image_path).await.unwrap_or(false) {
            return Err(Error::NotFound("Image not found".to_string()));
        }

        info!(scan = %identity, "Running classifier");

        let output = self
            .classifier
            .run_with_retry(&[image_path.as_os_str()])
            .await
            .map_err(|e| e.into_core("Classifier"))?;

        if !output.success() {
            return Err(Error::upstream(
                "Classifier failed",
                format!(
                    "exit {:?} after {} attempt(s): {}",
                    output.status.code(),
                    output.attempts,
                    output.stderr_tail()
                ),
            ));
        }

        if !output.stderr.is_empty() {
            warn!(scan = %identity, stderr = %output.stderr_tail(), "Classifier wrote to stderr");
        }

        let parsed = ClassifierOutput::parse(&output.stdout)?;
        let top = select_top_label(&parsed.probabilities)
            .ok_or_else(|| Error::upstream(INVALID_OUTPUT, "no winning label"))?;
        let final_result = PredictionResult::from_label(top);

        if !scans::update_prediction(&self.db, identity, final_result).await? {
            return Err(Error::NotFound("Scan not found".to_string()));
        }

        info!(
            scan = %identity,
            label = top,
            result = final_result.as_str(),
            elapsed_ms = output.elapsed.as_millis() as u64,
            "Prediction updated"
        );

        self.events.emit(ScanEvent::PredictionUpdated {
            identity: identity.clone(),
            result: final_result,
            timestamp: Utc::now(),
        });

        Ok(PredictionOutcome {
            final_result,
            probabilities: parsed.probabilities,
            gradcam: parsed.gradcam,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_normal_wins() {
        let p = probs(&[("normal", 0.6), ("pneumonia", 0.4)]);
        let top = select_top_label(&p).unwrap();
        assert_eq!(PredictionResult::from_label(top), PredictionResult::Normal);
    }

    #[test]
    fn test_abnormal_wins() {
        let p = probs(&[("normal", 0.2), ("pneumonia", 0.8)]);
        let top = select_top_label(&p).unwrap();
        assert_eq!(top, "pneumonia");
        assert_eq!(PredictionResult::from_label(top), PredictionResult::Abnormal);
    }

    #[test]
    fn test_label_match_is_case_insensitive() {
        let p = probs(&[("NORMAL", 0.9), ("tumor", 0.1)]);
        let top = select_top_label(&p).unwrap();
        assert_eq!(PredictionResult::from_label(top), PredictionResult::Normal);
    }

    #[test]
    fn test_tie_is_deterministic() {
        let p = probs(&[("b", 0.5), ("a", 0.5)]);
        for _ in 0..10 {
            assert_eq!(select_top_label(&p), Some("a"));
        }

        // Insertion order must not matter
        let mut reversed = BTreeMap::new();
        reversed.insert("a".to_string(), 0.5);
        reversed.insert("b".to_string(), 0.5);
        assert_eq!(select_top_label(&reversed), Some("a"));
    }

    #[test]
    fn test_empty_map_has_no_winner() {
        assert_eq!(select_top_label(&BTreeMap::new()), None);
    }

    #[test]
    fn test_parse_accepts_extra_fields() {
        let out = ClassifierOutput::parse(
            br#"{"predicted_class":"normal","probabilities":{"normal":0.7,"pneumonia":0.3},"gradcam":null}"#,
        )
        .unwrap();
        assert_eq!(out.probabilities.len(), 2);
        assert!(out.gradcam.is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for raw in [
            "not json",
            r#"{"probabilities":{}}"#,
            r#"{"probabilities":{"normal":1.5}}"#,
            r#"{"probabilities":{"normal":-0.1}}"#,
            r#"{"probabilities":{"normal":0.5},"gradcam":"***"}"#,
            r#"{"error":"Image not found"}"#,
        ] {
            let err = ClassifierOutput::parse(raw.as_bytes()).unwrap_err();
            assert!(matches!(err, Error::Upstream { .. }), "accepted {:?}", raw);
        }
    }

    #[test]
    fn test_invalid_output_message_is_public() {
        match ClassifierOutput::parse(b"{").unwrap_err() {
            Error::Upstream { message, .. } => assert_eq!(message, "Invalid model output"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
