//! Scan domain model
//!
//! A scan is identified by `(owner, scan type, custom name)` and carries a
//! [`Prediction`] that is overwritten in place by every classification, and an
//! optional write-once [`Annotation`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Unique identity of a scan record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanIdentity {
    pub owner_id: String,
    pub scan_type: String,
    pub custom_name: String,
}

impl ScanIdentity {
    pub fn new(
        owner_id: impl Into<String>,
        scan_type: impl Into<String>,
        custom_name: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            scan_type: scan_type.into(),
            custom_name: custom_name.into(),
        }
    }
}

impl fmt::Display for ScanIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner_id, self.scan_type, self.custom_name)
    }
}

/// Model verdict stored on a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PredictionResult {
    Normal,
    Abnormal,
    /// Pre-prediction default; never produced by a classification
    #[default]
    Unknown,
}

impl PredictionResult {
    /// Map the winning classifier label to a verdict
    ///
    /// Only a label equal to "normal" (ignoring case) is `Normal`; every other
    /// class is a finding.
    pub fn from_label(label: &str) -> Self {
        if label.eq_ignore_ascii_case("normal") {
            PredictionResult::Normal
        } else {
            PredictionResult::Abnormal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionResult::Normal => "Normal",
            PredictionResult::Abnormal => "Abnormal",
            PredictionResult::Unknown => "Unknown",
        }
    }
}

impl FromStr for PredictionResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Normal" => Ok(PredictionResult::Normal),
            "Abnormal" => Ok(PredictionResult::Abnormal),
            "Unknown" => Ok(PredictionResult::Unknown),
            other => Err(Error::InvalidInput(format!(
                "Unknown prediction result: {}",
                other
            ))),
        }
    }
}

/// Clinician agreement with the current prediction
///
/// Wire values follow the clinician UI: `"Right"`, `"Wrong"`, `"Not sure"`,
/// and `""` for no feedback yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Feedback {
    Right,
    Wrong,
    #[serde(rename = "Not sure", alias = "NotSure")]
    NotSure,
    #[default]
    #[serde(rename = "")]
    Empty,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Right => "Right",
            Feedback::Wrong => "Wrong",
            Feedback::NotSure => "Not sure",
            Feedback::Empty => "",
        }
    }

    /// Parse a value a clinician may record; `Empty` is not recordable
    pub fn parse_recordable(value: &str) -> Result<Self> {
        match value {
            "Right" => Ok(Feedback::Right),
            "Wrong" => Ok(Feedback::Wrong),
            "Not sure" | "NotSure" => Ok(Feedback::NotSure),
            other => Err(Error::InvalidInput(format!(
                "Invalid feedback option: {:?}",
                other
            ))),
        }
    }
}

impl FromStr for Feedback {
    type Err = Error;

    /// Parse any stored value, including the empty default
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Feedback::Empty);
        }
        Feedback::parse_recordable(s)
    }
}

/// Classification state attached to a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Prediction {
    pub result: PredictionResult,
    pub feedback: Feedback,
}

/// Persisted mask + composited overlay for a scan
///
/// Paths are relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub mask_path: String,
    pub processed_path: String,
    pub remarks: String,
    pub created_at: DateTime<Utc>,
}

/// A stored scan with its nested prediction and annotation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    #[serde(flatten)]
    pub identity: ScanIdentity,
    /// Source image, relative to the storage root
    pub file_path: String,
    pub prediction: Prediction,
    pub annotation: Option<Annotation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanRecord {
    pub fn has_annotation(&self) -> bool {
        self.annotation.is_some()
    }
}
