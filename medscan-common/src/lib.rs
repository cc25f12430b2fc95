//! # MedScan Common Library
//!
//! Shared code for the MedScan scan lifecycle services including:
//! - Scan domain model (identity, prediction, feedback, annotation)
//! - Storage path resolution and artifact naming
//! - Error taxonomy
//! - Configuration loading
//! - Event bus and SSE helpers
//! - Drawing surface (client-side mask capture) and mask compositing

pub mod composite;
pub mod config;
pub mod drawing;
pub mod error;
pub mod events;
pub mod scan;
pub mod sse;
pub mod storage;

pub use error::{Error, ErrorKind, Result};
pub use scan::{Annotation, Feedback, Prediction, PredictionResult, ScanIdentity, ScanRecord};
pub use storage::StoragePathResolver;
