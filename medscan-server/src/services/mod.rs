//! Scan workflow services

pub mod annotation;
pub mod feedback;
pub mod inference;
pub mod scan_locks;

pub use annotation::{AnnotationPipeline, AnnotationView};
pub use feedback::FeedbackRecorder;
pub use inference::{InferenceOrchestrator, PredictionOutcome};
