//! Per-viewing-session annotate / overlay state machine
//!
//! Annotating: `Idle -> Drawing` on begin (only while no annotation exists),
//! `Drawing -> Idle(annotated)` once the pipeline accepted the mask, and
//! `Drawing -> Idle` on cancel. Viewing the processed overlay toggles
//! independently between `ViewOff` and `ViewOn`.

use thiserror::Error;

use super::{DrawingSurface, SurfaceGeometry};

/// Session transition errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The scan already carries its (write-once) annotation
    #[error("This scan has already been annotated")]
    AlreadyAnnotated,

    /// Operation requires an active drawing
    #[error("Annotation mode is not active")]
    NotDrawing,

    /// The surface could not be serialized
    #[error("Failed to encode mask: {0}")]
    Encode(String),
}

/// Payload sent to the annotation pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSubmission {
    /// `data:image/png;base64,...` mask at displayed resolution
    pub mask_data: String,
    pub remarks: Option<String>,
}

/// Processed overlay fetched for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySource {
    pub processed_url: String,
    pub remarks: String,
}

/// What the caller must do after a view toggle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewToggle {
    /// Overlay was showing and is now hidden
    Hide,
    /// Fetch the annotation, then report it via `overlay_fetched`
    Fetch,
}

/// Outcome of entering the overlay view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSignal {
    Shown,
    /// No annotation exists; the view stays off
    NothingToShow,
}

#[derive(Debug)]
enum AnnotateState {
    Idle,
    Drawing(DrawingSurface),
}

#[derive(Debug, Default)]
enum OverlayView {
    #[default]
    Off,
    On(OverlaySource),
}

/// Client-side state for one scan viewing session
#[derive(Debug)]
pub struct ViewerSession {
    annotate: AnnotateState,
    annotated: bool,
    view: OverlayView,
}

impl ViewerSession {
    /// Start a session; `has_annotation` comes from the initial annotation lookup
    pub fn new(has_annotation: bool) -> Self {
        Self {
            annotate: AnnotateState::Idle,
            annotated: has_annotation,
            view: OverlayView::Off,
        }
    }

    pub fn is_annotated(&self) -> bool {
        self.annotated
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.annotate, AnnotateState::Drawing(_))
    }

    pub fn is_viewing(&self) -> bool {
        matches!(self.view, OverlayView::On(_))
    }

    pub fn overlay(&self) -> Option<&OverlaySource> {
        match &self.view {
            OverlayView::On(source) => Some(source),
            OverlayView::Off => None,
        }
    }

    /// Enter annotation mode with a surface sized to the displayed image
    ///
    /// Re-entering while already drawing keeps the existing strokes.
    pub fn begin_annotate(&mut self, geometry: SurfaceGeometry) -> Result<(), SessionError> {
        if self.annotated {
            return Err(SessionError::AlreadyAnnotated);
        }
        if !self.is_drawing() {
            self.annotate = AnnotateState::Drawing(DrawingSurface::new(geometry));
        }
        Ok(())
    }

    pub fn surface(&self) -> Option<&DrawingSurface> {
        match &self.annotate {
            AnnotateState::Drawing(surface) => Some(surface),
            AnnotateState::Idle => None,
        }
    }

    pub fn surface_mut(&mut self) -> Option<&mut DrawingSurface> {
        match &mut self.annotate {
            AnnotateState::Drawing(surface) => Some(surface),
            AnnotateState::Idle => None,
        }
    }

    /// Serialize the current drawing for submission
    ///
    /// The session stays in `Drawing` until the pipeline answers; call
    /// [`save_succeeded`](Self::save_succeeded) on success. On failure the
    /// strokes are kept so the clinician can retry or cancel.
    pub fn save(&self, remarks: Option<String>) -> Result<AnnotationSubmission, SessionError> {
        let surface = self.surface().ok_or(SessionError::NotDrawing)?;
        let mask_data = surface
            .to_data_url()
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        let remarks = remarks.filter(|r| !r.trim().is_empty());
        Ok(AnnotationSubmission { mask_data, remarks })
    }

    /// The pipeline persisted the annotation
    pub fn save_succeeded(&mut self) {
        self.annotate = AnnotateState::Idle;
        self.annotated = true;
    }

    /// The pipeline reported that an annotation already exists
    pub fn save_conflicted(&mut self) {
        self.save_succeeded();
    }

    /// Leave annotation mode, discarding the surface
    pub fn cancel(&mut self) {
        self.annotate = AnnotateState::Idle;
    }

    /// Toggle the processed overlay
    pub fn request_view_toggle(&mut self) -> ViewToggle {
        match self.view {
            OverlayView::On(_) => {
                self.view = OverlayView::Off;
                ViewToggle::Hide
            }
            OverlayView::Off => ViewToggle::Fetch,
        }
    }

    /// Report the result of the annotation fetch requested by a toggle
    pub fn overlay_fetched(&mut self, overlay: Option<OverlaySource>) -> ViewSignal {
        match overlay {
            Some(source) => {
                self.annotated = true;
                self.view = OverlayView::On(source);
                ViewSignal::Shown
            }
            None => {
                self.view = OverlayView::Off;
                ViewSignal::NothingToShow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawing::{PointerInput, ViewportPoint};

    fn geometry() -> SurfaceGeometry {
        SurfaceGeometry::new(0.0, 0.0, 64.0, 48.0).unwrap()
    }

    #[test]
    fn test_begin_annotate_blocked_when_annotated() {
        let mut session = ViewerSession::new(true);
        assert_eq!(
            session.begin_annotate(geometry()),
            Err(SessionError::AlreadyAnnotated)
        );
        assert!(!session.is_drawing());
    }

    #[test]
    fn test_draw_save_succeed_cycle() {
        let mut session = ViewerSession::new(false);
        session.begin_annotate(geometry()).unwrap();
        assert!(session.is_drawing());

        let surface = session.surface_mut().unwrap();
        surface.pointer_down(&PointerInput::Mouse(ViewportPoint::new(10.0, 10.0)));
        surface.pointer_move(&PointerInput::Mouse(ViewportPoint::new(30.0, 20.0)));
        surface.pointer_up();

        let submission = session.save(Some("  ".to_string())).unwrap();
        assert!(submission.mask_data.starts_with("data:image/png;base64,"));
        assert_eq!(submission.remarks, None);
        assert!(session.is_drawing());

        session.save_succeeded();
        assert!(!session.is_drawing());
        assert!(session.is_annotated());
        assert_eq!(
            session.begin_annotate(geometry()),
            Err(SessionError::AlreadyAnnotated)
        );
    }

    #[test]
    fn test_cancel_discards_surface() {
        let mut session = ViewerSession::new(false);
        session.begin_annotate(geometry()).unwrap();
        session.cancel();
        assert!(!session.is_drawing());
        assert!(!session.is_annotated());
        assert_eq!(session.save(None), Err(SessionError::NotDrawing));

        // A fresh surface after re-entering
        session.begin_annotate(geometry()).unwrap();
        assert!(session.surface().unwrap().strokes().is_empty());
    }

    #[test]
    fn test_view_toggle_without_annotation_signals_nothing() {
        let mut session = ViewerSession::new(false);
        assert_eq!(session.request_view_toggle(), ViewToggle::Fetch);
        assert_eq!(session.overlay_fetched(None), ViewSignal::NothingToShow);
        assert!(!session.is_viewing());
    }

    #[test]
    fn test_view_toggle_on_and_off() {
        let mut session = ViewerSession::new(true);
        assert_eq!(session.request_view_toggle(), ViewToggle::Fetch);
        let overlay = OverlaySource {
            processed_url: "http://h/files/annotations/x.png".to_string(),
            remarks: "lesion".to_string(),
        };
        assert_eq!(session.overlay_fetched(Some(overlay.clone())), ViewSignal::Shown);
        assert_eq!(session.overlay(), Some(&overlay));

        assert_eq!(session.request_view_toggle(), ViewToggle::Hide);
        assert!(!session.is_viewing());
        assert!(session.overlay().is_none());
    }
}
