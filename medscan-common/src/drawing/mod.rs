//! Freehand drawing surface for region-of-interest masks
//!
//! The surface is a transparent raster laid over the displayed (possibly
//! scaled) scan image. Pointer positions arrive in viewport coordinates and
//! are mapped into surface-local coordinates by subtracting the surface's
//! on-screen offset. Strokes are rendered at the *displayed* resolution; the
//! compositor resamples the mask to the scan's native resolution.

mod session;

pub use session::{
    AnnotationSubmission, OverlaySource, SessionError, ViewSignal, ViewToggle, ViewerSession,
};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

use crate::{Error, Result};

/// Stroke width in surface pixels
pub const STROKE_WIDTH: f64 = 3.0;

/// Spacing between stamped discs along a segment
const STAMP_STEP: f64 = 0.5;

/// A position in viewport (client) coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportPoint {
    pub x: f64,
    pub y: f64,
}

impl ViewportPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A position in surface-local coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub x: f64,
    pub y: f64,
}

/// Raw pointer input from mouse or touch
#[derive(Debug, Clone, PartialEq)]
pub enum PointerInput {
    Mouse(ViewportPoint),
    /// Active touch points; only the first one draws
    Touch(Vec<ViewportPoint>),
}

impl PointerInput {
    fn primary(&self) -> Option<ViewportPoint> {
        match self {
            PointerInput::Mouse(p) => Some(*p),
            PointerInput::Touch(points) => points.first().copied(),
        }
    }
}

/// On-screen placement and size of the displayed image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl SurfaceGeometry {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Result<Self> {
        let all_finite = [left, top, width, height].iter().all(|v| v.is_finite());
        if !all_finite || width < 1.0 || height < 1.0 {
            return Err(Error::InvalidInput(format!(
                "Invalid surface geometry {}x{} at ({}, {})",
                width, height, left, top
            )));
        }
        Ok(Self {
            left,
            top,
            width,
            height,
        })
    }

    /// Translate a viewport position into surface-local coordinates
    pub fn to_surface(&self, point: ViewportPoint) -> SurfacePoint {
        SurfacePoint {
            x: point.x - self.left,
            y: point.y - self.top,
        }
    }

    pub fn contains(&self, point: SurfacePoint) -> bool {
        point.x >= 0.0 && point.y >= 0.0 && point.x < self.width && point.y < self.height
    }

    /// Raster size of the surface in whole pixels
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            self.width.round().max(1.0) as u32,
            self.height.round().max(1.0) as u32,
        )
    }
}

/// Fixed stroke color palette
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrokeColor {
    /// Translucent red, the initial color
    #[default]
    Red,
    Green,
    Blue,
    Yellow,
}

impl StrokeColor {
    pub const PALETTE: [StrokeColor; 4] = [
        StrokeColor::Red,
        StrokeColor::Green,
        StrokeColor::Blue,
        StrokeColor::Yellow,
    ];

    pub fn rgba(&self) -> Rgba<u8> {
        match self {
            StrokeColor::Red => Rgba([255, 0, 0, 153]),
            StrokeColor::Green => Rgba([0, 128, 0, 255]),
            StrokeColor::Blue => Rgba([0, 0, 255, 255]),
            StrokeColor::Yellow => Rgba([255, 255, 0, 255]),
        }
    }
}

/// A connected polyline drawn with one color
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub color: StrokeColor,
    pub points: Vec<SurfacePoint>,
}

/// Freehand drawing surface
#[derive(Debug, Clone)]
pub struct DrawingSurface {
    geometry: SurfaceGeometry,
    color: StrokeColor,
    strokes: Vec<Stroke>,
    pointer_down: bool,
}

impl DrawingSurface {
    pub fn new(geometry: SurfaceGeometry) -> Self {
        Self {
            geometry,
            color: StrokeColor::default(),
            strokes: Vec::new(),
            pointer_down: false,
        }
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    pub fn color(&self) -> StrokeColor {
        self.color
    }

    /// Select the color for subsequent strokes
    pub fn set_color(&mut self, color: StrokeColor) {
        self.color = color;
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_drawing(&self) -> bool {
        self.pointer_down
    }

    /// True when nothing visible has been drawn
    pub fn is_empty(&self) -> bool {
        self.strokes.iter().all(|s| s.points.len() < 2)
    }

    /// Start a new stroke at the pointer position
    pub fn pointer_down(&mut self, input: &PointerInput) {
        let Some(point) = input.primary() else {
            return;
        };
        self.pointer_down = true;
        self.strokes.push(Stroke {
            color: self.color,
            points: vec![self.geometry.to_surface(point)],
        });
    }

    /// Extend the current stroke; ignored unless the pointer is down
    pub fn pointer_move(&mut self, input: &PointerInput) {
        if !self.pointer_down {
            return;
        }
        let Some(point) = input.primary() else {
            return;
        };
        let mapped = self.geometry.to_surface(point);
        if let Some(stroke) = self.strokes.last_mut() {
            stroke.points.push(mapped);
        }
    }

    pub fn pointer_up(&mut self) {
        self.pointer_down = false;
    }

    /// Discard all strokes
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.pointer_down = false;
    }

    /// Follow a layout change of the displayed image; clears the surface
    pub fn resize(&mut self, geometry: SurfaceGeometry) {
        self.geometry = geometry;
        self.clear();
    }

    /// Render all strokes on a transparent raster at displayed resolution
    pub fn rasterize(&self) -> RgbaImage {
        let (width, height) = self.geometry.pixel_size();
        let mut canvas = RgbaImage::new(width, height);
        let radius = STROKE_WIDTH / 2.0;

        for stroke in &self.strokes {
            // Coverage is collected per stroke so self-overlap blends once
            let mut coverage = vec![false; (width as usize) * (height as usize)];
            for pair in stroke.points.windows(2) {
                stamp_segment(&mut coverage, width, height, pair[0], pair[1], radius);
            }

            let color = stroke.color.rgba();
            for (idx, covered) in coverage.iter().enumerate() {
                if *covered {
                    let x = (idx % width as usize) as u32;
                    let y = (idx / width as usize) as u32;
                    let blended = blend_over(*canvas.get_pixel(x, y), color);
                    canvas.put_pixel(x, y, blended);
                }
            }
        }

        canvas
    }

    /// Encode the rasterized surface as PNG
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.rasterize()
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| Error::Internal(format!("PNG encode failed: {}", e)))?;
        Ok(buf)
    }

    /// Serialize the surface as a `data:image/png;base64,` URL
    pub fn to_data_url(&self) -> Result<String> {
        let png = self.to_png_bytes()?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
    }
}

/// Mark pixels within `radius` of the segment `a`-`b` (round caps)
fn stamp_segment(
    coverage: &mut [bool],
    width: u32,
    height: u32,
    a: SurfacePoint,
    b: SurfacePoint,
    radius: f64,
) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length = (dx * dx + dy * dy).sqrt();
    let steps = ((length / STAMP_STEP).ceil() as usize).max(1);

    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        stamp_disc(coverage, width, height, a.x + dx * t, a.y + dy * t, radius);
    }
}

fn stamp_disc(coverage: &mut [bool], width: u32, height: u32, cx: f64, cy: f64, radius: f64) {
    let min_x = (cx - radius).floor().max(0.0) as i64;
    let min_y = (cy - radius).floor().max(0.0) as i64;
    let max_x = ((cx + radius).ceil() as i64).min(width as i64 - 1);
    let max_y = ((cy + radius).ceil() as i64).min(height as i64 - 1);
    let r2 = radius * radius;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let px = x as f64 + 0.5 - cx;
            let py = y as f64 + 0.5 - cy;
            if px * px + py * py <= r2 {
                coverage[(y as usize) * (width as usize) + x as usize] = true;
            }
        }
    }
}

/// Source-over alpha compositing of `src` onto `dst`
fn blend_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f64 / 255.0;
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let value = (src[c] as f64 * sa + dst[c] as f64 * da * (1.0 - sa)) / out_a;
        out[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Decoded `data:` URL payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    /// Parse `data:<mime>;base64,<payload>`
    pub fn parse(input: &str) -> Result<Self> {
        let rest = input
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| Error::InvalidInput("Mask data is not a data URL".to_string()))?;

        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| Error::InvalidInput("Mask data URL has no payload".to_string()))?;

        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| Error::InvalidInput("Mask data URL must be base64 encoded".to_string()))?;

        if payload.is_empty() {
            return Err(Error::InvalidInput("Mask data URL payload is empty".to_string()));
        }

        let bytes = BASE64
            .decode(payload.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("Mask data is not valid base64: {}", e)))?;

        Ok(Self {
            mime: mime.to_string(),
            bytes,
        })
    }
}
