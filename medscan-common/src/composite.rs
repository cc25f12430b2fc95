//! Mask compositing
//!
//! Overlays the boundary of a drawn region onto the source scan. The mask is
//! drawn at display resolution, so it is first resampled (nearest neighbour,
//! keeping the mask binary) to the scan's native resolution.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

/// Boundary color painted around the marked region
pub const BOUNDARY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Boundary thickness in source pixels
pub const BOUNDARY_THICKNESS: u32 = 2;

/// Binarize a mask: foreground where alpha > 0 and any color channel > 0
pub fn binarize_mask(mask: &DynamicImage) -> GrayImage {
    let rgba = mask.to_rgba8();
    let mut out = GrayImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let on = a > 0 && (r > 0 || g > 0 || b > 0);
        out.put_pixel(x, y, Luma([if on { 255 } else { 0 }]));
    }
    out
}

/// Resample a binary mask to `width` x `height` without introducing grey levels
pub fn fit_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    imageops::resize(mask, width, height, FilterType::Nearest)
}

/// Composite `mask` onto `source`, returning the annotated image
pub fn composite(source: &DynamicImage, mask: &DynamicImage) -> RgbImage {
    let mut out = source.to_rgb8();
    let (width, height) = out.dimensions();
    let binary = fit_mask(&binarize_mask(mask), width, height);

    let edges = boundary(&binary);
    let reach = (BOUNDARY_THICKNESS / 2) as i64;
    for (x, y) in edges {
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx >= 0 && ny >= 0 && (nx as u32) < width && (ny as u32) < height {
                    out.put_pixel(nx as u32, ny as u32, BOUNDARY_COLOR);
                }
            }
        }
    }
    out
}

/// Foreground pixels with a background (or out-of-image) 4-neighbour
fn boundary(mask: &GrayImage) -> Vec<(u32, u32)> {
    let (width, height) = mask.dimensions();
    let is_on = |x: i64, y: i64| -> bool {
        x >= 0
            && y >= 0
            && (x as u32) < width
            && (y as u32) < height
            && mask.get_pixel(x as u32, y as u32)[0] > 0
    };

    let mut edges = Vec::new();
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            if !is_on(x, y) {
                continue;
            }
            let interior =
                is_on(x - 1, y) && is_on(x + 1, y) && is_on(x, y - 1) && is_on(x, y + 1);
            if !interior {
                edges.push((x as u32, y as u32));
            }
        }
    }
    edges
}
