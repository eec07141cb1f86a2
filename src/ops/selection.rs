// ============================================================================
// SELECTION — rectangle / ellipse regions extracted from a layer's pixels
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::buffer::{Channels, PixelBuffer};
use crate::canvas::Layer;
use crate::error::EngineError;

/// Subsamples per axis when estimating ellipse edge coverage.
const EDGE_SUBSAMPLES: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionShape {
    #[default]
    Rect,
    Ellipse,
}

/// A region in the layer's own pixel space.  Transient: built, consumed by
/// `SelectionEngine::select`, and dropped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionRegion {
    pub shape: SelectionShape,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SelectionRegion {
    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            shape: SelectionShape::Rect,
            x,
            y,
            width,
            height,
        }
    }

    pub fn ellipse(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            shape: SelectionShape::Ellipse,
            x,
            y,
            width,
            height,
        }
    }

    /// Map a canvas-space rectangle into `layer`'s local space.  The full
    /// transform is inverted; the result is the local bounding box of the
    /// four mapped corners.
    pub fn from_canvas_rect(
        layer: &Layer,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        shape: SelectionShape,
    ) -> Self {
        let corners = [
            layer.to_local(x, y),
            layer.to_local(x + width, y),
            layer.to_local(x, y + height),
            layer.to_local(x + width, y + height),
        ];
        let (x0, y0, x1, y1) = corners.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(x0, y0, x1, y1), &(lx, ly)| (x0.min(lx), y0.min(ly), x1.max(lx), y1.max(ly)),
        );
        Self {
            shape,
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Pixel rectangle covered by the region, clamped to `w`×`h`.  `None`
    /// when the intersection is empty.
    pub fn pixel_bounds(&self, w: u32, h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(w as f32);
        let y1 = (self.y + self.height).ceil().min(h as f32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct SelectionEngine;

impl SelectionEngine {
    /// Extract the pixels under `region`.  Rectangles are a straight crop of
    /// the clamped bounds.  Ellipses return their clamped bounding box as
    /// RGBA with alpha scaled by anti-aliased coverage.
    pub fn select(layer: &Layer, region: &SelectionRegion) -> Result<PixelBuffer, EngineError> {
        if layer.locked {
            return Err(EngineError::PermissionDenied(layer.name.clone()));
        }
        let finite = [region.x, region.y, region.width, region.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || region.width <= 0.0 || region.height <= 0.0 {
            return Err(EngineError::InvalidSelection(format!(
                "degenerate region {}x{}",
                region.width, region.height
            )));
        }

        let (bx, by, bw, bh) = region
            .pixel_bounds(layer.width(), layer.height())
            .ok_or_else(|| {
                EngineError::InvalidSelection(format!(
                    "region at ({}, {}) does not overlap layer '{}'",
                    region.x, region.y, layer.name
                ))
            })?;

        let cropped = layer.buffer.crop(bx, by, bw, bh)?;
        match region.shape {
            SelectionShape::Rect => Ok(cropped),
            SelectionShape::Ellipse => Ok(mask_ellipse(&cropped, region, bx, by)),
        }
    }
}

/// Multiply alpha by the fraction of each pixel covered by the ellipse.
fn mask_ellipse(cropped: &PixelBuffer, region: &SelectionRegion, ox: u32, oy: u32) -> PixelBuffer {
    use rayon::prelude::*;

    let (w, h) = cropped.dimensions();
    let mut rgba = cropped.to_rgba_f32();
    let cx = region.x + region.width * 0.5;
    let cy = region.y + region.height * 0.5;
    let rx = region.width * 0.5;
    let ry = region.height * 0.5;
    let n = EDGE_SUBSAMPLES;
    let step = 1.0 / n as f32;

    rgba.par_chunks_mut(w as usize * 4)
        .enumerate()
        .for_each(|(row, line)| {
            let py = (oy + row as u32) as f32;
            for x in 0..w as usize {
                let px = (ox + x as u32) as f32;
                let mut inside = 0u32;
                for sy in 0..n {
                    let dy = (py + (sy as f32 + 0.5) * step - cy) / ry;
                    for sx in 0..n {
                        let dx = (px + (sx as f32 + 0.5) * step - cx) / rx;
                        if dx * dx + dy * dy <= 1.0 {
                            inside += 1;
                        }
                    }
                }
                line[x * 4 + 3] *= inside as f32 / (n * n) as f32;
            }
        });

    PixelBuffer::from_rgba_f32(w, h, Channels::Rgba, cropped.depth(), &rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(w: u32, h: u32) -> Layer {
        Layer::new("src", PixelBuffer::filled(w, h, [200, 100, 50, 255]))
    }

    #[test]
    fn partial_rect_is_clamped() {
        let out = SelectionEngine::select(&layer(10, 10), &SelectionRegion::rect(6.0, -2.0, 8.0, 5.0)).unwrap();
        assert_eq!(out.dimensions(), (4, 3));
    }

    #[test]
    fn ellipse_centre_opaque_corner_clear() {
        let out = SelectionEngine::select(&layer(20, 20), &SelectionRegion::ellipse(0.0, 0.0, 20.0, 20.0)).unwrap();
        assert_eq!(out.pixel_rgba8(10, 10)[3], 255);
        assert_eq!(out.pixel_rgba8(0, 0)[3], 0);
    }

    #[test]
    fn ellipse_edge_is_partial() {
        let out = SelectionEngine::select(&layer(20, 20), &SelectionRegion::ellipse(0.0, 0.0, 20.0, 20.0)).unwrap();
        let partial = (0..20).any(|x| {
            let a = out.pixel_rgba8(x, 3)[3];
            a > 0 && a < 255
        });
        assert!(partial);
    }

    #[test]
    fn canvas_rect_maps_through_scale() {
        let mut l = layer(10, 10);
        l.transform.x = 100.0;
        l.transform.scale_x = 2.0;
        let r = SelectionRegion::from_canvas_rect(&l, 104.0, 0.0, 8.0, 4.0, SelectionShape::Rect);
        assert_eq!((r.x, r.width, r.height), (2.0, 4.0, 4.0));
    }

    #[test]
    fn canvas_rect_maps_through_rotation() {
        let mut l = layer(10, 10);
        l.transform.rotation = 90.0;
        // The canvas top-left quarter is the layer's bottom-left quarter.
        let r = SelectionRegion::from_canvas_rect(&l, 0.0, 0.0, 5.0, 5.0, SelectionShape::Rect);
        for (got, want) in [(r.x, 0.0), (r.y, 5.0), (r.width, 5.0), (r.height, 5.0)] {
            assert!((got - want).abs() < 1e-3, "{:?}", r);
        }
    }
}
