// ============================================================================
// COMPOSITION PIPELINE — adjustments + painter's-algorithm blend to one buffer
// ============================================================================
//
// Layers are visited strictly back-to-front.  Each visible layer has its
// adjustment queue applied through the AdjustmentEngine, is mapped into
// canvas space (exact copy for whole-pixel offsets, bilinear otherwise) and
// blended into a normalized RGBA accumulator the size of the canvas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use crate::blend::blend_pixel;
use crate::buffer::{Channels, ColorDepth, PixelBuffer};
use crate::cancel::CancellationToken;
use crate::canvas::{Layer, LayerId, LayerStack};
use crate::error::EngineError;
use crate::ops::adjustments::{Adjustment, AdjustmentEngine};

/// Adjusted pixels of one layer, valid while the layer still holds the same
/// storage and the same adjustment queue.
struct CachedLayer {
    source: PixelBuffer,
    adjustments: Vec<Adjustment>,
    result: PixelBuffer,
}

pub struct CompositionPipeline {
    engine: Arc<AdjustmentEngine>,
    cache: Mutex<HashMap<LayerId, CachedLayer>>,
    pub output_depth: ColorDepth,
}

impl CompositionPipeline {
    pub fn new(engine: Arc<AdjustmentEngine>) -> Self {
        Self {
            engine,
            cache: Mutex::new(HashMap::new()),
            output_depth: ColorDepth::U8,
        }
    }

    pub fn with_output_depth(mut self, depth: ColorDepth) -> Self {
        self.output_depth = depth;
        self
    }

    pub fn engine(&self) -> &AdjustmentEngine {
        &self.engine
    }

    /// Drop every cached adjusted layer.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn render(&self, stack: &LayerStack) -> Result<PixelBuffer, EngineError> {
        self.render_with_cancel(stack, &CancellationToken::new())
    }

    /// Composite the stack into an RGBA buffer of the canvas size.  On
    /// cancellation nothing is returned and the cache keeps its prior state
    /// for layers that were not reached.
    pub fn render_with_cancel(
        &self,
        stack: &LayerStack,
        cancel: &CancellationToken,
    ) -> Result<PixelBuffer, EngineError> {
        let (cw, ch) = (stack.width() as usize, stack.height() as usize);
        let mut acc = vec![0.0f32; cw * ch * 4];

        for layer in stack.iter() {
            if !layer.visible || layer.opacity <= 0.0 || layer.buffer.is_empty() {
                continue;
            }
            cancel.check()?;
            let adjusted = self.adjusted_pixels(layer, cancel)?;
            composite_layer(&mut acc, cw, ch, layer, &adjusted, cancel)?;
        }

        self.lock_cache().retain(|id, _| stack.contains(*id));

        Ok(PixelBuffer::from_rgba_f32(
            stack.width(),
            stack.height(),
            Channels::Rgba,
            self.output_depth,
            &acc,
        ))
    }

    /// Layer pixels with its adjustment queue applied, from the cache when
    /// neither the pixels nor the queue changed since the last render.
    fn adjusted_pixels(&self, layer: &Layer, cancel: &CancellationToken) -> Result<PixelBuffer, EngineError> {
        if layer.adjustments.is_empty() {
            return Ok(layer.buffer.clone());
        }
        if let Some(hit) = self.lock_cache().get(&layer.id()) {
            if hit.source.shares_storage(&layer.buffer) && hit.adjustments == layer.adjustments {
                return Ok(hit.result.clone());
            }
        }

        let result = self.engine.apply_all(&layer.buffer, &layer.adjustments, cancel)?;
        self.lock_cache().insert(
            layer.id(),
            CachedLayer {
                source: layer.buffer.clone(),
                adjustments: layer.adjustments.clone(),
                result: result.clone(),
            },
        );
        Ok(result)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<LayerId, CachedLayer>> {
        // The cache holds no invariants a panicking writer could break.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Blend one layer's (already adjusted) pixels into the accumulator.
fn composite_layer(
    acc: &mut [f32],
    cw: usize,
    ch: usize,
    layer: &Layer,
    pixels: &PixelBuffer,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    if cw == 0 || ch == 0 {
        return Ok(());
    }
    let (lw, lh) = (pixels.width() as usize, pixels.height() as usize);
    let src = pixels.to_rgba_f32();
    let mode = layer.blend_mode;
    let opacity = layer.opacity;

    let (min_x, min_y, max_x, max_y) = layer.canvas_bounds();
    let y0 = min_y.floor().max(0.0) as usize;
    let y1 = (max_y.ceil().max(0.0) as usize).min(ch);
    let x0 = min_x.floor().max(0.0) as usize;
    let x1 = (max_x.ceil().max(0.0) as usize).min(cw);
    if x0 >= x1 || y0 >= y1 {
        return Ok(());
    }

    if layer.transform.is_integer_translation() {
        let ox = layer.transform.x as i64;
        let oy = layer.transform.y as i64;
        return acc
            .par_chunks_mut(cw * 4)
            .enumerate()
            .skip(y0)
            .take(y1 - y0)
            .try_for_each(|(y, row)| {
                cancel.check()?;
                let ly = (y as i64 - oy) as usize;
                for x in x0..x1 {
                    let lx = (x as i64 - ox) as usize;
                    let i = (ly * lw + lx) * 4;
                    let top = [src[i], src[i + 1], src[i + 2], src[i + 3]];
                    let dst = &mut row[x * 4..x * 4 + 4];
                    let out = blend_pixel([dst[0], dst[1], dst[2], dst[3]], top, mode, opacity);
                    dst.copy_from_slice(&out);
                }
                Ok(())
            });
    }

    acc.par_chunks_mut(cw * 4)
        .enumerate()
        .skip(y0)
        .take(y1 - y0)
        .try_for_each(|(y, row)| {
            cancel.check()?;
            for x in x0..x1 {
                // Pixel centres map to pixel centres.
                let (lx, ly) = layer.to_local(x as f32 + 0.5, y as f32 + 0.5);
                if lx < 0.0 || ly < 0.0 || lx >= lw as f32 || ly >= lh as f32 {
                    continue;
                }
                let top = sample_bilinear(&src, lw, lh, lx - 0.5, ly - 0.5);
                let dst = &mut row[x * 4..x * 4 + 4];
                let out = blend_pixel([dst[0], dst[1], dst[2], dst[3]], top, mode, opacity);
                dst.copy_from_slice(&out);
            }
            Ok(())
        })
}

/// Bilinear sample of normalized RGBA with clamped edges.
fn sample_bilinear(src: &[f32], w: usize, h: usize, x: f32, y: f32) -> [f32; 4] {
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let (xi, yi) = (x.floor() as usize, y.floor() as usize);
    let (xn, yn) = ((xi + 1).min(w - 1), (yi + 1).min(h - 1));
    let (fx, fy) = (x - xi as f32, y - yi as f32);

    let px = |px: usize, py: usize| {
        let i = (py * w + px) * 4;
        [src[i], src[i + 1], src[i + 2], src[i + 3]]
    };
    let (a, b, c, d) = (px(xi, yi), px(xn, yi), px(xi, yn), px(xn, yn));
    let mut out = [0.0f32; 4];
    for k in 0..4 {
        let top = a[k] + (b[k] - a[k]) * fx;
        let bottom = c[k] + (d[k] - c[k]) * fx;
        out[k] = top + (bottom - top) * fy;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Transform;

    #[test]
    fn bilinear_midpoint() {
        let src = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let p = sample_bilinear(&src, 2, 1, 0.5, 0.0);
        assert!((p[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn scaled_layer_covers_scaled_area() {
        let mut stack = LayerStack::new(8, 8).unwrap();
        let mut layer = Layer::new("dot", PixelBuffer::filled(2, 2, [255, 255, 255, 255])).with_transform(Transform {
            scale_x: 2.0,
            scale_y: 2.0,
            ..Transform::default()
        });
        layer.set_id(stack.allocate_id());
        stack.insert(0, layer).unwrap();

        let out = CompositionPipeline::new(Arc::new(AdjustmentEngine::cpu_only()))
            .render(&stack)
            .unwrap();
        assert_eq!(out.pixel_rgba8(3, 3), [255, 255, 255, 255]);
        assert_eq!(out.pixel_rgba8(4, 4)[3], 0);
    }

    #[test]
    fn cache_reused_until_adjustments_change() {
        let mut stack = LayerStack::new(4, 4).unwrap();
        let mut layer = Layer::new("l", PixelBuffer::filled(4, 4, [100, 100, 100, 255]))
            .with_adjustment(Adjustment::brightness_contrast(0.2, 1.0));
        layer.set_id(stack.allocate_id());
        let id = stack.insert(0, layer).unwrap();

        let pipeline = CompositionPipeline::new(Arc::new(AdjustmentEngine::cpu_only()));
        let first = pipeline.render(&stack).unwrap();
        assert_eq!(pipeline.render(&stack).unwrap(), first);

        stack.layer_mut(id).unwrap().adjustments.clear();
        assert_eq!(pipeline.render(&stack).unwrap().pixel_rgba8(0, 0), [100, 100, 100, 255]);
    }
}
