// ============================================================================
// CANVAS — layers, transforms, and the ordered layer stack
// ============================================================================

use std::collections::HashMap;
use std::fmt;

use crate::blend::BlendMode;
use crate::buffer::PixelBuffer;
use crate::error::EngineError;
use crate::ops::adjustments::Adjustment;

/// Smallest scale factor a layer may take on either axis.
pub const MIN_LAYER_SCALE: f32 = 0.1;

/// Largest canvas (and layer) side in pixels.
pub const MAX_CANVAS_DIM: u32 = 32_768;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) u64);

impl LayerId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// TRANSFORM
// ============================================================================

/// Placement of a layer on the canvas.  `(x, y)` is the top-left corner of
/// the scaled, unrotated layer; rotation (degrees, clockwise) turns the layer
/// about its centre.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub rotation: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
        }
    }
}

impl Transform {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    /// Clamp scale to the supported minimum and wrap rotation into [0, 360).
    pub fn normalized(mut self) -> Self {
        self.scale_x = self.scale_x.max(MIN_LAYER_SCALE);
        self.scale_y = self.scale_y.max(MIN_LAYER_SCALE);
        self.rotation = self.rotation.rem_euclid(360.0);
        self
    }

    /// Whole-pixel offset with no scaling or rotation.
    pub fn is_integer_translation(&self) -> bool {
        self.scale_x == 1.0
            && self.scale_y == 1.0
            && self.rotation.rem_euclid(360.0) == 0.0
            && self.x.fract() == 0.0
            && self.y.fract() == 0.0
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    id: LayerId,
    pub name: String,
    pub buffer: PixelBuffer,
    pub transform: Transform,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub locked: bool,
    /// Non-destructive adjustments applied, in order, at render time.
    pub adjustments: Vec<Adjustment>,
}

impl Layer {
    pub fn new(name: impl Into<String>, buffer: PixelBuffer) -> Self {
        Self {
            id: LayerId(0),
            name: name.into(),
            buffer,
            transform: Transform::default(),
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            locked: false,
            adjustments: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform.normalized();
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_blend_mode(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    pub fn with_adjustment(mut self, adjustment: Adjustment) -> Self {
        self.adjustments.push(adjustment);
        self
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: LayerId) {
        self.id = id;
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// Approximate bytes held by this layer, used for history accounting.
    pub fn memory_size(&self) -> usize {
        self.buffer.memory_size() + self.name.len() + std::mem::size_of::<Self>()
    }

    fn scaled_center(&self) -> (f32, f32) {
        (
            self.width() as f32 * self.transform.scale_x * 0.5,
            self.height() as f32 * self.transform.scale_y * 0.5,
        )
    }

    /// Map a canvas-space point into this layer's pixel space.
    pub fn to_local(&self, cx: f32, cy: f32) -> (f32, f32) {
        let t = &self.transform;
        let (hx, hy) = self.scaled_center();
        let dx = cx - t.x - hx;
        let dy = cy - t.y - hy;
        let (sin, cos) = t.rotation.to_radians().sin_cos();
        let rx = dx * cos + dy * sin;
        let ry = -dx * sin + dy * cos;
        ((rx + hx) / t.scale_x, (ry + hy) / t.scale_y)
    }

    /// Map a point in this layer's pixel space onto the canvas.
    pub fn to_canvas(&self, lx: f32, ly: f32) -> (f32, f32) {
        let t = &self.transform;
        let (hx, hy) = self.scaled_center();
        let px = lx * t.scale_x - hx;
        let py = ly * t.scale_y - hy;
        let (sin, cos) = t.rotation.to_radians().sin_cos();
        (px * cos - py * sin + hx + t.x, px * sin + py * cos + hy + t.y)
    }

    /// Axis-aligned canvas-space bounds `(min_x, min_y, max_x, max_y)`.
    pub fn canvas_bounds(&self) -> (f32, f32, f32, f32) {
        let (w, h) = (self.width() as f32, self.height() as f32);
        let corners = [
            self.to_canvas(0.0, 0.0),
            self.to_canvas(w, 0.0),
            self.to_canvas(0.0, h),
            self.to_canvas(w, h),
        ];
        corners.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        )
    }
}

// ============================================================================
// LAYER STACK
// ============================================================================

/// Back-to-front ordered layers.  `order` and `layers` always hold exactly
/// the same ids.  Mutators are crate-private: outside callers change the
/// stack through `Project`, which records each change in history.
#[derive(Clone, Debug)]
pub struct LayerStack {
    width: u32,
    height: u32,
    order: Vec<LayerId>,
    layers: HashMap<LayerId, Layer>,
    next_id: u64,
}

impl PartialEq for LayerStack {
    // Id allocation state is not part of the document.
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.order == other.order
            && self.layers == other.layers
    }
}

impl LayerStack {
    /// Empty stack for a `width`x`height` canvas.  Both sides must be in
    /// `1..=MAX_CANVAS_DIM`.
    pub fn new(width: u32, height: u32) -> Result<Self, EngineError> {
        check_canvas_size(width, height)?;
        Ok(Self {
            width,
            height,
            order: Vec::new(),
            layers: HashMap::new(),
            next_id: 1,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in back-to-front order.
    pub fn ids(&self) -> &[LayerId] {
        &self.order
    }

    /// Layers in back-to-front order.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.order.iter().filter_map(|id| self.layers.get(id))
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer, EngineError> {
        self.layers.get(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn layer_at(&self, index: usize) -> Result<&Layer, EngineError> {
        let id = self.order.get(index).ok_or(EngineError::OutOfRange {
            index,
            max: self.order.len().saturating_sub(1),
        })?;
        self.layer(*id)
    }

    pub fn index_of(&self, id: LayerId) -> Result<usize, EngineError> {
        self.order
            .iter()
            .position(|l| *l == id)
            .ok_or(EngineError::NotFound(id))
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    /// Order and map agree: same ids, no duplicates.
    pub fn is_consistent(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.order.len());
        self.order.len() == self.layers.len()
            && self.order.iter().all(|id| seen.insert(*id) && self.layers.contains_key(id))
    }

    pub(crate) fn allocate_id(&mut self) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer, EngineError> {
        self.layers.get_mut(&id).ok_or(EngineError::NotFound(id))
    }

    /// Insert at `index` (0 = bottom, `len()` = top).  The layer must carry an
    /// id not already in the stack.
    pub(crate) fn insert(&mut self, index: usize, layer: Layer) -> Result<LayerId, EngineError> {
        if index > self.order.len() {
            return Err(EngineError::OutOfRange {
                index,
                max: self.order.len(),
            });
        }
        let id = layer.id();
        if self.layers.contains_key(&id) {
            return Err(EngineError::InvalidParameter(format!(
                "layer {} is already in the stack",
                id
            )));
        }
        self.next_id = self.next_id.max(id.0 + 1);
        self.order.insert(index, id);
        self.layers.insert(id, layer);
        Ok(id)
    }

    /// Remove and hand back the layer with its former index.
    pub(crate) fn remove(&mut self, id: LayerId) -> Result<(usize, Layer), EngineError> {
        let index = self.index_of(id)?;
        let layer = self.layers.remove(&id).ok_or(EngineError::NotFound(id))?;
        self.order.remove(index);
        Ok((index, layer))
    }

    /// Move a layer to `new_index`; returns its previous index.
    pub(crate) fn move_to(&mut self, id: LayerId, new_index: usize) -> Result<usize, EngineError> {
        let old_index = self.index_of(id)?;
        if new_index >= self.order.len() {
            return Err(EngineError::OutOfRange {
                index: new_index,
                max: self.order.len() - 1,
            });
        }
        let moved = self.order.remove(old_index);
        self.order.insert(new_index, moved);
        Ok(old_index)
    }
}

pub(crate) fn check_canvas_size(width: u32, height: u32) -> Result<(), EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidParameter(format!(
            "canvas size {}x{} has a zero side",
            width, height
        )));
    }
    if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        return Err(EngineError::InvalidParameter(format!(
            "canvas size {}x{} exceeds maximum {}x{}",
            width, height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_size_limits() {
        assert!(LayerStack::new(1, 1).is_ok());
        assert!(LayerStack::new(MAX_CANVAS_DIM, 1).is_ok());
        for (w, h) in [(0, 10), (10, 0), (MAX_CANVAS_DIM + 1, 10), (40_000, 40_000)] {
            let err = LayerStack::new(w, h).unwrap_err();
            assert!(matches!(err, EngineError::InvalidParameter(_)), "{}x{}", w, h);
        }
    }
}
