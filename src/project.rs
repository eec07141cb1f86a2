use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blend::BlendMode;
use crate::buffer::PixelBuffer;
use crate::cancel::CancellationToken;
use crate::canvas::{Layer, LayerId, LayerStack, Transform};
use crate::compositor::CompositionPipeline;
use crate::error::EngineError;
use crate::history::{HistoryManager, LayerOpCommand, LayerOperation};
use crate::ops::adjustments::{Adjustment, AdjustmentEngine, BackendPreference};
use crate::ops::denoise::DenoiseStrategy;
use crate::ops::selection::{SelectionEngine, SelectionRegion};
use crate::settings::EngineSettings;

/// Offset applied to a duplicated layer so the copy is visible.
const DUPLICATE_OFFSET: f32 = 20.0;

/// Engine parameters stored with a document.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineParams {
    pub backend: BackendPreference,
    pub default_denoise: DenoiseStrategy,
}

/// Single open document: the layer stack plus the history that records every
/// change made to it.
pub struct Project {
    pub id: Uuid,
    /// Display name; file stem for opened images.
    pub name: String,
    /// `None` for unsaved/untitled files.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    pub params: EngineParams,
    stack: LayerStack,
    history: HistoryManager,
}

impl Project {
    /// Empty document.  Fails with `InvalidParameter` for a zero side or a
    /// side over `MAX_CANVAS_DIM`.
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Result<Self, EngineError> {
        let stack = LayerStack::new(width, height)?;
        Ok(Self::from_stack(name, stack, EngineParams::default()))
    }

    pub(crate) fn from_stack(name: impl Into<String>, stack: LayerStack, params: EngineParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: None,
            is_dirty: false,
            params,
            stack,
            history: HistoryManager::default(),
        }
    }

    /// Apply history limits and engine defaults from settings.
    pub fn apply_settings(&mut self, settings: &EngineSettings) {
        self.history = HistoryManager::new(settings.max_undo_steps)
            .with_memory_limit(settings.history_memory_limit());
        self.params = EngineParams {
            backend: settings.backend,
            default_denoise: settings.default_denoise,
        };
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer, EngineError> {
        self.stack.layer(id)
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    // ========================================================================
    // LAYER OPERATIONS — each one is a single history entry
    // ========================================================================

    fn perform(&mut self, operation: LayerOperation) -> Result<(), EngineError> {
        self.history
            .perform(Box::new(LayerOpCommand::new(operation)), &mut self.stack)?;
        self.mark_dirty();
        Ok(())
    }

    /// Insert `layer` at `index` (0 = bottom, `len` = top) and return its new id.
    pub fn add_layer(&mut self, index: usize, mut layer: Layer) -> Result<LayerId, EngineError> {
        if index > self.stack.len() {
            return Err(EngineError::OutOfRange {
                index,
                max: self.stack.len(),
            });
        }
        let id = self.stack.allocate_id();
        layer.set_id(id);
        layer.transform = layer.transform.normalized();
        layer.opacity = clamp_opacity(layer.opacity)?;
        self.perform(LayerOperation::Add { index, layer })?;
        Ok(id)
    }

    /// Add on top of the stack.
    pub fn push_layer(&mut self, layer: Layer) -> Result<LayerId, EngineError> {
        self.add_layer(self.stack.len(), layer)
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Result<(), EngineError> {
        let index = self.stack.index_of(id)?;
        let layer = self.stack.layer(id)?.clone();
        self.perform(LayerOperation::Remove { index, layer })
    }

    /// Move a layer to `new_index`.  Moving to its current slot records nothing.
    pub fn reorder(&mut self, id: LayerId, new_index: usize) -> Result<(), EngineError> {
        let from = self.stack.index_of(id)?;
        if new_index >= self.stack.len() {
            return Err(EngineError::OutOfRange {
                index: new_index,
                max: self.stack.len() - 1,
            });
        }
        if from == new_index {
            return Ok(());
        }
        self.perform(LayerOperation::Move {
            id,
            from,
            to: new_index,
        })
    }

    pub fn set_visibility(&mut self, id: LayerId, visible: bool) -> Result<(), EngineError> {
        let old = self.stack.layer(id)?.visible;
        self.perform(LayerOperation::Visibility {
            id,
            old,
            new: visible,
        })
    }

    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> Result<(), EngineError> {
        let new = clamp_opacity(opacity)?;
        let old = self.stack.layer(id)?.opacity;
        self.perform(LayerOperation::Opacity { id, old, new })
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<(), EngineError> {
        let old = self.stack.layer(id)?.blend_mode;
        self.perform(LayerOperation::Blend { id, old, new: mode })
    }

    pub fn rename_layer(&mut self, id: LayerId, name: impl Into<String>) -> Result<(), EngineError> {
        let old = self.stack.layer(id)?.name.clone();
        self.perform(LayerOperation::Rename {
            id,
            old,
            new: name.into(),
        })
    }

    pub fn set_locked(&mut self, id: LayerId, locked: bool) -> Result<(), EngineError> {
        let old = self.stack.layer(id)?.locked;
        self.perform(LayerOperation::Lock {
            id,
            old,
            new: locked,
        })
    }

    /// Scale is clamped to the minimum layer scale, rotation wrapped to [0, 360).
    pub fn set_transform(&mut self, id: LayerId, transform: Transform) -> Result<(), EngineError> {
        let values = [
            transform.x,
            transform.y,
            transform.scale_x,
            transform.scale_y,
            transform.rotation,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidParameter("transform must be finite".into()));
        }
        let old = self.stack.layer(id)?.transform;
        self.perform(LayerOperation::Transform {
            id,
            old,
            new: transform.normalized(),
        })
    }

    /// Replace the layer's adjustment queue.
    pub fn set_adjustments(&mut self, id: LayerId, adjustments: Vec<Adjustment>) -> Result<(), EngineError> {
        for adjustment in &adjustments {
            adjustment.validate()?;
        }
        let old = self.stack.layer(id)?.adjustments.clone();
        self.perform(LayerOperation::Adjustments {
            id,
            old,
            new: adjustments,
        })
    }

    pub fn push_adjustment(&mut self, id: LayerId, adjustment: Adjustment) -> Result<(), EngineError> {
        let mut queue = self.stack.layer(id)?.adjustments.clone();
        queue.push(adjustment);
        self.set_adjustments(id, queue)
    }

    /// Copy a layer directly above itself, offset so the copy is visible.
    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<LayerId, EngineError> {
        let index = self.stack.index_of(id)?;
        let mut copy = self.stack.layer(id)?.clone();
        copy.name = format!("{} (Copy)", copy.name);
        copy.transform.x += DUPLICATE_OFFSET;
        copy.transform.y += DUPLICATE_OFFSET;
        self.add_layer(index + 1, copy)
    }

    /// Apply the adjustment queue to the layer's pixels and empty the queue.
    /// Nothing changes (and nothing is recorded) when the queue is empty or
    /// the work is cancelled.
    pub fn bake_adjustments(
        &mut self,
        id: LayerId,
        engine: &AdjustmentEngine,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let layer = self.stack.layer(id)?;
        if layer.locked {
            return Err(EngineError::PermissionDenied(layer.name.clone()));
        }
        if layer.adjustments.is_empty() {
            return Ok(());
        }
        let new = engine.apply_all(&layer.buffer, &layer.adjustments, cancel)?;
        let operation = LayerOperation::Pixels {
            id,
            old: layer.buffer.clone(),
            new,
            old_adjustments: layer.adjustments.clone(),
            new_adjustments: Vec::new(),
        };
        let command = LayerOpCommand::new(operation).with_label(format!("Bake Adjustments: {}", layer.name));
        self.history.perform(Box::new(command), &mut self.stack)?;
        self.mark_dirty();
        Ok(())
    }

    /// Copy the selected pixels of `source` into a new top layer that sits
    /// exactly over the pixels it was cut from.  The new layer keeps the
    /// source's scale and rotation.
    pub fn extract_selection(&mut self, source: LayerId, region: &SelectionRegion) -> Result<LayerId, EngineError> {
        let layer = self.stack.layer(source)?;
        let buffer = SelectionEngine::select(layer, region)?;
        let (bx, by, bw, bh) = region
            .pixel_bounds(layer.width(), layer.height())
            .ok_or_else(|| EngineError::InvalidSelection("empty selection".into()))?;

        // Layers rotate about their centre, so matching the crop centre on
        // the canvas lines up every pixel.
        let t = layer.transform;
        let (cx, cy) = layer.to_canvas(bx as f32 + bw as f32 * 0.5, by as f32 + bh as f32 * 0.5);
        let extracted = Layer::new(format!("{} Selection", layer.name), buffer).with_transform(Transform {
            x: cx - bw as f32 * t.scale_x * 0.5,
            y: cy - bh as f32 * t.scale_y * 0.5,
            ..t
        });
        self.push_layer(extracted)
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    pub fn undo(&mut self) -> Result<String, EngineError> {
        let description = self.history.undo(&mut self.stack)?;
        self.mark_dirty();
        Ok(description)
    }

    pub fn redo(&mut self) -> Result<String, EngineError> {
        let description = self.history.redo(&mut self.stack)?;
        self.mark_dirty();
        Ok(description)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ========================================================================
    // RENDER / PERSISTENCE
    // ========================================================================

    pub fn render(&self, pipeline: &CompositionPipeline) -> Result<PixelBuffer, EngineError> {
        pipeline.render(&self.stack)
    }

    pub fn render_with_cancel(
        &self,
        pipeline: &CompositionPipeline,
        cancel: &CancellationToken,
    ) -> Result<PixelBuffer, EngineError> {
        pipeline.render_with_cancel(&self.stack, cancel)
    }

    /// Colour of the composite at canvas position (x, y).  Positions off the
    /// canvas read the nearest edge pixel.
    pub fn pick_color(&self, pipeline: &CompositionPipeline, x: f32, y: f32) -> Result<[u8; 4], EngineError> {
        let composite = self.render(pipeline)?;
        composite
            .pixel_clamped(x, y)
            .ok_or_else(|| EngineError::InvalidBuffer("composite is empty".into()))
    }

    /// Write the document to `path` and adopt it as the project's path.
    pub fn save_as(&mut self, path: &Path) -> Result<(), EngineError> {
        crate::io::save_project(self, path)?;
        self.path = Some(path.to_path_buf());
        self.mark_clean();
        Ok(())
    }

    pub fn open(path: &Path) -> Result<Self, EngineError> {
        crate::io::load_project(path)
    }
}

impl fmt::Debug for Project {
    // History holds boxed commands; its depth is enough here.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("is_dirty", &self.is_dirty)
            .field("params", &self.params)
            .field("stack", &self.stack)
            .field("undo_depth", &self.history.undo_count())
            .finish()
    }
}

fn clamp_opacity(opacity: f32) -> Result<f32, EngineError> {
    if opacity.is_nan() {
        return Err(EngineError::InvalidParameter("opacity is NaN".into()));
    }
    Ok(opacity.clamp(0.0, 1.0))
}

// ============================================================================
// SHARED PROJECT — single writer, many readers
// ============================================================================

/// A project shared between threads.  Each mutation, including its history
/// append, runs under the write lock; renders take the read lock and so never
/// see a half-applied change.
#[derive(Clone)]
pub struct SharedProject {
    inner: Arc<RwLock<Project>>,
}

impl SharedProject {
    pub fn new(project: Project) -> Self {
        Self {
            inner: Arc::new(RwLock::new(project)),
        }
    }

    pub fn mutate<R>(&self, f: impl FnOnce(&mut Project) -> Result<R, EngineError>) -> Result<R, EngineError> {
        let mut project = self
            .inner
            .write()
            .map_err(|_| EngineError::InvalidParameter("project lock poisoned".into()))?;
        f(&mut project)
    }

    pub fn read<R>(&self, f: impl FnOnce(&Project) -> R) -> Result<R, EngineError> {
        let project = self
            .inner
            .read()
            .map_err(|_| EngineError::InvalidParameter("project lock poisoned".into()))?;
        Ok(f(&project))
    }

    pub fn render(&self, pipeline: &CompositionPipeline) -> Result<PixelBuffer, EngineError> {
        self.read(|p| p.render(pipeline))?
    }
}
