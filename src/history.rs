// ============================================================================
// HISTORY — reversible commands and the linear undo/redo manager
// ============================================================================

use std::collections::VecDeque;

use crate::blend::BlendMode;
use crate::buffer::PixelBuffer;
use crate::canvas::{Layer, LayerId, LayerStack, Transform};
use crate::error::EngineError;
use crate::ops::adjustments::Adjustment;

/// A recorded mutation.  `execute` applies it, `undo` reverses it; both leave
/// the stack untouched when they fail.  Commands are immutable once built.
pub trait Command: Send + Sync {
    fn execute(&self, stack: &mut LayerStack) -> Result<(), EngineError>;
    fn undo(&self, stack: &mut LayerStack) -> Result<(), EngineError>;
    fn description(&self) -> String;
    fn affected_layers(&self) -> Vec<LayerId>;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// LAYER OPERATION COMMAND
// ============================================================================

/// Every mutation the layer stack supports, with the data needed to replay it
/// in both directions.
#[derive(Clone, Debug)]
pub enum LayerOperation {
    /// `layer` (carrying its final id) inserted at `index`.
    Add { index: usize, layer: Layer },
    /// `layer` removed from `index`; kept whole so undo can restore it.
    Remove { index: usize, layer: Layer },
    Move { id: LayerId, from: usize, to: usize },
    Opacity { id: LayerId, old: f32, new: f32 },
    Visibility { id: LayerId, old: bool, new: bool },
    Blend { id: LayerId, old: BlendMode, new: BlendMode },
    Rename { id: LayerId, old: String, new: String },
    Lock { id: LayerId, old: bool, new: bool },
    Transform { id: LayerId, old: Transform, new: Transform },
    Adjustments { id: LayerId, old: Vec<Adjustment>, new: Vec<Adjustment> },
    /// Pixels (and the adjustment queue) replaced, e.g. by baking adjustments.
    Pixels {
        id: LayerId,
        old: PixelBuffer,
        new: PixelBuffer,
        old_adjustments: Vec<Adjustment>,
        new_adjustments: Vec<Adjustment>,
    },
}

pub struct LayerOpCommand {
    operation: LayerOperation,
    label: Option<String>,
}

impl LayerOpCommand {
    pub fn new(operation: LayerOperation) -> Self {
        Self {
            operation,
            label: None,
        }
    }

    /// Override the generated description.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn apply(&self, stack: &mut LayerStack, forward: bool) -> Result<(), EngineError> {
        match &self.operation {
            LayerOperation::Add { index, layer } => {
                if forward {
                    stack.insert(*index, layer.clone())?;
                } else {
                    stack.remove(layer.id())?;
                }
            }
            LayerOperation::Remove { index, layer } => {
                if forward {
                    stack.remove(layer.id())?;
                } else {
                    stack.insert(*index, layer.clone())?;
                }
            }
            LayerOperation::Move { id, from, to } => {
                stack.move_to(*id, *pick(forward, from, to))?;
            }
            LayerOperation::Opacity { id, old, new } => {
                stack.layer_mut(*id)?.opacity = *pick(forward, old, new);
            }
            LayerOperation::Visibility { id, old, new } => {
                stack.layer_mut(*id)?.visible = *pick(forward, old, new);
            }
            LayerOperation::Blend { id, old, new } => {
                stack.layer_mut(*id)?.blend_mode = *pick(forward, old, new);
            }
            LayerOperation::Rename { id, old, new } => {
                stack.layer_mut(*id)?.name = pick(forward, old, new).clone();
            }
            LayerOperation::Lock { id, old, new } => {
                stack.layer_mut(*id)?.locked = *pick(forward, old, new);
            }
            LayerOperation::Transform { id, old, new } => {
                stack.layer_mut(*id)?.transform = *pick(forward, old, new);
            }
            LayerOperation::Adjustments { id, old, new } => {
                stack.layer_mut(*id)?.adjustments = pick(forward, old, new).clone();
            }
            LayerOperation::Pixels {
                id,
                old,
                new,
                old_adjustments,
                new_adjustments,
            } => {
                let layer = stack.layer_mut(*id)?;
                layer.buffer = pick(forward, old, new).clone();
                layer.adjustments = pick(forward, old_adjustments, new_adjustments).clone();
            }
        }
        Ok(())
    }
}

/// `new` when replaying forward, `old` when reversing.
fn pick<T>(forward: bool, old: T, new: T) -> T {
    if forward { new } else { old }
}

impl Command for LayerOpCommand {
    fn execute(&self, stack: &mut LayerStack) -> Result<(), EngineError> {
        self.apply(stack, true)
    }

    fn undo(&self, stack: &mut LayerStack) -> Result<(), EngineError> {
        self.apply(stack, false)
    }

    fn description(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match &self.operation {
            LayerOperation::Add { layer, .. } => format!("Add Layer: {}", layer.name),
            LayerOperation::Remove { layer, .. } => format!("Delete Layer: {}", layer.name),
            LayerOperation::Move { from, to, .. } => format!("Move Layer {} → {}", from, to),
            LayerOperation::Opacity { id, new, .. } => {
                format!("Layer {} Opacity: {:.0}%", id, new * 100.0)
            }
            LayerOperation::Visibility { id, new, .. } => {
                if *new {
                    format!("Show Layer {}", id)
                } else {
                    format!("Hide Layer {}", id)
                }
            }
            LayerOperation::Blend { id, new, .. } => format!("Layer {} Blend: {}", id, new.name()),
            LayerOperation::Rename { old, new, .. } => format!("Rename: {} → {}", old, new),
            LayerOperation::Lock { id, new, .. } => {
                if *new {
                    format!("Lock Layer {}", id)
                } else {
                    format!("Unlock Layer {}", id)
                }
            }
            LayerOperation::Transform { id, .. } => format!("Transform Layer {}", id),
            LayerOperation::Adjustments { id, .. } => format!("Adjust Layer {}", id),
            LayerOperation::Pixels { id, .. } => format!("Edit Pixels {}", id),
        }
    }

    fn affected_layers(&self) -> Vec<LayerId> {
        match &self.operation {
            LayerOperation::Add { layer, .. } | LayerOperation::Remove { layer, .. } => vec![layer.id()],
            LayerOperation::Move { id, .. }
            | LayerOperation::Opacity { id, .. }
            | LayerOperation::Visibility { id, .. }
            | LayerOperation::Blend { id, .. }
            | LayerOperation::Rename { id, .. }
            | LayerOperation::Lock { id, .. }
            | LayerOperation::Transform { id, .. }
            | LayerOperation::Adjustments { id, .. }
            | LayerOperation::Pixels { id, .. } => vec![*id],
        }
    }

    fn memory_size(&self) -> usize {
        let base = std::mem::size_of::<LayerOperation>();
        match &self.operation {
            LayerOperation::Add { layer, .. } | LayerOperation::Remove { layer, .. } => {
                layer.memory_size()
            }
            LayerOperation::Rename { old, new, .. } => base + old.len() + new.len(),
            LayerOperation::Adjustments { old, new, .. } => {
                base + (old.len() + new.len()) * std::mem::size_of::<Adjustment>()
            }
            LayerOperation::Pixels { old, new, .. } => {
                // Buffers sharing storage are only held once.
                let new_bytes = if new.shares_storage(old) { 0 } else { new.memory_size() };
                base + old.memory_size() + new_bytes
            }
            _ => base,
        }
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

/// Linear undo/redo history.  Bounded by entry count and, optionally, by the
/// total bytes held by recorded commands.
pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(100 * 1024 * 1024),
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_bytes;
        self
    }

    /// Execute `command` and record it.  When execution fails nothing is
    /// recorded and the redo sequence is kept.
    pub fn perform(&mut self, command: Box<dyn Command>, stack: &mut LayerStack) -> Result<(), EngineError> {
        command.execute(stack)?;
        self.push(command);
        Ok(())
    }

    /// Record a command whose effect is already applied.
    pub fn push(&mut self, command: Box<dyn Command>) {
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }
        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);
        self.prune();
    }

    /// Reverse the most recent command; returns its description.  A command
    /// whose inverse fails stays on the undo sequence.
    pub fn undo(&mut self, stack: &mut LayerStack) -> Result<String, EngineError> {
        let command = self.undo_stack.pop_back().ok_or(EngineError::NothingToUndo)?;
        if let Err(e) = command.undo(stack) {
            self.undo_stack.push_back(command);
            return Err(e);
        }
        let description = command.description();
        self.redo_stack.push_back(command);
        Ok(description)
    }

    pub fn redo(&mut self, stack: &mut LayerStack) -> Result<String, EngineError> {
        let command = self.redo_stack.pop_back().ok_or(EngineError::NothingToRedo)?;
        if let Err(e) = command.execute(stack) {
            self.redo_stack.push_back(command);
            return Err(e);
        }
        let description = command.description();
        self.undo_stack.push_back(command);
        Ok(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.evict(removed, "depth");
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.evict(removed, "memory");
                }
            }
        }
    }

    fn evict(&mut self, removed: Box<dyn Command>, reason: &str) {
        self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
        log::debug!("History: evicted '{}' ({} limit)", removed.description(), reason);
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_with_layer() -> (LayerStack, LayerId) {
        let mut stack = LayerStack::new(4, 4).unwrap();
        let mut layer = Layer::new("base", PixelBuffer::filled(4, 4, [0, 0, 0, 255]));
        layer.set_id(stack.allocate_id());
        let id = stack.insert(0, layer).unwrap();
        (stack, id)
    }

    fn opacity(id: LayerId, old: f32, new: f32) -> Box<dyn Command> {
        Box::new(LayerOpCommand::new(LayerOperation::Opacity { id, old, new }))
    }

    #[test]
    fn failed_command_is_not_recorded() {
        let (mut stack, _) = stack_with_layer();
        let mut history = HistoryManager::new(10);
        let bogus = LayerId(99);
        assert!(history.perform(opacity(bogus, 1.0, 0.5), &mut stack).is_err());
        assert_eq!(history.undo_count(), 0);
    }

    #[test]
    fn memory_cap_keeps_latest_entry() {
        let (mut stack, id) = stack_with_layer();
        let mut history = HistoryManager::new(10).with_memory_limit(Some(1));
        history.perform(opacity(id, 1.0, 0.5), &mut stack).unwrap();
        history.perform(opacity(id, 0.5, 0.25), &mut stack).unwrap();
        assert_eq!(history.undo_count(), 1);
        history.undo(&mut stack).unwrap();
        assert_eq!(stack.layer(id).unwrap().opacity, 0.5);
    }

    #[test]
    fn structural_commands_report_their_layer() {
        let (mut stack, id) = stack_with_layer();
        let layer = stack.layer(id).unwrap().clone();
        let remove = LayerOpCommand::new(LayerOperation::Remove { index: 0, layer });
        remove.execute(&mut stack).unwrap();
        assert_eq!(remove.affected_layers(), vec![id]);
        assert_eq!(remove.description(), "Delete Layer: base");
        remove.undo(&mut stack).unwrap();
        assert_eq!(stack.index_of(id).unwrap(), 0);
    }

    #[test]
    fn memory_accounting_returns_to_zero_after_clear() {
        let (mut stack, id) = stack_with_layer();
        let mut history = HistoryManager::new(10);
        history.perform(opacity(id, 1.0, 0.5), &mut stack).unwrap();
        assert!(history.memory_usage() > 0);
        history.clear();
        assert_eq!(history.memory_usage(), 0);
    }
}
