// ============================================================================
// ENGINE ERRORS — one taxonomy shared by every subsystem
// ============================================================================

use thiserror::Error;

use crate::canvas::LayerId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("layer {0} not found")]
    NotFound(LayerId),

    #[error("index {index} out of range (valid: 0..={max})")]
    OutOfRange { index: usize, max: usize },

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("layer '{0}' is locked")]
    PermissionDenied(String),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("GPU backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid pixel buffer: {0}")]
    InvalidBuffer(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid project file: {0}")]
    InvalidFormat(String),
}

impl From<Box<bincode::ErrorKind>> for EngineError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        EngineError::Serialize(e.to_string())
    }
}

impl EngineError {
    /// Failures that come from a file or codec collaborator rather than the core.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Io(_)
                | EngineError::Image(_)
                | EngineError::Serialize(_)
                | EngineError::InvalidFormat(_)
        )
    }

    /// Undo/redo boundary conditions. Routine, never fatal.
    pub fn is_history_boundary(&self) -> bool {
        matches!(self, EngineError::NothingToUndo | EngineError::NothingToRedo)
    }
}
