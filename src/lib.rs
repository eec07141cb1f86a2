//! RefStudio engine: layered, non-destructive image compositing.
//!
//! A [`Project`] owns a [`LayerStack`] and its [`HistoryManager`].  Every
//! structural or property edit goes through the history as a command, so it
//! can be undone.  Layer adjustments stay queued on the layer and are only
//! evaluated by the [`CompositionPipeline`] (or baked explicitly), using an
//! [`AdjustmentEngine`] that prefers a GPU backend and falls back to rayon
//! on the CPU.

pub mod blend;
pub mod buffer;
pub mod cancel;
pub mod canvas;
pub mod cli;
pub mod compositor;
pub mod error;
pub mod gpu;
pub mod history;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use blend::BlendMode;
pub use buffer::{Channels, ColorDepth, PixelBuffer};
pub use cancel::CancellationToken;
pub use canvas::{Layer, LayerId, LayerStack, MAX_CANVAS_DIM, Transform};
pub use compositor::CompositionPipeline;
pub use error::EngineError;
pub use gpu::{GpuBackend, KernelId, WgpuBackend};
pub use history::{Command, HistoryManager, LayerOpCommand, LayerOperation};
pub use io::{SaveFormat, load_image, load_project, save_image, save_project};
pub use ops::adjustments::{Adjustment, AdjustmentEngine, Applied, BackendPreference, ExecutedOn};
pub use ops::denoise::DenoiseStrategy;
pub use ops::selection::{SelectionEngine, SelectionRegion, SelectionShape};
pub use project::{EngineParams, Project, SharedProject};
pub use settings::EngineSettings;
