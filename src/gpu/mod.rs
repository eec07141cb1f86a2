// ============================================================================
// GPU MODULE — optional accelerator for the adjustment engine
// ============================================================================
//
// The engine only talks to the `GpuBackend` capability.  `WgpuBackend` is the
// real implementation; tests supply their own.

pub mod compute;
pub mod context;
pub mod shaders;

use crate::buffer::{Channels, ColorDepth, PixelBuffer};
use crate::error::EngineError;
use crate::ops::adjustments::{Adjustment, GPU_MEDIAN_MAX_RADIUS, temperature_bias};

pub use compute::GpuPipelines;
pub use context::GpuContext;

/// Kernels a GPU backend can be asked to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelId {
    BrightnessContrast,
    ColorBalance,
    /// Full Gaussian blur of the input; sharpening is finished on the CPU.
    GaussianBlur,
    /// Full median of the input; strength mixing is finished on the CPU.
    Median,
}

pub trait GpuBackend: Send + Sync {
    fn name(&self) -> String;

    fn is_available(&self) -> bool;

    /// Whether this backend can take `input` for `kernel` at all.  A `false`
    /// here routes to the CPU without counting as a failure.
    fn supports(&self, _kernel: KernelId, _input: &PixelBuffer) -> bool {
        true
    }

    /// Run a kernel and return the finished buffer.  Implementations must not
    /// return until the device work has completed.
    fn run(&self, kernel: KernelId, input: &PixelBuffer, params: &Adjustment) -> Result<PixelBuffer, EngineError>;
}

// ============================================================================
// WGPU BACKEND
// ============================================================================

pub struct WgpuBackend {
    ctx: GpuContext,
    pipelines: GpuPipelines,
}

impl WgpuBackend {
    pub fn try_new(preferred_gpu: &str) -> Option<Self> {
        let ctx = GpuContext::new(preferred_gpu)?;
        let pipelines = GpuPipelines::new(&ctx.device);
        log::info!("GPU adapter: {} (max texture {})", ctx.adapter_name, ctx.max_texture_dim);
        Some(Self { ctx, pipelines })
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> String {
        self.ctx.adapter_name.clone()
    }

    fn is_available(&self) -> bool {
        !self.ctx.is_lost()
    }

    /// Textures are rgba8unorm, so only 8-bit RGBA buffers go to the device.
    fn supports(&self, kernel: KernelId, input: &PixelBuffer) -> bool {
        input.channels() == Channels::Rgba
            && input.depth() == ColorDepth::U8
            && self.ctx.supports_size(input.width(), input.height())
            && (kernel != KernelId::GaussianBlur || input.width().max(input.height()) > 1)
    }

    fn run(&self, kernel: KernelId, input: &PixelBuffer, params: &Adjustment) -> Result<PixelBuffer, EngineError> {
        let (w, h) = input.dimensions();
        let data = input.data();
        let out = match (kernel, params) {
            (
                KernelId::BrightnessContrast,
                &Adjustment::BrightnessContrast {
                    brightness,
                    contrast,
                },
            ) => self
                .pipelines
                .brightness_contrast(&self.ctx, data, w, h, brightness, contrast)?,
            (
                KernelId::ColorBalance,
                &Adjustment::ColorBalance {
                    red,
                    green,
                    blue,
                    temperature,
                },
            ) => {
                let (bias, luma_shift) = temperature_bias(temperature);
                self.pipelines
                    .color_balance(&self.ctx, data, w, h, [red, green, blue], bias, luma_shift)?
            }
            (KernelId::GaussianBlur, &Adjustment::SharpenBlur { radius, .. }) => {
                self.pipelines.gaussian_blur(&self.ctx, data, w, h, radius)?
            }
            (KernelId::Median, &Adjustment::NoiseReduction { radius, .. }) => {
                let radius = radius.clamp(1, GPU_MEDIAN_MAX_RADIUS);
                self.pipelines.median(&self.ctx, data, w, h, radius)?
            }
            _ => {
                return Err(EngineError::InvalidParameter(format!(
                    "{:?} cannot run {}",
                    kernel,
                    params.name()
                )));
            }
        };
        PixelBuffer::from_rgba8(w, h, out)
    }
}
