// ============================================================================
// ADJUSTMENT ENGINE — pure buffer -> buffer colour and filter adjustments
// ============================================================================
//
// Every adjustment decodes the source into the normalized RGBA working form,
// runs on the GPU backend when one is usable, otherwise (or on GPU failure)
// on the CPU, then packs back into the source's channel layout and depth.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::gpu::{GpuBackend, KernelId};
use crate::ops::denoise::{self, DenoiseStrategy, MAX_DENOISE_RADIUS, MIN_DENOISE_STRENGTH};
use crate::ops::filters::{self, MAX_KERNEL_RADIUS};
use crate::settings::EngineSettings;

/// Scale from a temperature of ±1 to the red/blue bias in normalized units.
const TEMPERATURE_BIAS: f32 = 0.2;

/// Largest GPU median window radius (the shader sorts a fixed 15×15 window).
pub const GPU_MEDIAN_MAX_RADIUS: u32 = 7;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Adjustment {
    /// `out = clamp((in - 0.5) * contrast + 0.5 + brightness, 0, 1)` per colour channel.
    BrightnessContrast { brightness: f32, contrast: f32 },
    /// Negative `amount` blurs, positive sharpens; `radius` is the Gaussian kernel radius.
    SharpenBlur { radius: u32, amount: f32 },
    /// Per-channel gains followed by a luminance-compensated warm/cool bias.
    ColorBalance {
        red: f32,
        green: f32,
        blue: f32,
        temperature: f32,
    },
    NoiseReduction {
        strategy: DenoiseStrategy,
        strength: f32,
        radius: u32,
    },
}

impl Adjustment {
    pub fn brightness_contrast(brightness: f32, contrast: f32) -> Self {
        Adjustment::BrightnessContrast {
            brightness,
            contrast,
        }
    }

    pub fn temperature(temperature: f32) -> Self {
        Adjustment::ColorBalance {
            red: 1.0,
            green: 1.0,
            blue: 1.0,
            temperature,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Adjustment::BrightnessContrast { .. } => "Brightness/Contrast",
            Adjustment::SharpenBlur { amount, .. } if *amount < 0.0 => "Blur",
            Adjustment::SharpenBlur { .. } => "Sharpen",
            Adjustment::ColorBalance { .. } => "Color Balance",
            Adjustment::NoiseReduction { .. } => "Noise Reduction",
        }
    }

    /// Parameters that leave every pixel unchanged.
    pub fn is_identity(&self) -> bool {
        match *self {
            Adjustment::BrightnessContrast {
                brightness,
                contrast,
            } => brightness == 0.0 && contrast == 1.0,
            Adjustment::SharpenBlur { radius, amount } => radius == 0 || amount == 0.0,
            Adjustment::ColorBalance {
                red,
                green,
                blue,
                temperature,
            } => red == 1.0 && green == 1.0 && blue == 1.0 && temperature == 0.0,
            Adjustment::NoiseReduction { strength, .. } => strength < MIN_DENOISE_STRENGTH,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let finite = |name: &str, v: f32| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(EngineError::InvalidParameter(format!("{} must be finite", name)))
            }
        };
        match *self {
            Adjustment::BrightnessContrast {
                brightness,
                contrast,
            } => {
                finite("brightness", brightness)?;
                finite("contrast", contrast)?;
                if contrast < 0.0 {
                    return Err(EngineError::InvalidParameter(
                        "contrast must not be negative".into(),
                    ));
                }
            }
            Adjustment::SharpenBlur { radius, amount } => {
                finite("amount", amount)?;
                if radius > MAX_KERNEL_RADIUS {
                    return Err(EngineError::InvalidParameter(format!(
                        "kernel radius {} exceeds {}",
                        radius, MAX_KERNEL_RADIUS
                    )));
                }
            }
            Adjustment::ColorBalance {
                red,
                green,
                blue,
                temperature,
            } => {
                for (name, v) in [("red", red), ("green", green), ("blue", blue)] {
                    finite(name, v)?;
                    if v < 0.0 {
                        return Err(EngineError::InvalidParameter(format!(
                            "{} gain must not be negative",
                            name
                        )));
                    }
                }
                finite("temperature", temperature)?;
                if !(-1.0..=1.0).contains(&temperature) {
                    return Err(EngineError::InvalidParameter(
                        "temperature must lie in [-1, 1]".into(),
                    ));
                }
            }
            Adjustment::NoiseReduction {
                strength, radius, ..
            } => {
                finite("strength", strength)?;
                if !(0.0..=1.0).contains(&strength) {
                    return Err(EngineError::InvalidParameter(
                        "strength must lie in [0, 1]".into(),
                    ));
                }
                if radius > MAX_DENOISE_RADIUS {
                    return Err(EngineError::InvalidParameter(format!(
                        "denoise radius {} exceeds {}",
                        radius, MAX_DENOISE_RADIUS
                    )));
                }
            }
        }
        Ok(())
    }

    /// GPU kernel that computes this adjustment (or its filtering stage).
    pub fn gpu_kernel(&self) -> Option<KernelId> {
        match *self {
            Adjustment::BrightnessContrast { .. } => Some(KernelId::BrightnessContrast),
            Adjustment::ColorBalance { .. } => Some(KernelId::ColorBalance),
            Adjustment::SharpenBlur { .. } => Some(KernelId::GaussianBlur),
            Adjustment::NoiseReduction {
                strategy: DenoiseStrategy::Median,
                radius,
                ..
            } if radius.max(1) <= GPU_MEDIAN_MAX_RADIUS => Some(KernelId::Median),
            Adjustment::NoiseReduction { .. } => None,
        }
    }
}

// ============================================================================
// CPU KERNELS
// ============================================================================

pub fn brightness_contrast_cpu(
    src: &[f32],
    width: usize,
    brightness: f32,
    contrast: f32,
    cancel: &CancellationToken,
) -> Result<Vec<f32>, EngineError> {
    map_color_rows(src, width, cancel, |[r, g, b]| {
        let f = |v: f32| ((v - 0.5) * contrast + 0.5 + brightness).clamp(0.0, 1.0);
        [f(r), f(g), f(b)]
    })
}

/// Red/blue bias for a temperature in [-1, 1] and the uniform shift that
/// cancels its luma.
pub fn temperature_bias(temperature: f32) -> (f32, f32) {
    let bias = temperature * TEMPERATURE_BIAS;
    (bias, (0.2126 - 0.0722) * bias)
}

/// Gains first, then red/blue moved in opposite directions by the temperature
/// bias.  The bias shifts all three channels down by its own luma so that,
/// before clamping, Rec. 709 luminance is unchanged by temperature.
pub fn color_balance_cpu(
    src: &[f32],
    width: usize,
    gains: [f32; 3],
    temperature: f32,
    cancel: &CancellationToken,
) -> Result<Vec<f32>, EngineError> {
    let (bias, luma_shift) = temperature_bias(temperature);
    map_color_rows(src, width, cancel, |[r, g, b]| {
        [
            (r * gains[0] + bias - luma_shift).clamp(0.0, 1.0),
            (g * gains[1] - luma_shift).clamp(0.0, 1.0),
            (b * gains[2] - bias - luma_shift).clamp(0.0, 1.0),
        ]
    })
}

/// Run `f` over the RGB of every pixel, keeping alpha, one row per task.
fn map_color_rows(
    src: &[f32],
    width: usize,
    cancel: &CancellationToken,
    f: impl Fn([f32; 3]) -> [f32; 3] + Sync,
) -> Result<Vec<f32>, EngineError> {
    let mut out = src.to_vec();
    if width == 0 {
        return Ok(out);
    }
    out.par_chunks_mut(width * 4).try_for_each(|row| {
        cancel.check()?;
        for px in row.chunks_exact_mut(4) {
            let [r, g, b] = f([px[0], px[1], px[2]]);
            px[0] = r;
            px[1] = g;
            px[2] = b;
        }
        Ok::<(), EngineError>(())
    })?;
    Ok(out)
}

// ============================================================================
// ENGINE
// ============================================================================

/// Which backend produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutedOn {
    Cpu,
    Gpu,
    /// The GPU was tried and failed; the CPU produced the result.
    CpuFallback,
}

#[derive(Clone, Debug)]
pub struct Applied {
    pub buffer: PixelBuffer,
    pub backend: ExecutedOn,
}

/// Requested execution backend.  `Auto` uses the GPU when one is usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendPreference {
    #[default]
    Auto,
    Cpu,
}

const GPU_UNKNOWN: u8 = 0;
const GPU_READY: u8 = 1;
const GPU_UNAVAILABLE: u8 = 2;

/// Stateless with respect to pixels: the only interior state is the cached
/// GPU availability decision and a fallback counter.
pub struct AdjustmentEngine {
    gpu: Option<Arc<dyn GpuBackend>>,
    gpu_state: AtomicU8,
    fallbacks: AtomicUsize,
}

impl Default for AdjustmentEngine {
    fn default() -> Self {
        Self::cpu_only()
    }
}

impl AdjustmentEngine {
    pub fn cpu_only() -> Self {
        Self {
            gpu: None,
            gpu_state: AtomicU8::new(GPU_UNAVAILABLE),
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// Attach a GPU backend.  Availability is queried once here and cached.
    pub fn with_gpu(backend: Arc<dyn GpuBackend>) -> Self {
        let state = if backend.is_available() {
            log::info!("GPU adjustments enabled on {}", backend.name());
            GPU_READY
        } else {
            log::info!("GPU backend {} unavailable, using CPU", backend.name());
            GPU_UNAVAILABLE
        };
        Self {
            gpu: Some(backend),
            gpu_state: AtomicU8::new(state),
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// Build from settings: tries wgpu only when GPU acceleration is on.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        if settings.gpu_acceleration && settings.backend == BackendPreference::Auto {
            match crate::gpu::WgpuBackend::try_new(&settings.preferred_gpu) {
                Some(backend) => Self::with_gpu(Arc::new(backend)),
                None => {
                    log::info!("No GPU adapter found, adjustments run on the CPU");
                    Self::cpu_only()
                }
            }
        } else {
            Self::cpu_only()
        }
    }

    /// True while the cached decision says the GPU is usable.
    pub fn gpu_active(&self) -> bool {
        self.gpu.is_some() && self.gpu_state.load(Ordering::Acquire) == GPU_READY
    }

    pub fn backend_name(&self) -> String {
        match &self.gpu {
            Some(gpu) if self.gpu_active() => format!("GPU ({})", gpu.name()),
            _ => "CPU".to_string(),
        }
    }

    /// Number of GPU invocations that failed and were recomputed on the CPU.
    pub fn fallback_count(&self) -> usize {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn apply(&self, buffer: &PixelBuffer, adjustment: &Adjustment) -> Result<PixelBuffer, EngineError> {
        self.apply_detailed(buffer, adjustment, &CancellationToken::new())
            .map(|a| a.buffer)
    }

    pub fn apply_with_cancel(
        &self,
        buffer: &PixelBuffer,
        adjustment: &Adjustment,
        cancel: &CancellationToken,
    ) -> Result<PixelBuffer, EngineError> {
        self.apply_detailed(buffer, adjustment, cancel).map(|a| a.buffer)
    }

    /// Apply a queue of adjustments in order.
    pub fn apply_all(
        &self,
        buffer: &PixelBuffer,
        adjustments: &[Adjustment],
        cancel: &CancellationToken,
    ) -> Result<PixelBuffer, EngineError> {
        let mut current = buffer.clone();
        for adjustment in adjustments {
            current = self.apply_with_cancel(&current, adjustment, cancel)?;
        }
        Ok(current)
    }

    pub fn apply_detailed(
        &self,
        buffer: &PixelBuffer,
        adjustment: &Adjustment,
        cancel: &CancellationToken,
    ) -> Result<Applied, EngineError> {
        adjustment.validate()?;
        cancel.check()?;
        if adjustment.is_identity() || buffer.is_empty() {
            return Ok(Applied {
                buffer: buffer.clone(),
                backend: ExecutedOn::Cpu,
            });
        }

        let (w, h) = (buffer.width() as usize, buffer.height() as usize);
        let src = buffer.to_rgba_f32();

        let (rgba, backend) = match *adjustment {
            Adjustment::BrightnessContrast {
                brightness,
                contrast,
            } => self.stage(KernelId::BrightnessContrast, buffer, adjustment, cancel, || {
                brightness_contrast_cpu(&src, w, brightness, contrast, cancel)
            })?,
            Adjustment::ColorBalance {
                red,
                green,
                blue,
                temperature,
            } => self.stage(KernelId::ColorBalance, buffer, adjustment, cancel, || {
                color_balance_cpu(&src, w, [red, green, blue], temperature, cancel)
            })?,
            Adjustment::SharpenBlur { radius, amount } => {
                let (blurred, backend) =
                    self.stage(KernelId::GaussianBlur, buffer, adjustment, cancel, || {
                        filters::gaussian_blur(&src, w, h, radius, cancel)
                    })?;
                (filters::combine_sharpen_blur(&src, &blurred, amount), backend)
            }
            Adjustment::NoiseReduction {
                strategy,
                strength,
                radius,
            } => match adjustment.gpu_kernel() {
                Some(kernel) => {
                    let (median, backend) = self.stage(kernel, buffer, adjustment, cancel, || {
                        denoise::median_filter(&src, w, h, radius.max(1), cancel)
                    })?;
                    (filters::mix_color(&src, &median, strength), backend)
                }
                None => (
                    strategy.denoiser().denoise(&src, w, h, strength, radius, cancel)?,
                    ExecutedOn::Cpu,
                ),
            },
        };

        // Last check before anything is handed back to the caller.
        cancel.check().inspect_err(|_| {
            log::info!("{} cancelled", adjustment.name());
        })?;

        Ok(Applied {
            buffer: PixelBuffer::from_rgba_f32(
                buffer.width(),
                buffer.height(),
                buffer.channels(),
                buffer.depth(),
                &rgba,
            ),
            backend,
        })
    }

    /// Run one kernel on the GPU if usable, else on the CPU.  The GPU result
    /// is only accepted after its readback has completed and its geometry
    /// matches the input; any GPU failure is logged and recomputed on the CPU.
    fn stage(
        &self,
        kernel: KernelId,
        buffer: &PixelBuffer,
        adjustment: &Adjustment,
        cancel: &CancellationToken,
        cpu: impl FnOnce() -> Result<Vec<f32>, EngineError>,
    ) -> Result<(Vec<f32>, ExecutedOn), EngineError> {
        let Some(gpu) = self.usable_gpu(kernel, buffer) else {
            return Ok((cpu()?, ExecutedOn::Cpu));
        };

        let failure = match gpu.run(kernel, buffer, adjustment) {
            Ok(out) if out.dimensions() == buffer.dimensions() => {
                cancel.check()?;
                return Ok((out.to_rgba_f32(), ExecutedOn::Gpu));
            }
            Ok(out) => EngineError::BackendUnavailable(format!(
                "{:?} returned {}x{} for a {}x{} input",
                kernel,
                out.width(),
                out.height(),
                buffer.width(),
                buffer.height()
            )),
            Err(e) => e,
        };

        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        self.gpu_state.store(GPU_UNKNOWN, Ordering::Release);
        log::warn!("GPU {:?} failed ({}), falling back to CPU", kernel, failure);

        let out = cpu()?;
        Ok((out, ExecutedOn::CpuFallback))
    }

    /// GPU backend to use for this call, re-verifying availability lazily
    /// after an earlier failure.
    fn usable_gpu(&self, kernel: KernelId, buffer: &PixelBuffer) -> Option<&Arc<dyn GpuBackend>> {
        let gpu = self.gpu.as_ref()?;
        match self.gpu_state.load(Ordering::Acquire) {
            GPU_READY => {}
            GPU_UNKNOWN => {
                if gpu.is_available() {
                    self.gpu_state.store(GPU_READY, Ordering::Release);
                } else {
                    log::warn!("GPU backend {} no longer available, staying on CPU", gpu.name());
                    self.gpu_state.store(GPU_UNAVAILABLE, Ordering::Release);
                    return None;
                }
            }
            _ => return None,
        }
        gpu.supports(kernel, buffer).then_some(gpu)
    }
}
