// ============================================================================
// NOISE REDUCTION — median, bilateral, and non-local means strategies
// ============================================================================

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::EngineError;

/// Largest window radius accepted by the denoisers.
pub const MAX_DENOISE_RADIUS: u32 = 16;

/// Strength below which noise reduction leaves the image untouched.
pub const MIN_DENOISE_STRENGTH: f32 = 0.05;

/// A noise reduction algorithm over the normalized RGBA working form.
/// Implementations leave alpha untouched.
pub trait Denoiser: Sync {
    fn name(&self) -> &'static str;

    fn denoise(
        &self,
        src: &[f32],
        width: usize,
        height: usize,
        strength: f32,
        radius: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EngineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DenoiseStrategy {
    #[default]
    Median,
    Bilateral,
    NonLocalMeans,
}

impl DenoiseStrategy {
    pub fn all() -> &'static [DenoiseStrategy] {
        &[
            DenoiseStrategy::Median,
            DenoiseStrategy::Bilateral,
            DenoiseStrategy::NonLocalMeans,
        ]
    }

    pub fn denoiser(self) -> &'static dyn Denoiser {
        match self {
            DenoiseStrategy::Median => &MedianDenoiser,
            DenoiseStrategy::Bilateral => &BilateralDenoiser,
            DenoiseStrategy::NonLocalMeans => &NonLocalMeansDenoiser,
        }
    }

    /// Short name used in settings files and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            DenoiseStrategy::Median => "median",
            DenoiseStrategy::Bilateral => "bilateral",
            DenoiseStrategy::NonLocalMeans => "nlm",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "median" => Some(DenoiseStrategy::Median),
            "bilateral" => Some(DenoiseStrategy::Bilateral),
            "nlm" | "non-local means" | "nonlocalmeans" => Some(DenoiseStrategy::NonLocalMeans),
            _ => None,
        }
    }
}

#[inline]
fn clamp_index(v: i64, len: usize) -> usize {
    v.clamp(0, len as i64 - 1) as usize
}

// ============================================================================
// MEDIAN
// ============================================================================

pub struct MedianDenoiser;

/// Per-channel median over a `(2r+1)²` window, alpha included.
pub fn median_filter(
    src: &[f32],
    width: usize,
    height: usize,
    radius: u32,
    cancel: &CancellationToken,
) -> Result<Vec<f32>, EngineError> {
    if radius == 0 || width == 0 || height == 0 {
        return Ok(src.to_vec());
    }
    let r = radius as i64;
    let window = ((2 * r + 1) * (2 * r + 1)) as usize;
    let mut out = vec![0.0f32; src.len()];
    out.par_chunks_mut(width * 4)
        .enumerate()
        .try_for_each(|(y, row)| {
            cancel.check()?;
            let mut values: [Vec<f32>; 4] = std::array::from_fn(|_| Vec::with_capacity(window));
            for x in 0..width {
                for v in values.iter_mut() {
                    v.clear();
                }
                for dy in -r..=r {
                    let sy = clamp_index(y as i64 + dy, height);
                    for dx in -r..=r {
                        let sx = clamp_index(x as i64 + dx, width);
                        let i = (sy * width + sx) * 4;
                        for c in 0..4 {
                            values[c].push(src[i + c]);
                        }
                    }
                }
                for c in 0..4 {
                    values[c].sort_by(|a, b| a.total_cmp(b));
                    row[x * 4 + c] = values[c][window / 2];
                }
            }
            Ok::<(), EngineError>(())
        })?;
    Ok(out)
}

impl Denoiser for MedianDenoiser {
    fn name(&self) -> &'static str {
        "median"
    }

    fn denoise(
        &self,
        src: &[f32],
        width: usize,
        height: usize,
        strength: f32,
        radius: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EngineError> {
        let median = median_filter(src, width, height, radius.max(1), cancel)?;
        Ok(super::filters::mix_color(src, &median, strength))
    }
}

// ============================================================================
// BILATERAL
// ============================================================================

pub struct BilateralDenoiser;

impl Denoiser for BilateralDenoiser {
    fn name(&self) -> &'static str {
        "bilateral"
    }

    /// Spatial sigma follows the radius, range sigma grows with strength.
    fn denoise(
        &self,
        src: &[f32],
        width: usize,
        height: usize,
        strength: f32,
        radius: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EngineError> {
        if width == 0 || height == 0 {
            return Ok(src.to_vec());
        }
        let radius = radius.max(1) as i64;
        let sigma_s = radius as f32;
        let sigma_r = 0.02 + strength.clamp(0.0, 1.0) * 0.3;
        let inv_2ss = 1.0 / (2.0 * sigma_s * sigma_s);
        let inv_2rr = 1.0 / (2.0 * sigma_r * sigma_r);

        let mut out = vec![0.0f32; src.len()];
        out.par_chunks_mut(width * 4)
            .enumerate()
            .try_for_each(|(y, row)| {
                cancel.check()?;
                for x in 0..width {
                    let ci = (y * width + x) * 4;
                    let center = &src[ci..ci + 4];
                    let mut acc = [0.0f32; 3];
                    let mut total = 0.0f32;
                    for dy in -radius..=radius {
                        let sy = clamp_index(y as i64 + dy, height);
                        for dx in -radius..=radius {
                            let sx = clamp_index(x as i64 + dx, width);
                            let i = (sy * width + sx) * 4;
                            let p = &src[i..i + 4];
                            let spatial = (dx * dx + dy * dy) as f32 * inv_2ss;
                            let diff = (0..3).map(|c| (p[c] - center[c]).powi(2)).sum::<f32>();
                            let w = (-spatial - diff * inv_2rr).exp();
                            for c in 0..3 {
                                acc[c] += p[c] * w;
                            }
                            total += w;
                        }
                    }
                    for c in 0..3 {
                        row[x * 4 + c] = acc[c] / total;
                    }
                    row[x * 4 + 3] = center[3];
                }
                Ok::<(), EngineError>(())
            })?;
        Ok(out)
    }
}

// ============================================================================
// NON-LOCAL MEANS
// ============================================================================

pub struct NonLocalMeansDenoiser;

const NLM_PATCH_RADIUS: i64 = 1;

impl Denoiser for NonLocalMeansDenoiser {
    fn name(&self) -> &'static str {
        "non-local means"
    }

    /// 3×3 patches compared across a `(2r+1)²` search window; the filter
    /// parameter `h` scales with strength.
    fn denoise(
        &self,
        src: &[f32],
        width: usize,
        height: usize,
        strength: f32,
        radius: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EngineError> {
        if width == 0 || height == 0 {
            return Ok(src.to_vec());
        }
        let search = radius.max(1) as i64;
        let h = 0.01 + strength.clamp(0.0, 1.0) * 0.2;
        let inv_h2 = 1.0 / (h * h);
        let patch_len = ((2 * NLM_PATCH_RADIUS + 1).pow(2) * 3) as f32;

        let at = |x: i64, y: i64, c: usize| -> f32 {
            src[(clamp_index(y, height) * width + clamp_index(x, width)) * 4 + c]
        };

        let mut out = vec![0.0f32; src.len()];
        out.par_chunks_mut(width * 4)
            .enumerate()
            .try_for_each(|(y, row)| {
                cancel.check()?;
                let y = y as i64;
                for x in 0..width as i64 {
                    let mut acc = [0.0f32; 3];
                    let mut total = 0.0f32;
                    for sy in -search..=search {
                        for sx in -search..=search {
                            let mut d2 = 0.0f32;
                            for py in -NLM_PATCH_RADIUS..=NLM_PATCH_RADIUS {
                                for px in -NLM_PATCH_RADIUS..=NLM_PATCH_RADIUS {
                                    for c in 0..3 {
                                        let d = at(x + px, y + py, c) - at(x + sx + px, y + sy + py, c);
                                        d2 += d * d;
                                    }
                                }
                            }
                            let w = (-(d2 / patch_len) * inv_h2).exp();
                            for c in 0..3 {
                                acc[c] += at(x + sx, y + sy, c) * w;
                            }
                            total += w;
                        }
                    }
                    let o = x as usize * 4;
                    for c in 0..3 {
                        row[o + c] = acc[c] / total;
                    }
                    row[o + 3] = at(x, y, 3);
                }
                Ok::<(), EngineError>(())
            })?;
        Ok(out)
    }
}
