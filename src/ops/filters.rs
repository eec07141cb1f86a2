// ============================================================================
// CONVOLUTION FILTERS — separable Gaussian blur and signed sharpen/blur
// ============================================================================
//
// Everything here works on the normalized RGBA working form (4 × f32 per
// pixel, row-major).  Borders replicate the nearest edge pixel.

use rayon::prelude::*;

use crate::cancel::CancellationToken;
use crate::error::EngineError;

/// Largest kernel radius accepted by the convolution filters.
pub const MAX_KERNEL_RADIUS: u32 = 64;

/// Normalized 1-D Gaussian of length `2 * radius + 1` with sigma = radius / 2.
pub fn build_gaussian_kernel(radius: u32) -> Vec<f32> {
    if radius == 0 {
        return vec![1.0];
    }
    let sigma = (radius as f32 / 2.0).max(0.5);
    let s2 = 2.0 * sigma * sigma;
    let r = radius as i32;
    let mut kernel: Vec<f32> = (-r..=r)
        .map(|x| {
            let x = x as f32;
            (-x * x / s2).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Two-pass separable Gaussian blur over all four channels.
pub fn gaussian_blur(
    src: &[f32],
    width: usize,
    height: usize,
    radius: u32,
    cancel: &CancellationToken,
) -> Result<Vec<f32>, EngineError> {
    if radius == 0 || width == 0 || height == 0 {
        return Ok(src.to_vec());
    }
    let kernel = build_gaussian_kernel(radius);
    let r = radius as i64;
    let stride = width * 4;

    // Horizontal pass: src -> tmp
    let mut tmp = vec![0.0f32; src.len()];
    tmp.par_chunks_mut(stride)
        .enumerate()
        .try_for_each(|(y, row)| {
            cancel.check()?;
            let src_row = &src[y * stride..(y + 1) * stride];
            for x in 0..width {
                let mut acc = [0.0f32; 4];
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = (x as i64 + k as i64 - r).clamp(0, width as i64 - 1) as usize;
                    let p = &src_row[sx * 4..sx * 4 + 4];
                    for c in 0..4 {
                        acc[c] += p[c] * weight;
                    }
                }
                row[x * 4..x * 4 + 4].copy_from_slice(&acc);
            }
            Ok::<(), EngineError>(())
        })?;

    // Vertical pass: tmp -> out
    let mut out = vec![0.0f32; src.len()];
    out.par_chunks_mut(stride)
        .enumerate()
        .try_for_each(|(y, row)| {
            cancel.check()?;
            for x in 0..width {
                let mut acc = [0.0f32; 4];
                for (k, weight) in kernel.iter().enumerate() {
                    let sy = (y as i64 + k as i64 - r).clamp(0, height as i64 - 1) as usize;
                    let i = (sy * width + x) * 4;
                    for c in 0..4 {
                        acc[c] += tmp[i + c] * weight;
                    }
                }
                row[x * 4..x * 4 + 4].copy_from_slice(&acc);
            }
            Ok::<(), EngineError>(())
        })?;

    Ok(out)
}

/// Combine an image with its blurred copy.
///
/// * `amount < 0` blurs: moves toward `blurred` by `min(|amount|, 1)`.
/// * `amount > 0` sharpens: unsharp mask `orig + amount * (orig - blurred)`
///   on colour channels, alpha untouched.
pub fn combine_sharpen_blur(src: &[f32], blurred: &[f32], amount: f32) -> Vec<f32> {
    if amount < 0.0 {
        let t = amount.abs().min(1.0);
        src.par_iter()
            .zip(blurred.par_iter())
            .map(|(&o, &b)| o + (b - o) * t)
            .collect()
    } else {
        src.par_chunks(4)
            .zip(blurred.par_chunks(4))
            .flat_map_iter(|(o, b)| {
                let sharpen = |c: usize| (o[c] + amount * (o[c] - b[c])).clamp(0.0, 1.0);
                [sharpen(0), sharpen(1), sharpen(2), o[3]]
            })
            .collect()
    }
}

/// Linear blend of colour channels toward `filtered` by `strength`; alpha kept.
pub fn mix_color(src: &[f32], filtered: &[f32], strength: f32) -> Vec<f32> {
    let t = strength.clamp(0.0, 1.0);
    src.par_chunks(4)
        .zip(filtered.par_chunks(4))
        .flat_map_iter(|(o, f)| {
            let mix = |c: usize| o[c] + (f[c] - o[c]) * t;
            [mix(0), mix(1), mix(2), o[3]]
        })
        .collect()
}
