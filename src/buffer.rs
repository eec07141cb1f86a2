// ============================================================================
// PIXEL BUFFER — immutable 2D sample storage with layout metadata
// ============================================================================
//
// Samples are packed row-major, channel-interleaved.  16-bit samples are
// little-endian u16, float samples are little-endian f32 (nominally 0..1).
// Storage is an `Arc<[u8]>` so clones share pixels; every operation that
// changes pixels builds a new buffer.

use std::sync::Arc;

use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channels {
    Gray,
    Rgb,
    Rgba,
}

impl Channels {
    pub fn count(self) -> usize {
        match self {
            Channels::Gray => 1,
            Channels::Rgb => 3,
            Channels::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Channels::Rgba)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorDepth {
    U8,
    U16,
    F32,
}

impl ColorDepth {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            ColorDepth::U8 => 1,
            ColorDepth::U16 => 2,
            ColorDepth::F32 => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: Channels,
    depth: ColorDepth,
    data: Arc<[u8]>,
}

impl PixelBuffer {
    /// Build a buffer from raw samples.  Fails with `InvalidBuffer` when the
    /// byte length does not match `width * height * channels * bytes_per_sample`.
    pub fn new(
        width: u32,
        height: u32,
        channels: Channels,
        depth: ColorDepth,
        data: Vec<u8>,
    ) -> Result<Self, EngineError> {
        let expected = Self::expected_len(width, height, channels, depth).ok_or_else(|| {
            EngineError::InvalidBuffer(format!("{}x{} buffer size overflows", width, height))
        })?;
        if data.len() != expected {
            return Err(EngineError::InvalidBuffer(format!(
                "{}x{} {:?}/{:?} needs {} bytes, got {}",
                width,
                height,
                channels,
                depth,
                expected,
                data.len()
            )));
        }
        Ok(Self::from_parts(width, height, channels, depth, data))
    }

    pub fn expected_len(
        width: u32,
        height: u32,
        channels: Channels,
        depth: ColorDepth,
    ) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(channels.count())?
            .checked_mul(depth.bytes_per_sample())
    }

    fn from_parts(
        width: u32,
        height: u32,
        channels: Channels,
        depth: ColorDepth,
        data: Vec<u8>,
    ) -> Self {
        Self {
            width,
            height,
            channels,
            depth,
            data: data.into(),
        }
    }

    /// Solid 8-bit RGBA buffer.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self::from_parts(width, height, Channels::Rgba, ColorDepth::U8, data)
    }

    pub fn transparent(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, EngineError> {
        Self::new(width, height, Channels::Rgba, ColorDepth::U8, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn depth(&self) -> ColorDepth {
        self.depth
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes held by the sample storage.
    pub fn memory_size(&self) -> usize {
        self.data.len()
    }

    /// True when both buffers share the same sample storage.
    pub fn shares_storage(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    fn bytes_per_pixel(&self) -> usize {
        self.channels.count() * self.depth.bytes_per_sample()
    }

    /// Normalized sample of channel `c` at (x, y).  Out-of-range reads return 0.
    pub fn sample(&self, x: u32, y: u32, c: usize) -> f32 {
        if x >= self.width || y >= self.height || c >= self.channels.count() {
            return 0.0;
        }
        let bps = self.depth.bytes_per_sample();
        let offset = (y as usize * self.width as usize + x as usize) * self.bytes_per_pixel() + c * bps;
        decode_sample(self.depth, &self.data[offset..offset + bps])
    }

    /// Pixel expanded to normalized RGBA (gray is replicated, missing alpha is 1).
    pub fn pixel_rgba(&self, x: u32, y: u32) -> [f32; 4] {
        match self.channels {
            Channels::Gray => {
                let v = self.sample(x, y, 0);
                [v, v, v, 1.0]
            }
            Channels::Rgb => [self.sample(x, y, 0), self.sample(x, y, 1), self.sample(x, y, 2), 1.0],
            Channels::Rgba => [
                self.sample(x, y, 0),
                self.sample(x, y, 1),
                self.sample(x, y, 2),
                self.sample(x, y, 3),
            ],
        }
    }

    /// Pixel quantized to 8-bit RGBA.
    pub fn pixel_rgba8(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixel_rgba(x, y).map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    /// 8-bit RGBA under a fractional position, truncated to a pixel and
    /// clamped to the buffer edge.  `None` only for an empty buffer.
    pub fn pixel_clamped(&self, x: f32, y: f32) -> Option<[u8; 4]> {
        if self.is_empty() {
            return None;
        }
        let px = (x as i64).clamp(0, self.width as i64 - 1) as u32;
        let py = (y as i64).clamp(0, self.height as i64 - 1) as u32;
        Some(self.pixel_rgba8(px, py))
    }

    /// Expand to the normalized RGBA working form used by adjustments and
    /// compositing: four f32 per pixel.
    pub fn to_rgba_f32(&self) -> Vec<f32> {
        let w = self.width as usize;
        let mut out = vec![0.0f32; self.pixel_count() * 4];
        if self.is_empty() {
            return out;
        }
        let ch = self.channels.count();
        let bps = self.depth.bytes_per_sample();
        let depth = self.depth;
        let channels = self.channels;

        out.par_chunks_mut(w * 4)
            .zip(self.data.par_chunks(w * ch * bps))
            .for_each(|(dst, src)| {
                for x in 0..w {
                    let px = &src[x * ch * bps..(x + 1) * ch * bps];
                    let s = |c: usize| decode_sample(depth, &px[c * bps..(c + 1) * bps]);
                    let rgba = match channels {
                        Channels::Gray => {
                            let v = s(0);
                            [v, v, v, 1.0]
                        }
                        Channels::Rgb => [s(0), s(1), s(2), 1.0],
                        Channels::Rgba => [s(0), s(1), s(2), s(3)],
                    };
                    dst[x * 4..x * 4 + 4].copy_from_slice(&rgba);
                }
            });
        out
    }

    /// Pack normalized RGBA back into the requested layout.  Gray output takes
    /// the shared value when R=G=B, otherwise Rec. 709 luma.
    pub fn from_rgba_f32(
        width: u32,
        height: u32,
        channels: Channels,
        depth: ColorDepth,
        rgba: &[f32],
    ) -> Self {
        let w = width as usize;
        let ch = channels.count();
        let bps = depth.bytes_per_sample();
        debug_assert_eq!(rgba.len(), w * height as usize * 4);
        let mut data = vec![0u8; w * height as usize * ch * bps];
        if !data.is_empty() {
            data.par_chunks_mut(w * ch * bps)
                .zip(rgba.par_chunks(w * 4))
                .for_each(|(dst, src)| {
                    for x in 0..w {
                        let p = &src[x * 4..x * 4 + 4];
                        let out = &mut dst[x * ch * bps..(x + 1) * ch * bps];
                        match channels {
                            Channels::Gray => encode_sample(depth, gray_of(p), out),
                            Channels::Rgb | Channels::Rgba => {
                                for c in 0..ch {
                                    encode_sample(depth, p[c], &mut out[c * bps..(c + 1) * bps]);
                                }
                            }
                        }
                    }
                });
        }
        Self::from_parts(width, height, channels, depth, data)
    }

    /// Convert to another layout.  Same layout is a cheap clone.
    pub fn convert(&self, channels: Channels, depth: ColorDepth) -> PixelBuffer {
        if self.channels == channels && self.depth == depth {
            return self.clone();
        }
        Self::from_rgba_f32(self.width, self.height, channels, depth, &self.to_rgba_f32())
    }

    /// Copy out the rectangle (x, y, w, h).  The rectangle must lie inside the buffer.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Result<PixelBuffer, EngineError> {
        let right = x.checked_add(w).filter(|r| *r <= self.width);
        let bottom = y.checked_add(h).filter(|b| *b <= self.height);
        if right.is_none() {
            return Err(EngineError::OutOfRange {
                index: x as usize + w as usize,
                max: self.width as usize,
            });
        }
        if bottom.is_none() {
            return Err(EngineError::OutOfRange {
                index: y as usize + h as usize,
                max: self.height as usize,
            });
        }
        let bpp = self.bytes_per_pixel();
        let src_stride = self.width as usize * bpp;
        let row_bytes = w as usize * bpp;
        let mut data = Vec::with_capacity(row_bytes * h as usize);
        for row in y..y + h {
            let start = row as usize * src_stride + x as usize * bpp;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Ok(Self::from_parts(w, h, self.channels, self.depth, data))
    }

    /// 8-bit RGBA copy for display surfaces and 8-bit codecs.
    pub fn to_rgba8(&self) -> RgbaImage {
        let converted = self.convert(Channels::Rgba, ColorDepth::U8);
        RgbaImage::from_raw(self.width, self.height, converted.data.to_vec())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    /// Wrap a decoded image, keeping its channel layout and depth where possible.
    pub fn from_dynamic(img: &DynamicImage) -> PixelBuffer {
        let (w, h) = (img.width(), img.height());
        match img {
            DynamicImage::ImageLuma8(b) => {
                Self::from_parts(w, h, Channels::Gray, ColorDepth::U8, b.as_raw().clone())
            }
            DynamicImage::ImageRgb8(b) => {
                Self::from_parts(w, h, Channels::Rgb, ColorDepth::U8, b.as_raw().clone())
            }
            DynamicImage::ImageRgba8(b) => {
                Self::from_parts(w, h, Channels::Rgba, ColorDepth::U8, b.as_raw().clone())
            }
            DynamicImage::ImageLuma16(b) => {
                Self::from_parts(w, h, Channels::Gray, ColorDepth::U16, u16_to_le(b.as_raw()))
            }
            DynamicImage::ImageRgb16(b) => {
                Self::from_parts(w, h, Channels::Rgb, ColorDepth::U16, u16_to_le(b.as_raw()))
            }
            DynamicImage::ImageRgba16(b) => {
                Self::from_parts(w, h, Channels::Rgba, ColorDepth::U16, u16_to_le(b.as_raw()))
            }
            DynamicImage::ImageRgb32F(b) => {
                Self::from_parts(w, h, Channels::Rgb, ColorDepth::F32, f32_to_le(b.as_raw()))
            }
            DynamicImage::ImageRgba32F(b) => {
                Self::from_parts(w, h, Channels::Rgba, ColorDepth::F32, f32_to_le(b.as_raw()))
            }
            // LumaA and anything newer the codec hands back
            other => Self::from_parts(
                w,
                h,
                Channels::Rgba,
                ColorDepth::U8,
                other.to_rgba8().into_raw(),
            ),
        }
    }

    /// Hand the buffer to the `image` crate in its native layout.
    pub fn to_dynamic(&self) -> Result<DynamicImage, EngineError> {
        let (w, h) = (self.width, self.height);
        let bad = || EngineError::InvalidBuffer("sample count does not match dimensions".into());
        let img = match (self.channels, self.depth) {
            (Channels::Gray, ColorDepth::U8) => {
                DynamicImage::ImageLuma8(ImageBuffer::<Luma<u8>, _>::from_raw(w, h, self.data.to_vec()).ok_or_else(bad)?)
            }
            (Channels::Rgb, ColorDepth::U8) => {
                DynamicImage::ImageRgb8(ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, self.data.to_vec()).ok_or_else(bad)?)
            }
            (Channels::Rgba, ColorDepth::U8) => {
                DynamicImage::ImageRgba8(ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, self.data.to_vec()).ok_or_else(bad)?)
            }
            (Channels::Gray, ColorDepth::U16) => {
                DynamicImage::ImageLuma16(ImageBuffer::<Luma<u16>, _>::from_raw(w, h, le_to_u16(&self.data)).ok_or_else(bad)?)
            }
            (Channels::Rgb, ColorDepth::U16) => {
                DynamicImage::ImageRgb16(ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, le_to_u16(&self.data)).ok_or_else(bad)?)
            }
            (Channels::Rgba, ColorDepth::U16) => {
                DynamicImage::ImageRgba16(ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, le_to_u16(&self.data)).ok_or_else(bad)?)
            }
            (Channels::Rgb, ColorDepth::F32) => {
                DynamicImage::ImageRgb32F(ImageBuffer::<Rgb<f32>, _>::from_raw(w, h, le_to_f32(&self.data)).ok_or_else(bad)?)
            }
            (Channels::Rgba, ColorDepth::F32) => {
                DynamicImage::ImageRgba32F(ImageBuffer::<Rgba<f32>, _>::from_raw(w, h, le_to_f32(&self.data)).ok_or_else(bad)?)
            }
            // No float gray in the image crate
            (Channels::Gray, ColorDepth::F32) => {
                return self.convert(Channels::Rgba, ColorDepth::F32).to_dynamic();
            }
        };
        Ok(img)
    }
}

// ============================================================================
// SAMPLE CODEC
// ============================================================================

fn decode_sample(depth: ColorDepth, bytes: &[u8]) -> f32 {
    match depth {
        ColorDepth::U8 => bytes[0] as f32 / 255.0,
        ColorDepth::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 65535.0,
        ColorDepth::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

fn encode_sample(depth: ColorDepth, v: f32, out: &mut [u8]) {
    match depth {
        ColorDepth::U8 => out[0] = (v.clamp(0.0, 1.0) * 255.0).round() as u8,
        ColorDepth::U16 => {
            let q = (v.clamp(0.0, 1.0) * 65535.0).round() as u16;
            out.copy_from_slice(&q.to_le_bytes());
        }
        ColorDepth::F32 => out.copy_from_slice(&v.to_le_bytes()),
    }
}

fn gray_of(p: &[f32]) -> f32 {
    if p[0] == p[1] && p[1] == p[2] {
        p[0]
    } else {
        0.2126 * p[0] + 0.7152 * p[1] + 0.0722 * p[2]
    }
}

fn u16_to_le(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn f32_to_le(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn le_to_u16(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect()
}

fn le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
