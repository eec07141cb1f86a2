use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::tga::TgaEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::buffer::{Channels, ColorDepth, PixelBuffer};
use crate::canvas::{Layer, LayerStack, MAX_CANVAS_DIM, Transform};
use crate::error::EngineError;
use crate::ops::adjustments::Adjustment;
use crate::project::{EngineParams, Project};

// ============================================================================
// RSP PROJECT FILE FORMAT
// ============================================================================

/// Magic header for the layered project format.
const RSP_MAGIC: &str = "RSP1";

/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
struct ProjectFile {
    magic: String,
    width: u32,
    height: u32,
    name: String,
    params: EngineParams,
    /// Back-to-front.
    layers: Vec<LayerData>,
}

#[derive(Serialize, Deserialize)]
struct LayerData {
    name: String,
    width: u32,
    height: u32,
    channels: Channels,
    depth: ColorDepth,
    pixels: Vec<u8>,
    x: f32,
    y: f32,
    scale_x: f32,
    scale_y: f32,
    rotation: f32,
    opacity: f32,
    blend_mode: u8,
    visible: bool,
    locked: bool,
    adjustments: Vec<Adjustment>,
}

fn build_project_file(project: &Project) -> ProjectFile {
    let stack = project.stack();
    let layers = stack
        .iter()
        .map(|layer| LayerData {
            name: layer.name.clone(),
            width: layer.width(),
            height: layer.height(),
            channels: layer.buffer.channels(),
            depth: layer.buffer.depth(),
            pixels: layer.buffer.data().to_vec(),
            x: layer.transform.x,
            y: layer.transform.y,
            scale_x: layer.transform.scale_x,
            scale_y: layer.transform.scale_y,
            rotation: layer.transform.rotation,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode.to_u8(),
            visible: layer.visible,
            locked: layer.locked,
            adjustments: layer.adjustments.clone(),
        })
        .collect();

    ProjectFile {
        magic: RSP_MAGIC.to_string(),
        width: stack.width(),
        height: stack.height(),
        name: project.name.clone(),
        params: project.params,
        layers,
    }
}

/// Serialize a project to `path`.  History is not stored.
pub fn save_project(project: &Project, path: &Path) -> Result<(), EngineError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &build_project_file(project))?;
    log::info!(
        "Saved project '{}' ({} layers) to {}",
        project.name,
        project.stack().len(),
        path.display()
    );
    Ok(())
}

/// Load a `.rsp` project.  Layer ids are assigned afresh in stack order.
pub fn load_project(path: &Path) -> Result<Project, EngineError> {
    let raw = std::fs::read(path)?;
    let mut project = project_from_bytes(&raw)?;
    project.path = Some(path.to_path_buf());
    log::info!(
        "Loaded project '{}' ({} layers) from {}",
        project.name,
        project.stack().len(),
        path.display()
    );
    Ok(project)
}

fn project_from_bytes(raw: &[u8]) -> Result<Project, EngineError> {
    if raw.len() < 12 {
        return Err(EngineError::InvalidFormat("File too small".into()));
    }
    // bincode encodes a String as an 8-byte length prefix + UTF-8 data, so
    // bytes 8..12 hold the 4-char magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != RSP_MAGIC {
        return Err(EngineError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }

    let file: ProjectFile = bincode::deserialize(raw)?;

    check_dimensions("Canvas", file.width, file.height)?;
    if file.layers.len() > MAX_LAYERS {
        return Err(EngineError::InvalidFormat(format!(
            "Project contains {} layers, which exceeds the maximum of {}",
            file.layers.len(),
            MAX_LAYERS
        )));
    }

    let mut stack = LayerStack::new(file.width, file.height)
        .map_err(|e| EngineError::InvalidFormat(e.to_string()))?;
    for ld in file.layers {
        check_dimensions(&format!("Layer '{}'", ld.name), ld.width, ld.height)?;
        let buffer = PixelBuffer::new(ld.width, ld.height, ld.channels, ld.depth, ld.pixels)
            .map_err(|e| EngineError::InvalidFormat(format!("layer '{}': {}", ld.name, e)))?;
        for adjustment in &ld.adjustments {
            adjustment
                .validate()
                .map_err(|e| EngineError::InvalidFormat(format!("layer '{}': {}", ld.name, e)))?;
        }
        let numeric = [ld.x, ld.y, ld.scale_x, ld.scale_y, ld.rotation, ld.opacity];
        if numeric.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidFormat(format!(
                "layer '{}' has a non-finite transform or opacity",
                ld.name
            )));
        }

        let mut layer = Layer::new(ld.name, buffer)
            .with_transform(Transform {
                x: ld.x,
                y: ld.y,
                scale_x: ld.scale_x,
                scale_y: ld.scale_y,
                rotation: ld.rotation,
            })
            .with_opacity(ld.opacity)
            .with_blend_mode(BlendMode::from_u8(ld.blend_mode));
        layer.visible = ld.visible;
        layer.locked = ld.locked;
        layer.adjustments = ld.adjustments;

        layer.set_id(stack.allocate_id());
        stack.insert(stack.len(), layer)?;
    }

    Ok(Project::from_stack(file.name, stack, file.params))
}

fn check_dimensions(what: &str, width: u32, height: u32) -> Result<(), EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidFormat(format!("{} dimensions cannot be zero", what)));
    }
    if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        return Err(EngineError::InvalidFormat(format!(
            "{} size {}x{} exceeds maximum allowed {}x{}",
            what, width, height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    Ok(())
}

// ============================================================================
// IMAGE I/O
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Bmp,
    Tga,
    Tiff,
}

impl SaveFormat {
    pub fn all() -> &'static [SaveFormat] {
        &[
            SaveFormat::Png,
            SaveFormat::Jpeg,
            SaveFormat::Webp,
            SaveFormat::Bmp,
            SaveFormat::Tga,
            SaveFormat::Tiff,
        ]
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Webp => "webp",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
            SaveFormat::Tiff => "tiff",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "webp" => Some(SaveFormat::Webp),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            "tif" | "tiff" => Some(SaveFormat::Tiff),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the format keeps 16-bit samples.  Everything else is written
    /// as 8-bit.
    fn keeps_16_bit(&self) -> bool {
        matches!(self, SaveFormat::Png | SaveFormat::Tiff)
    }
}

/// Decode any supported raster image, keeping its channel layout and depth.
pub fn load_image(path: &Path) -> Result<PixelBuffer, EngineError> {
    let img = image::open(path)?;
    Ok(PixelBuffer::from_dynamic(&img))
}

/// Encode and write `buffer` in `format`.  Layouts the format cannot carry
/// are converted first (JPEG drops alpha, 8-bit-only formats get 8 bits).
pub fn save_image(buffer: &PixelBuffer, path: &Path, format: SaveFormat) -> Result<(), EngineError> {
    if buffer.is_empty() {
        return Err(EngineError::InvalidBuffer("cannot encode an empty buffer".into()));
    }
    let depth = match buffer.depth() {
        ColorDepth::U8 => ColorDepth::U8,
        _ if format.keeps_16_bit() => ColorDepth::U16,
        _ => ColorDepth::U8,
    };
    let create = || -> Result<BufWriter<File>, EngineError> { Ok(BufWriter::new(File::create(path)?)) };

    match format {
        SaveFormat::Png => {
            let mut writer = create()?;
            let img = buffer.convert(buffer.channels(), depth).to_dynamic()?;
            img.write_to(&mut writer, image::ImageOutputFormat::Png)?;
        }
        SaveFormat::Jpeg => {
            let mut writer = create()?;
            let rgb = buffer.convert(Channels::Rgb, ColorDepth::U8).to_dynamic()?.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, 90);
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
        SaveFormat::Webp => {
            // Lossless, whatever the path's extension says.
            let mut writer = create()?;
            DynamicImage::ImageRgba8(buffer.to_rgba8()).write_to(&mut writer, image::ImageOutputFormat::WebP)?;
        }
        SaveFormat::Bmp => {
            let mut writer = create()?;
            let rgba = buffer.to_rgba8();
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(rgba.as_raw(), rgba.width(), rgba.height(), image::ColorType::Rgba8)?;
        }
        SaveFormat::Tga => {
            let mut writer = create()?;
            let rgba = buffer.to_rgba8();
            let encoder = TgaEncoder::new(&mut writer);
            encoder.encode(rgba.as_raw(), rgba.width(), rgba.height(), image::ColorType::Rgba8)?;
        }
        SaveFormat::Tiff => {
            let mut writer = create()?;
            let img = buffer.convert(buffer.channels(), depth).to_dynamic()?;
            img.write_to(&mut writer, image::ImageOutputFormat::Tiff)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_file_is_rejected() {
        assert!(matches!(project_from_bytes(b"RSP1"), Err(EngineError::InvalidFormat(_))));
    }

    fn one_layer_file(edit: impl FnOnce(&mut LayerData)) -> Vec<u8> {
        let mut layer = LayerData {
            name: "ref".into(),
            width: 2,
            height: 2,
            channels: Channels::Rgba,
            depth: ColorDepth::U8,
            pixels: vec![255; 16],
            x: 1.0,
            y: 2.0,
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: 0.0,
            opacity: 1.0,
            blend_mode: BlendMode::Normal.to_u8(),
            visible: true,
            locked: false,
            adjustments: Vec::new(),
        };
        edit(&mut layer);
        let file = ProjectFile {
            magic: RSP_MAGIC.to_string(),
            width: 4,
            height: 4,
            name: "doc".into(),
            params: EngineParams::default(),
            layers: vec![layer],
        };
        bincode::serialize(&file).unwrap()
    }

    #[test]
    fn non_finite_layer_values_are_rejected() {
        assert!(project_from_bytes(&one_layer_file(|_| {})).is_ok());

        let edits: [fn(&mut LayerData); 4] = [
            |l| l.opacity = f32::NAN,
            |l| l.x = f32::INFINITY,
            |l| l.scale_y = f32::NAN,
            |l| l.rotation = f32::NEG_INFINITY,
        ];
        for edit in edits {
            let loaded = project_from_bytes(&one_layer_file(edit));
            assert!(matches!(loaded, Err(EngineError::InvalidFormat(_))));
        }
    }

    #[test]
    fn oversized_canvas_is_rejected() {
        let mut raw = one_layer_file(|_| {});
        // width follows the 8-byte length prefix and 4-byte magic
        raw[12..16].copy_from_slice(&(MAX_CANVAS_DIM + 1).to_le_bytes());
        assert!(matches!(project_from_bytes(&raw), Err(EngineError::InvalidFormat(_))));
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(SaveFormat::from_path(Path::new("a/b.JPEG")), Some(SaveFormat::Jpeg));
        assert_eq!(SaveFormat::from_path(Path::new("a/b.rsp")), None);
        for f in SaveFormat::all() {
            assert_eq!(SaveFormat::from_extension(f.extension()), Some(*f));
        }
    }

    #[test]
    fn sixteen_bit_png_keeps_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.png");
        let buf = PixelBuffer::filled(3, 2, [10, 20, 30, 255]).convert(Channels::Rgba, ColorDepth::U16);
        save_image(&buf, &path, SaveFormat::Png).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.depth(), ColorDepth::U16);
        assert_eq!(back, buf);
    }
}
