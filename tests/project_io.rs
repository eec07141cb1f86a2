use std::sync::Arc;
use std::thread;

use refstudio::{
    Adjustment, AdjustmentEngine, BackendPreference, BlendMode, Channels, ColorDepth, CompositionPipeline,
    DenoiseStrategy, EngineError, EngineParams, Layer, PixelBuffer, Project, SaveFormat, SharedProject, Transform,
    load_image, save_image,
};

fn pipeline() -> CompositionPipeline {
    CompositionPipeline::new(Arc::new(AdjustmentEngine::cpu_only()))
}

fn sample_project() -> Project {
    let mut project = Project::new("board", 40, 30).unwrap();
    project.params = EngineParams {
        backend: BackendPreference::Cpu,
        default_denoise: DenoiseStrategy::Bilateral,
    };
    project
        .push_layer(Layer::new("bg", PixelBuffer::filled(40, 30, [30, 60, 90, 255])))
        .unwrap();
    let deep = PixelBuffer::filled(12, 10, [200, 20, 120, 180]).convert(Channels::Rgba, ColorDepth::U16);
    let ref_id = project
        .push_layer(
            Layer::new("ref", deep)
                .with_transform(Transform {
                    x: 6.5,
                    y: 3.0,
                    scale_x: 1.5,
                    scale_y: 1.25,
                    rotation: 15.0,
                })
                .with_opacity(0.7)
                .with_blend_mode(BlendMode::Screen),
        )
        .unwrap();
    project
        .push_adjustment(ref_id, Adjustment::brightness_contrast(0.1, 1.2))
        .unwrap();
    let hidden = project
        .push_layer(Layer::new("hidden", PixelBuffer::filled(5, 5, [0, 255, 0, 255])))
        .unwrap();
    project.set_visibility(hidden, false).unwrap();
    project.set_locked(hidden, true).unwrap();
    project
}

#[test]
fn project_round_trip_renders_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("board.rsp");
    let mut project = sample_project();
    project.save_as(&path).unwrap();
    assert!(!project.is_dirty);
    assert_eq!(project.path.as_deref(), Some(path.as_path()));

    let loaded = Project::open(&path).unwrap();
    assert_eq!(loaded.name, "board");
    assert_eq!(loaded.params, project.params);
    assert_eq!(loaded.stack().len(), 3);
    assert!(!loaded.can_undo());

    let names: Vec<&str> = loaded.stack().iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, ["bg", "ref", "hidden"]);
    let hidden = loaded.stack().layer_at(2).unwrap();
    assert!(!hidden.visible && hidden.locked);
    let reference = loaded.stack().layer_at(1).unwrap();
    assert_eq!(reference.buffer.depth(), ColorDepth::U16);
    assert_eq!(reference.adjustments.len(), 1);

    let p = pipeline();
    assert_eq!(loaded.render(&p).unwrap(), project.render(&p).unwrap());
}

#[test]
fn wrong_magic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.rsp");
    let mut bytes = vec![4, 0, 0, 0, 0, 0, 0, 0];
    bytes.extend_from_slice(b"NOPE");
    bytes.extend_from_slice(&[0; 32]);
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(Project::open(&path), Err(EngineError::InvalidFormat(_))));
}

#[test]
fn truncated_project_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.rsp");
    sample_project().save_as(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = Project::open(&path).unwrap_err();
    assert!(err.is_io_failure());
}

#[test]
fn missing_file_is_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    let err = Project::open(&dir.path().join("absent.rsp")).unwrap_err();
    assert!(matches!(err, EngineError::Io(_)));
}

#[test]
fn png_export_matches_composite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.png");
    let project = sample_project();
    let composite = project.render(&pipeline()).unwrap();

    save_image(&composite, &path, SaveFormat::Png).unwrap();
    let back = load_image(&path).unwrap();
    assert_eq!(back.dimensions(), (40, 30));
    assert_eq!(back.channels(), Channels::Rgba);
    assert_eq!(back.data(), composite.data());
}

#[test]
fn jpeg_export_drops_alpha() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.jpg");
    let buf = PixelBuffer::filled(16, 16, [120, 60, 30, 128]);
    save_image(&buf, &path, SaveFormat::from_path(&path).unwrap()).unwrap();
    let back = load_image(&path).unwrap();
    assert_eq!(back.channels(), Channels::Rgb);
    assert_eq!(back.dimensions(), (16, 16));
}

/// Opaque gradient so lossy-free formats can be compared exactly.
fn gradient(w: u32, h: u32) -> PixelBuffer {
    let mut data = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            data.extend_from_slice(&[(x * 16) as u8, (y * 16) as u8, 77, 255]);
        }
    }
    PixelBuffer::from_rgba8(w, h, data).unwrap()
}

#[test]
fn webp_export_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.webp");
    let buf = gradient(9, 6);
    save_image(&buf, &path, SaveFormat::Webp).unwrap();

    let back = load_image(&path).unwrap();
    assert_eq!(back.dimensions(), (9, 6));
    for (x, y) in [(0, 0), (8, 0), (4, 3), (8, 5)] {
        assert_eq!(back.pixel_rgba8(x, y), buf.pixel_rgba8(x, y));
    }
}

#[test]
fn webp_export_ignores_path_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mislabeled.png");
    save_image(&gradient(4, 4), &path, SaveFormat::Webp).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WEBP");
}

#[test]
fn bmp_tga_and_tiff_exports_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let buf = gradient(7, 5);
    for format in [SaveFormat::Bmp, SaveFormat::Tga, SaveFormat::Tiff] {
        let path = dir.path().join(format!("flat.{}", format.extension()));
        save_image(&buf, &path, format).unwrap();

        let back = load_image(&path).unwrap();
        assert_eq!(back.dimensions(), (7, 5), "{:?}", format);
        for (x, y) in [(0, 0), (6, 4), (3, 2)] {
            let got = back.pixel_rgba8(x, y);
            let want = buf.pixel_rgba8(x, y);
            assert_eq!(got[..3], want[..3], "{:?} at ({}, {})", format, x, y);
        }
    }
}

#[test]
fn empty_buffer_cannot_be_encoded() {
    let dir = tempfile::tempdir().unwrap();
    let err = save_image(&PixelBuffer::transparent(0, 0), &dir.path().join("e.png"), SaveFormat::Png).unwrap_err();
    assert!(matches!(err, EngineError::InvalidBuffer(_)));
}

// ============================================================================
// Shared access
// ============================================================================

#[test]
fn shared_project_serialises_writers_and_renders_consistently() {
    let shared = SharedProject::new(Project::new("shared", 8, 8).unwrap());
    let id = shared
        .mutate(|p| p.push_layer(Layer::new("base", PixelBuffer::filled(8, 8, [0, 0, 0, 255]))))
        .unwrap();

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let shared = shared.clone();
            thread::spawn(move || {
                for step in 0..5 {
                    let opacity = 0.1 * ((i * 5 + step) % 10) as f32;
                    shared.mutate(|p| p.set_opacity(id, opacity)).unwrap();
                }
            })
        })
        .collect();

    let p = pipeline();
    for _ in 0..10 {
        let frame = shared.render(&p).unwrap();
        assert_eq!(frame.dimensions(), (8, 8));
        let a = frame.pixel_rgba8(0, 0)[3];
        assert!(frame.data().chunks_exact(4).all(|px| px[3] == a));
    }
    for w in writers {
        w.join().unwrap();
    }

    let recorded = shared.read(|p| p.history().undo_count()).unwrap();
    assert_eq!(recorded, 21);
}

#[test]
fn failed_mutation_inside_shared_project_is_not_recorded() {
    let shared = SharedProject::new(Project::new("shared", 4, 4).unwrap());
    let depth_before = shared.read(|p| p.history().undo_count()).unwrap();
    let err = shared
        .mutate(|p| p.add_layer(3, Layer::new("x", PixelBuffer::filled(1, 1, [0, 0, 0, 255]))))
        .unwrap_err();
    assert!(matches!(err, EngineError::OutOfRange { .. }));
    assert_eq!(shared.read(|p| p.history().undo_count()).unwrap(), depth_before);
    assert!(shared.read(|p| p.stack().is_empty()).unwrap());
}
