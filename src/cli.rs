// ============================================================================
// RefStudio CLI — headless batch adjustments via command-line arguments
// ============================================================================
//
// Usage examples:
//   refstudio --input photo.png --brightness 0.1 --contrast 1.2 --output result.png
//   refstudio -i *.jpg --denoise bilateral --denoise-strength 0.6 --output-dir out/
//   refstudio -i board.rsp --output flat.jpg
//   refstudio -i a.png b.png --temperature 0.4 --output-dir warm/ --format rsp
//
// Each input becomes a project (one layer for raster files, every layer for
// .rsp files).  The requested adjustments are queued on every layer and the
// project is rendered through the composition pipeline before saving.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use crate::canvas::Layer;
use crate::compositor::CompositionPipeline;
use crate::error::EngineError;
use crate::io::{SaveFormat, load_image, save_image};
use crate::ops::adjustments::{Adjustment, AdjustmentEngine, BackendPreference};
use crate::ops::denoise::DenoiseStrategy;
use crate::project::Project;
use crate::settings::EngineSettings;

const PROJECT_EXTENSION: &str = "rsp";

// ============================================================================
// ARGUMENTS
// ============================================================================

/// RefStudio headless image processor.
///
/// Apply non-destructive adjustments to images or projects and write the
/// composite, with no GUI.
#[derive(Parser, Debug)]
#[command(
    name = "refstudio",
    about = "RefStudio headless batch image processor",
    long_about = "Apply brightness/contrast, sharpen/blur, colour balance and noise\n\
                  reduction to image files or RSP projects and write the composite.\n\
                  Supports PNG, JPEG, WEBP, BMP, TGA, TIFF and RSP project files.\n\n\
                  Example:\n  \
                  refstudio --input photo.png --contrast 1.2 --output result.png\n  \
                  refstudio -i *.jpg --denoise median --output-dir out/ --format png"
)]
pub struct CliArgs {
    /// Images or .rsp projects to process; globs such as "shots/*.jpg" are expanded.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Destination file when processing a single input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Destination directory; one output per input, named after its stem.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, webp, bmp, tga, tiff, rsp.
    /// When omitted, inferred from --output's extension, defaulting to png.
    /// Any other name is rejected.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Brightness offset in normalized units (-1..1).
    #[arg(long, allow_negative_numbers = true)]
    pub brightness: Option<f32>,

    /// Contrast factor (1.0 = unchanged).
    #[arg(long)]
    pub contrast: Option<f32>,

    /// Sharpen amount; negative values blur.
    #[arg(long, allow_negative_numbers = true)]
    pub sharpen: Option<f32>,

    /// Gaussian kernel radius for --sharpen.
    #[arg(long, default_value_t = 2)]
    pub radius: u32,

    /// Colour temperature shift (-1 cool .. 1 warm).
    #[arg(long, allow_negative_numbers = true)]
    pub temperature: Option<f32>,

    /// Noise reduction strategy: median, bilateral, nlm.
    #[arg(long, value_name = "STRATEGY")]
    pub denoise: Option<String>,

    /// Noise reduction strength (0..1).
    #[arg(long, default_value_t = 0.5)]
    pub denoise_strength: f32,

    /// Noise reduction window radius.
    #[arg(long, default_value_t = 2)]
    pub denoise_radius: u32,

    /// Engine settings file (defaults to the per-user settings file).
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Force the CPU backend even when a GPU is available.
    #[arg(long)]
    pub cpu: bool,

    /// Mirror the log to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Where a processed input is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Image(SaveFormat),
    Project,
}

impl OutputFormat {
    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Image(f) => f.extension(),
            OutputFormat::Project => PROJECT_EXTENSION,
        }
    }
}

impl CliArgs {
    /// Adjustments requested on the command line, in application order.
    pub fn adjustments(&self) -> Result<Vec<Adjustment>, EngineError> {
        let mut out = Vec::new();
        if let Some(name) = &self.denoise {
            let strategy = DenoiseStrategy::from_key(name)
                .ok_or_else(|| EngineError::InvalidParameter(format!("unknown denoise strategy '{}'", name)))?;
            out.push(Adjustment::NoiseReduction {
                strategy,
                strength: self.denoise_strength,
                radius: self.denoise_radius,
            });
        }
        if self.brightness.is_some() || self.contrast.is_some() {
            out.push(Adjustment::brightness_contrast(
                self.brightness.unwrap_or(0.0),
                self.contrast.unwrap_or(1.0),
            ));
        }
        if let Some(t) = self.temperature {
            out.push(Adjustment::temperature(t));
        }
        if let Some(amount) = self.sharpen {
            out.push(Adjustment::SharpenBlur {
                radius: self.radius,
                amount,
            });
        }
        for adjustment in &out {
            adjustment.validate()?;
        }
        Ok(out)
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Process every input.  Failure of one file does not stop the batch, but
/// the exit code is `FAILURE` if any file failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: nothing to process.");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: --output names one file but {} inputs were given; use --output-dir instead.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let adjustments = match args.adjustments() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut settings = match &args.settings {
        Some(path) => match EngineSettings::load_from(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: could not read settings '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => EngineSettings::load(),
    };
    if args.cpu {
        settings.backend = BackendPreference::Cpu;
    }

    let format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let engine = Arc::new(AdjustmentEngine::from_settings(&settings));
    log::info!("Adjustments run on {}", engine.backend_name());
    let pipeline = CompositionPipeline::new(engine).with_output_depth(settings.render_depth);

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            format,
        ) else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &adjustments, format, &pipeline, &settings) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if pipeline.engine().fallback_count() > 0 {
        log::warn!("{} GPU call(s) fell back to the CPU", pipeline.engine().fallback_count());
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// PER-FILE PIPELINE
// ============================================================================

fn run_one(
    input: &Path,
    output: &Path,
    adjustments: &[Adjustment],
    format: OutputFormat,
    pipeline: &CompositionPipeline,
    settings: &EngineSettings,
) -> Result<(), EngineError> {
    // Load
    let mut project = open_input(input, settings)?;

    // Queue the adjustments on every layer
    if !adjustments.is_empty() {
        let ids = project.stack().ids().to_vec();
        for id in ids {
            for adjustment in adjustments {
                project.push_adjustment(id, adjustment.clone())?;
            }
        }
    }

    // Write
    match format {
        OutputFormat::Project => project.save_as(output),
        OutputFormat::Image(save_format) => {
            let composite = project.render(pipeline)?;
            save_image(&composite, output, save_format)
        }
    }
}

fn open_input(input: &Path, settings: &EngineSettings) -> Result<Project, EngineError> {
    let is_project = input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(PROJECT_EXTENSION));
    if is_project {
        return Project::open(input);
    }

    let buffer = load_image(input)?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Layer".to_string());
    let mut project = Project::new(stem.clone(), buffer.width(), buffer.height())?;
    project.apply_settings(settings);
    project.path = Some(input.to_path_buf());
    project.push_layer(Layer::new(stem, buffer))?;
    Ok(project)
}

// ============================================================================
// INPUT / OUTPUT RESOLUTION
// ============================================================================

/// Turn `--input` arguments into files.  Existing paths are taken as
/// given, anything else is treated as a glob.  First occurrence wins.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let literal = PathBuf::from(pattern);
        if literal.exists() {
            push_unique(&mut files, literal);
            continue;
        }
        let entries = match glob::glob(pattern) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("warning: '{}' is not a valid pattern: {}", pattern, e);
                continue;
            }
        };
        let mut matched = false;
        for path in entries.flatten() {
            matched = true;
            push_unique(&mut files, path);
        }
        if !matched {
            eprintln!("warning: no files match '{}'.", pattern);
        }
    }

    files
}

fn push_unique(files: &mut Vec<PathBuf>, path: PathBuf) {
    if !files.contains(&path) {
        files.push(path);
    }
}

/// `--format` wins, then the `--output` extension, then PNG.  A name that
/// matches no format is an error rather than a silent PNG.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<OutputFormat, EngineError> {
    let (ext, source) = match (format_arg, output.and_then(|o| o.extension())) {
        (Some(f), _) => (f.to_string(), "--format"),
        (None, Some(e)) => (e.to_string_lossy().into_owned(), "--output extension"),
        (None, None) => return Ok(OutputFormat::Image(SaveFormat::Png)),
    };
    if ext.eq_ignore_ascii_case(PROJECT_EXTENSION) {
        return Ok(OutputFormat::Project);
    }
    SaveFormat::from_extension(&ext).map(OutputFormat::Image).ok_or_else(|| {
        EngineError::InvalidParameter(format!(
            "unsupported output format '{}' ({}); expected png, jpeg, webp, bmp, tga, tiff or rsp",
            ext, source
        ))
    })
}

/// Destination for one input: the explicit `--output`, else
/// `<output-dir>/<stem>.<ext>`, else next to the input.  Writing next to
/// the input never overwrites it; a `_out` suffix is added instead.
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: OutputFormat,
) -> Option<PathBuf> {
    if let Some(explicit) = output {
        return Some(explicit.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy();
    let file_name = |suffix: &str| format!("{}{}.{}", stem, suffix, format.extension());
    match output_dir {
        Some(dir) => Some(dir.join(file_name(""))),
        None => {
            let dir = input.parent().unwrap_or(Path::new("."));
            let beside = dir.join(file_name(""));
            Some(if beside == input { dir.join(file_name("_out")) } else { beside })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["refstudio", "--input", "x.png"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn adjustments_follow_flags() {
        let a = args(&["--brightness", "-0.1", "--sharpen", "0.5", "--radius", "3"])
            .adjustments()
            .unwrap();
        assert_eq!(
            a,
            vec![
                Adjustment::brightness_contrast(-0.1, 1.0),
                Adjustment::SharpenBlur {
                    radius: 3,
                    amount: 0.5
                },
            ]
        );
    }

    #[test]
    fn unknown_denoise_is_rejected() {
        assert!(args(&["--denoise", "wavelet"]).adjustments().is_err());
    }

    #[test]
    fn format_inference() {
        assert_eq!(parse_format(Some("RSP"), None).unwrap(), OutputFormat::Project);
        assert_eq!(
            parse_format(None, Some(Path::new("out/a.tif"))).unwrap(),
            OutputFormat::Image(SaveFormat::Tiff)
        );
        assert_eq!(
            parse_format(Some("webp"), Some(Path::new("out/a.png"))).unwrap(),
            OutputFormat::Image(SaveFormat::Webp)
        );
        assert_eq!(
            parse_format(None, Some(Path::new("out/flat"))).unwrap(),
            OutputFormat::Image(SaveFormat::Png)
        );
        assert_eq!(parse_format(None, None).unwrap(), OutputFormat::Image(SaveFormat::Png));
    }

    #[test]
    fn unknown_format_is_an_error() {
        let cases = [
            (Some("gif"), None),
            (None, Some(Path::new("out/a.gif"))),
            (Some("pngg"), Some(Path::new("a.png"))),
        ];
        for (format, output) in cases {
            let err = parse_format(format, output).unwrap_err();
            assert!(matches!(err, EngineError::InvalidParameter(ref m) if m.contains("gif") || m.contains("pngg")));
        }
    }

    #[test]
    fn output_never_overwrites_input() {
        let p = build_output_path(Path::new("dir/a.png"), None, None, OutputFormat::Image(SaveFormat::Png));
        assert_eq!(p, Some(PathBuf::from("dir/a_out.png")));
    }
}
