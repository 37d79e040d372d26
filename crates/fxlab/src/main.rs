//! fxlab: apply photo effects from the command line.
//!
//! Runs one effect per invocation on an image file and writes the result
//! atomically: on any failure the output path is left untouched. Also
//! fronts the background-removal and image-generation collaborators.
//!
//! # Usage
//!
//! ```text
//! fxlab apply photo.jpg sketch.png --effect pencil-sketch --sharpen 5
//! fxlab apply old.jpg color.png --effect colorization --weights w.safetensors --centers c.npy
//! fxlab remove-bg photo.jpg cutout.png --command rembg i {input} {output}
//! fxlab generate "a quiet harbor" harbor.png --command gen-image --prompt {prompt} -o {output}
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod logging;
mod settings;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fxlab_io::{
    CommandGenerator, CommandSegmenter, ExternalCommand, generate_image, remove_background,
    write_atomic,
};
use fxlab_pipeline::{
    ColorizationEngine, EffectOverrides, EffectVariant, QualityGate, inference,
};

use crate::settings::Settings;

/// Deterministic photo effects.
#[derive(Parser)]
#[command(name = "fxlab", version)]
struct Cli {
    /// JSON settings file; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply an effect to an image.
    Apply(ApplyArgs),
    /// Remove the background of an image with an external segmenter.
    RemoveBg(RemoveBgArgs),
    /// Generate an image from a text prompt with an external generator.
    Generate(GenerateArgs),
}

#[derive(Args)]
struct ApplyArgs {
    /// Input image (PNG, JPEG, BMP, WebP).
    input: PathBuf,

    /// Output path.
    output: PathBuf,

    /// Effect to apply.
    #[arg(long, value_enum)]
    effect: Effect,

    /// JPEG quality (1-100) for JPEG-producing effects.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Pencil sketch blur sigma.
    #[arg(long)]
    blur_sigma: Option<f32>,

    /// Pencil sketch sharpen strength (center weight of the 3x3 kernel).
    #[arg(long)]
    sharpen: Option<i32>,

    /// Colorization network weights (safetensors).
    #[arg(long, requires = "centers")]
    weights: Option<PathBuf>,

    /// Colorization cluster centres (`.npy`).
    #[arg(long, requires = "weights")]
    centers: Option<PathBuf>,

    /// Lowest accepted mean intensity; enables the quality gate.
    #[arg(long)]
    gate_low: Option<f64>,

    /// Highest accepted mean intensity; enables the quality gate.
    #[arg(long)]
    gate_high: Option<f64>,

    /// Print diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RemoveBgArgs {
    /// Input image.
    input: PathBuf,

    /// Output PNG path.
    output: PathBuf,

    /// Segmenter program and arguments; `{input}` and `{output}` are
    /// replaced by scratch file paths.
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "PROGRAM")]
    command: Vec<String>,
}

#[derive(Args)]
struct GenerateArgs {
    /// Text prompt.
    prompt: String,

    /// Output path.
    output: PathBuf,

    /// Generator program and arguments; `{prompt}` and `{output}` are
    /// replaced by the prompt and a scratch file path.
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "PROGRAM")]
    command: Vec<String>,

    /// Text prepended to the prompt.
    #[arg(long)]
    style_prefix: Option<String>,
}

/// Effect selection.
#[derive(Clone, Copy, ValueEnum)]
enum Effect {
    /// Smoothed colors with black edge lines.
    Cartoon,
    /// Grayscale pencil sketch.
    PencilSketch,
    /// Predict color for a grayscale photograph.
    Colorization,
    /// Vivid, posterized painting look.
    OilPainting,
    /// Gentle contrast, sharpness, and saturation lift.
    PhotoEnhance,
    /// Re-encode as JPEG.
    Compress,
}

impl From<Effect> for EffectVariant {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Cartoon => Self::Cartoon,
            Effect::PencilSketch => Self::PencilSketch,
            Effect::Colorization => Self::Colorization,
            Effect::OilPainting => Self::OilPainting,
            Effect::PhotoEnhance => Self::PhotoEnhance,
            Effect::Compress => Self::Compress,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let settings = Settings::load(cli.config.as_deref())?;
    match cli.command {
        Command::Apply(args) => apply(&args, &settings),
        Command::RemoveBg(args) => remove_bg(&args, &settings),
        Command::Generate(args) => generate(&args, &settings),
    }
}

fn apply(args: &ApplyArgs, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let variant = EffectVariant::from(args.effect);
    let overrides = overrides_from_cli(args, settings);

    if variant == EffectVariant::Colorization {
        let weights = args.weights.as_ref().or(settings.weights.as_ref());
        let centers = args.centers.as_ref().or(settings.centers.as_ref());
        match (weights, centers) {
            (Some(weights), Some(centers)) => {
                inference::install(ColorizationEngine::load(weights, centers)?)?;
            }
            _ => {
                return Err(
                    "colorization needs --weights and --centers (or a config file naming them)"
                        .into(),
                );
            }
        }
    }

    let input = read(&args.input)?;
    let encoded = fxlab_pipeline::apply(variant, &input, &overrides)?;
    warn_on_extension(&args.output, encoded.format().extension());
    let (bytes, diagnostics) = encoded.into_parts();
    write_atomic(&args.output, &bytes)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else {
        println!("{}", diagnostics.report());
    }
    tracing::info!(
        effect = %variant,
        output = %args.output.display(),
        bytes = bytes.len(),
        "wrote output",
    );
    Ok(())
}

/// Merge flags over settings. Gate bounds given on only one side take
/// the other bound from the settings file or the default gate.
fn overrides_from_cli(args: &ApplyArgs, settings: &Settings) -> EffectOverrides {
    let gate = if args.gate_low.is_some() || args.gate_high.is_some() {
        let base = settings.gate.unwrap_or_default();
        Some(QualityGate {
            low: args.gate_low.unwrap_or(base.low),
            high: args.gate_high.unwrap_or(base.high),
        })
    } else {
        settings.gate
    };
    EffectOverrides {
        blur_sigma: args.blur_sigma,
        sharpen: args.sharpen,
        jpeg_quality: args.quality.or(settings.jpeg_quality),
        gate,
    }
}

fn remove_bg(args: &RemoveBgArgs, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let command = command_from_cli(&args.command, settings.segmenter.as_ref())
        .ok_or("remove-bg needs --command (or a segmenter in the config file)")?;
    let input = read(&args.input)?;
    let png = remove_background(&CommandSegmenter::new(command), &input)?;
    warn_on_extension(&args.output, "png");
    write_atomic(&args.output, &png)?;
    tracing::info!(output = %args.output.display(), bytes = png.len(), "wrote output");
    Ok(())
}

fn generate(args: &GenerateArgs, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let command = command_from_cli(&args.command, settings.generator.as_ref())
        .ok_or("generate needs --command (or a generator in the config file)")?;
    let style = args.style_prefix.as_deref().or(settings.style_prefix.as_deref());
    let bytes = generate_image(&CommandGenerator::new(command), &args.prompt, style)?;
    write_atomic(&args.output, &bytes)?;
    tracing::info!(output = %args.output.display(), bytes = bytes.len(), "wrote output");
    Ok(())
}

/// The command given on the command line, or the configured one.
fn command_from_cli(
    words: &[String],
    configured: Option<&ExternalCommand>,
) -> Option<ExternalCommand> {
    match words.split_first() {
        Some((program, args)) => {
            Some(ExternalCommand::new(program).with_args(args.iter().cloned()))
        }
        None => configured.cloned(),
    }
}

fn read(path: &Path) -> Result<Vec<u8>, Box<dyn Error>> {
    std::fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()).into())
}

fn warn_on_extension(path: &Path, expected: &str) {
    let matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ext.eq_ignore_ascii_case(expected)
                || (expected == "jpg" && ext.eq_ignore_ascii_case("jpeg"))
        });
    if !matches {
        tracing::warn!(
            path = %path.display(),
            expected,
            "output extension does not match format",
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn apply_args(extra: &[&str]) -> ApplyArgs {
        let mut argv = vec!["fxlab", "apply", "in.png", "out.png", "--effect", "pencil-sketch"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Apply(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_settings() {
        let settings = Settings {
            jpeg_quality: Some(80),
            gate: Some(QualityGate { low: 5.0, high: 250.0 }),
            ..Settings::default()
        };
        let overrides = overrides_from_cli(
            &apply_args(&["--quality", "42", "--gate-low", "20", "--sharpen", "5"]),
            &settings,
        );
        assert_eq!(overrides.jpeg_quality, Some(42));
        assert_eq!(overrides.sharpen, Some(5));
        assert_eq!(overrides.gate, Some(QualityGate { low: 20.0, high: 250.0 }));
    }

    #[test]
    fn settings_fill_missing_flags() {
        let settings = Settings {
            jpeg_quality: Some(80),
            ..Settings::default()
        };
        let overrides = overrides_from_cli(&apply_args(&[]), &settings);
        assert_eq!(overrides.jpeg_quality, Some(80));
        assert_eq!(overrides.gate, None);
        assert_eq!(overrides.blur_sigma, None);
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        let argv = ["fxlab", "apply", "a", "b", "--effect", "compress", "--quality", "0"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn weights_require_centers() {
        let argv = ["fxlab", "apply", "a", "b", "--effect", "colorization", "--weights", "w"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn command_words_take_precedence() {
        let configured = ExternalCommand::new("configured");
        let words = vec!["rembg".to_owned(), "i".to_owned(), "{input}".to_owned()];
        let command = command_from_cli(&words, Some(&configured)).unwrap();
        assert_eq!(command.program, "rembg");
        assert_eq!(command.args, ["i", "{input}"]);
        assert_eq!(command_from_cli(&[], Some(&configured)), Some(configured));
        assert_eq!(command_from_cli(&[], None), None);
    }
}
