//! Incremental effect pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::apply`] which runs an effect in one call, [`Pipeline`]
//! lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use fxlab_pipeline::{EffectOverrides, EffectVariant, Pipeline, PipelineError};
//! # fn run(png: &[u8]) -> Result<Vec<u8>, PipelineError> {
//! let recipe = EffectVariant::OilPainting.recipe(&EffectOverrides::default());
//! let encoded = Pipeline::new(recipe)
//!     .decode(png)?
//!     .advance()?
//!     .advance()?
//!     .check_quality()?
//!     .encode()?;
//! Ok(encoded.into_bytes())
//! # }
//! ```
//!
//! Each method consumes `self` and returns the next state, so the order
//! decode, stages, quality gate, encode cannot be violated. Any failure
//! ends the invocation: the caller receives a [`PipelineError`] and no
//! output bytes.

use std::time::{Duration, Instant};

use tracing::Span;

use crate::codec::{self, OutputFormat};
use crate::color;
use crate::diagnostics::{
    DecodeMetrics, EffectDiagnostics, EncodeMetrics, QualityMetrics, StageDiagnostics,
};
use crate::effect::{AlphaPolicy, EffectRecipe};
use crate::error::{DecodeError, PipelineError, StageError};
use crate::inference::ColorizationEngine;
use crate::stage::{Stage, StageContext, StageKind};
use crate::types::{ColorSpace, RasterBuffer};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any input has been seen.
///
/// Holds the recipe and, for effects that need it, the colorization
/// engine. Call [`decode`](Self::decode) to advance.
#[must_use = "pipeline states are consumed by advancing; call .decode() to continue"]
pub struct Pending<'e> {
    recipe: EffectRecipe,
    engine: Option<&'e ColorizationEngine>,
}

impl<'e> Pending<'e> {
    /// The recipe this invocation will run.
    #[must_use]
    pub const fn recipe(&self) -> &EffectRecipe {
        &self.recipe
    }

    /// Supply the colorization engine used by [`StageKind::Colorize`].
    pub fn with_engine<'a>(self, engine: Option<&'a ColorizationEngine>) -> Pending<'a> {
        Pending {
            recipe: self.recipe,
            engine,
        }
    }

    /// Decode `bytes` and advance to the [`Staged`] state.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Decode`] if the bytes are empty, cannot be
    /// parsed, or declare a zero dimension.
    pub fn decode(self, bytes: &[u8]) -> Result<Staged<'e>, PipelineError> {
        let span = tracing::info_span!("effect", effect = %self.recipe.name);
        let started = Instant::now();
        let decoded = span
            .in_scope(|| codec::decode(bytes))
            .map_err(|source| self.decode_error(source))?;
        let metrics = DecodeMetrics {
            input_bytes: bytes.len(),
            width: decoded.width(),
            height: decoded.height(),
            channels: decoded.channels(),
            duration: started.elapsed(),
        };
        self.start(decoded, metrics, span, started)
    }

    /// Start from an already decoded buffer.
    ///
    /// Gray buffers are broadcast to RGB; other color spaces are converted
    /// to RGB.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Decode`] if the buffer has a zero
    /// dimension, or [`PipelineError::Stage`] if it cannot be converted
    /// to RGB.
    pub fn from_buffer(self, buffer: RasterBuffer) -> Result<Staged<'e>, PipelineError> {
        let span = tracing::info_span!("effect", effect = %self.recipe.name);
        let started = Instant::now();
        let metrics = DecodeMetrics {
            input_bytes: 0,
            width: buffer.width(),
            height: buffer.height(),
            channels: buffer.channels(),
            duration: Duration::ZERO,
        };
        self.start(buffer, metrics, span, started)
    }

    fn start(
        self,
        buffer: RasterBuffer,
        decode: DecodeMetrics,
        span: Span,
        started: Instant,
    ) -> Result<Staged<'e>, PipelineError> {
        if buffer.dimensions().pixel_count() == 0 {
            return Err(self.decode_error(DecodeError::ZeroDimension(buffer.dimensions())));
        }
        let source = normalize(buffer, self.recipe.alpha).map_err(|failure| {
            PipelineError::from_stage(&self.recipe.name, "normalize", failure.into())
        })?;
        span.in_scope(|| {
            tracing::debug!(
                width = source.width(),
                height = source.height(),
                channels = source.channels(),
                stages = self.recipe.stages.len(),
                "decoded",
            );
        });
        Ok(Staged {
            current: source.clone(),
            source,
            recipe: self.recipe,
            engine: self.engine,
            completed: 0,
            decode,
            stages: Vec::new(),
            span,
            started,
        })
    }

    fn decode_error(&self, source: DecodeError) -> PipelineError {
        PipelineError::Decode {
            effect: self.recipe.name.clone(),
            source,
        }
    }
}

/// Bring a buffer into the layout every stage expects: 8-bit RGB, with
/// alpha kept only when `policy` preserves it.
fn normalize(
    buffer: RasterBuffer,
    policy: AlphaPolicy,
) -> Result<RasterBuffer, StageError> {
    let rgb = match buffer.space() {
        ColorSpace::Rgb => buffer,
        _ => color::convert(&buffer, ColorSpace::Rgb)?,
    };
    Ok(match policy {
        AlphaPolicy::Drop => rgb.split_alpha().0,
        AlphaPolicy::Preserve => rgb,
    })
}

// ───────────────────────── Stage k: Staged ───────────────────────────

/// Pipeline state after decoding and zero or more stages.
///
/// [`completed`](Self::completed) stages of the recipe have run; with
/// zero completed this is the freshly decoded input. Call
/// [`advance`](Self::advance) to run one more stage, or
/// [`check_quality`](Self::check_quality) to run the rest and apply
/// the quality gate.
#[must_use = "pipeline states are consumed by advancing; call .advance() or .check_quality() to continue"]
pub struct Staged<'e> {
    recipe: EffectRecipe,
    engine: Option<&'e ColorizationEngine>,
    source: RasterBuffer,
    current: RasterBuffer,
    completed: usize,
    decode: DecodeMetrics,
    stages: Vec<StageDiagnostics>,
    span: Span,
    started: Instant,
}

impl<'e> Staged<'e> {
    /// The decoded input after alpha handling, before any stage ran.
    #[must_use]
    pub const fn source(&self) -> &RasterBuffer {
        &self.source
    }

    /// Output of the most recent stage.
    #[must_use]
    pub const fn current(&self) -> &RasterBuffer {
        &self.current
    }

    /// Number of stages already applied.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.completed
    }

    /// Stages still to run, in order.
    #[must_use]
    pub fn remaining(&self) -> &[StageKind] {
        self.recipe.stages.get(self.completed..).unwrap_or_default()
    }

    /// Per-stage timings collected so far.
    #[must_use]
    pub fn stage_diagnostics(&self) -> &[StageDiagnostics] {
        &self.stages
    }

    /// Apply the next stage. A no-op once every stage has run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stage`] or [`PipelineError::Inference`]
    /// naming the effect and the stage that failed.
    pub fn advance(mut self) -> Result<Self, PipelineError> {
        let Some(stage) = self.recipe.stages.get(self.completed) else {
            return Ok(self);
        };
        let span = self.span.clone();
        let _entered = span.enter();

        let started = Instant::now();
        let context = StageContext::new(&self.source).with_engine(self.engine);
        let input = self.current;
        let output = stage
            .apply(input, &context)
            .map_err(|failure| PipelineError::from_stage(&self.recipe.name, stage.name(), failure))?;
        let duration = started.elapsed();

        tracing::debug!(
            stage = stage.name(),
            index = self.completed,
            channels = output.channels(),
            elapsed_ms = duration.as_secs_f64() * 1000.0,
            "stage complete",
        );
        self.stages.push(StageDiagnostics {
            stage: stage.name().to_owned(),
            channels: output.channels(),
            duration,
        });
        self.completed += 1;
        self.current = output;
        Ok(self)
    }

    /// Apply every remaining stage.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure.
    pub fn run(mut self) -> Result<Self, PipelineError> {
        while !self.remaining().is_empty() {
            self = self.advance()?;
        }
        Ok(self)
    }

    /// Run any remaining stages, then apply the recipe's quality gate.
    ///
    /// Recipes without a gate pass unconditionally.
    ///
    /// # Errors
    ///
    /// Returns a stage failure from the remaining stages, or
    /// [`PipelineError::QualityGate`] if the result is degenerate.
    pub fn check_quality(self) -> Result<QualityChecked, PipelineError> {
        let staged = self.run()?;
        let quality = match staged.recipe.gate {
            None => None,
            Some(gate) => {
                let _entered = staged.span.enter();
                match gate.check(&staged.current) {
                    Ok(mean) => {
                        tracing::debug!(mean, low = gate.low, high = gate.high, "quality gate passed");
                        Some(QualityMetrics {
                            mean,
                            low: gate.low,
                            high: gate.high,
                        })
                    }
                    Err(source) => {
                        tracing::warn!(
                            mean = source.mean,
                            low = source.low,
                            high = source.high,
                            "rejecting degenerate output",
                        );
                        return Err(PipelineError::QualityGate {
                            effect: staged.recipe.name.clone(),
                            source,
                        });
                    }
                }
            }
        };
        Ok(QualityChecked {
            effect: staged.recipe.name,
            output: staged.recipe.output,
            result: staged.current,
            decode: staged.decode,
            stages: staged.stages,
            quality,
            span: staged.span,
            started: staged.started,
        })
    }
}

// ───────────────────────── QualityChecked ────────────────────────────

/// Pipeline state after every stage ran and the result passed the gate.
///
/// Call [`encode`](Self::encode) to produce output bytes.
#[must_use = "pipeline states are consumed by advancing; call .encode() to continue"]
pub struct QualityChecked {
    effect: String,
    output: OutputFormat,
    result: RasterBuffer,
    decode: DecodeMetrics,
    stages: Vec<StageDiagnostics>,
    quality: Option<QualityMetrics>,
    span: Span,
    started: Instant,
}

impl QualityChecked {
    /// The final image, before encoding.
    #[must_use]
    pub const fn result(&self) -> &RasterBuffer {
        &self.result
    }

    /// Measured mean intensity, if the recipe has a gate.
    #[must_use]
    pub const fn quality(&self) -> Option<QualityMetrics> {
        self.quality
    }

    /// Encode the result in the recipe's output format.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Encode`] if the writer rejects the buffer.
    pub fn encode(self) -> Result<Encoded, PipelineError> {
        let _entered = self.span.enter();
        let started = Instant::now();
        let bytes = codec::encode(&self.result, self.output).map_err(|source| {
            PipelineError::Encode {
                effect: self.effect.clone(),
                source,
            }
        })?;
        let encode = EncodeMetrics {
            format: self.output,
            output_bytes: bytes.len(),
            duration: started.elapsed(),
        };
        let diagnostics = EffectDiagnostics {
            effect: self.effect.clone(),
            decode: self.decode.clone(),
            stages: self.stages.clone(),
            quality: self.quality,
            encode: Some(encode),
            total_duration: self.started.elapsed(),
        };
        tracing::info!(
            format = %self.output,
            bytes = bytes.len(),
            elapsed_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
            "effect complete",
        );
        Ok(Encoded {
            bytes,
            format: self.output,
            diagnostics,
        })
    }
}

// ───────────────────────── Encoded ───────────────────────────────────

/// Terminal success: encoded bytes and the diagnostics of the run.
#[derive(Debug, Clone)]
pub struct Encoded {
    bytes: Vec<u8>,
    format: OutputFormat,
    diagnostics: EffectDiagnostics,
}

impl Encoded {
    /// The encoded output.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Format of [`bytes`](Self::bytes).
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Timing and size metrics of the run.
    #[must_use]
    pub const fn diagnostics(&self) -> &EffectDiagnostics {
        &self.diagnostics
    }

    /// Consume the result, keeping only the bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Consume the result, returning bytes and diagnostics.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, EffectDiagnostics) {
        (self.bytes, self.diagnostics)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental effect pipeline.
///
/// Created via [`Pipeline::new`], which stores the recipe without doing
/// any processing:
///
/// ```rust
/// # use fxlab_pipeline::{EffectOverrides, EffectVariant, Pipeline, PipelineError};
/// # fn run(png: &[u8]) -> Result<(), PipelineError> {
/// let recipe = EffectVariant::Cartoon.recipe(&EffectOverrides::default());
/// let encoded = Pipeline::new(recipe)
///     .decode(png)?
///     .check_quality()?
///     .encode()?;
/// println!("{}", encoded.diagnostics().report());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline;

impl Pipeline {
    /// Create a pipeline for `recipe` with no colorization engine.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(recipe: EffectRecipe) -> Pending<'static> {
        Pending {
            recipe,
            engine: None,
        }
    }
}
