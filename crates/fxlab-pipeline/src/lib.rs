//! fxlab-pipeline: Pure photo effect pipeline (sans-IO).
//!
//! Turns encoded image bytes into encoded effect output through:
//! decode -> ordered stages -> quality gate -> encode.
//!
//! Effects are data: each [`EffectVariant`] maps to an [`EffectRecipe`],
//! an ordered list of [`StageKind`] values plus output format, alpha
//! policy, and an optional [`QualityGate`]. The same recipes can be
//! declared as JSON.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices. The only filesystem access is the explicit weight
//! loading of [`ColorizationEngine::load`]. Scratch files, output
//! persistence, and external collaborators live in `fxlab-io`.

pub mod blur;
pub mod clahe;
pub mod codec;
pub mod color;
pub mod denoise;
pub mod detail;
pub mod diagnostics;
pub mod dodge;
pub mod edge;
pub mod effect;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod saturation;
pub mod sharpen;
pub mod smooth;
pub mod stage;
pub mod types;

pub use codec::{OutputFormat, decode, encode};
pub use diagnostics::EffectDiagnostics;
pub use effect::{AlphaPolicy, EffectOverrides, EffectRecipe, EffectVariant, QualityGate, UnknownEffect};
pub use error::{
    DecodeError, EncodeError, InferenceError, PipelineError, QualityGateError, StageError,
    StageFailure,
};
pub use inference::ColorizationEngine;
pub use pipeline::{Encoded, Pipeline};
pub use stage::{Stage, StageContext, StageKind};
pub use types::{ColorSpace, Dimensions, RasterBuffer};

/// Apply a built-in effect to encoded image bytes.
///
/// The colorization variant uses the process-wide engine registered with
/// [`inference::install`]; other variants never touch it.
///
/// # Pipeline steps
///
/// 1. Decode the input and normalize it to 8-bit RGB
/// 2. Drop alpha unless the effect preserves it
/// 3. Apply the effect's stages in order
/// 4. Check the quality gate, if the effect has one
/// 5. Encode in the effect's output format
///
/// # Errors
///
/// Returns [`PipelineError`] naming the effect (and the stage, for stage
/// failures). Colorization without an installed engine fails with
/// [`InferenceError::EngineUnavailable`].
pub fn apply(
    variant: EffectVariant,
    image_bytes: &[u8],
    overrides: &EffectOverrides,
) -> Result<Encoded, PipelineError> {
    run_recipe(&variant.recipe(overrides), image_bytes, inference::global())
}

/// Run an arbitrary recipe, with an explicit engine.
///
/// # Errors
///
/// See [`apply`].
pub fn run_recipe(
    recipe: &EffectRecipe,
    image_bytes: &[u8],
    engine: Option<&ColorizationEngine>,
) -> Result<Encoded, PipelineError> {
    Pipeline::new(recipe.clone())
        .with_engine(engine)
        .decode(image_bytes)?
        .check_quality()?
        .encode()
}
