//! Text-to-image generation through a generator collaborator.

use fxlab_pipeline::{DecodeError, codec};

use crate::command::{CommandError, ExternalCommand};

/// Errors from image generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The prompt is empty after trimming.
    #[error("prompt is empty")]
    EmptyPrompt,

    /// The generator failed.
    #[error("generator failed: {0}")]
    Generator(#[from] CommandError),

    /// The generator returned something that is not an image.
    #[error("generator returned an invalid image: {0}")]
    Output(#[source] DecodeError),
}

/// Produces images from text prompts.
pub trait Generator {
    /// Generate an encoded image for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError`] if the collaborator fails.
    fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError>;
}

/// A generator backed by an external program that receives the prompt
/// through `{prompt}` and writes a PNG to `{output}`.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: ExternalCommand,
}

impl CommandGenerator {
    /// Wrap `command`.
    #[must_use]
    pub const fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Generator for CommandGenerator {
    fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        Ok(self.command.run(None, Some(prompt), "png")?)
    }
}

/// Trim `prompt` and prepend `style_prefix`, if any.
///
/// # Errors
///
/// Returns [`GenerationError::EmptyPrompt`] if nothing but whitespace
/// remains.
pub fn prepare_prompt(prompt: &str, style_prefix: Option<&str>) -> Result<String, GenerationError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(GenerationError::EmptyPrompt);
    }
    Ok(match style_prefix.map(str::trim).filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix} {prompt}"),
        None => prompt.to_owned(),
    })
}

/// Generate an image for `prompt`, checking that the result decodes.
///
/// # Errors
///
/// Returns [`GenerationError::EmptyPrompt`] for a blank prompt,
/// [`GenerationError::Output`] if the generator's bytes are not an
/// image, and any error of the generator itself.
pub fn generate_image(
    generator: &impl Generator,
    prompt: &str,
    style_prefix: Option<&str>,
) -> Result<Vec<u8>, GenerationError> {
    let prompt = prepare_prompt(prompt, style_prefix)?;
    tracing::debug!(%prompt, "generating image");
    let bytes = generator.generate(&prompt)?;
    let image = codec::decode(&bytes).map_err(GenerationError::Output)?;
    tracing::debug!(width = image.width(), height = image.height(), "generated image");
    Ok(bytes)
}
