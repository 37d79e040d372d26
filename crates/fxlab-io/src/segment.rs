//! Background removal through a segmentation collaborator.
//!
//! The core never looks inside the segmenter. It normalizes the input
//! to RGB (keeping alpha), hands it over as PNG, and insists that what
//! comes back decodes to a four-channel image.

use fxlab_pipeline::{DecodeError, EncodeError, OutputFormat, codec};

use crate::command::{CommandError, ExternalCommand};

/// Errors from background removal.
#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    /// The input image could not be decoded.
    #[error("invalid input image: {0}")]
    Input(#[source] DecodeError),

    /// The normalized input could not be encoded for the segmenter.
    #[error("failed to prepare input: {0}")]
    Prepare(#[from] EncodeError),

    /// The segmenter failed.
    #[error("segmenter failed: {0}")]
    Segmenter(#[from] CommandError),

    /// The segmenter returned something that is not an image.
    #[error("segmenter returned an invalid image: {0}")]
    Output(#[source] DecodeError),

    /// The segmenter returned an image without transparency.
    #[error("segmenter returned {channels} channel(s), expected RGBA")]
    NotTransparent {
        /// Channels of the returned image.
        channels: u8,
    },
}

/// Removes image backgrounds.
///
/// Input: PNG bytes of an RGB or RGBA image.
/// Output: encoded bytes of an RGBA image with a transparent background.
pub trait Segmenter {
    /// Segment `png`.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError`] if the collaborator fails.
    fn segment(&self, png: &[u8]) -> Result<Vec<u8>, SegmentationError>;
}

/// A segmenter backed by an external program that reads a PNG from
/// `{input}` and writes a PNG to `{output}`.
#[derive(Debug, Clone)]
pub struct CommandSegmenter {
    command: ExternalCommand,
}

impl CommandSegmenter {
    /// Wrap `command`.
    #[must_use]
    pub const fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Segmenter for CommandSegmenter {
    fn segment(&self, png: &[u8]) -> Result<Vec<u8>, SegmentationError> {
        Ok(self.command.run(Some((png, "png")), None, "png")?)
    }
}

/// Remove the background of an encoded image.
///
/// Returns PNG bytes with an alpha channel.
///
/// # Errors
///
/// Returns [`SegmentationError::Input`] for undecodable input,
/// [`SegmentationError::Output`] or
/// [`SegmentationError::NotTransparent`] if the segmenter's result is
/// not an RGBA image, and any error of the segmenter itself.
pub fn remove_background(
    segmenter: &impl Segmenter,
    image_bytes: &[u8],
) -> Result<Vec<u8>, SegmentationError> {
    let input = codec::decode(image_bytes).map_err(SegmentationError::Input)?;
    let png = codec::encode(&input, OutputFormat::Png)?;
    tracing::debug!(
        width = input.width(),
        height = input.height(),
        channels = input.channels(),
        "segmenting",
    );

    let segmented = segmenter.segment(&png)?;
    let output = codec::decode(&segmented).map_err(SegmentationError::Output)?;
    if output.channels() != 4 {
        return Err(SegmentationError::NotTransparent {
            channels: output.channels(),
        });
    }
    Ok(codec::encode(&output, OutputFormat::Png)?)
}
