//! Error taxonomy for the effect pipeline.
//!
//! Each failure kind has its own type so stage functions can return the
//! narrowest error that fits. [`PipelineError`] wraps them with the
//! effect name and, where one applies, the stage that failed.

use crate::types::{ColorSpace, Dimensions};

/// The input bytes could not be turned into a [`RasterBuffer`](crate::RasterBuffer).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input image data was empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The byte stream is not a supported or well-formed raster format.
    #[error("failed to decode image: {0}")]
    Malformed(#[from] image::ImageError),

    /// The image declares a zero width or height.
    #[error("image declares zero dimension ({0})")]
    ZeroDimension(Dimensions),
}

/// A numeric precondition of a stage was violated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    /// The buffer has a channel count the stage cannot handle.
    #[error("expected {expected} channel(s), found {found}")]
    ChannelCount {
        /// Human-readable description of the accepted counts.
        expected: &'static str,
        /// The channel count actually present.
        found: u8,
    },

    /// The buffer is tagged with the wrong color space.
    #[error("expected {expected} color space, found {found}")]
    ColorSpace {
        /// Required tag.
        expected: ColorSpace,
        /// Tag actually present.
        found: ColorSpace,
    },

    /// A sample vector does not match the declared geometry.
    #[error("buffer holds {found} samples, geometry requires {expected}")]
    BufferLength {
        /// Samples required by width, height, and channels.
        expected: usize,
        /// Samples provided.
        found: usize,
    },

    /// Zero width or height.
    #[error("zero-sized buffer ({0})")]
    ZeroDimension(Dimensions),

    /// Two inputs of a multi-input stage differ in size.
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// First operand size.
        left: Dimensions,
        /// Second operand size.
        right: Dimensions,
    },

    /// No conversion routine exists between the two color spaces.
    #[error("unsupported color conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source tag.
        from: ColorSpace,
        /// Requested tag.
        to: ColorSpace,
    },

    /// A stage configuration value is out of range.
    #[error("invalid stage configuration: {0}")]
    InvalidConfig(String),
}

/// The chrominance network could not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Colorization was requested but no engine has been loaded.
    #[error("colorization engine has not been initialized")]
    EngineUnavailable,

    /// The process-wide engine was already installed.
    #[error("colorization engine is already initialized")]
    AlreadyInitialized,

    /// A layer received or produced an empty tensor.
    #[error("layer `{layer}` produced an empty tensor")]
    EmptyTensor {
        /// Layer name.
        layer: String,
    },

    /// A tensor shape does not match what a layer expects.
    #[error("layer `{layer}`: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Layer or tensor name.
        layer: String,
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        found: Vec<usize>,
    },

    /// A tensor named by the architecture is absent from the weight file.
    #[error("weight file has no tensor named `{0}`")]
    MissingTensor(String),

    /// A weight or cluster-centre file is malformed.
    #[error("malformed model file: {0}")]
    Format(String),

    /// Reading a model file failed.
    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    /// Preparing the input or merging the output violated a buffer invariant.
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// The post-processing sanity check rejected the output as degenerate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("degenerate output: mean intensity {mean:.2} outside [{low}, {high}]")]
pub struct QualityGateError {
    /// Measured mean intensity on the 8-bit scale.
    pub mean: f64,
    /// Lower bound of the accepted band.
    pub low: f64,
    /// Upper bound of the accepted band.
    pub high: f64,
}

/// The target format writer rejected the buffer.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The underlying `image` encoder failed.
    #[error("encoder failed: {0}")]
    Image(#[from] image::ImageError),

    /// The buffer's channel count has no encoding in the target format.
    #[error("cannot encode {channels}-channel buffer as {format}")]
    UnsupportedChannels {
        /// Channel count of the buffer.
        channels: u8,
        /// Target format name.
        format: &'static str,
    },

    /// Only RGB and grayscale buffers can be written out.
    #[error("cannot encode a {0} buffer; convert to RGB first")]
    UnsupportedSpace(ColorSpace),
}

/// Failure of a single stage, before the pipeline attaches context.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    /// Numeric precondition violated.
    #[error(transparent)]
    Stage(#[from] StageError),
    /// Network forward pass failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Terminal failure of one effect invocation.
///
/// Every variant names the effect; stage-level variants also name the
/// stage. No partial output accompanies any of them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The input could not be decoded.
    #[error("{effect}: {source}")]
    Decode {
        /// Effect name.
        effect: String,
        /// Underlying decode error.
        #[source]
        source: DecodeError,
    },

    /// A stage rejected its input or configuration.
    #[error("{effect}: stage `{stage}` failed: {source}")]
    Stage {
        /// Effect name.
        effect: String,
        /// Stage identifier.
        stage: &'static str,
        /// Underlying stage error.
        #[source]
        source: StageError,
    },

    /// The chrominance network failed.
    #[error("{effect}: stage `{stage}` failed: {source}")]
    Inference {
        /// Effect name.
        effect: String,
        /// Stage identifier.
        stage: &'static str,
        /// Underlying inference error.
        #[source]
        source: InferenceError,
    },

    /// The result was rejected as degenerate.
    #[error("{effect}: {source}")]
    QualityGate {
        /// Effect name.
        effect: String,
        /// Measured mean and accepted band.
        #[source]
        source: QualityGateError,
    },

    /// The result could not be encoded.
    #[error("{effect}: {source}")]
    Encode {
        /// Effect name.
        effect: String,
        /// Underlying encode error.
        #[source]
        source: EncodeError,
    },
}

impl PipelineError {
    /// Name of the effect that failed.
    #[must_use]
    pub fn effect(&self) -> &str {
        match self {
            Self::Decode { effect, .. }
            | Self::Stage { effect, .. }
            | Self::Inference { effect, .. }
            | Self::QualityGate { effect, .. }
            | Self::Encode { effect, .. } => effect,
        }
    }

    /// Name of the failing stage, for stage-level failures.
    #[must_use]
    pub const fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } | Self::Inference { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub(crate) fn from_stage(effect: &str, stage: &'static str, failure: StageFailure) -> Self {
        match failure {
            StageFailure::Stage(source) => Self::Stage {
                effect: effect.to_owned(),
                stage,
                source,
            },
            StageFailure::Inference(source) => Self::Inference {
                effect: effect.to_owned(),
                stage,
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_gate_display() {
        let err = QualityGateError {
            mean: 0.0,
            low: 10.0,
            high: 245.0,
        };
        assert_eq!(
            err.to_string(),
            "degenerate output: mean intensity 0.00 outside [10, 245]"
        );
    }

    #[test]
    fn stage_failure_keeps_context() {
        let err = PipelineError::from_stage(
            "cartoon",
            "edge-mask",
            StageFailure::Stage(StageError::InvalidConfig("block size must be odd".into())),
        );
        assert_eq!(err.effect(), "cartoon");
        assert_eq!(err.stage(), Some("edge-mask"));
        assert_eq!(
            err.to_string(),
            "cartoon: stage `edge-mask` failed: invalid stage configuration: block size must be odd"
        );
    }

    #[test]
    fn inference_failure_maps_to_inference_variant() {
        let err = PipelineError::from_stage(
            "colorization",
            "colorize",
            StageFailure::Inference(InferenceError::EngineUnavailable),
        );
        assert!(matches!(err, PipelineError::Inference { .. }));
    }

    #[test]
    fn decode_error_has_no_stage() {
        let err = PipelineError::Decode {
            effect: "compress".into(),
            source: DecodeError::EmptyInput,
        };
        assert_eq!(err.stage(), None);
        assert_eq!(err.to_string(), "compress: input image data is empty");
    }
}
