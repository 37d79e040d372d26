//! Image decoding and encoding.
//!
//! [`decode`] accepts raw image bytes (PNG, JPEG, BMP, WebP) and
//! normalizes them to an 8-bit RGB [`RasterBuffer`]: single-channel
//! sources are broadcast to three identical channels and any alpha
//! channel is kept as a fourth channel. [`encode`] writes a buffer back
//! out as PNG (lossless, alpha preserved) or JPEG (alpha dropped).

use std::fmt;

use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::types::{ColorSpace, Dimensions, RasterBuffer};

/// Default JPEG quality when an effect does not specify one.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Target encoding of an effect's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG; preserves alpha when present.
    Png,
    /// Baseline JPEG with the given quality factor (0 to 100).
    Jpeg {
        /// Quality factor. Zero is treated as the minimum quality of 1.
        quality: u8,
    },
}

impl OutputFormat {
    /// Conventional file extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg { .. } => "jpg",
        }
    }

    /// MIME type of the encoded bytes.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg { .. } => "image/jpeg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => f.write_str("PNG"),
            Self::Jpeg { quality } => write!(f, "JPEG (quality {quality})"),
        }
    }
}

/// Decode raw image bytes into an 8-bit RGB buffer.
///
/// # Errors
///
/// Returns [`DecodeError::EmptyInput`] if `bytes` is empty,
/// [`DecodeError::Malformed`] if the format is unrecognized or the data
/// is corrupt, and [`DecodeError::ZeroDimension`] if the image declares
/// a zero width or height.
pub fn decode(bytes: &[u8]) -> Result<RasterBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let image = image::load_from_memory(bytes)?;
    from_dynamic(&image)
}

/// Normalize a decoded [`DynamicImage`] into a [`RasterBuffer`].
///
/// # Errors
///
/// Returns [`DecodeError::ZeroDimension`] for empty images.
pub fn from_dynamic(image: &DynamicImage) -> Result<RasterBuffer, DecodeError> {
    let dims = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    if dims.width == 0 || dims.height == 0 {
        return Err(DecodeError::ZeroDimension(dims));
    }

    let (channels, data) = if image.color().has_alpha() {
        (4, image.to_rgba8().into_raw())
    } else {
        (3, image.to_rgb8().into_raw())
    };
    RasterBuffer::from_raw(dims.width, dims.height, channels, ColorSpace::Rgb, data)
        .map_err(|_| DecodeError::ZeroDimension(dims))
}

/// Encode a buffer in the requested format.
///
/// JPEG output drops any alpha channel first. Only RGB and gray buffers
/// can be encoded; convert other spaces beforehand.
///
/// # Errors
///
/// Returns [`EncodeError::UnsupportedSpace`] for LAB, HSV, or BGR
/// buffers, [`EncodeError::UnsupportedChannels`] if the channel layout
/// has no equivalent in the target format, and [`EncodeError::Image`]
/// if the underlying writer fails.
pub fn encode(buffer: &RasterBuffer, format: OutputFormat) -> Result<Vec<u8>, EncodeError> {
    if !matches!(buffer.space(), ColorSpace::Rgb | ColorSpace::Gray) {
        return Err(EncodeError::UnsupportedSpace(buffer.space()));
    }

    let mut out = Vec::new();
    match format {
        OutputFormat::Png => {
            let color = color_type(buffer.channels(), "PNG")?;
            image::codecs::png::PngEncoder::new(&mut out).write_image(
                buffer.as_raw(),
                buffer.width(),
                buffer.height(),
                color,
            )?;
        }
        OutputFormat::Jpeg { quality } => {
            let (opaque, _) = buffer.clone().split_alpha();
            let color = color_type(opaque.channels(), "JPEG")?;
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
                .write_image(opaque.as_raw(), opaque.width(), opaque.height(), color)?;
        }
    }
    Ok(out)
}

const fn color_type(channels: u8, format: &'static str) -> Result<ExtendedColorType, EncodeError> {
    match channels {
        1 => Ok(ExtendedColorType::L8),
        3 => Ok(ExtendedColorType::Rgb8),
        4 => Ok(ExtendedColorType::Rgba8),
        _ => Err(EncodeError::UnsupportedChannels { channels, format }),
    }
}
