//! Adaptive edge mask for the cartoon look.
//!
//! [`edge_mask`] converts to grayscale, median-blurs away speckle, and
//! applies a local Gaussian-weighted adaptive threshold. The result is a
//! binary mask: 255 where a pixel is at least as bright as its
//! neighborhood mean minus a constant, 0 on dark edges. [`apply_mask`]
//! combines that mask with a color image by bitwise AND, so edge pixels
//! become black and everything else keeps its color.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blur::{Border, gaussian_blur_sized};
use crate::color;
use crate::error::StageError;
use crate::smooth::{MedianConfig, median_smooth};
use crate::types::{ColorSpace, RasterBuffer};

/// Value written for non-edge pixels.
pub const MASK_ON: u8 = 255;
const _: () = assert!(MASK_ON == u8::MAX);

/// Parameters for [`edge_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeMaskConfig {
    /// Median blur kernel applied before thresholding (odd).
    pub median_kernel: u32,
    /// Side of the neighborhood used for the local mean (odd, at least 3).
    pub block_size: u32,
    /// Constant subtracted from the local mean.
    pub offset: f32,
}

impl Default for EdgeMaskConfig {
    fn default() -> Self {
        Self {
            median_kernel: 7,
            block_size: 7,
            offset: 2.0,
        }
    }
}

/// Compute the binary edge mask of a color or gray buffer.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for an invalid kernel or block
/// size.
pub fn edge_mask(buffer: &RasterBuffer, config: &EdgeMaskConfig) -> Result<RasterBuffer, StageError> {
    let gray = color::convert(buffer, ColorSpace::Gray)?;
    let smoothed = median_smooth(
        &gray,
        &MedianConfig {
            kernel: config.median_kernel,
        },
    )?;
    adaptive_threshold(&smoothed, config.block_size, config.offset)
}

/// Gaussian-weighted adaptive threshold of a single-channel buffer.
///
/// A pixel maps to [`MASK_ON`] when `value - local_mean > -ceil(offset)`,
/// otherwise to 0. The local mean uses a `block_size` Gaussian with
/// replicated borders.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] if `block_size` is even or
/// below 3, and [`StageError::ChannelCount`] for multi-channel input.
pub fn adaptive_threshold(
    gray: &RasterBuffer,
    block_size: u32,
    offset: f32,
) -> Result<RasterBuffer, StageError> {
    if block_size < 3 || block_size % 2 == 0 {
        return Err(StageError::InvalidConfig(format!(
            "block size must be odd and at least 3, got {block_size}"
        )));
    }
    gray.expect_layout(1, ColorSpace::Gray)?;

    let mean = gaussian_blur_sized(gray, block_size as usize, 0.0, Border::Replicate);
    #[allow(clippy::cast_possible_truncation)]
    let delta = offset.ceil() as i32;
    let data = gray
        .as_raw()
        .par_iter()
        .zip(mean.as_raw().par_iter())
        .map(|(&v, &m)| {
            if i32::from(v) - i32::from(m) > -delta {
                MASK_ON
            } else {
                0
            }
        })
        .collect();
    Ok(gray.with_data(data))
}

/// Bitwise AND of every color channel with a single-channel mask.
///
/// Alpha, if present, is kept as is.
///
/// # Errors
///
/// Returns [`StageError::DimensionMismatch`] if the sizes differ and
/// [`StageError::ChannelCount`] if `mask` is not single-channel.
pub fn apply_mask(color: &RasterBuffer, mask: &RasterBuffer) -> Result<RasterBuffer, StageError> {
    if color.dimensions() != mask.dimensions() {
        return Err(StageError::DimensionMismatch {
            left: color.dimensions(),
            right: mask.dimensions(),
        });
    }
    if mask.channels() != 1 {
        return Err(StageError::ChannelCount {
            expected: "1",
            found: mask.channels(),
        });
    }
    let channels = usize::from(color.channels());
    let color_channels = usize::from(color.space().color_channels()).min(channels);
    let mut data = color.as_raw().to_vec();
    data.par_chunks_exact_mut(channels)
        .zip(mask.as_raw().par_iter())
        .for_each(|(px, &m)| {
            for v in &mut px[..color_channels] {
                *v &= m;
            }
        });
    Ok(color.with_data(data))
}
