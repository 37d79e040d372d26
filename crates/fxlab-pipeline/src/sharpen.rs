//! Sharpening: unsharp masking and 3x3 kernel sharpening.
//!
//! [`unsharp_mask`] computes `original * alpha - blurred * beta` per
//! sample, where `blurred` is a Gaussian blur of the original at `sigma`.
//! With `alpha - beta == 1` flat regions keep their value and edges are
//! pushed apart. Results are rounded and saturated, never wrapped.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blur::{Border, check_sigma, gaussian_blur};
use crate::color::quantize;
use crate::error::StageError;
use crate::types::RasterBuffer;

/// Parameters for [`unsharp_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnsharpConfig {
    /// Gaussian sigma of the blurred copy. Zero skips the blur.
    pub sigma: f32,
    /// Weight of the original.
    pub alpha: f32,
    /// Weight subtracted for the blurred copy.
    pub beta: f32,
}

impl Default for UnsharpConfig {
    fn default() -> Self {
        Self {
            sigma: 2.0,
            alpha: 1.6,
            beta: 0.6,
        }
    }
}

impl UnsharpConfig {
    fn validate(&self) -> Result<(), StageError> {
        check_sigma("unsharp sigma", self.sigma)?;
        if !(self.alpha.is_finite() && self.beta.is_finite()) {
            return Err(StageError::InvalidConfig(format!(
                "unsharp weights must be finite, got alpha={} beta={}",
                self.alpha, self.beta
            )));
        }
        Ok(())
    }
}

/// Sharpen by subtracting a weighted Gaussian blur from a weighted original.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for an unusable sigma or
/// non-finite weights.
pub fn unsharp_mask(
    buffer: &RasterBuffer,
    config: &UnsharpConfig,
) -> Result<RasterBuffer, StageError> {
    config.validate()?;
    let blurred = gaussian_blur(buffer, config.sigma);
    let data = buffer
        .as_raw()
        .par_iter()
        .zip(blurred.as_raw().par_iter())
        .map(|(&o, &b)| quantize(f32::from(o).mul_add(config.alpha, -f32::from(b) * config.beta)))
        .collect();
    Ok(buffer.with_data(data))
}

/// Parameters for [`kernel_sharpen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSharpenConfig {
    /// Centre weight of the cross-shaped kernel.
    pub strength: i32,
}

/// Sharpen dark strokes on a light background.
///
/// The buffer is inverted, convolved with
/// `[[0, -1, 0], [-1, strength, -1], [0, -1, 0]]` (mirrored borders,
/// saturating), and inverted back. A strength of 5 leaves flat regions
/// unchanged; larger values also brighten them.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for a non-positive strength.
pub fn kernel_sharpen(
    buffer: &RasterBuffer,
    config: &KernelSharpenConfig,
) -> Result<RasterBuffer, StageError> {
    if config.strength <= 0 {
        return Err(StageError::InvalidConfig(format!(
            "sharpen strength must be positive, got {}",
            config.strength
        )));
    }
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let channels = usize::from(buffer.channels());
    let row_len = buffer.row_len();
    let xs = Border::Reflect101.index_table(width, 1);
    let ys = Border::Reflect101.index_table(height, 1);
    let src = buffer.as_raw();
    let strength = i64::from(config.strength);
    let inverted = |x: usize, y: usize, c: usize| 255 - i64::from(src[y * row_len + x * channels + c]);

    let mut out = vec![0u8; src.len()];
    out.par_chunks_exact_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let (up, here, down) = (ys[y], ys[y + 1], ys[y + 2]);
            for x in 0..width {
                let (left, centre, right) = (xs[x], xs[x + 1], xs[x + 2]);
                for c in 0..channels {
                    let v = strength * inverted(centre, here, c)
                        - inverted(centre, up, c)
                        - inverted(centre, down, c)
                        - inverted(left, here, c)
                        - inverted(right, here, c);
                    let v = u8::try_from(v.clamp(0, 255)).unwrap_or(u8::MAX);
                    row[x * channels + c] = 255 - v;
                }
            }
        });
    Ok(buffer.with_data(out))
}
