//! Region-flattening smoothers: median and bilateral filtering.
//!
//! [`median_smooth`] replaces every sample with the median of its square
//! neighborhood, per channel, which flattens texture into posterized
//! patches. [`bilateral`] averages neighbors weighted by both spatial
//! distance and color distance, so flat areas are smoothed while strong
//! edges survive.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blur::Border;
use crate::error::StageError;
use crate::types::RasterBuffer;

/// Parameters for [`median_smooth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedianConfig {
    /// Side of the square neighborhood (odd).
    pub kernel: u32,
}

impl Default for MedianConfig {
    fn default() -> Self {
        Self { kernel: 7 }
    }
}

/// Per-channel median filter with replicated borders.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for an even or zero kernel.
pub fn median_smooth(buffer: &RasterBuffer, config: &MedianConfig) -> Result<RasterBuffer, StageError> {
    if config.kernel == 0 || config.kernel % 2 == 0 {
        return Err(StageError::InvalidConfig(format!(
            "median kernel must be a positive odd size, got {}",
            config.kernel
        )));
    }
    let radius = config.kernel / 2;
    if radius == 0 {
        return Ok(buffer.clone());
    }
    let data = match buffer.channels() {
        1 => imageproc::filter::median_filter(&buffer.to_gray_image()?, radius, radius).into_raw(),
        3 => imageproc::filter::median_filter(&buffer.to_rgb_image()?, radius, radius).into_raw(),
        4 => {
            let rgba = image::RgbaImage::from_raw(
                buffer.width(),
                buffer.height(),
                buffer.as_raw().to_vec(),
            )
            .ok_or(StageError::BufferLength {
                expected: buffer.dimensions().pixel_count() * 4,
                found: buffer.as_raw().len(),
            })?;
            imageproc::filter::median_filter(&rgba, radius, radius).into_raw()
        }
        found => {
            return Err(StageError::ChannelCount {
                expected: "1, 3, or 4",
                found,
            });
        }
    };
    Ok(buffer.with_data(data))
}

/// Parameters for [`bilateral`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BilateralConfig {
    /// Neighborhood diameter. Zero derives it from `sigma_space`.
    pub diameter: u32,
    /// Color-distance falloff.
    pub sigma_color: f32,
    /// Spatial-distance falloff.
    pub sigma_space: f32,
    /// Number of successive passes.
    pub iterations: u32,
}

impl Default for BilateralConfig {
    fn default() -> Self {
        Self {
            diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
            iterations: 5,
        }
    }
}

impl BilateralConfig {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn radius(&self) -> usize {
        if self.diameter > 0 {
            (self.diameter / 2) as usize
        } else {
            (self.sigma_space.max(f32::EPSILON) * 1.5).round() as usize
        }
    }
}

/// Edge-preserving bilateral filter, repeated `config.iterations` times.
///
/// Color distance is the sum of absolute per-channel differences; only
/// neighbors within a disc of the configured radius contribute. Alpha,
/// if present, is left untouched.
///
/// # Errors
///
/// Returns [`StageError::ChannelCount`] for two-channel buffers.
pub fn bilateral(buffer: &RasterBuffer, config: &BilateralConfig) -> Result<RasterBuffer, StageError> {
    let (mut color, alpha) = buffer.clone().split_alpha();
    if !matches!(color.channels(), 1 | 3) {
        return Err(StageError::ChannelCount {
            expected: "1, 3, or 4",
            found: buffer.channels(),
        });
    }
    let kernel = BilateralKernel::new(config, usize::from(color.channels()));
    for _ in 0..config.iterations {
        color = kernel.apply(&color);
    }
    match alpha {
        Some(alpha) => color.attach_alpha(&alpha),
        None => Ok(color),
    }
}

/// Precomputed spatial offsets and color-weight table.
struct BilateralKernel {
    radius: usize,
    /// `(dx, dy, weight)` with `dx`/`dy` offset by `radius`.
    taps: Vec<(usize, usize, f32)>,
    color_weight: Vec<f32>,
}

impl BilateralKernel {
    #[allow(clippy::cast_precision_loss)]
    fn new(config: &BilateralConfig, channels: usize) -> Self {
        let radius = config.radius();
        let sigma_color = if config.sigma_color > 0.0 { config.sigma_color } else { 1.0 };
        let sigma_space = if config.sigma_space > 0.0 { config.sigma_space } else { 1.0 };
        let color_coeff = -0.5 / (sigma_color * sigma_color);
        let space_coeff = -0.5 / (sigma_space * sigma_space);

        let span = 2 * radius + 1;
        let mut taps = Vec::with_capacity(span * span);
        for dy in 0..span {
            for dx in 0..span {
                let (fx, fy) = (dx as f32 - radius as f32, dy as f32 - radius as f32);
                let r2 = fx.mul_add(fx, fy * fy);
                if r2.sqrt() > radius as f32 {
                    continue;
                }
                taps.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
        let color_weight = (0..256 * channels)
            .map(|i| {
                let d = i as f32;
                (d * d * color_coeff).exp()
            })
            .collect();
        Self {
            radius,
            taps,
            color_weight,
        }
    }

    fn apply(&self, buffer: &RasterBuffer) -> RasterBuffer {
        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let channels = usize::from(buffer.channels());
        let row_len = buffer.row_len();
        let xs = Border::Reflect101.index_table(width, self.radius);
        let ys = Border::Reflect101.index_table(height, self.radius);
        let src = buffer.as_raw();

        let mut out = vec![0u8; src.len()];
        out.par_chunks_exact_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                let mut sum = [0f32; 3];
                for x in 0..width {
                    let centre = &src[y * row_len + x * channels..][..channels];
                    sum[..channels].fill(0.0);
                    let mut weight_sum = 0.0;
                    for &(dx, dy, space_weight) in &self.taps {
                        let start = ys[y + dy] * row_len + xs[x + dx] * channels;
                        let neighbor = &src[start..start + channels];
                        let distance: usize = centre
                            .iter()
                            .zip(neighbor)
                            .map(|(&a, &b)| usize::from(a.abs_diff(b)))
                            .sum();
                        let w = space_weight * self.color_weight[distance];
                        for (acc, &v) in sum.iter_mut().zip(neighbor) {
                            *acc += w * f32::from(v);
                        }
                        weight_sum += w;
                    }
                    for (c, acc) in sum[..channels].iter().enumerate() {
                        row[x * channels + c] = crate::color::quantize(acc / weight_sum);
                    }
                }
            });
        buffer.with_data(out)
    }
}
