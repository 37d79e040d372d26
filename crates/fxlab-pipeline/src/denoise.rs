//! Non-local means denoising.
//!
//! Each output pixel is a weighted average of the pixels in a square
//! search window around it. A candidate's weight depends on how similar
//! its surrounding template patch is to the patch around the pixel being
//! denoised: `exp(-d / (h² · channels))`, where `d` is the mean squared
//! difference between the two patches summed over channels. Weights
//! below 0.001 are dropped.
//!
//! The patch distances for one search offset are computed for the whole
//! image at once with running box sums, so the cost per pixel is
//! proportional to the search area rather than search area times
//! template area.
//!
//! Color images are denoised in 8-bit LAB with one filter strength for
//! luminance and another for both chrominance channels.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blur::{Border, signed};
use crate::color::{self, quantize};
use crate::error::StageError;
use crate::types::{ColorSpace, RasterBuffer};

const WEIGHT_THRESHOLD: f32 = 0.001;

/// Filter strengths and window sizes for [`denoise_colored`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Filter strength for the luminance channel.
    pub h: f32,
    /// Filter strength for the chrominance channels.
    pub h_color: f32,
    /// Side of the square patch compared between pixels (odd).
    pub template_window: u32,
    /// Side of the square area searched for similar patches (odd).
    pub search_window: u32,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            h: 3.0,
            h_color: 3.0,
            template_window: 7,
            search_window: 21,
        }
    }
}

impl DenoiseConfig {
    fn validate(&self) -> Result<(), StageError> {
        for (name, size) in [
            ("template window", self.template_window),
            ("search window", self.search_window),
        ] {
            if size == 0 || size % 2 == 0 {
                return Err(StageError::InvalidConfig(format!(
                    "{name} must be a positive odd size, got {size}"
                )));
            }
        }
        if !(self.h > 0.0 && self.h_color > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "filter strengths must be positive, got h={} h_color={}",
                self.h, self.h_color
            )));
        }
        Ok(())
    }
}

/// Denoise a color buffer in LAB space.
///
/// Alpha, if present, is carried through untouched.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for even or zero window sizes
/// or non-positive strengths, and [`StageError::ChannelCount`] for
/// single-channel input.
pub fn denoise_colored(
    buffer: &RasterBuffer,
    config: &DenoiseConfig,
) -> Result<RasterBuffer, StageError> {
    config.validate()?;
    if buffer.space() == ColorSpace::Gray {
        return Err(StageError::ChannelCount {
            expected: "3 or 4",
            found: buffer.channels(),
        });
    }
    let (lab, alpha) = color::convert(buffer, ColorSpace::Lab)?.split_alpha();
    let mut denoised = nl_means(
        &lab,
        &[config.h, config.h_color, config.h_color],
        config.template_window as usize,
        config.search_window as usize,
    )?;
    if let Some(alpha) = alpha {
        denoised = denoised.attach_alpha(&alpha)?;
    }
    color::convert(&denoised, buffer.space())
}

/// Non-local means over all channels of `buffer`, one strength per channel.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] if `strengths` does not supply
/// one value per channel.
pub fn nl_means(
    buffer: &RasterBuffer,
    strengths: &[f32],
    template_window: usize,
    search_window: usize,
) -> Result<RasterBuffer, StageError> {
    let channels = usize::from(buffer.channels());
    if strengths.len() != channels {
        return Err(StageError::InvalidConfig(format!(
            "{} filter strengths for {channels} channels",
            strengths.len()
        )));
    }

    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let t = template_window / 2;
    let s = search_window / 2;
    let pad = t + s;
    let padded = Padded::new(buffer, pad);

    #[allow(clippy::cast_precision_loss)]
    let channel_count = channels as f32;
    let inv_h: Vec<f32> = strengths
        .iter()
        .map(|h| 1.0 / (h * h * channel_count))
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let inv_area = 1.0 / (template_window * template_window) as f32;

    // Region of the padded image whose template sums cover every pixel.
    let region_w = width + 2 * t;
    let region_h = height + 2 * t;
    let mut diff = vec![0f32; region_w * region_h];
    let mut row_sums = vec![0f32; width * region_h];
    let mut weighted = vec![0f32; width * height * channels];
    let mut weights = vec![0f32; width * height * channels];

    for dy in 0..=2 * s {
        for dx in 0..=2 * s {
            diff.par_chunks_exact_mut(region_w)
                .enumerate()
                .for_each(|(ry, row)| {
                    for (rx, d) in row.iter_mut().enumerate() {
                        let a = padded.pixel(rx + s, ry + s);
                        let b = padded.pixel(rx + dx, ry + dy);
                        *d = a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum();
                    }
                });

            row_sums
                .par_chunks_exact_mut(width)
                .zip(diff.par_chunks_exact(region_w))
                .for_each(|(sums, row)| box_sum_row(row, sums, template_window));

            weighted
                .par_chunks_exact_mut(width * channels)
                .zip(weights.par_chunks_exact_mut(width * channels))
                .enumerate()
                .for_each(|(y, (acc_row, w_row))| {
                    for x in 0..width {
                        let ssd: f32 = (0..template_window)
                            .map(|k| row_sums[(y + k) * width + x])
                            .sum();
                        let dist = ssd * inv_area;
                        let candidate = padded.pixel(x + dx + t, y + dy + t);
                        for c in 0..channels {
                            let w = (-dist * inv_h[c]).exp();
                            if w < WEIGHT_THRESHOLD {
                                continue;
                            }
                            acc_row[x * channels + c] += w * candidate[c];
                            w_row[x * channels + c] += w;
                        }
                    }
                });
        }
    }

    let out = weighted
        .par_iter()
        .zip(weights.par_iter())
        .map(|(&sum, &w)| quantize(sum / w))
        .collect();
    Ok(buffer.with_data(out))
}

/// Horizontal running sum of `window` samples for each output column.
fn box_sum_row(row: &[f32], sums: &mut [f32], window: usize) {
    let mut acc: f32 = row[..window].iter().sum();
    sums[0] = acc;
    for x in 1..sums.len() {
        acc += row[x + window - 1] - row[x - 1];
        sums[x] = acc;
    }
}

/// Float copy of a buffer extended by mirroring on every side.
struct Padded {
    data: Vec<f32>,
    stride: usize,
    channels: usize,
}

impl Padded {
    fn new(buffer: &RasterBuffer, pad: usize) -> Self {
        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let channels = usize::from(buffer.channels());
        let xs = Border::Reflect101.index_table(width, pad);
        let stride = width + 2 * pad;
        let src = buffer.as_raw();
        let mut data = Vec::with_capacity(stride * (height + 2 * pad) * channels);
        for py in 0..height + 2 * pad {
            let sy = Border::Reflect101.index(signed(py) - signed(pad), height);
            for &sx in &xs {
                let start = (sy * width + sx) * channels;
                data.extend(src[start..start + channels].iter().map(|&v| f32::from(v)));
            }
        }
        Self {
            data,
            stride,
            channels,
        }
    }

    fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.stride + x) * self.channels;
        &self.data[start..start + self.channels]
    }
}
