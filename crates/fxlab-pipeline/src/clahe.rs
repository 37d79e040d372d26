//! Contrast-limited adaptive histogram equalization (CLAHE).
//!
//! The luminance plane is divided into a grid of tiles (8x8 by default).
//! Each tile gets its own histogram, clipped at
//! `clip_limit * tile_area / 256` with the excess spread evenly across
//! all bins, and its own cumulative remap curve. Every pixel is then
//! remapped by bilinearly interpolating the curves of the four nearest
//! tile centres so no seams appear at tile boundaries.
//!
//! If the plane does not divide evenly into tiles it is extended on the
//! right and bottom by mirroring before the histograms are taken.
//! A tile whose pixels all share one value maps to the identity curve,
//! so flat regions pass through untouched.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blur::{Border, signed};
use crate::color::{self, quantize};
use crate::error::StageError;
use crate::types::{ColorSpace, RasterBuffer};

const BINS: usize = 256;

/// Tile grid and clip limit for [`equalize_plane`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheConfig {
    /// Histogram clip limit, relative to a uniform histogram. Zero
    /// disables clipping (plain tiled equalization).
    pub clip_limit: f32,
    /// Number of tile columns.
    pub tiles_x: u32,
    /// Number of tile rows.
    pub tiles_y: u32,
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            tiles_x: 8,
            tiles_y: 8,
        }
    }
}

impl ClaheConfig {
    /// Default grid with the given clip limit.
    #[must_use]
    pub fn with_clip_limit(clip_limit: f32) -> Self {
        Self {
            clip_limit,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), StageError> {
        if self.tiles_x == 0 || self.tiles_y == 0 {
            return Err(StageError::InvalidConfig(format!(
                "tile grid must be at least 1x1, got {}x{}",
                self.tiles_x, self.tiles_y
            )));
        }
        if !self.clip_limit.is_finite() || self.clip_limit < 0.0 {
            return Err(StageError::InvalidConfig(format!(
                "clip limit must be a non-negative number, got {}",
                self.clip_limit
            )));
        }
        Ok(())
    }
}

/// Equalize the luminance of a color buffer in LAB space.
///
/// The buffer is converted to 8-bit LAB, CLAHE is applied to `L`, and
/// the result is converted back to the buffer's original space. Any
/// alpha channel is carried through untouched.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for a degenerate grid or clip
/// limit and [`StageError::ChannelCount`] for single-channel input.
pub fn equalize_luminance(
    buffer: &RasterBuffer,
    config: &ClaheConfig,
) -> Result<RasterBuffer, StageError> {
    if buffer.space() == ColorSpace::Gray {
        return Err(StageError::ChannelCount {
            expected: "3 or 4",
            found: buffer.channels(),
        });
    }
    let (lab, alpha) = color::convert(buffer, ColorSpace::Lab)?.split_alpha();
    let mut planes = lab.split_channels();
    planes[0] = equalize_plane(&planes[0], config)?;
    let mut merged = RasterBuffer::merge_channels(&planes, ColorSpace::Lab)?;
    if let Some(alpha) = alpha {
        merged = merged.attach_alpha(&alpha)?;
    }
    color::convert(&merged, buffer.space())
}

/// Apply CLAHE to a single-channel plane.
///
/// # Errors
///
/// Returns [`StageError::ChannelCount`] if `plane` has more than one
/// channel and [`StageError::InvalidConfig`] for a bad configuration.
pub fn equalize_plane(plane: &RasterBuffer, config: &ClaheConfig) -> Result<RasterBuffer, StageError> {
    config.validate()?;
    if plane.channels() != 1 {
        return Err(StageError::ChannelCount {
            expected: "1",
            found: plane.channels(),
        });
    }

    let width = plane.width() as usize;
    let height = plane.height() as usize;
    let tiles_x = config.tiles_x as usize;
    let tiles_y = config.tiles_y as usize;
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);
    let tile_area = tile_w * tile_h;
    let limit = clip_count(config.clip_limit, tile_area);

    let src = plane.as_raw();
    let luts: Vec<[u8; BINS]> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|t| {
            let (tx, ty) = (t % tiles_x, t / tiles_x);
            let mut hist = [0usize; BINS];
            for y in ty * tile_h..(ty + 1) * tile_h {
                let sy = Border::Reflect101.index(signed(y), height);
                for x in tx * tile_w..(tx + 1) * tile_w {
                    let sx = Border::Reflect101.index(signed(x), width);
                    hist[usize::from(src[sy * width + sx])] += 1;
                }
            }
            tile_lut(&mut hist, limit, tile_area)
        })
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let (inv_tw, inv_th) = (1.0 / tile_w as f32, 1.0 / tile_h as f32);
    let x_weights: Vec<(usize, usize, f32)> = (0..width)
        .map(|x| interpolation(x, inv_tw, tiles_x))
        .collect();

    let mut out = vec![0u8; src.len()];
    out.par_chunks_exact_mut(width)
        .zip(src.par_chunks_exact(width))
        .enumerate()
        .for_each(|(y, (dst, row))| {
            let (ty1, ty2, ya) = interpolation(y, inv_th, tiles_y);
            let (top, bottom) = (ty1 * tiles_x, ty2 * tiles_x);
            for ((d, &v), &(tx1, tx2, xa)) in dst.iter_mut().zip(row).zip(&x_weights) {
                let v = usize::from(v);
                let upper = f32::from(luts[top + tx1][v])
                    .mul_add(1.0 - xa, f32::from(luts[top + tx2][v]) * xa);
                let lower = f32::from(luts[bottom + tx1][v])
                    .mul_add(1.0 - xa, f32::from(luts[bottom + tx2][v]) * xa);
                *d = quantize(upper.mul_add(1.0 - ya, lower * ya));
            }
        });
    Ok(plane.with_data(out))
}

/// Absolute per-bin limit for a tile of `tile_area` pixels.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn clip_count(clip_limit: f32, tile_area: usize) -> usize {
    if clip_limit > 0.0 {
        ((clip_limit * tile_area as f32 / BINS as f32) as usize).max(1)
    } else {
        usize::MAX
    }
}

/// Neighbouring tile indices and the weight of the second one.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn interpolation(pos: usize, inv_tile: f32, tiles: usize) -> (usize, usize, f32) {
    let f = (pos as f32).mul_add(inv_tile, -0.5);
    let lower = f.floor();
    let weight = f - lower;
    let first = if lower < 0.0 { 0 } else { lower as usize };
    let second = if lower + 1.0 < 0.0 {
        0
    } else {
        ((lower + 1.0) as usize).min(tiles - 1)
    };
    (first.min(tiles - 1), second, weight)
}

/// Clip a tile histogram and turn it into a remap curve.
fn tile_lut(hist: &mut [usize; BINS], limit: usize, tile_area: usize) -> [u8; BINS] {
    let mut lut = [0u8; BINS];
    if hist.iter().filter(|&&count| count > 0).count() <= 1 {
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = u8::try_from(i).unwrap_or(u8::MAX);
        }
        return lut;
    }

    clip_histogram(hist, limit);

    #[allow(clippy::cast_precision_loss)]
    let scale = 255.0 / tile_area as f32;
    let mut sum = 0usize;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        sum += count;
        #[allow(clippy::cast_precision_loss)]
        let mapped = sum as f32 * scale;
        *entry = quantize(mapped);
    }
    lut
}

/// Cap every bin at `limit` and redistribute the excess.
///
/// The excess is spread in whole counts over all bins; any remainder is
/// handed out one count at a time at a regular stride.
fn clip_histogram(hist: &mut [usize; BINS], limit: usize) {
    let mut clipped = 0;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }

    let batch = clipped / BINS;
    let mut residual = clipped % BINS;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        for bin in hist.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *bin += 1;
            residual -= 1;
        }
    }
}
