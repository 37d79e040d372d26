//! Separable Gaussian blur and the border handling shared by the
//! neighborhood filters.
//!
//! [`gaussian_blur`] derives its kernel size from sigma the way most
//! image libraries do for 8-bit data (`6σ + 1`, forced odd) and mirrors
//! pixels across the image border without repeating the edge pixel
//! ([`Border::Reflect101`]). [`gaussian_blur_sized`] takes an explicit
//! kernel size and border, which the adaptive threshold needs.
//!
//! Every channel, alpha included, is filtered independently and the
//! result is rounded and saturated back to 8 bits.

use rayon::prelude::*;

use crate::color::quantize;
use crate::error::StageError;
use crate::types::RasterBuffer;

/// Largest accepted blur sigma; its kernel is 6145 taps wide.
pub const MAX_SIGMA: f32 = 1024.0;

/// Precomputed binomial-like kernels used when no sigma is given and the
/// kernel is at most 7 taps wide.
const FIXED_KERNELS: [&[f32]; 4] = [
    &[1.0],
    &[0.25, 0.5, 0.25],
    &[0.0625, 0.25, 0.375, 0.25, 0.0625],
    &[0.031_25, 0.109_375, 0.218_75, 0.281_25, 0.218_75, 0.109_375, 0.031_25],
];

/// How samples outside the image are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Border {
    /// Mirror without repeating the edge sample: `dcb|abcd|cba`.
    #[default]
    Reflect101,
    /// Repeat the edge sample: `aaa|abcd|ddd`.
    Replicate,
}

impl Border {
    /// Map a possibly out-of-range coordinate into `0..len`.
    #[must_use]
    pub const fn index(self, i: isize, len: usize) -> usize {
        let n = signed(len);
        if n <= 1 {
            return 0;
        }
        let mut i = i;
        match self {
            Self::Replicate => {
                if i < 0 {
                    i = 0;
                } else if i >= n {
                    i = n - 1;
                }
            }
            Self::Reflect101 => {
                while i < 0 || i >= n {
                    i = if i < 0 { -i } else { 2 * n - 2 - i };
                }
            }
        }
        unsigned(i)
    }

    /// Index lookup for a filter of the given radius: tap `k` (counted
    /// from zero) of a kernel centred on `p` reads `table[p + k]`.
    pub(crate) fn index_table(self, len: usize, radius: usize) -> Vec<usize> {
        (0..len + 2 * radius)
            .map(|i| self.index(signed(i) - signed(radius), len))
            .collect()
    }
}

#[allow(clippy::cast_possible_wrap)]
pub(crate) const fn signed(v: usize) -> isize {
    v as isize
}

#[allow(clippy::cast_sign_loss)]
const fn unsigned(v: isize) -> usize {
    v as usize
}

/// Kernel size implied by `sigma` for 8-bit data: `round(6σ + 1)`, odd.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn kernel_size_for_sigma(sigma: f32) -> usize {
    let size = sigma.mul_add(6.0, 1.0).round().max(1.0) as usize;
    size | 1
}

/// Check a configured blur sigma.
///
/// Non-positive values are accepted and mean "no blur".
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for NaN, infinite, or larger
/// than [`MAX_SIGMA`] values.
pub fn check_sigma(name: &str, sigma: f32) -> Result<(), StageError> {
    if !sigma.is_finite() || sigma > MAX_SIGMA {
        return Err(StageError::InvalidConfig(format!(
            "{name} must be a finite number no larger than {MAX_SIGMA}, got {sigma}"
        )));
    }
    Ok(())
}

/// Normalized 1-D Gaussian kernel of `size` taps.
///
/// A non-positive `sigma` is derived from the size
/// (`0.3 * ((size - 1) / 2 - 1) + 0.8`); for sizes up to 7 a fixed
/// table is used instead.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let size = size.max(1) | 1;
    if sigma <= 0.0 {
        if let Some(fixed) = FIXED_KERNELS.get(size / 2) {
            return fixed.to_vec();
        }
    }
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3f32.mul_add((size as f32 - 1.0).mul_add(0.5, -1.0), 0.8)
    };
    let scale = -0.5 / (sigma * sigma);
    let centre = (size as f32 - 1.0) / 2.0;
    let raw: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - centre;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f32 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}

/// Gaussian blur with the kernel size derived from `sigma`.
///
/// Non-positive sigma values return the buffer unchanged.
#[must_use = "returns the blurred buffer"]
pub fn gaussian_blur(buffer: &RasterBuffer, sigma: f32) -> RasterBuffer {
    if sigma <= 0.0 {
        return buffer.clone();
    }
    let kernel = gaussian_kernel(kernel_size_for_sigma(sigma), sigma);
    convolve_separable(buffer, &kernel, Border::Reflect101)
}

/// Gaussian blur with an explicit odd kernel `size` and border mode.
#[must_use = "returns the blurred buffer"]
pub fn gaussian_blur_sized(
    buffer: &RasterBuffer,
    size: usize,
    sigma: f32,
    border: Border,
) -> RasterBuffer {
    let kernel = gaussian_kernel(size, sigma);
    convolve_separable(buffer, &kernel, border)
}

/// Apply the same 1-D kernel along rows, then along columns.
pub(crate) fn convolve_separable(
    buffer: &RasterBuffer,
    kernel: &[f32],
    border: Border,
) -> RasterBuffer {
    let width = buffer.width() as usize;
    let height = buffer.height() as usize;
    let channels = usize::from(buffer.channels());
    let row_len = buffer.row_len();
    let radius = kernel.len() / 2;
    let src = buffer.as_raw();

    let xs = border.index_table(width, radius);
    let ys = border.index_table(height, radius);

    let mut horizontal = vec![0f32; src.len()];
    horizontal
        .par_chunks_exact_mut(row_len)
        .zip(src.par_chunks_exact(row_len))
        .for_each(|(dst, row)| {
            for x in 0..width {
                for c in 0..channels {
                    dst[x * channels + c] = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, &w)| w * f32::from(row[xs[x + k] * channels + c]))
                        .sum();
                }
            }
        });

    let mut out = vec![0u8; src.len()];
    out.par_chunks_exact_mut(row_len)
        .enumerate()
        .for_each(|(y, dst)| {
            for (i, sample) in dst.iter_mut().enumerate() {
                let acc: f32 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, &w)| w * horizontal[ys[y + k] * row_len + i])
                    .sum();
                *sample = quantize(acc);
            }
        });
    buffer.with_data(out)
}
