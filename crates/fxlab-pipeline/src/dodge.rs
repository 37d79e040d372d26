//! Color-dodge blending and the pencil-sketch composition built on it.
//!
//! [`color_dodge`] brightens a base image by dividing it by the inverse
//! of a blend image: `base * 255 / (255 - blend)`, truncated and capped at
//! 255. A saturated base or blend always yields 255.
//!
//! [`pencil_sketch`] dodges a grayscale image with its own blurred
//! inversion: flat areas wash out to white while edges, where the
//! blurred inversion differs from the local value, stay dark.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blur::{check_sigma, gaussian_blur};
use crate::color;
use crate::error::StageError;
use crate::types::{ColorSpace, RasterBuffer};

/// Parameters for [`pencil_sketch`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DodgeConfig {
    /// Gaussian sigma applied to the inverted grayscale image.
    pub blur_sigma: f32,
}

impl Default for DodgeConfig {
    fn default() -> Self {
        Self { blur_sigma: 5.0 }
    }
}

impl DodgeConfig {
    fn validate(&self) -> Result<(), StageError> {
        check_sigma("pencil sketch blur sigma", self.blur_sigma)
    }
}

/// Invert every sample (`255 - v`).
#[must_use = "returns the inverted buffer"]
pub fn invert(buffer: &RasterBuffer) -> RasterBuffer {
    buffer.with_data(buffer.as_raw().par_iter().map(|&v| 255 - v).collect())
}

/// Dodge `base` with `blend`, both single-channel and the same size.
///
/// # Errors
///
/// Returns [`StageError::ChannelCount`] if either input has more than
/// one channel and [`StageError::DimensionMismatch`] if their sizes
/// differ.
pub fn color_dodge(base: &RasterBuffer, blend: &RasterBuffer) -> Result<RasterBuffer, StageError> {
    for buffer in [base, blend] {
        if buffer.channels() != 1 {
            return Err(StageError::ChannelCount {
                expected: "1",
                found: buffer.channels(),
            });
        }
    }
    if base.dimensions() != blend.dimensions() {
        return Err(StageError::DimensionMismatch {
            left: base.dimensions(),
            right: blend.dimensions(),
        });
    }
    let data = base
        .as_raw()
        .par_iter()
        .zip(blend.as_raw().par_iter())
        .map(|(&b, &f)| dodge_sample(b, f))
        .collect();
    Ok(base.with_data(data))
}

fn dodge_sample(base: u8, blend: u8) -> u8 {
    if base == u8::MAX || blend == u8::MAX {
        return u8::MAX;
    }
    let value = u32::from(base) * 255 / u32::from(255 - blend);
    u8::try_from(value).unwrap_or(u8::MAX)
}

/// Turn a buffer into a single-channel pencil sketch.
///
/// # Errors
///
/// Returns [`StageError::InvalidConfig`] for an unusable blur sigma and
/// propagates conversion failures from [`color::convert`].
pub fn pencil_sketch(buffer: &RasterBuffer, config: &DodgeConfig) -> Result<RasterBuffer, StageError> {
    config.validate()?;
    let gray = color::convert(buffer, ColorSpace::Gray)?;
    let blurred = gaussian_blur(&invert(&gray), config.blur_sigma);
    color_dodge(&gray, &blurred)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
mod tests {
    use super::*;

    fn gray(values: Vec<u8>) -> RasterBuffer {
        let width = u32::try_from(values.len()).unwrap();
        RasterBuffer::from_raw(width, 1, 1, ColorSpace::Gray, values).unwrap()
    }

    #[test]
    fn saturated_base_always_dodges_to_white() {
        let base = gray(vec![255; 256]);
        let blend = gray((0..=255).collect());
        let out = color_dodge(&base, &blend).unwrap();
        assert!(out.as_raw().iter().all(|&v| v == 255));
    }

    #[test]
    fn saturated_blend_always_dodges_to_white() {
        let base = gray((0..=255).collect());
        let blend = gray(vec![255; 256]);
        let out = color_dodge(&base, &blend).unwrap();
        assert!(out.as_raw().iter().all(|&v| v == 255));
    }

    #[test]
    fn dodge_divides_and_truncates() {
        let out = color_dodge(&gray(vec![50, 100, 0, 200]), &gray(vec![155, 155, 100, 100])).unwrap();
        assert_eq!(out.as_raw(), &[127, 255, 0, 255]);
    }

    #[test]
    fn black_blend_is_identity() {
        let base = gray((0..=255).collect());
        let out = color_dodge(&base, &gray(vec![0; 256])).unwrap();
        assert_eq!(out, base);
    }

    #[test]
    fn mismatched_sizes_rejected() {
        let err = color_dodge(&gray(vec![1, 2]), &gray(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, StageError::DimensionMismatch { .. }));
    }

    #[test]
    fn multi_channel_rejected() {
        let rgb = RasterBuffer::filled(2, 1, 3, ColorSpace::Rgb, 0u8).unwrap();
        assert!(color_dodge(&rgb, &gray(vec![0, 0])).is_err());
    }

    #[test]
    fn constant_field_sketches_to_white() {
        for value in [1, 60, 128, 254] {
            let flat = RasterBuffer::filled(30, 30, 3, ColorSpace::Rgb, value).unwrap();
            let sketch = pencil_sketch(&flat, &DodgeConfig::default()).unwrap();
            assert_eq!(sketch.channels(), 1);
            assert!(sketch.as_raw().iter().all(|&v| v == 255), "value {value}");
        }
    }

    #[test]
    fn edges_stay_darker_than_flat_areas() {
        let data = (0..40 * 10)
            .flat_map(|i| {
                let v = if i % 40 < 20 { 40 } else { 220 };
                [v, v, v]
            })
            .collect();
        let img = RasterBuffer::from_raw(40, 10, 3, ColorSpace::Rgb, data).unwrap();
        let sketch = pencil_sketch(&img, &DodgeConfig { blur_sigma: 3.0 }).unwrap();
        assert!(sketch.pixel(19, 5)[0] < sketch.pixel(2, 5)[0]);
    }

    #[test]
    fn unbounded_blur_sigma_is_rejected() {
        let img = RasterBuffer::filled(4, 4, 3, ColorSpace::Rgb, 120u8).unwrap();
        for blur_sigma in [f32::INFINITY, f32::NAN, 1e8] {
            let err = pencil_sketch(&img, &DodgeConfig { blur_sigma }).unwrap_err();
            assert!(matches!(err, StageError::InvalidConfig(_)), "{blur_sigma}");
        }
    }
}
