//! Saturation boost in 8-bit HSV.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::color;
use crate::error::StageError;
use crate::types::{ColorSpace, RasterBuffer};

/// Parameters for [`boost_saturation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationConfig {
    /// Amount added to the saturation channel (negative desaturates).
    pub offset: i16,
}

impl Default for SaturationConfig {
    fn default() -> Self {
        Self { offset: 25 }
    }
}

/// Add a fixed offset to every pixel's HSV saturation, clipping to `0..=255`.
///
/// The buffer is converted to HSV and back to its original space; alpha
/// is carried through.
///
/// # Errors
///
/// Returns [`StageError::ChannelCount`] for single-channel input.
pub fn boost_saturation(
    buffer: &RasterBuffer,
    config: &SaturationConfig,
) -> Result<RasterBuffer, StageError> {
    if buffer.space() == ColorSpace::Gray {
        return Err(StageError::ChannelCount {
            expected: "3 or 4",
            found: buffer.channels(),
        });
    }
    let mut hsv = color::convert(buffer, ColorSpace::Hsv)?;
    let channels = usize::from(hsv.channels());
    let offset = i32::from(config.offset);
    hsv.as_raw_mut().par_chunks_exact_mut(channels).for_each(|px| {
        let s = (i32::from(px[1]) + offset).clamp(0, 255);
        px[1] = u8::try_from(s).unwrap_or(u8::MAX);
    });
    color::convert(&hsv, buffer.space())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn saturation_of(buffer: &RasterBuffer) -> u8 {
        color::rgb_to_hsv([buffer.pixel(0, 0)[0], buffer.pixel(0, 0)[1], buffer.pixel(0, 0)[2]])[1]
    }

    #[test]
    fn boost_raises_saturation() {
        let img = RasterBuffer::from_raw(1, 1, 3, ColorSpace::Rgb, vec![180, 120, 100]).unwrap();
        let out = boost_saturation(&img, &SaturationConfig::default()).unwrap();
        assert!(saturation_of(&out) > saturation_of(&img));
    }

    #[test]
    fn fully_saturated_color_clips_without_wrapping() {
        let img = RasterBuffer::from_raw(1, 1, 3, ColorSpace::Rgb, vec![255, 0, 0]).unwrap();
        let out = boost_saturation(&img, &SaturationConfig { offset: 100 }).unwrap();
        assert_eq!(out.as_raw(), &[255, 0, 0]);
    }

    #[test]
    fn negative_offset_desaturates_to_gray() {
        let img = RasterBuffer::from_raw(1, 1, 3, ColorSpace::Rgb, vec![200, 50, 50]).unwrap();
        let out = boost_saturation(&img, &SaturationConfig { offset: -255 }).unwrap();
        let px = out.pixel(0, 0);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn alpha_is_preserved() {
        let img = RasterBuffer::from_raw(1, 1, 4, ColorSpace::Rgb, vec![10, 90, 40, 128]).unwrap();
        let out = boost_saturation(&img, &SaturationConfig::default()).unwrap();
        assert_eq!(out.channels(), 4);
        assert_eq!(out.pixel(0, 0)[3], 128);
    }

    #[test]
    fn gray_input_rejected() {
        let img = RasterBuffer::filled(2, 2, 1, ColorSpace::Gray, 9u8).unwrap();
        assert!(boost_saturation(&img, &SaturationConfig::default()).is_err());
    }
}
