//! Color-space conversions between RGB, BGR, LAB, HSV, and grayscale.
//!
//! 8-bit buffers follow the usual integer encodings: LAB stores
//! `L * 255 / 100` with `a`/`b` offset by 128, HSV stores hue halved into
//! `0..180`. Float buffers hold RGB in `0.0..=1.0` and LAB unscaled
//! (`L` in `0..=100`). The float math is `palette`'s: sRGB transfer
//! curve, D65 white point.
//!
//! Every conversion routes through RGB, so any pair of spaces can be
//! converted. An alpha channel, when present, is carried through
//! unchanged except when converting to grayscale, which drops it.

use palette::convert::IntoColorUnclamped;
use palette::{FromColor, Hsv, Lab, LinSrgb, Srgb};
use rayon::prelude::*;

use crate::error::StageError;
use crate::types::{ColorSpace, RasterBuffer};

/// Convert gamma-encoded RGB (`0.0..=1.0`) to LAB.
#[must_use]
pub fn rgb_to_lab([r, g, b]: [f32; 3]) -> [f32; 3] {
    let lin: LinSrgb<f32> = Srgb::new(r, g, b).into_linear();
    let lab: Lab = Lab::from_color(lin);
    [lab.l, lab.a, lab.b]
}

/// Convert LAB to gamma-encoded RGB.
///
/// Out-of-gamut colors produce components outside `0.0..=1.0`; callers
/// that quantize must clamp.
#[must_use]
pub fn lab_to_rgb([l, a, b]: [f32; 3]) -> [f32; 3] {
    let lab: Lab = Lab::new(l, a, b);
    let lin: LinSrgb<f32> = lab.into_color_unclamped();
    let srgb: Srgb<f32> = Srgb::from_linear(lin);
    [srgb.red, srgb.green, srgb.blue]
}

/// Round to nearest and saturate into the 8-bit range.
pub(crate) fn quantize(v: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let q = v.round().clamp(0.0, 255.0) as u8;
    q
}

fn rgb8_to_lab8([r, g, b]: [u8; 3]) -> [u8; 3] {
    let lin: LinSrgb<f32> = Srgb::new(r, g, b).into_format::<f32>().into_linear();
    let lab: Lab = Lab::from_color(lin);
    [
        quantize(lab.l * 255.0 / 100.0),
        quantize(lab.a + 128.0),
        quantize(lab.b + 128.0),
    ]
}

fn lab8_to_rgb8([l, a, b]: [u8; 3]) -> [u8; 3] {
    let lab = [
        f32::from(l) * 100.0 / 255.0,
        f32::from(a) - 128.0,
        f32::from(b) - 128.0,
    ];
    lab_to_rgb(lab).map(|c| quantize(c * 255.0))
}

/// Convert one RGB pixel to 8-bit HSV (hue in `0..180`).
#[must_use]
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let hsv: Hsv = Hsv::from_color(Srgb::new(r, g, b).into_format::<f32>());
    let h = quantize(hsv.hue.into_positive_degrees() / 2.0);
    [
        if h >= 180 { 0 } else { h },
        quantize(hsv.saturation * 255.0),
        quantize(hsv.value * 255.0),
    ]
}

/// Convert one 8-bit HSV pixel (hue in `0..180`) to RGB.
#[must_use]
pub fn hsv_to_rgb([h, s, v]: [u8; 3]) -> [u8; 3] {
    if s == 0 {
        return [v; 3];
    }
    let hsv: Hsv = Hsv::new(
        f32::from(h) * 2.0,
        f32::from(s) / 255.0,
        f32::from(v) / 255.0,
    );
    let rgb: Srgb = Srgb::from_color(hsv);
    [rgb.red, rgb.green, rgb.blue].map(|c| quantize(c * 255.0))
}

/// Luminance of one RGB pixel using the Rec. 601 weights in 14-bit
/// fixed point.
#[must_use]
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
    let y = (u32::from(r) * 4899 + u32::from(g) * 9617 + u32::from(b) * 1868 + (1 << 13)) >> 14;
    #[allow(clippy::cast_possible_truncation)]
    let y = y.min(255) as u8;
    y
}

fn decode_u8(space: ColorSpace, px: &[u8]) -> [u8; 3] {
    match space {
        ColorSpace::Gray => [px[0]; 3],
        ColorSpace::Rgb => [px[0], px[1], px[2]],
        ColorSpace::Bgr => [px[2], px[1], px[0]],
        ColorSpace::Lab => lab8_to_rgb8([px[0], px[1], px[2]]),
        ColorSpace::Hsv => hsv_to_rgb([px[0], px[1], px[2]]),
    }
}

fn encode_u8(space: ColorSpace, rgb: [u8; 3], out: &mut [u8]) {
    match space {
        ColorSpace::Gray => out[0] = luma(rgb),
        ColorSpace::Rgb => out[..3].copy_from_slice(&rgb),
        ColorSpace::Bgr => out[..3].copy_from_slice(&[rgb[2], rgb[1], rgb[0]]),
        ColorSpace::Lab => out[..3].copy_from_slice(&rgb8_to_lab8(rgb)),
        ColorSpace::Hsv => out[..3].copy_from_slice(&rgb_to_hsv(rgb)),
    }
}

/// Convert an 8-bit buffer to another color space.
///
/// Gray sources are broadcast to three identical channels; converting
/// to gray drops any alpha channel.
///
/// # Errors
///
/// Never fails for 8-bit buffers today; the `Result` keeps the
/// signature uniform with [`convert_f32`].
pub fn convert(buffer: &RasterBuffer, target: ColorSpace) -> Result<RasterBuffer, StageError> {
    let source = buffer.space();
    if source == target {
        return Ok(buffer.clone());
    }
    let in_channels = usize::from(buffer.channels());
    let alpha = buffer.has_alpha() && target != ColorSpace::Gray;
    let out_channels = target.color_channels() + u8::from(alpha);
    let out_stride = usize::from(out_channels);

    let mut out = vec![0u8; buffer.dimensions().pixel_count() * out_stride];
    out.par_chunks_exact_mut(out_stride)
        .zip(buffer.as_raw().par_chunks_exact(in_channels))
        .for_each(|(dst, src)| {
            encode_u8(target, decode_u8(source, src), dst);
            if alpha {
                dst[out_stride - 1] = src[in_channels - 1];
            }
        });
    Ok(buffer.reshaped(out_channels, target, out))
}

/// Convert a float buffer between RGB, BGR, LAB, and grayscale.
///
/// # Errors
///
/// Returns [`StageError::UnsupportedConversion`] for HSV in either
/// direction and for gray sources.
pub fn convert_f32(
    buffer: &RasterBuffer<f32>,
    target: ColorSpace,
) -> Result<RasterBuffer<f32>, StageError> {
    let source = buffer.space();
    if source == target {
        return Ok(buffer.clone());
    }
    let unsupported = StageError::UnsupportedConversion {
        from: source,
        to: target,
    };
    if matches!(source, ColorSpace::Hsv | ColorSpace::Gray) || target == ColorSpace::Hsv {
        return Err(unsupported);
    }

    let in_channels = usize::from(buffer.channels());
    let alpha = buffer.has_alpha() && target != ColorSpace::Gray;
    let out_channels = target.color_channels() + u8::from(alpha);
    let out_stride = usize::from(out_channels);

    let mut out = vec![0f32; buffer.dimensions().pixel_count() * out_stride];
    out.par_chunks_exact_mut(out_stride)
        .zip(buffer.as_raw().par_chunks_exact(in_channels))
        .for_each(|(dst, src)| {
            let rgb = match source {
                ColorSpace::Bgr => [src[2], src[1], src[0]],
                ColorSpace::Lab => lab_to_rgb([src[0], src[1], src[2]]),
                _ => [src[0], src[1], src[2]],
            };
            match target {
                ColorSpace::Gray => {
                    dst[0] = 0.299f32.mul_add(rgb[0], 0.587f32.mul_add(rgb[1], 0.114 * rgb[2]));
                }
                ColorSpace::Bgr => dst[..3].copy_from_slice(&[rgb[2], rgb[1], rgb[0]]),
                ColorSpace::Lab => dst[..3].copy_from_slice(&rgb_to_lab(rgb)),
                _ => dst[..3].copy_from_slice(&rgb),
            }
            if alpha {
                dst[out_stride - 1] = src[in_channels - 1];
            }
        });
    Ok(buffer.reshaped(out_channels, target, out))
}

/// Scale an 8-bit buffer into the float working representation (`/ 255`).
///
/// Only RGB, BGR, and gray buffers have a meaningful float scaling.
///
/// # Errors
///
/// Returns [`StageError::UnsupportedConversion`] for LAB or HSV buffers.
pub fn to_float(buffer: &RasterBuffer) -> Result<RasterBuffer<f32>, StageError> {
    if matches!(buffer.space(), ColorSpace::Lab | ColorSpace::Hsv) {
        return Err(StageError::UnsupportedConversion {
            from: buffer.space(),
            to: ColorSpace::Rgb,
        });
    }
    let data = buffer
        .as_raw()
        .par_iter()
        .map(|&v| f32::from(v) / 255.0)
        .collect();
    Ok(buffer.with_data(data))
}

/// Quantize a float RGB/BGR/gray buffer back to 8 bits, clipping to range.
///
/// # Errors
///
/// Returns [`StageError::UnsupportedConversion`] for LAB or HSV buffers.
pub fn to_u8(buffer: &RasterBuffer<f32>) -> Result<RasterBuffer, StageError> {
    if matches!(buffer.space(), ColorSpace::Lab | ColorSpace::Hsv) {
        return Err(StageError::UnsupportedConversion {
            from: buffer.space(),
            to: ColorSpace::Rgb,
        });
    }
    let data = buffer
        .as_raw()
        .par_iter()
        .map(|&v| quantize(v * 255.0))
        .collect();
    Ok(buffer.with_data(data))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
mod tests {
    use super::*;

    fn gradient() -> RasterBuffer {
        let data = (0..16u32 * 16)
            .flat_map(|i| {
                let x = (i % 16) as u8;
                let y = (i / 16) as u8;
                [x * 16, y * 16, x.wrapping_mul(7).wrapping_add(y * 3)]
            })
            .collect();
        RasterBuffer::from_raw(16, 16, 3, ColorSpace::Rgb, data).unwrap()
    }

    #[test]
    fn white_and_black_lab() {
        let white = rgb_to_lab([1.0, 1.0, 1.0]);
        assert!((white[0] - 100.0).abs() < 0.01, "L of white: {}", white[0]);
        assert!(white[1].abs() < 0.01 && white[2].abs() < 0.01);
        let black = rgb_to_lab([0.0, 0.0, 0.0]);
        assert!(black.iter().all(|c| c.abs() < 1e-4));
    }

    #[test]
    fn float_lab_round_trip() {
        for &rgb in &[[0.2, 0.4, 0.6], [0.9, 0.1, 0.05], [0.5, 0.5, 0.5], [0.01, 0.02, 0.0]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for (a, b) in rgb.iter().zip(back) {
                assert!((a - b).abs() < 1e-4, "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn bgr_round_trip_is_exact() {
        let img = gradient();
        let bgr = convert(&img, ColorSpace::Bgr).unwrap();
        assert_eq!(bgr.pixel(3, 0), &[img.pixel(3, 0)[2], img.pixel(3, 0)[1], img.pixel(3, 0)[0]]);
        assert_eq!(convert(&bgr, ColorSpace::Rgb).unwrap(), img);
    }

    #[test]
    fn gray_broadcast_round_trip_is_exact() {
        let data: Vec<u8> = (0..=255).collect();
        let gray = RasterBuffer::from_raw(16, 16, 1, ColorSpace::Gray, data).unwrap();
        let rgb = convert(&gray, ColorSpace::Rgb).unwrap();
        assert_eq!(rgb.channels(), 3);
        assert_eq!(convert(&rgb, ColorSpace::Gray).unwrap(), gray);
    }

    #[test]
    fn lab8_round_trip_within_quantization() {
        let img = gradient();
        let lab = convert(&img, ColorSpace::Lab).unwrap();
        assert_eq!(lab.space(), ColorSpace::Lab);
        let back = convert(&lab, ColorSpace::Rgb).unwrap();
        for (a, b) in img.as_raw().iter().zip(back.as_raw()) {
            assert!(a.abs_diff(*b) <= 4, "{a} vs {b}");
        }
    }

    #[test]
    fn hsv_round_trip_within_quantization() {
        let img = gradient();
        let back = convert(&convert(&img, ColorSpace::Hsv).unwrap(), ColorSpace::Rgb).unwrap();
        for (a, b) in img.as_raw().iter().zip(back.as_raw()) {
            assert!(a.abs_diff(*b) <= 6, "{a} vs {b}");
        }
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(hsv_to_rgb([60, 255, 255]), [0, 255, 0]);
        assert_eq!(rgb_to_hsv([90, 90, 90]), [0, 0, 90]);
    }

    #[test]
    fn luma_weights_green_highest() {
        assert_eq!(luma([255, 255, 255]), 255);
        assert_eq!(luma([0, 0, 0]), 0);
        assert!(luma([0, 255, 0]) > luma([255, 0, 0]));
        assert!(luma([255, 0, 0]) > luma([0, 0, 255]));
    }

    #[test]
    fn alpha_survives_conversion() {
        let rgba = RasterBuffer::from_raw(1, 1, 4, ColorSpace::Rgb, vec![10, 20, 30, 99]).unwrap();
        let lab = convert(&rgba, ColorSpace::Lab).unwrap();
        assert_eq!(lab.channels(), 4);
        assert_eq!(lab.pixel(0, 0)[3], 99);
        let gray = convert(&rgba, ColorSpace::Gray).unwrap();
        assert_eq!(gray.channels(), 1);
    }

    #[test]
    fn float_conversions_reject_hsv() {
        let buf = RasterBuffer::filled(1, 1, 3, ColorSpace::Rgb, 0.5f32).unwrap();
        assert!(matches!(
            convert_f32(&buf, ColorSpace::Hsv),
            Err(StageError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn float_scaling_round_trip() {
        let img = gradient();
        let back = to_u8(&to_float(&img).unwrap()).unwrap();
        assert_eq!(back, img);
    }
}
