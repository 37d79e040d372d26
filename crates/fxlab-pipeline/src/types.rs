//! Shared types for the fxlab effect pipeline.
//!
//! [`RasterBuffer`] is the single in-memory image representation every
//! stage consumes and produces. Its sample depth is a type parameter:
//! `RasterBuffer<u8>` for all 8-bit stages and `RasterBuffer<f32>` for
//! the float working copy used during colorization.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Color-space tag carried by every [`RasterBuffer`].
///
/// The conversion routines in [`crate::color`] are the only way to
/// change the tag of an existing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    /// Red, green, blue.
    Rgb,
    /// Blue, green, red.
    Bgr,
    /// CIE L\*a\*b\*. 8-bit buffers store `L * 255 / 100`, `a + 128`,
    /// `b + 128`; float buffers store the unscaled values.
    Lab,
    /// Hue, saturation, value. 8-bit hue covers `0..180`.
    Hsv,
    /// Single-channel luminance.
    Gray,
}

impl ColorSpace {
    /// Number of color channels (excluding alpha) in this space.
    #[must_use]
    pub const fn color_channels(self) -> u8 {
        match self {
            Self::Gray => 1,
            Self::Rgb | Self::Bgr | Self::Lab | Self::Hsv => 3,
        }
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
            Self::Lab => "LAB",
            Self::Hsv => "HSV",
            Self::Gray => "Gray",
        };
        f.write_str(name)
    }
}

/// A sample type a [`RasterBuffer`] can hold.
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl Sample for u8 {}
impl Sample for f32 {}

/// Contiguous row-major, channel-interleaved raster image.
///
/// Width and height are always positive. The channel count is either
/// the color space's own channel count or one more than that (a
/// trailing alpha channel), and never changes after construction.
#[derive(Clone, PartialEq)]
pub struct RasterBuffer<T: Sample = u8> {
    width: u32,
    height: u32,
    channels: u8,
    space: ColorSpace,
    data: Vec<T>,
}

impl<T: Sample> fmt::Debug for RasterBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

impl<T: Sample> RasterBuffer<T> {
    /// Wrap an existing sample vector.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ZeroDimension`] if either dimension is zero,
    /// [`StageError::ChannelCount`] if `channels` does not fit `space`,
    /// and [`StageError::BufferLength`] if `data` has the wrong length.
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        space: ColorSpace,
        data: Vec<T>,
    ) -> Result<Self, StageError> {
        if width == 0 || height == 0 {
            return Err(StageError::ZeroDimension(Dimensions { width, height }));
        }
        let color = space.color_channels();
        if channels != color && !(color == 3 && channels == 4) {
            return Err(StageError::ChannelCount {
                expected: if color == 1 { "1" } else { "3 or 4" },
                found: channels,
            });
        }
        let expected = width as usize * height as usize * usize::from(channels);
        if data.len() != expected {
            return Err(StageError::BufferLength {
                expected,
                found: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            space,
            data,
        })
    }

    /// Create a buffer with every sample set to `value`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`from_raw`](Self::from_raw), minus the length check.
    pub fn filled(
        width: u32,
        height: u32,
        channels: u8,
        space: ColorSpace,
        value: T,
    ) -> Result<Self, StageError> {
        let len = width as usize * height as usize * usize::from(channels);
        Self::from_raw(width, height, channels, space, vec![value; len])
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Width and height.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Channels per pixel, including alpha.
    #[must_use]
    pub const fn channels(&self) -> u8 {
        self.channels
    }

    /// The color-space tag.
    #[must_use]
    pub const fn space(&self) -> ColorSpace {
        self.space
    }

    /// Whether the buffer carries a trailing alpha channel.
    #[must_use]
    pub const fn has_alpha(&self) -> bool {
        self.channels > self.space.color_channels()
    }

    /// All samples, row-major and channel-interleaved.
    #[must_use]
    pub fn as_raw(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to all samples.
    pub fn as_raw_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the buffer and return its samples.
    #[must_use]
    pub fn into_raw(self) -> Vec<T> {
        self.data
    }

    /// Samples of one pixel.
    ///
    /// Coordinates must be in bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[T] {
        let start = self.offset(x, y);
        &self.data[start..start + usize::from(self.channels)]
    }

    /// Mutable samples of one pixel.
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [T] {
        let start = self.offset(x, y);
        let end = start + usize::from(self.channels);
        &mut self.data[start..end]
    }

    const fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }

    /// Number of samples in one row.
    #[must_use]
    pub const fn row_len(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Build a buffer of the same geometry and tag from new samples.
    pub(crate) fn with_data<U: Sample>(&self, data: Vec<U>) -> RasterBuffer<U> {
        debug_assert_eq!(data.len(), self.data.len());
        RasterBuffer {
            width: self.width,
            height: self.height,
            channels: self.channels,
            space: self.space,
            data,
        }
    }

    /// Build a buffer of the same geometry with a new tag and channel count.
    pub(crate) fn reshaped<U: Sample>(
        &self,
        channels: u8,
        space: ColorSpace,
        data: Vec<U>,
    ) -> RasterBuffer<U> {
        debug_assert_eq!(data.len(), self.dimensions().pixel_count() * usize::from(channels));
        RasterBuffer {
            width: self.width,
            height: self.height,
            channels,
            space,
            data,
        }
    }

    /// Split into one single-channel buffer per channel.
    ///
    /// Each plane is tagged [`ColorSpace::Gray`]; the caller keeps
    /// track of what the planes mean.
    #[must_use]
    pub fn split_channels(&self) -> Vec<Self> {
        let channels = usize::from(self.channels);
        (0..channels)
            .map(|c| {
                let plane = self.data.iter().skip(c).step_by(channels).copied().collect();
                self.reshaped(1, ColorSpace::Gray, plane)
            })
            .collect()
    }

    /// Interleave single-channel planes into one buffer tagged `space`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ChannelCount`] if a plane is not single
    /// channel or the plane count does not fit `space`, and
    /// [`StageError::DimensionMismatch`] if the planes differ in size.
    pub fn merge_channels(planes: &[Self], space: ColorSpace) -> Result<Self, StageError> {
        let Some(first) = planes.first() else {
            return Err(StageError::ChannelCount {
                expected: "at least 1 plane",
                found: 0,
            });
        };
        for plane in planes {
            if plane.channels != 1 {
                return Err(StageError::ChannelCount {
                    expected: "1",
                    found: plane.channels,
                });
            }
            if plane.dimensions() != first.dimensions() {
                return Err(StageError::DimensionMismatch {
                    left: first.dimensions(),
                    right: plane.dimensions(),
                });
            }
        }
        let channels = u8::try_from(planes.len()).map_err(|_| StageError::ChannelCount {
            expected: "at most 4 planes",
            found: u8::MAX,
        })?;
        let pixels = first.dimensions().pixel_count();
        let mut data = Vec::with_capacity(pixels * planes.len());
        for i in 0..pixels {
            data.extend(planes.iter().map(|p| p.data[i]));
        }
        Self::from_raw(first.width, first.height, channels, space, data)
    }

    /// Detach the alpha channel, if any.
    ///
    /// Returns the color-only buffer and, when alpha was present, the
    /// alpha plane as a single-channel buffer.
    #[must_use]
    pub fn split_alpha(self) -> (Self, Option<Self>) {
        if !self.has_alpha() {
            return (self, None);
        }
        let color = usize::from(self.space.color_channels());
        let channels = usize::from(self.channels);
        let pixels = self.dimensions().pixel_count();
        let mut rgb = Vec::with_capacity(pixels * color);
        let mut alpha = Vec::with_capacity(pixels);
        for px in self.data.chunks_exact(channels) {
            rgb.extend_from_slice(&px[..color]);
            alpha.push(px[color]);
        }
        let color_buf = self.reshaped(self.space.color_channels(), self.space, rgb);
        let alpha_buf = self.reshaped(1, ColorSpace::Gray, alpha);
        (color_buf, Some(alpha_buf))
    }

    /// Re-attach an alpha plane previously removed by [`split_alpha`](Self::split_alpha).
    ///
    /// # Errors
    ///
    /// Returns [`StageError::DimensionMismatch`] if the plane size differs
    /// and [`StageError::ChannelCount`] if either buffer has the wrong
    /// channel layout.
    pub fn attach_alpha(self, alpha: &Self) -> Result<Self, StageError> {
        if alpha.dimensions() != self.dimensions() {
            return Err(StageError::DimensionMismatch {
                left: self.dimensions(),
                right: alpha.dimensions(),
            });
        }
        if alpha.channels != 1 || self.has_alpha() || self.space == ColorSpace::Gray {
            return Err(StageError::ChannelCount {
                expected: "3 color channels and a 1-channel alpha plane",
                found: self.channels,
            });
        }
        let color = usize::from(self.channels);
        let mut data = Vec::with_capacity(self.data.len() + alpha.data.len());
        for (px, a) in self.data.chunks_exact(color).zip(&alpha.data) {
            data.extend_from_slice(px);
            data.push(*a);
        }
        Ok(self.reshaped(self.channels + 1, self.space, data))
    }
}

impl RasterBuffer<u8> {
    /// Mean sample value over the color channels (alpha excluded).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_intensity(&self) -> f64 {
        let channels = usize::from(self.channels);
        let color = usize::from(self.space.color_channels()).min(channels);
        let sum: u64 = self
            .data
            .chunks_exact(channels)
            .map(|px| px[..color].iter().map(|&v| u64::from(v)).sum::<u64>())
            .sum();
        let count = self.dimensions().pixel_count() * color;
        sum as f64 / count as f64
    }

    /// Interpret a single-channel buffer as an `image::GrayImage`.
    pub(crate) fn to_gray_image(&self) -> Result<image::GrayImage, StageError> {
        if self.channels != 1 {
            return Err(StageError::ChannelCount {
                expected: "1",
                found: self.channels,
            });
        }
        image::GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            StageError::BufferLength {
                expected: self.dimensions().pixel_count(),
                found: self.data.len(),
            },
        )
    }

    /// Interpret a 3-channel buffer as an `image::RgbImage` (tag ignored).
    pub(crate) fn to_rgb_image(&self) -> Result<image::RgbImage, StageError> {
        if self.channels != 3 {
            return Err(StageError::ChannelCount {
                expected: "3",
                found: self.channels,
            });
        }
        image::RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            StageError::BufferLength {
                expected: self.dimensions().pixel_count() * 3,
                found: self.data.len(),
            },
        )
    }

    /// Require exactly `channels` channels and the `space` tag.
    pub(crate) fn expect_layout(&self, channels: u8, space: ColorSpace) -> Result<(), StageError> {
        if self.space != space {
            return Err(StageError::ColorSpace {
                expected: space,
                found: self.space,
            });
        }
        if self.channels != channels {
            return Err(StageError::ChannelCount {
                expected: if channels == 1 { "1" } else { "3" },
                found: self.channels,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rgb(width: u32, height: u32) -> RasterBuffer {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        RasterBuffer::from_raw(width, height, 3, ColorSpace::Rgb, data).unwrap()
    }

    #[test]
    fn zero_dimension_rejected() {
        let err = RasterBuffer::<u8>::from_raw(0, 4, 3, ColorSpace::Rgb, vec![]).unwrap_err();
        assert!(matches!(err, StageError::ZeroDimension(_)));
    }

    #[test]
    fn wrong_length_rejected() {
        let err = RasterBuffer::from_raw(2, 2, 3, ColorSpace::Rgb, vec![0u8; 11]).unwrap_err();
        assert_eq!(
            err,
            StageError::BufferLength {
                expected: 12,
                found: 11
            }
        );
    }

    #[test]
    fn gray_with_three_channels_rejected() {
        let err = RasterBuffer::from_raw(1, 1, 3, ColorSpace::Gray, vec![0u8; 3]).unwrap_err();
        assert!(matches!(err, StageError::ChannelCount { found: 3, .. }));
    }

    #[test]
    fn four_channels_means_alpha() {
        let buf = RasterBuffer::filled(2, 2, 4, ColorSpace::Rgb, 7u8).unwrap();
        assert!(buf.has_alpha());
        assert!(!rgb(2, 2).has_alpha());
    }

    #[test]
    fn split_then_merge_is_identity() {
        let buf = rgb(5, 3);
        let planes = buf.split_channels();
        assert_eq!(planes.len(), 3);
        assert!(planes.iter().all(|p| p.channels() == 1));
        let merged = RasterBuffer::merge_channels(&planes, ColorSpace::Rgb).unwrap();
        assert_eq!(merged, buf);
    }

    #[test]
    fn merge_rejects_mismatched_planes() {
        let a = RasterBuffer::filled(2, 2, 1, ColorSpace::Gray, 0u8).unwrap();
        let b = RasterBuffer::filled(3, 2, 1, ColorSpace::Gray, 0u8).unwrap();
        let err = RasterBuffer::merge_channels(&[a, b], ColorSpace::Rgb).unwrap_err();
        assert!(matches!(err, StageError::DimensionMismatch { .. }));
    }

    #[test]
    fn alpha_round_trip() {
        let data: Vec<u8> = (0..16).collect();
        let rgba = RasterBuffer::from_raw(2, 2, 4, ColorSpace::Rgb, data).unwrap();
        let (color, alpha) = rgba.clone().split_alpha();
        let alpha = alpha.unwrap();
        assert_eq!(color.channels(), 3);
        assert_eq!(alpha.as_raw(), &[3, 7, 11, 15]);
        assert_eq!(color.attach_alpha(&alpha).unwrap(), rgba);
    }

    #[test]
    fn mean_ignores_alpha() {
        let mut buf = RasterBuffer::filled(2, 2, 4, ColorSpace::Rgb, 0u8).unwrap();
        for px in buf.as_raw_mut().chunks_exact_mut(4) {
            px[3] = 255;
        }
        assert!(buf.mean_intensity().abs() < f64::EPSILON);
    }

    #[test]
    fn pixel_access() {
        let mut buf = rgb(4, 4);
        buf.pixel_mut(2, 3).copy_from_slice(&[1, 2, 3]);
        assert_eq!(buf.pixel(2, 3), &[1, 2, 3]);
    }

    #[test]
    fn dimensions_display() {
        let d = Dimensions {
            width: 640,
            height: 480,
        };
        assert_eq!(d.to_string(), "640x480");
        assert_eq!(d.pixel_count(), 307_200);
    }
}
