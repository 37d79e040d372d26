//! The colorization engine and its process-wide instance.
//!
//! An engine owns a bound [`Network`] and knows how to feed it: the
//! lightness plane is resized to a fixed square, centred on
//! [`LIGHTNESS_CENTER`], run through the network, and the predicted `ab`
//! map is resized back and merged with the original lightness.
//!
//! Loading the model is expensive, so callers load it once and
//! [`install`] it; [`global`] hands out the shared read-only instance.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;

use ndarray::{Array2, Array3, ArrayView2, Axis};

use super::network::{Network, NetworkSpec};
use super::weights::{WeightFile, load_centres};
use crate::color;
use crate::error::{InferenceError, StageError};
use crate::types::{ColorSpace, RasterBuffer};

/// Side of the square lightness plane the network is evaluated on.
pub const INPUT_SIZE: usize = 224;

/// Subtracted from LAB lightness (`0..=100`) before the forward pass.
pub const LIGHTNESS_CENTER: f32 = 50.0;

static ENGINE: OnceLock<ColorizationEngine> = OnceLock::new();

/// Predicts chrominance for a lightness plane.
#[derive(Debug)]
pub struct ColorizationEngine {
    network: Network,
    input_size: usize,
}

impl ColorizationEngine {
    /// Load the colorization network from a weight file and a
    /// cluster-centre table.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError`] if either file is unreadable or does
    /// not fit the architecture.
    pub fn load(weights: impl AsRef<Path>, centres: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let start = Instant::now();
        let weights = WeightFile::open(weights)?;
        let centres = load_centres(centres)?;
        let engine = Self::from_parts(&NetworkSpec::colorization(), &weights, &centres)?;
        tracing::info!(
            layers = engine.network.depth(),
            tensors = weights.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "colorization engine loaded"
        );
        Ok(engine)
    }

    /// Bind an architecture to in-memory weights at the default input size.
    ///
    /// # Errors
    ///
    /// See [`Self::with_input_size`].
    pub fn from_parts(
        spec: &NetworkSpec,
        weights: &WeightFile,
        centres: &Array2<f32>,
    ) -> Result<Self, InferenceError> {
        Self::with_input_size(spec, weights, centres, INPUT_SIZE)
    }

    /// Bind an architecture to in-memory weights, evaluating it on
    /// `input_size` x `input_size` planes.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::ShapeMismatch`] if the network does not
    /// take one channel in and produce two channels out at that size,
    /// and any error from [`Network::build`].
    pub fn with_input_size(
        spec: &NetworkSpec,
        weights: &WeightFile,
        centres: &Array2<f32>,
        input_size: usize,
    ) -> Result<Self, InferenceError> {
        if spec.input_channels != 1 {
            return Err(InferenceError::ShapeMismatch {
                layer: "input".into(),
                expected: vec![1, input_size, input_size],
                found: vec![spec.input_channels, input_size, input_size],
            });
        }
        match spec.output_shape(input_size, input_size) {
            Some((2, _, _)) => {}
            other => {
                return Err(InferenceError::ShapeMismatch {
                    layer: "output".into(),
                    expected: vec![2],
                    found: other.map_or_else(Vec::new, |(c, h, w)| vec![c, h, w]),
                });
            }
        }
        Ok(Self {
            network: Network::build(spec, weights, centres)?,
            input_size,
        })
    }

    /// Side of the square plane the network sees.
    #[must_use]
    pub const fn input_size(&self) -> usize {
        self.input_size
    }

    /// Predict an `(2, height, width)` `ab` map for a lightness plane in
    /// `0..=100`.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::EmptyTensor`] for an empty plane and
    /// any forward-pass error.
    pub fn predict_ab(&self, lightness: ArrayView2<'_, f32>) -> Result<Array3<f32>, InferenceError> {
        let (height, width) = lightness.dim();
        if height == 0 || width == 0 {
            return Err(InferenceError::EmptyTensor {
                layer: "input".into(),
            });
        }
        let input = resize_bilinear(lightness, self.input_size, self.input_size) - LIGHTNESS_CENTER;
        let ab = self.network.forward(input.insert_axis(Axis(0)))?;

        let a = resize_bilinear(ab.index_axis(Axis(0), 0), height, width);
        let b = resize_bilinear(ab.index_axis(Axis(0), 1), height, width);
        Ok(Array3::from_shape_fn((2, height, width), |(c, y, x)| {
            if c == 0 { a[[y, x]] } else { b[[y, x]] }
        }))
    }

    /// Replace the chrominance of an RGB buffer with the prediction for
    /// its lightness.
    ///
    /// Alpha is carried through.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Stage`] for a non-RGB buffer and any
    /// error from [`Self::predict_ab`].
    pub fn colorize(&self, buffer: &RasterBuffer) -> Result<RasterBuffer, InferenceError> {
        if buffer.space() != ColorSpace::Rgb {
            return Err(StageError::ColorSpace {
                expected: ColorSpace::Rgb,
                found: buffer.space(),
            }
            .into());
        }
        let start = Instant::now();
        let (opaque, alpha) = buffer.clone().split_alpha();
        let lab = color::convert_f32(&color::to_float(&opaque)?, ColorSpace::Lab)?;
        let width = lab.width() as usize;
        let height = lab.height() as usize;

        let lightness = Array2::from_shape_fn((height, width), |(y, x)| lab.as_raw()[(y * width + x) * 3]);
        let ab = self.predict_ab(lightness.view())?;

        let mut data = lab.into_raw();
        for (i, px) in data.chunks_exact_mut(3).enumerate() {
            let (y, x) = (i / width, i % width);
            px[1] = ab[[0, y, x]];
            px[2] = ab[[1, y, x]];
        }
        let merged = RasterBuffer::from_raw(opaque.width(), opaque.height(), 3, ColorSpace::Lab, data)?;
        let mut out = color::to_u8(&color::convert_f32(&merged, ColorSpace::Rgb)?)?;
        if let Some(alpha) = alpha {
            out = out.attach_alpha(&alpha)?;
        }
        tracing::debug!(
            width,
            height,
            elapsed_ms = start.elapsed().as_millis(),
            "colorized"
        );
        Ok(out)
    }
}

/// Install the process-wide engine.
///
/// # Errors
///
/// Returns [`InferenceError::AlreadyInitialized`] if an engine was
/// installed before.
pub fn install(engine: ColorizationEngine) -> Result<&'static ColorizationEngine, InferenceError> {
    ENGINE
        .set(engine)
        .map_err(|_| InferenceError::AlreadyInitialized)?;
    ENGINE.get().ok_or(InferenceError::EngineUnavailable)
}

/// The installed engine, if any.
#[must_use]
pub fn global() -> Option<&'static ColorizationEngine> {
    ENGINE.get()
}

/// Bilinear resize with pixel-centre alignment and edge clamping.
#[must_use]
pub fn resize_bilinear(src: ArrayView2<'_, f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((height, width));
    }
    let ys = taps(src_h, height);
    let xs = taps(src_w, width);
    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1, fy) = ys[y];
        let (x0, x1, fx) = xs[x];
        let top = (src[[y0, x1]] - src[[y0, x0]]).mul_add(fx, src[[y0, x0]]);
        let bottom = (src[[y1, x1]] - src[[y1, x0]]).mul_add(fx, src[[y1, x0]]);
        (bottom - top).mul_add(fy, top)
    })
}

/// For each destination index: the two source neighbors and the weight
/// of the second.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn taps(src_len: usize, dst_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = src_len as f32 / dst_len as f32;
    (0..dst_len)
        .map(|d| {
            let pos = (d as f32 + 0.5).mul_add(scale, -0.5).max(0.0);
            let i0 = (pos.floor() as usize).min(src_len - 1);
            let i1 = (i0 + 1).min(src_len - 1);
            (i0, i1, pos - i0 as f32)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::inference::network::{ConvParams, LayerSpec, Op};
    use crate::inference::weights::Tensor;

    /// One 1x1 convolution: `a = L - 50`, `b = 25`.
    fn tiny_engine() -> ColorizationEngine {
        let spec = NetworkSpec {
            input_channels: 1,
            layers: vec![LayerSpec::new("head", Op::Conv(ConvParams::new(1, 2, 1).linear()))],
        };
        let mut weights = WeightFile::new();
        weights.insert("head.weight", Tensor::new(vec![2, 1, 1, 1], vec![1.0, 0.0]).unwrap());
        weights.insert("head.bias", Tensor::new(vec![2], vec![0.0, 25.0]).unwrap());
        ColorizationEngine::with_input_size(&spec, &weights, &Array2::zeros((0, 2)), 8).unwrap()
    }

    #[test]
    fn resize_interpolates_between_centres() {
        let src = Array2::from_shape_vec((1, 2), vec![0.0, 4.0]).unwrap();
        let out = resize_bilinear(src.view(), 1, 4);
        assert_eq!(out.as_slice().unwrap(), &[0.0, 1.0, 3.0, 4.0]);
    }

    #[test]
    fn resize_same_size_is_identity() {
        let src = Array2::from_shape_fn((3, 5), |(y, x)| (y * 5 + x) as f32);
        assert_eq!(resize_bilinear(src.view(), 3, 5), src);
    }

    #[test]
    fn resize_keeps_constant_planes() {
        let src = Array2::from_elem((7, 3), 42.5);
        let out = resize_bilinear(src.view(), 224, 224);
        assert!(out.iter().all(|&v| (v - 42.5).abs() < 1e-4));
    }

    #[test]
    fn prediction_is_centred_and_resized_back() {
        let engine = tiny_engine();
        let ab = engine.predict_ab(Array2::from_elem((5, 7), 70.0).view()).unwrap();
        assert_eq!(ab.dim(), (2, 5, 7));
        assert!(ab.index_axis(Axis(0), 0).iter().all(|&v| (v - 20.0).abs() < 1e-3));
        assert!(ab.index_axis(Axis(0), 1).iter().all(|&v| (v - 25.0).abs() < 1e-3));
    }

    #[test]
    fn empty_plane_rejected() {
        let err = tiny_engine().predict_ab(Array2::zeros((0, 4)).view()).unwrap_err();
        assert!(matches!(err, InferenceError::EmptyTensor { .. }));
    }

    #[test]
    fn colorize_adds_chroma_and_keeps_lightness() {
        let gray = RasterBuffer::filled(6, 4, 3, ColorSpace::Rgb, 150u8).unwrap();
        let out = tiny_engine().colorize(&gray).unwrap();
        assert_eq!(out.dimensions(), gray.dimensions());
        let px = out.pixel(2, 2);
        assert!(px[0] > px[2], "expected a warm tint, got {px:?}");

        let before = color::convert(&gray, ColorSpace::Lab).unwrap();
        let after = color::convert(&out, ColorSpace::Lab).unwrap();
        assert!(before.pixel(2, 2)[0].abs_diff(after.pixel(2, 2)[0]) <= 2);
    }

    #[test]
    fn colorize_carries_alpha() {
        let img = RasterBuffer::filled(3, 3, 4, ColorSpace::Rgb, 90u8).unwrap();
        let out = tiny_engine().colorize(&img).unwrap();
        assert_eq!(out.channels(), 4);
        assert!(out.as_raw().chunks_exact(4).all(|px| px[3] == 90));
    }

    #[test]
    fn colorize_requires_rgb() {
        let img = RasterBuffer::filled(3, 3, 1, ColorSpace::Gray, 90u8).unwrap();
        assert!(matches!(
            tiny_engine().colorize(&img),
            Err(InferenceError::Stage(StageError::ColorSpace { .. }))
        ));
    }

    #[test]
    fn network_must_emit_two_channels() {
        let spec = NetworkSpec {
            input_channels: 1,
            layers: vec![LayerSpec::new("head", Op::Conv(ConvParams::new(1, 3, 1)))],
        };
        let err = ColorizationEngine::from_parts(&spec, &WeightFile::new(), &Array2::zeros((0, 2)))
            .unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { layer, .. } if layer == "output"));
    }

    #[test]
    fn second_install_is_rejected() {
        let first = install(tiny_engine()).unwrap();
        assert_eq!(first.input_size(), 8);
        assert!(matches!(
            install(tiny_engine()),
            Err(InferenceError::AlreadyInitialized)
        ));
        assert!(global().is_some());
    }
}
