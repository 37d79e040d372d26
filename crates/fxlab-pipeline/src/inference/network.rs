//! Feed-forward convolutional network for chrominance prediction.
//!
//! The architecture is declared in code as a [`NetworkSpec`]: an ordered
//! list of named layers. [`Network::build`] binds a spec to tensors from
//! a [`WeightFile`] and the `ab` cluster-centre table, after which
//! [`Network::forward`] maps a `(channels, height, width)` activation to
//! the network output.
//!
//! Convolutions are lowered to a single matrix product (im2col);
//! transposed convolutions use the reverse scatter (col2im). Padding is
//! zero-filled.

use ndarray::{Array1, Array2, Array3, Axis};
use rayon::prelude::*;

use super::weights::WeightFile;
use crate::error::InferenceError;

/// Number of quantized `ab` bins the colorization network predicts.
pub const AB_CLASSES: usize = 313;

/// Logit rescaling applied before the class softmax (an annealed-mean
/// temperature of 0.38).
pub const LOGIT_SCALE: f32 = 2.606;

const BATCH_NORM_EPS: f32 = 1e-5;

/// Geometry of a convolution or transposed convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Square kernel side.
    pub kernel: usize,
    /// Step between output samples.
    pub stride: usize,
    /// Zero padding on every side.
    pub padding: usize,
    /// Spacing between kernel taps.
    pub dilation: usize,
    /// Apply a ReLU to the output.
    pub relu: bool,
}

impl ConvParams {
    /// Stride 1, "same" padding, no dilation, ReLU output.
    #[must_use]
    pub const fn new(in_channels: usize, out_channels: usize, kernel: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride: 1,
            padding: kernel / 2,
            dilation: 1,
            relu: true,
        }
    }

    /// Set the stride.
    #[must_use]
    pub const fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Set the padding.
    #[must_use]
    pub const fn padded(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Dilate the kernel, widening padding so the size is preserved.
    #[must_use]
    pub const fn dilated(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self.padding = dilation * (self.kernel / 2);
        self
    }

    /// Drop the ReLU.
    #[must_use]
    pub const fn linear(mut self) -> Self {
        self.relu = false;
        self
    }

    const fn span(&self) -> usize {
        self.dilation * (self.kernel - 1) + 1
    }

    fn output_len(&self, input: usize) -> Option<usize> {
        (input + 2 * self.padding)
            .checked_sub(self.span())
            .map(|n| n / self.stride + 1)
    }

    fn transposed_output_len(&self, input: usize) -> Option<usize> {
        ((input.checked_sub(1)?) * self.stride + self.span())
            .checked_sub(2 * self.padding)
            .filter(|&n| n > 0)
    }
}

/// Operation performed by a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Convolution with `{name}.weight` of shape `(out, in, k, k)` and
    /// `{name}.bias` of shape `(out,)`.
    Conv(ConvParams),
    /// Transposed convolution with `{name}.weight` of shape
    /// `(in, out, k, k)` and `{name}.bias` of shape `(out,)`.
    Deconv(ConvParams),
    /// Per-channel normalization with running statistics
    /// `{name}.mean`, `{name}.var`, and an optional one-element
    /// `{name}.scale_factor` dividing both.
    BatchNorm {
        /// Channel count.
        channels: usize,
    },
    /// Multiply every activation by a constant.
    Scale(f32),
    /// Softmax across channels at every spatial position.
    Softmax,
    /// Project class probabilities onto `ab` coordinates using the
    /// cluster-centre table.
    Projection {
        /// Number of classes (rows of the centre table).
        classes: usize,
    },
}

impl Op {
    fn output_shape(&self, (c, h, w): (usize, usize, usize)) -> Option<(usize, usize, usize)> {
        match *self {
            Self::Conv(p) if c == p.in_channels => {
                Some((p.out_channels, p.output_len(h)?, p.output_len(w)?))
            }
            Self::Deconv(p) if c == p.in_channels => Some((
                p.out_channels,
                p.transposed_output_len(h)?,
                p.transposed_output_len(w)?,
            )),
            Self::Conv(_) | Self::Deconv(_) => None,
            Self::BatchNorm { channels } => (c == channels).then_some((c, h, w)),
            Self::Scale(_) | Self::Softmax => Some((c, h, w)),
            Self::Projection { classes } => (c == classes).then_some((2, h, w)),
        }
    }
}

/// A named layer in a [`NetworkSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    /// Layer name; prefixes its tensor names.
    pub name: String,
    /// What the layer computes.
    pub op: Op,
}

impl LayerSpec {
    /// Pair a name with an operation.
    #[must_use]
    pub fn new(name: impl Into<String>, op: Op) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }
}

/// Declared architecture, independent of weights.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSpec {
    /// Channels of the input activation.
    pub input_channels: usize,
    /// Layers in evaluation order.
    pub layers: Vec<LayerSpec>,
}

impl NetworkSpec {
    /// The lightness-to-`ab` colorization network.
    ///
    /// Eight convolution blocks (the fifth and sixth dilated), a
    /// transposed convolution back to a quarter of the input size, a
    /// 313-way classifier over quantized `ab` bins, and a projection of
    /// the annealed class distribution onto the bin centres. A 224x224
    /// lightness input yields a `2x56x56` `ab` map.
    #[must_use]
    pub fn colorization() -> Self {
        let c = ConvParams::new;
        let mut layers = Vec::new();
        push_block(&mut layers, "conv1", &[c(1, 64, 3), c(64, 64, 3).stride(2)]);
        push_block(&mut layers, "conv2", &[c(64, 128, 3), c(128, 128, 3).stride(2)]);
        push_block(
            &mut layers,
            "conv3",
            &[c(128, 256, 3), c(256, 256, 3), c(256, 256, 3).stride(2)],
        );
        push_block(&mut layers, "conv4", &[c(256, 512, 3), c(512, 512, 3), c(512, 512, 3)]);
        let dilated = c(512, 512, 3).dilated(2);
        push_block(&mut layers, "conv5", &[dilated; 3]);
        push_block(&mut layers, "conv6", &[dilated; 3]);
        push_block(&mut layers, "conv7", &[c(512, 512, 3); 3]);

        layers.extend([
            LayerSpec::new("conv8_1", Op::Deconv(c(512, 256, 4).stride(2).padded(1))),
            LayerSpec::new("conv8_2", Op::Conv(c(256, 256, 3))),
            LayerSpec::new("conv8_3", Op::Conv(c(256, 256, 3))),
            LayerSpec::new("conv8_313", Op::Conv(c(256, AB_CLASSES, 1).linear())),
            LayerSpec::new("conv8_313_rh", Op::Scale(LOGIT_SCALE)),
            LayerSpec::new("class8_313_rh", Op::Softmax),
            LayerSpec::new("class8_ab", Op::Projection { classes: AB_CLASSES }),
        ]);
        Self {
            input_channels: 1,
            layers,
        }
    }

    /// Output `(channels, height, width)` for an input of the given size,
    /// or `None` if some layer cannot accept its input.
    #[must_use]
    pub fn output_shape(&self, height: usize, width: usize) -> Option<(usize, usize, usize)> {
        self.layers
            .iter()
            .try_fold((self.input_channels, height, width), |shape, layer| {
                layer.op.output_shape(shape)
            })
    }
}

/// Append `{prefix}_1..n` convolutions followed by `{prefix}_{n}norm`.
fn push_block(layers: &mut Vec<LayerSpec>, prefix: &str, convs: &[ConvParams]) {
    for (i, params) in convs.iter().enumerate() {
        layers.push(LayerSpec::new(format!("{prefix}_{}", i + 1), Op::Conv(*params)));
    }
    if let Some(last) = convs.last() {
        layers.push(LayerSpec::new(
            format!("{prefix}_{}norm", convs.len()),
            Op::BatchNorm {
                channels: last.out_channels,
            },
        ));
    }
}

#[derive(Debug)]
enum Kernel {
    Conv {
        params: ConvParams,
        /// `(out, in * k * k)`.
        weight: Array2<f32>,
        bias: Array1<f32>,
    },
    Deconv {
        params: ConvParams,
        /// `(in, out * k * k)`.
        weight: Array2<f32>,
        bias: Array1<f32>,
    },
    BatchNorm {
        mean: Array1<f32>,
        inv_std: Array1<f32>,
    },
    Scale(f32),
    Softmax,
    Projection {
        /// `(2, classes)`.
        weight: Array2<f32>,
    },
}

#[derive(Debug)]
struct Layer {
    name: String,
    kernel: Kernel,
}

/// A [`NetworkSpec`] bound to its weights.
#[derive(Debug)]
pub struct Network {
    input_channels: usize,
    layers: Vec<Layer>,
}

impl Network {
    /// Bind `spec` to tensors from `weights`, using `centres`
    /// (`(classes, 2)`) for the projection layer.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::MissingTensor`] for an absent tensor and
    /// [`InferenceError::ShapeMismatch`] for a tensor or centre table of
    /// the wrong shape.
    pub fn build(
        spec: &NetworkSpec,
        weights: &WeightFile,
        centres: &Array2<f32>,
    ) -> Result<Self, InferenceError> {
        let layers = spec
            .layers
            .iter()
            .map(|layer| {
                let kernel = bind(layer, weights, centres)?;
                Ok(Layer {
                    name: layer.name.clone(),
                    kernel,
                })
            })
            .collect::<Result<_, InferenceError>>()?;
        Ok(Self {
            input_channels: spec.input_channels,
            layers,
        })
    }

    /// Channels the first layer expects.
    #[must_use]
    pub const fn input_channels(&self) -> usize {
        self.input_channels
    }

    /// Number of layers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Evaluate the network on a `(channels, height, width)` activation.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::EmptyTensor`] if the input is empty or a
    /// layer's output collapses to zero size, and
    /// [`InferenceError::ShapeMismatch`] if a layer receives the wrong
    /// number of channels.
    pub fn forward(&self, input: Array3<f32>) -> Result<Array3<f32>, InferenceError> {
        if input.is_empty() {
            return Err(InferenceError::EmptyTensor {
                layer: "input".into(),
            });
        }
        self.layers.iter().try_fold(input, |x, layer| {
            let y = layer.forward(x)?;
            if y.is_empty() {
                return Err(InferenceError::EmptyTensor {
                    layer: layer.name.clone(),
                });
            }
            Ok(y)
        })
    }
}

fn bind(layer: &LayerSpec, weights: &WeightFile, centres: &Array2<f32>) -> Result<Kernel, InferenceError> {
    let name = layer.name.as_str();
    let tensor = |suffix: &str, shape: &[usize]| weights.require(&format!("{name}.{suffix}"), shape);
    Ok(match layer.op {
        Op::Conv(params) => {
            let (o, i, k) = (params.out_channels, params.in_channels, params.kernel);
            Kernel::Conv {
                params,
                weight: matrix(name, o, i * k * k, tensor("weight", &[o, i, k, k])?.data().to_vec())?,
                bias: Array1::from(tensor("bias", &[o])?.data().to_vec()),
            }
        }
        Op::Deconv(params) => {
            let (o, i, k) = (params.out_channels, params.in_channels, params.kernel);
            Kernel::Deconv {
                params,
                weight: matrix(name, i, o * k * k, tensor("weight", &[i, o, k, k])?.data().to_vec())?,
                bias: Array1::from(tensor("bias", &[o])?.data().to_vec()),
            }
        }
        Op::BatchNorm { channels } => {
            let factor = match weights.get(&format!("{name}.scale_factor")) {
                Some(t) => match t.data().first() {
                    Some(&s) if s != 0.0 => 1.0 / s,
                    _ => 0.0,
                },
                None => 1.0,
            };
            let mean = Array1::from(tensor("mean", &[channels])?.data().to_vec()) * factor;
            let var = Array1::from(tensor("var", &[channels])?.data().to_vec()) * factor;
            Kernel::BatchNorm {
                mean,
                inv_std: var.mapv(|v| 1.0 / (v + BATCH_NORM_EPS).sqrt()),
            }
        }
        Op::Scale(factor) => Kernel::Scale(factor),
        Op::Softmax => Kernel::Softmax,
        Op::Projection { classes } => {
            if centres.dim() != (classes, 2) {
                return Err(InferenceError::ShapeMismatch {
                    layer: name.to_owned(),
                    expected: vec![classes, 2],
                    found: centres.shape().to_vec(),
                });
            }
            Kernel::Projection {
                weight: centres.t().to_owned(),
            }
        }
    })
}

fn matrix(name: &str, rows: usize, cols: usize, data: Vec<f32>) -> Result<Array2<f32>, InferenceError> {
    let len = data.len();
    Array2::from_shape_vec((rows, cols), data).map_err(|_| InferenceError::ShapeMismatch {
        layer: name.to_owned(),
        expected: vec![rows, cols],
        found: vec![len],
    })
}

impl Layer {
    fn expected_channels(&self) -> Option<usize> {
        match &self.kernel {
            Kernel::Conv { params, .. } | Kernel::Deconv { params, .. } => Some(params.in_channels),
            Kernel::BatchNorm { mean, .. } => Some(mean.len()),
            Kernel::Projection { weight } => Some(weight.ncols()),
            Kernel::Scale(_) | Kernel::Softmax => None,
        }
    }

    fn forward(&self, mut x: Array3<f32>) -> Result<Array3<f32>, InferenceError> {
        if let Some(expected) = self.expected_channels() {
            let (c, h, w) = x.dim();
            if c != expected {
                return Err(InferenceError::ShapeMismatch {
                    layer: self.name.clone(),
                    expected: vec![expected, h, w],
                    found: vec![c, h, w],
                });
            }
        }
        match &self.kernel {
            Kernel::Conv { params, weight, bias } => self.convolve(params, weight, bias, &x),
            Kernel::Deconv { params, weight, bias } => self.deconvolve(params, weight, bias, x),
            Kernel::BatchNorm { mean, inv_std } => {
                for ((mut plane, &m), &s) in x.axis_iter_mut(Axis(0)).zip(mean).zip(inv_std) {
                    plane.mapv_inplace(|v| (v - m) * s);
                }
                Ok(x)
            }
            Kernel::Scale(factor) => {
                x.mapv_inplace(|v| v * factor);
                Ok(x)
            }
            Kernel::Softmax => {
                for mut lane in x.lanes_mut(Axis(0)) {
                    let max = lane.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    lane.mapv_inplace(|v| (v - max).exp());
                    let sum = lane.sum();
                    lane.mapv_inplace(|v| v / sum);
                }
                Ok(x)
            }
            Kernel::Projection { weight } => {
                let (c, h, w) = x.dim();
                let flat = self.reshape2(x, c, h * w)?;
                self.reshape3(weight.dot(&flat), weight.nrows(), h, w)
            }
        }
    }

    fn convolve(
        &self,
        params: &ConvParams,
        weight: &Array2<f32>,
        bias: &Array1<f32>,
        x: &Array3<f32>,
    ) -> Result<Array3<f32>, InferenceError> {
        let (channels, height, width) = x.dim();
        let collapsed = || InferenceError::EmptyTensor {
            layer: self.name.clone(),
        };
        let out_h = params.output_len(height).ok_or_else(collapsed)?;
        let out_w = params.output_len(width).ok_or_else(collapsed)?;
        let ConvParams {
            kernel: k,
            stride,
            padding: pad,
            dilation,
            ..
        } = *params;
        let plane = out_h * out_w;

        let mut cols = vec![0f32; channels * k * k * plane];
        cols.par_chunks_exact_mut(plane).enumerate().for_each(|(row, out)| {
            let (c, ky, kx) = (row / (k * k), (row / k) % k, row % k);
            for oy in 0..out_h {
                let iy = oy * stride + ky * dilation;
                if iy < pad || iy - pad >= height {
                    continue;
                }
                for ox in 0..out_w {
                    let ix = ox * stride + kx * dilation;
                    if ix < pad || ix - pad >= width {
                        continue;
                    }
                    out[oy * out_w + ox] = x[[c, iy - pad, ix - pad]];
                }
            }
        });
        let cols = matrix(&self.name, channels * k * k, plane, cols)?;

        let mut y = weight.dot(&cols);
        y += &bias.view().insert_axis(Axis(1));
        if params.relu {
            y.mapv_inplace(|v| v.max(0.0));
        }
        self.reshape3(y, params.out_channels, out_h, out_w)
    }

    fn deconvolve(
        &self,
        params: &ConvParams,
        weight: &Array2<f32>,
        bias: &Array1<f32>,
        x: Array3<f32>,
    ) -> Result<Array3<f32>, InferenceError> {
        let (channels, height, width) = x.dim();
        let collapsed = || InferenceError::EmptyTensor {
            layer: self.name.clone(),
        };
        let out_h = params.transposed_output_len(height).ok_or_else(collapsed)?;
        let out_w = params.transposed_output_len(width).ok_or_else(collapsed)?;
        let ConvParams {
            kernel: k,
            stride,
            padding: pad,
            dilation,
            relu,
            ..
        } = *params;

        let flat = self.reshape2(x, channels, height * width)?;
        let cols = weight.t().dot(&flat);

        let mut out = vec![0f32; params.out_channels * out_h * out_w];
        out.par_chunks_exact_mut(out_h * out_w)
            .enumerate()
            .for_each(|(o, plane)| {
                let b = bias[o];
                for ky in 0..k {
                    for kx in 0..k {
                        let col = cols.row((o * k + ky) * k + kx);
                        for iy in 0..height {
                            let oy = iy * stride + ky * dilation;
                            if oy < pad || oy - pad >= out_h {
                                continue;
                            }
                            for ix in 0..width {
                                let ox = ix * stride + kx * dilation;
                                if ox < pad || ox - pad >= out_w {
                                    continue;
                                }
                                plane[(oy - pad) * out_w + ox - pad] += col[iy * width + ix];
                            }
                        }
                    }
                }
                for v in plane.iter_mut() {
                    *v += b;
                    if relu {
                        *v = v.max(0.0);
                    }
                }
            });
        let out = matrix(&self.name, params.out_channels, out_h * out_w, out)?;
        self.reshape3(out, params.out_channels, out_h, out_w)
    }

    fn reshape2(&self, x: Array3<f32>, rows: usize, cols: usize) -> Result<Array2<f32>, InferenceError> {
        let found = x.shape().to_vec();
        x.as_standard_layout()
            .into_owned()
            .into_shape_with_order((rows, cols))
            .map_err(|_| InferenceError::ShapeMismatch {
                layer: self.name.clone(),
                expected: vec![rows, cols],
                found,
            })
    }

    fn reshape3(&self, y: Array2<f32>, c: usize, h: usize, w: usize) -> Result<Array3<f32>, InferenceError> {
        let found = y.shape().to_vec();
        y.as_standard_layout()
            .into_owned()
            .into_shape_with_order((c, h, w))
            .map_err(|_| InferenceError::ShapeMismatch {
                layer: self.name.clone(),
                expected: vec![c, h, w],
                found,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use crate::inference::weights::Tensor;

    fn ones(shape: &[usize]) -> Tensor {
        Tensor::new(shape.to_vec(), vec![1.0; shape.iter().product()]).unwrap()
    }

    fn single(op: Op, weights: &WeightFile) -> Network {
        let spec = NetworkSpec {
            input_channels: 1,
            layers: vec![LayerSpec::new("l", op)],
        };
        Network::build(&spec, weights, &Array2::zeros((0, 2))).unwrap()
    }

    fn conv_weights(shape: &[usize], out: usize) -> WeightFile {
        let mut weights = WeightFile::new();
        weights.insert("l.weight", ones(shape));
        weights.insert("l.bias", Tensor::new(vec![out], vec![0.0; out]).unwrap());
        weights
    }

    #[test]
    fn colorization_maps_224_to_quarter_resolution_ab() {
        let spec = NetworkSpec::colorization();
        assert_eq!(spec.output_shape(224, 224), Some((2, 56, 56)));
        assert_eq!(spec.output_shape(64, 48), Some((2, 16, 12)));
        assert_eq!(spec.layers.len(), 33);
        assert!(spec.layers.iter().any(|l| l.name == "conv5_3norm"));
    }

    #[test]
    fn output_shape_rejects_collapsing_input() {
        let spec = NetworkSpec {
            input_channels: 1,
            layers: vec![LayerSpec::new("l", Op::Conv(ConvParams::new(1, 1, 3).padded(0)))],
        };
        assert_eq!(spec.output_shape(2, 2), None);
        assert_eq!(spec.output_shape(3, 4), Some((1, 1, 2)));
    }

    #[test]
    fn convolution_zero_pads_borders() {
        let net = single(Op::Conv(ConvParams::new(1, 1, 3)), &conv_weights(&[1, 1, 3, 3], 1));
        let y = net.forward(Array3::ones((1, 4, 4))).unwrap();
        assert_eq!(y.dim(), (1, 4, 4));
        assert_eq!(y[[0, 0, 0]], 4.0);
        assert_eq!(y[[0, 0, 1]], 6.0);
        assert_eq!(y[[0, 1, 1]], 9.0);
    }

    #[test]
    fn stride_and_dilation_shapes() {
        let weights = conv_weights(&[1, 1, 3, 3], 1);
        let strided = single(Op::Conv(ConvParams::new(1, 1, 3).stride(2)), &weights);
        assert_eq!(strided.forward(Array3::ones((1, 5, 5))).unwrap().dim(), (1, 3, 3));
        let dilated = single(Op::Conv(ConvParams::new(1, 1, 3).dilated(2)), &weights);
        let y = dilated.forward(Array3::ones((1, 5, 5))).unwrap();
        assert_eq!(y.dim(), (1, 5, 5));
        assert_eq!(y[[0, 2, 2]], 9.0);
        assert_eq!(y[[0, 0, 0]], 4.0);
    }

    #[test]
    fn relu_and_linear_outputs() {
        let mut weights = WeightFile::new();
        weights.insert("l.weight", Tensor::new(vec![1, 1, 1, 1], vec![-1.0]).unwrap());
        weights.insert("l.bias", Tensor::new(vec![1], vec![0.5]).unwrap());
        let input = Array3::from_elem((1, 2, 2), 2.0);
        let rectified = single(Op::Conv(ConvParams::new(1, 1, 1)), &weights);
        assert!(rectified.forward(input.clone()).unwrap().iter().all(|&v| v == 0.0));
        let linear = single(Op::Conv(ConvParams::new(1, 1, 1).linear()), &weights);
        assert!(linear.forward(input).unwrap().iter().all(|&v| v == -1.5));
    }

    #[test]
    fn multi_channel_convolution_sums_inputs() {
        let mut weights = WeightFile::new();
        weights.insert("l.weight", Tensor::new(vec![2, 2, 1, 1], vec![1.0, 1.0, 1.0, -1.0]).unwrap());
        weights.insert("l.bias", Tensor::new(vec![2], vec![0.0, 10.0]).unwrap());
        let spec = NetworkSpec {
            input_channels: 2,
            layers: vec![LayerSpec::new("l", Op::Conv(ConvParams::new(2, 2, 1).linear()))],
        };
        let net = Network::build(&spec, &weights, &Array2::zeros((0, 2))).unwrap();
        let mut input = Array3::zeros((2, 1, 1));
        input[[0, 0, 0]] = 3.0;
        input[[1, 0, 0]] = 1.0;
        let y = net.forward(input).unwrap();
        assert_eq!(y[[0, 0, 0]], 4.0);
        assert_eq!(y[[1, 0, 0]], 12.0);
    }

    #[test]
    fn transposed_convolution_doubles_size() {
        let net = single(
            Op::Deconv(ConvParams::new(1, 1, 4).stride(2).padded(1)),
            &conv_weights(&[1, 1, 4, 4], 1),
        );
        let y = net.forward(Array3::ones((1, 3, 3))).unwrap();
        assert_eq!(y.dim(), (1, 6, 6));
        assert_eq!(y[[0, 0, 0]], 1.0);
        assert_eq!(y[[0, 0, 2]], 2.0);
        assert_eq!(y[[0, 2, 2]], 4.0);
    }

    #[test]
    fn batch_norm_applies_scale_factor() {
        let mut weights = WeightFile::new();
        weights.insert("l.mean", Tensor::new(vec![1], vec![4.0]).unwrap());
        weights.insert("l.var", Tensor::new(vec![1], vec![8.0]).unwrap());
        weights.insert("l.scale_factor", Tensor::new(vec![1], vec![2.0]).unwrap());
        let net = single(Op::BatchNorm { channels: 1 }, &weights);
        let y = net.forward(Array3::from_elem((1, 1, 2), 3.0)).unwrap();
        assert!(y.iter().all(|&v| (v - 0.5).abs() < 1e-5));
    }

    #[test]
    fn softmax_normalizes_each_position() {
        let spec = NetworkSpec {
            input_channels: 3,
            layers: vec![LayerSpec::new("s", Op::Softmax)],
        };
        let net = Network::build(&spec, &WeightFile::new(), &Array2::zeros((0, 2))).unwrap();
        let input = Array3::from_shape_fn((3, 2, 2), |(c, y, x)| (c * (y + x)) as f32 * 10.0);
        let y = net.forward(input).unwrap();
        for lane in y.lanes(Axis(0)) {
            assert!((lane.sum() - 1.0).abs() < 1e-5);
        }
        assert!(y[[2, 1, 1]] > 0.99);
        assert!((y[[0, 0, 0]] - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn projection_of_one_hot_returns_centre() {
        let centres = Array2::from_shape_vec((3, 2), vec![0.0, 0.0, 20.0, -30.0, -5.0, 5.0]).unwrap();
        let spec = NetworkSpec {
            input_channels: 3,
            layers: vec![LayerSpec::new("p", Op::Projection { classes: 3 })],
        };
        let net = Network::build(&spec, &WeightFile::new(), &centres).unwrap();
        let mut probs = Array3::zeros((3, 1, 2));
        probs[[1, 0, 0]] = 1.0;
        probs[[2, 0, 1]] = 1.0;
        let ab = net.forward(probs).unwrap();
        assert_eq!(ab.dim(), (2, 1, 2));
        assert_eq!((ab[[0, 0, 0]], ab[[1, 0, 0]]), (20.0, -30.0));
        assert_eq!((ab[[0, 0, 1]], ab[[1, 0, 1]]), (-5.0, 5.0));
    }

    #[test]
    fn projection_checks_centre_table() {
        let spec = NetworkSpec {
            input_channels: 3,
            layers: vec![LayerSpec::new("p", Op::Projection { classes: 3 })],
        };
        let err = Network::build(&spec, &WeightFile::new(), &Array2::zeros((4, 2))).unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { layer, .. } if layer == "p"));
    }

    #[test]
    fn missing_and_misshapen_weights_rejected() {
        let spec = NetworkSpec {
            input_channels: 1,
            layers: vec![LayerSpec::new("l", Op::Conv(ConvParams::new(1, 2, 3)))],
        };
        let none = Network::build(&spec, &WeightFile::new(), &Array2::zeros((0, 2))).unwrap_err();
        assert!(matches!(none, InferenceError::MissingTensor(name) if name == "l.weight"));
        let wrong = Network::build(&spec, &conv_weights(&[2, 1, 1, 1], 2), &Array2::zeros((0, 2)));
        assert!(matches!(wrong, Err(InferenceError::ShapeMismatch { .. })));
    }

    #[test]
    fn wrong_input_channels_rejected() {
        let net = single(Op::Conv(ConvParams::new(1, 1, 3)), &conv_weights(&[1, 1, 3, 3], 1));
        let err = net.forward(Array3::ones((2, 4, 4))).unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { .. }));
    }

    #[test]
    fn collapsing_input_is_an_empty_tensor() {
        let net = single(Op::Conv(ConvParams::new(1, 1, 3).padded(0)), &conv_weights(&[1, 1, 3, 3], 1));
        let err = net.forward(Array3::ones((1, 2, 2))).unwrap_err();
        assert!(matches!(err, InferenceError::EmptyTensor { layer } if layer == "l"));
        assert!(net.forward(Array3::zeros((1, 0, 0))).is_err());
    }
}
