//! Layers of the volumetric autoencoder.
//!
//! Every layer maps a `[batch, channels, z, y, x]` array to another. In
//! training mode a layer caches what its backward pass needs and stores its
//! parameter gradients until the optimizer consumes them through
//! [`Layer::parameters_mut`]. Evaluation mode takes `&self` and caches
//! nothing.

use ndarray::{Array, Array1, Array5, ArrayD, Axis, Dimension, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{PipelineError, PipelineResult};
use crate::neural::gradient::{
    add_channel_bias, channel_sums, gather, scatter, weight_grad, ConvGeometry,
};

/// A trainable tensor exposed to the optimizer.
pub struct ParamSlot<'a> {
    /// Local name, e.g. `weight` or `bias`
    pub name: &'static str,
    pub value: &'a mut [f32],
    pub grad: &'a [f32],
}

/// Uniform `±1/sqrt(fan_in)` initialization.
fn uniform_init<Sh>(shape: Sh, fan_in: usize, rng: &mut StdRng) -> Array5<f32>
where
    Sh: ndarray::ShapeBuilder<Dim = ndarray::Ix5>,
{
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array5::from_shape_simple_fn(shape, || rng.gen_range(-bound..bound))
}

fn uniform_bias(len: usize, fan_in: usize, rng: &mut StdRng) -> Array1<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array1::from_shape_simple_fn(len, || rng.gen_range(-bound..bound))
}

fn spatial_dims(array: &Array5<f32>) -> (usize, usize, usize) {
    let (_, _, z, y, x) = array.dim();
    (z, y, x)
}

fn slice_of<D: Dimension>(array: &Array<f32, D>) -> &[f32] {
    array.as_slice().expect("contiguous")
}

fn slice_of_mut<D: Dimension>(array: &mut Array<f32, D>) -> &mut [f32] {
    array.as_slice_mut().expect("contiguous")
}

/// Strided 3D convolution with bias.
///
/// Weight layout is `[out_channels, in_channels, k, k, k]`.
#[derive(Debug, Clone)]
pub struct Conv3d {
    pub weight: Array5<f32>,
    pub bias: Array1<f32>,
    pub geometry: ConvGeometry,
    weight_grad: Array5<f32>,
    bias_grad: Array1<f32>,
    cached_input: Option<Array5<f32>>,
}

impl Conv3d {
    pub fn new(in_channels: usize, out_channels: usize, geometry: ConvGeometry, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let k = geometry.kernel;
        let fan_in = in_channels * k * k * k;
        let weight = uniform_init((out_channels, in_channels, k, k, k), fan_in, &mut rng);
        let bias = uniform_bias(out_channels, fan_in, &mut rng);
        Self {
            weight_grad: Array5::zeros(weight.raw_dim()),
            bias_grad: Array1::zeros(bias.raw_dim()),
            weight,
            bias,
            geometry,
            cached_input: None,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.len_of(Axis(1))
    }

    pub fn out_channels(&self) -> usize {
        self.weight.len_of(Axis(0))
    }

    pub fn output_dims(&self, input: (usize, usize, usize)) -> (usize, usize, usize) {
        let g = self.geometry;
        (g.conv_output(input.0), g.conv_output(input.1), g.conv_output(input.2))
    }

    pub fn forward(&self, input: &Array5<f32>) -> Array5<f32> {
        let dims = self.output_dims(spatial_dims(input));
        let mut output = gather(input, &self.weight, self.geometry, dims);
        add_channel_bias(&mut output, &self.bias);
        output
    }

    fn forward_train(&mut self, input: &Array5<f32>) -> Array5<f32> {
        self.cached_input = Some(input.clone());
        self.forward(input)
    }

    fn backward(&mut self, grad_output: &Array5<f32>) -> Array5<f32> {
        let input = self
            .cached_input
            .take()
            .expect("forward_train must run before backward");
        self.weight_grad = weight_grad(grad_output, &input, self.geometry);
        self.bias_grad = channel_sums(grad_output);
        scatter(grad_output, &self.weight, self.geometry, spatial_dims(&input))
    }
}

/// Strided transposed 3D convolution with bias.
///
/// Weight layout is `[in_channels, out_channels, k, k, k]`.
#[derive(Debug, Clone)]
pub struct ConvTranspose3d {
    pub weight: Array5<f32>,
    pub bias: Array1<f32>,
    pub geometry: ConvGeometry,
    weight_grad: Array5<f32>,
    bias_grad: Array1<f32>,
    cached_input: Option<Array5<f32>>,
}

impl ConvTranspose3d {
    pub fn new(in_channels: usize, out_channels: usize, geometry: ConvGeometry, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let k = geometry.kernel;
        let fan_in = out_channels * k * k * k;
        let weight = uniform_init((in_channels, out_channels, k, k, k), fan_in, &mut rng);
        let bias = uniform_bias(out_channels, fan_in, &mut rng);
        Self {
            weight_grad: Array5::zeros(weight.raw_dim()),
            bias_grad: Array1::zeros(bias.raw_dim()),
            weight,
            bias,
            geometry,
            cached_input: None,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.len_of(Axis(0))
    }

    pub fn out_channels(&self) -> usize {
        self.weight.len_of(Axis(1))
    }

    pub fn output_dims(&self, input: (usize, usize, usize)) -> (usize, usize, usize) {
        let g = self.geometry;
        (
            g.transpose_output(input.0),
            g.transpose_output(input.1),
            g.transpose_output(input.2),
        )
    }

    pub fn forward(&self, input: &Array5<f32>) -> Array5<f32> {
        let dims = self.output_dims(spatial_dims(input));
        let mut output = scatter(input, &self.weight, self.geometry, dims);
        add_channel_bias(&mut output, &self.bias);
        output
    }

    fn forward_train(&mut self, input: &Array5<f32>) -> Array5<f32> {
        self.cached_input = Some(input.clone());
        self.forward(input)
    }

    fn backward(&mut self, grad_output: &Array5<f32>) -> Array5<f32> {
        let input = self
            .cached_input
            .take()
            .expect("forward_train must run before backward");
        self.weight_grad = weight_grad(&input, grad_output, self.geometry);
        self.bias_grad = channel_sums(grad_output);
        gather(grad_output, &self.weight, self.geometry, spatial_dims(&input))
    }
}

/// Per-channel batch normalization over `[batch, z, y, x]`.
///
/// Training normalizes with the batch statistics and folds them into the
/// running estimates; evaluation uses the running estimates only.
#[derive(Debug, Clone)]
pub struct BatchNorm3d {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    pub momentum: f32,
    pub eps: f32,
    weight_grad: Array1<f32>,
    bias_grad: Array1<f32>,
    cache: Option<BatchNormCache>,
}

#[derive(Debug, Clone)]
struct BatchNormCache {
    normalized: Array5<f32>,
    inv_std: Array1<f32>,
}

impl BatchNorm3d {
    pub const DEFAULT_MOMENTUM: f32 = 0.1;
    pub const DEFAULT_EPS: f32 = 1e-5;

    pub fn new(channels: usize) -> Self {
        Self {
            weight: Array1::ones(channels),
            bias: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            momentum: Self::DEFAULT_MOMENTUM,
            eps: Self::DEFAULT_EPS,
            weight_grad: Array1::zeros(channels),
            bias_grad: Array1::zeros(channels),
            cache: None,
        }
    }

    pub fn channels(&self) -> usize {
        self.weight.len()
    }

    /// Normalizes with the running statistics.
    pub fn forward(&self, input: &Array5<f32>) -> Array5<f32> {
        let mut output = input.clone();
        for (c, mut channel) in output.axis_iter_mut(Axis(1)).enumerate() {
            let inv_std = 1.0 / (self.running_var[c] + self.eps).sqrt();
            let (mean, gamma, beta) = (self.running_mean[c], self.weight[c], self.bias[c]);
            channel.mapv_inplace(|v| (v - mean) * inv_std * gamma + beta);
        }
        output
    }

    fn forward_train(&mut self, input: &Array5<f32>) -> Array5<f32> {
        let channels = self.channels();
        let count = input.len() / channels.max(1);
        let mut normalized = input.clone();
        let mut inv_std = Array1::zeros(channels);

        for (c, mut channel) in normalized.axis_iter_mut(Axis(1)).enumerate() {
            let mean = channel.iter().map(|&v| v as f64).sum::<f64>() / count as f64;
            let var = channel
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / count as f64;
            let inv = 1.0 / (var + self.eps as f64).sqrt();
            channel.mapv_inplace(|v| ((v as f64 - mean) * inv) as f32);
            inv_std[c] = inv as f32;

            let unbiased = if count > 1 {
                var * count as f64 / (count - 1) as f64
            } else {
                var
            };
            let m = self.momentum;
            self.running_mean[c] = (1.0 - m) * self.running_mean[c] + m * mean as f32;
            self.running_var[c] = (1.0 - m) * self.running_var[c] + m * unbiased as f32;
        }

        let mut output = normalized.clone();
        for (c, mut channel) in output.axis_iter_mut(Axis(1)).enumerate() {
            let (gamma, beta) = (self.weight[c], self.bias[c]);
            channel.mapv_inplace(|v| v * gamma + beta);
        }
        self.cache = Some(BatchNormCache {
            normalized,
            inv_std,
        });
        output
    }

    fn backward(&mut self, grad_output: &Array5<f32>) -> Array5<f32> {
        let cache = self
            .cache
            .take()
            .expect("forward_train must run before backward");
        let channels = self.channels();
        let count = (grad_output.len() / channels.max(1)) as f32;
        let mut grad_input = Array5::zeros(grad_output.raw_dim());

        for c in 0..channels {
            let dy = grad_output.index_axis(Axis(1), c);
            let x_hat = cache.normalized.index_axis(Axis(1), c);
            let sum_dy = dy.iter().map(|&v| v as f64).sum::<f64>() as f32;
            let sum_dy_xhat = dy
                .iter()
                .zip(x_hat.iter())
                .map(|(&g, &x)| g as f64 * x as f64)
                .sum::<f64>() as f32;
            self.bias_grad[c] = sum_dy;
            self.weight_grad[c] = sum_dy_xhat;

            let scale = self.weight[c] * cache.inv_std[c] / count;
            let mut dx = grad_input.index_axis_mut(Axis(1), c);
            ndarray::Zip::from(&mut dx)
                .and(&dy)
                .and(&x_hat)
                .for_each(|out, &g, &x| {
                    *out = scale * (count * g - sum_dy - x * sum_dy_xhat);
                });
        }
        grad_input
    }
}

/// Rectified linear unit.
#[derive(Debug, Clone, Default)]
pub struct Relu {
    cached_output: Option<Array5<f32>>,
}

impl Relu {
    pub fn forward(&self, input: &Array5<f32>) -> Array5<f32> {
        input.mapv(|v| v.max(0.0))
    }

    fn forward_train(&mut self, input: &Array5<f32>) -> Array5<f32> {
        let output = self.forward(input);
        self.cached_output = Some(output.clone());
        output
    }

    fn backward(&mut self, grad_output: &Array5<f32>) -> Array5<f32> {
        let output = self
            .cached_output
            .take()
            .expect("forward_train must run before backward");
        let mut grad = grad_output.clone();
        ndarray::Zip::from(&mut grad)
            .and(&output)
            .for_each(|g, &y| {
                if y <= 0.0 {
                    *g = 0.0;
                }
            });
        grad
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone, Default)]
pub struct Tanh {
    cached_output: Option<Array5<f32>>,
}

impl Tanh {
    pub fn forward(&self, input: &Array5<f32>) -> Array5<f32> {
        input.mapv(f32::tanh)
    }

    fn forward_train(&mut self, input: &Array5<f32>) -> Array5<f32> {
        let output = self.forward(input);
        self.cached_output = Some(output.clone());
        output
    }

    fn backward(&mut self, grad_output: &Array5<f32>) -> Array5<f32> {
        let output = self
            .cached_output
            .take()
            .expect("forward_train must run before backward");
        let mut grad = grad_output.clone();
        ndarray::Zip::from(&mut grad)
            .and(&output)
            .for_each(|g, &y| *g *= 1.0 - y * y);
        grad
    }
}

/// One stage of a [`crate::neural::Sequential`].
#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv3d),
    ConvTranspose(ConvTranspose3d),
    BatchNorm(BatchNorm3d),
    Relu(Relu),
    Tanh(Tanh),
}

impl Layer {
    /// Inference forward pass; no caches, running statistics for batch norm.
    pub fn forward_eval(&self, input: &Array5<f32>) -> Array5<f32> {
        match self {
            Layer::Conv(layer) => layer.forward(input),
            Layer::ConvTranspose(layer) => layer.forward(input),
            Layer::BatchNorm(layer) => layer.forward(input),
            Layer::Relu(layer) => layer.forward(input),
            Layer::Tanh(layer) => layer.forward(input),
        }
    }

    /// Training forward pass; caches activations for [`Layer::backward`].
    pub fn forward_train(&mut self, input: &Array5<f32>) -> Array5<f32> {
        match self {
            Layer::Conv(layer) => layer.forward_train(input),
            Layer::ConvTranspose(layer) => layer.forward_train(input),
            Layer::BatchNorm(layer) => layer.forward_train(input),
            Layer::Relu(layer) => layer.forward_train(input),
            Layer::Tanh(layer) => layer.forward_train(input),
        }
    }

    /// Propagates `grad_output` to the layer input and records parameter
    /// gradients.
    ///
    /// # Panics
    ///
    /// If called without a preceding [`Layer::forward_train`].
    pub fn backward(&mut self, grad_output: &Array5<f32>) -> Array5<f32> {
        match self {
            Layer::Conv(layer) => layer.backward(grad_output),
            Layer::ConvTranspose(layer) => layer.backward(grad_output),
            Layer::BatchNorm(layer) => layer.backward(grad_output),
            Layer::Relu(layer) => layer.backward(grad_output),
            Layer::Tanh(layer) => layer.backward(grad_output),
        }
    }

    /// Trainable tensors paired with their latest gradients.
    pub fn parameters_mut(&mut self) -> Vec<ParamSlot<'_>> {
        match self {
            Layer::Conv(Conv3d {
                weight,
                bias,
                weight_grad,
                bias_grad,
                ..
            })
            | Layer::ConvTranspose(ConvTranspose3d {
                weight,
                bias,
                weight_grad,
                bias_grad,
                ..
            }) => vec![
                ParamSlot {
                    name: "weight",
                    value: slice_of_mut(weight),
                    grad: slice_of(weight_grad),
                },
                ParamSlot {
                    name: "bias",
                    value: slice_of_mut(bias),
                    grad: slice_of(bias_grad),
                },
            ],
            Layer::BatchNorm(BatchNorm3d {
                weight,
                bias,
                weight_grad,
                bias_grad,
                ..
            }) => vec![
                ParamSlot {
                    name: "weight",
                    value: slice_of_mut(weight),
                    grad: slice_of(weight_grad),
                },
                ParamSlot {
                    name: "bias",
                    value: slice_of_mut(bias),
                    grad: slice_of(bias_grad),
                },
            ],
            Layer::Relu(_) | Layer::Tanh(_) => Vec::new(),
        }
    }

    /// Persistent tensors (parameters and buffers) by local name.
    pub fn state(&self) -> Vec<(&'static str, ArrayD<f32>)> {
        match self {
            Layer::Conv(Conv3d { weight, bias, .. })
            | Layer::ConvTranspose(ConvTranspose3d { weight, bias, .. }) => vec![
                ("weight", weight.clone().into_dyn()),
                ("bias", bias.clone().into_dyn()),
            ],
            Layer::BatchNorm(bn) => vec![
                ("weight", bn.weight.clone().into_dyn()),
                ("bias", bn.bias.clone().into_dyn()),
                ("running_mean", bn.running_mean.clone().into_dyn()),
                ("running_var", bn.running_var.clone().into_dyn()),
            ],
            Layer::Relu(_) | Layer::Tanh(_) => Vec::new(),
        }
    }

    /// Replaces the tensor called `name`; the shape must match exactly.
    pub fn load_state(&mut self, name: &str, value: &ArrayD<f32>) -> PipelineResult<()> {
        let unknown =
            || PipelineError::invalid_config("state_dict", name, "no such tensor in layer");
        let expected = self.state_shape(name).ok_or_else(unknown)?;
        if expected.slice() != value.shape() {
            return Err(PipelineError::shape_mismatch(
                expected.slice(),
                value.shape(),
                format!("state tensor '{name}'"),
            ));
        }

        let target: Option<&mut [f32]> = match (self, name) {
            (Layer::Conv(conv), "weight") => Some(slice_of_mut(&mut conv.weight)),
            (Layer::Conv(conv), "bias") => Some(slice_of_mut(&mut conv.bias)),
            (Layer::ConvTranspose(conv), "weight") => Some(slice_of_mut(&mut conv.weight)),
            (Layer::ConvTranspose(conv), "bias") => Some(slice_of_mut(&mut conv.bias)),
            (Layer::BatchNorm(bn), "weight") => Some(slice_of_mut(&mut bn.weight)),
            (Layer::BatchNorm(bn), "bias") => Some(slice_of_mut(&mut bn.bias)),
            (Layer::BatchNorm(bn), "running_mean") => Some(slice_of_mut(&mut bn.running_mean)),
            (Layer::BatchNorm(bn), "running_var") => Some(slice_of_mut(&mut bn.running_var)),
            _ => None,
        };
        let target = target.ok_or_else(unknown)?;
        let value = value.as_standard_layout();
        target.copy_from_slice(value.as_slice().expect("contiguous"));
        Ok(())
    }

    /// Expected shape of the tensor called `name`, if the layer has one.
    pub fn state_shape(&self, name: &str) -> Option<IxDyn> {
        self.state()
            .into_iter()
            .find(|(local, _)| *local == name)
            .map(|(_, value)| value.raw_dim())
    }
}
