//! Strided 3D convolution kernels and their gradients.
//!
//! A strided convolution relates a "big" grid to a "small" one: tap `k` of
//! small index `i` reads big index `i * stride - padding + k`. Both
//! [`Conv3d`](crate::neural::Conv3d) (big → small) and
//! [`ConvTranspose3d`](crate::neural::ConvTranspose3d) (small → big) are
//! expressed through that one relation, with weights laid out as
//! `[small_channels, big_channels, k, k, k]`:
//!
//! | kernel          | Conv3d            | ConvTranspose3d   |
//! |-----------------|-------------------|-------------------|
//! | [`gather`]      | forward           | input gradient    |
//! | [`scatter`]     | input gradient    | forward           |
//! | [`weight_grad`] | weight gradient   | weight gradient   |
//!
//! Each kernel splits its output into independent contiguous chunks and
//! fills them in parallel; every chunk is accumulated in a fixed order, so
//! results do not depend on the number of worker threads.

use ndarray::{Array1, Array5, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Kernel size, stride and zero padding shared by all three spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeometry {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
}

impl ConvGeometry {
    pub const fn new(kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            kernel,
            stride,
            padding,
        }
    }

    /// Length of a convolution output along one axis.
    pub fn conv_output(&self, input: usize) -> usize {
        (input + 2 * self.padding).saturating_sub(self.kernel) / self.stride + 1
    }

    /// Length of a transposed-convolution output along one axis.
    pub fn transpose_output(&self, input: usize) -> usize {
        ((input.max(1) - 1) * self.stride + self.kernel).saturating_sub(2 * self.padding)
    }

    fn taps(&self, small_len: usize, big_len: usize) -> Vec<Vec<(usize, usize)>> {
        (0..self.kernel)
            .map(|k| {
                (0..small_len)
                    .filter_map(|i| {
                        let big = (i * self.stride + k) as isize - self.padding as isize;
                        (big >= 0 && (big as usize) < big_len).then_some((i, big as usize))
                    })
                    .collect()
            })
            .collect()
    }
}

type Dims3 = (usize, usize, usize);

/// Valid `(small, big)` index pairs per kernel tap, for each axis.
struct TapTable {
    z: Vec<Vec<(usize, usize)>>,
    y: Vec<Vec<(usize, usize)>>,
    x: Vec<Vec<(usize, usize)>>,
    kernel: usize,
    small: Dims3,
    big: Dims3,
}

impl TapTable {
    fn new(geometry: ConvGeometry, small: Dims3, big: Dims3) -> Self {
        Self {
            z: geometry.taps(small.0, big.0),
            y: geometry.taps(small.1, big.1),
            x: geometry.taps(small.2, big.2),
            kernel: geometry.kernel,
            small,
            big,
        }
    }

    /// Calls `f(weight_index, small_offset, big_offset)` for every tap.
    #[inline]
    fn for_each(&self, mut f: impl FnMut(usize, usize, usize)) {
        let k = self.kernel;
        let (_, sy, sx) = self.small;
        let (_, by, bx) = self.big;
        for kz in 0..k {
            for &(iz, jz) in &self.z[kz] {
                for ky in 0..k {
                    for &(iy, jy) in &self.y[ky] {
                        let small_row = (iz * sy + iy) * sx;
                        let big_row = (jz * by + jy) * bx;
                        for kx in 0..k {
                            let widx = (kz * k + ky) * k + kx;
                            for &(ix, jx) in &self.x[kx] {
                                f(widx, small_row + ix, big_row + jx);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn spatial(array: &Array5<f32>) -> Dims3 {
    let (_, _, z, y, x) = array.dim();
    (z, y, x)
}

/// Small-grid output from a big-grid input:
/// `small[n, s, i] = Σ_{b, k} w[s, b, k] · big[n, b, i·stride − pad + k]`.
pub fn gather(
    big: &Array5<f32>,
    weight: &Array5<f32>,
    geometry: ConvGeometry,
    small_dims: Dims3,
) -> Array5<f32> {
    let (batch, big_c, ..) = big.dim();
    let (small_c, w_big_c, ..) = weight.dim();
    debug_assert_eq!(big_c, w_big_c);

    let table = TapTable::new(geometry, small_dims, spatial(big));
    let big_vol = table.big.0 * table.big.1 * table.big.2;
    let small_vol = small_dims.0 * small_dims.1 * small_dims.2;
    let k3 = geometry.kernel.pow(3);

    let big = big.as_standard_layout();
    let weight = weight.as_standard_layout();
    let big_data = big.as_slice().expect("contiguous");
    let w_data = weight.as_slice().expect("contiguous");

    let mut out = Array5::<f32>::zeros((batch, small_c, small_dims.0, small_dims.1, small_dims.2));
    out.as_slice_mut()
        .expect("contiguous")
        .par_chunks_mut(small_vol.max(1))
        .enumerate()
        .for_each(|(idx, chunk)| {
            let (n, s) = (idx / small_c, idx % small_c);
            for b in 0..big_c {
                let src = &big_data[(n * big_c + b) * big_vol..][..big_vol];
                let w = &w_data[(s * big_c + b) * k3..][..k3];
                table.for_each(|widx, so, bo| chunk[so] += w[widx] * src[bo]);
            }
        });
    out
}

/// Big-grid output from a small-grid input, the adjoint of [`gather`]:
/// `big[n, b, i·stride − pad + k] += w[s, b, k] · small[n, s, i]`.
pub fn scatter(
    small: &Array5<f32>,
    weight: &Array5<f32>,
    geometry: ConvGeometry,
    big_dims: Dims3,
) -> Array5<f32> {
    let (batch, small_c, ..) = small.dim();
    let (w_small_c, big_c, ..) = weight.dim();
    debug_assert_eq!(small_c, w_small_c);

    let table = TapTable::new(geometry, spatial(small), big_dims);
    let small_vol = table.small.0 * table.small.1 * table.small.2;
    let big_vol = big_dims.0 * big_dims.1 * big_dims.2;
    let k3 = geometry.kernel.pow(3);

    let small = small.as_standard_layout();
    let weight = weight.as_standard_layout();
    let small_data = small.as_slice().expect("contiguous");
    let w_data = weight.as_slice().expect("contiguous");

    let mut out = Array5::<f32>::zeros((batch, big_c, big_dims.0, big_dims.1, big_dims.2));
    out.as_slice_mut()
        .expect("contiguous")
        .par_chunks_mut(big_vol.max(1))
        .enumerate()
        .for_each(|(idx, chunk)| {
            let (n, b) = (idx / big_c, idx % big_c);
            for s in 0..small_c {
                let src = &small_data[(n * small_c + s) * small_vol..][..small_vol];
                let w = &w_data[(s * big_c + b) * k3..][..k3];
                table.for_each(|widx, so, bo| chunk[bo] += w[widx] * src[so]);
            }
        });
    out
}

/// Weight gradient `[small_c, big_c, k, k, k]`:
/// `Σ_{n, i} small[n, s, i] · big[n, b, i·stride − pad + k]`.
pub fn weight_grad(small: &Array5<f32>, big: &Array5<f32>, geometry: ConvGeometry) -> Array5<f32> {
    let (batch, small_c, ..) = small.dim();
    let (_, big_c, ..) = big.dim();
    let table = TapTable::new(geometry, spatial(small), spatial(big));
    let small_vol = table.small.0 * table.small.1 * table.small.2;
    let big_vol = table.big.0 * table.big.1 * table.big.2;
    let k = geometry.kernel;

    let small = small.as_standard_layout();
    let big = big.as_standard_layout();
    let small_data = small.as_slice().expect("contiguous");
    let big_data = big.as_slice().expect("contiguous");

    let mut out = Array5::<f32>::zeros((small_c, big_c, k, k, k));
    out.as_slice_mut()
        .expect("contiguous")
        .par_chunks_mut(k * k * k)
        .enumerate()
        .for_each(|(idx, chunk)| {
            let (s, b) = (idx / big_c, idx % big_c);
            for n in 0..batch {
                let sm = &small_data[(n * small_c + s) * small_vol..][..small_vol];
                let bg = &big_data[(n * big_c + b) * big_vol..][..big_vol];
                table.for_each(|widx, so, bo| chunk[widx] += sm[so] * bg[bo]);
            }
        });
    out
}

/// Per-channel sum over batch and space; the bias gradient.
pub fn channel_sums(grad: &Array5<f32>) -> Array1<f32> {
    let channels = grad.len_of(Axis(1));
    Array1::from_shape_fn(channels, |c| {
        grad.index_axis(Axis(1), c)
            .iter()
            .map(|&v| v as f64)
            .sum::<f64>() as f32
    })
}

/// Adds `bias[c]` to every element of channel `c`.
pub fn add_channel_bias(output: &mut Array5<f32>, bias: &Array1<f32>) {
    for (c, mut channel) in output.axis_iter_mut(Axis(1)).enumerate() {
        let b = bias[c];
        channel.mapv_inplace(|v| v + b);
    }
}
