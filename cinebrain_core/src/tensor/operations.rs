//! Primitive volume operations.
//!
//! These are the individual stages of [`crate::VolumeBuilder`]:
//! - [`standardize`] - Zero-mean, unit-variance scaling of the raw vector
//! - [`cube`] - Zero-pad and fold the vector into a cube
//! - [`downsample`] - Strided subsampling per axis
//! - [`reverse_axes`] - Reorder `(a, b, c)` to `(c, b, a)`
//! - [`pad_to_at_least`] - Symmetric zero padding up to a target shape
//! - [`center_crop`] - Centred window of a target shape
//! - [`normalize_range`] - Min-max rescale into `[-1, 1]`
//!
//! Reductions run sequentially in `f64` so that repeated builds of the same
//! sample are bit-identical.

use ndarray::{s, Array3};

/// Added to the standard deviation before dividing.
pub const STANDARDIZE_EPS: f64 = 1e-6;

/// Shape of a 3D array as `(z, y, x)`.
pub type Shape3 = (usize, usize, usize);

/// Subtracts the mean and divides by `population_std + STANDARDIZE_EPS`.
///
/// A constant vector collapses to (near) zero rather than failing.
///
/// # Examples
///
/// ```
/// use cinebrain_core::tensor::operations::standardize;
///
/// let out = standardize(&[1.0, 3.0]);
/// assert!((out[0] + 1.0).abs() < 1e-5);
/// assert!((out[1] - 1.0).abs() < 1e-5);
/// ```
pub fn standardize(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let count = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / count;
    let variance = values
        .iter()
        .map(|&v| {
            let diff = v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / count;
    let denominator = variance.sqrt() + STANDARDIZE_EPS;

    values
        .iter()
        .map(|&v| ((v as f64 - mean) / denominator) as f32)
        .collect()
}

/// Smallest `side` with `side^3 >= n`.
///
/// Computed on integers; a floating cube root overshoots on perfect cubes
/// (`27f64.powf(1.0 / 3.0)` is slightly above 3).
pub fn cube_side(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut side = (n as f64).cbrt().round() as usize;
    while side.saturating_mul(side).saturating_mul(side) < n {
        side += 1;
    }
    while side > 1 && (side - 1) * (side - 1) * (side - 1) >= n {
        side -= 1;
    }
    side
}

/// Zero-pads `values` at the end to `side^3` and folds it row-major into a
/// `(side, side, side)` cube; the last axis varies fastest.
pub fn cube(values: &[f32]) -> Array3<f32> {
    let side = cube_side(values.len());
    let plane = side * side;
    Array3::from_shape_fn((side, side, side), |(i, j, k)| {
        values.get(i * plane + j * side + k).copied().unwrap_or(0.0)
    })
}

/// Keeps every `dz`-th, `dy`-th and `dx`-th element along axes 0, 1 and 2.
///
/// Factors must be at least 1; [`crate::PreprocessConfig`] enforces this.
pub fn downsample(volume: &Array3<f32>, factors: Shape3) -> Array3<f32> {
    let (dz, dy, dx) = (factors.0 as isize, factors.1 as isize, factors.2 as isize);
    volume.slice(s![..;dz, ..;dy, ..;dx]).to_owned()
}

/// Transposes `(a, b, c)` to `(c, b, a)` in standard layout.
pub fn reverse_axes(volume: &Array3<f32>) -> Array3<f32> {
    volume
        .view()
        .reversed_axes()
        .as_standard_layout()
        .into_owned()
}

/// Symmetric zero padding on every axis smaller than `target`.
///
/// The odd extra element goes to the high side. Axes already at least as
/// large as the target are left alone.
pub fn pad_to_at_least(volume: &Array3<f32>, target: Shape3) -> Array3<f32> {
    let (z, y, x) = volume.dim();
    let (tz, ty, tx) = target;
    let (pz, py, px) = (tz.saturating_sub(z), ty.saturating_sub(y), tx.saturating_sub(x));
    if pz == 0 && py == 0 && px == 0 {
        return volume.clone();
    }

    let (bz, by, bx) = (pz / 2, py / 2, px / 2);
    let mut padded = Array3::zeros((z + pz, y + py, x + px));
    padded
        .slice_mut(s![bz..bz + z, by..by + y, bx..bx + x])
        .assign(volume);
    padded
}

/// Centred `target`-sized window, `start = (current - target) / 2` per axis.
///
/// Axes smaller than the target are kept whole; pad first to guarantee the
/// exact output shape.
pub fn center_crop(volume: &Array3<f32>, target: Shape3) -> Array3<f32> {
    let (z, y, x) = volume.dim();
    let (tz, ty, tx) = target;
    let window = |current: usize, wanted: usize| {
        let start = current.saturating_sub(wanted) / 2;
        start..start + wanted.min(current)
    };
    let (rz, ry, rx) = (window(z, tz), window(y, ty), window(x, tx));
    volume.slice(s![rz, ry, rx]).to_owned()
}

/// Rescales in place to `[-1, 1]` via `2 (v - min) / (max - min) - 1`.
///
/// A constant volume (`max == min`) is left untouched.
pub fn normalize_range(volume: &mut Array3<f32>) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &value in volume.iter() {
        min = min.min(value);
        max = max.max(value);
    }
    if !(max > min) {
        return;
    }
    let range = max - min;
    volume.mapv_inplace(|v| 2.0 * (v - min) / range - 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: Shape3) -> Array3<f32> {
        let (z, y, x) = shape;
        Array3::from_shape_vec(shape, (0..z * y * x).map(|v| v as f32).collect())
            .expect("shape matches")
    }

    #[test]
    fn test_standardize_zero_mean_unit_variance() {
        let out = standardize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let mean: f32 = out.iter().sum::<f32>() / out.len() as f32;
        let var: f32 = out.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / out.len() as f32;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_standardize_constant_vector_is_zero() {
        let out = standardize(&[3.5; 16]);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cube_side_exact_on_perfect_cubes() {
        assert_eq!(cube_side(1), 1);
        assert_eq!(cube_side(8), 2);
        assert_eq!(cube_side(9), 3);
        assert_eq!(cube_side(10), 3);
        assert_eq!(cube_side(27), 3);
        assert_eq!(cube_side(28), 4);
        assert_eq!(cube_side(64), 4);
        assert_eq!(cube_side(1_000_000), 100);
        assert_eq!(cube_side(1_000_001), 101);
    }

    #[test]
    fn test_cube_pads_with_trailing_zeros() {
        let values: Vec<f32> = (1..=10).map(|v| v as f32).collect();
        let cubed = cube(&values);
        assert_eq!(cubed.dim(), (3, 3, 3));
        assert_eq!(cubed[[0, 0, 0]], 1.0);
        assert_eq!(cubed[[0, 0, 2]], 3.0);
        assert_eq!(cubed[[1, 0, 0]], 10.0);
        assert_eq!(cubed.iter().filter(|v| **v == 0.0).count(), 17);
    }

    #[test]
    fn test_downsample_strides_each_axis() {
        let volume = ramp((4, 4, 4));
        let down = downsample(&volume, (2, 1, 4));
        assert_eq!(down.dim(), (2, 4, 1));
        assert_eq!(down[[1, 3, 0]], volume[[2, 3, 0]]);
    }

    #[test]
    fn test_reverse_axes() {
        let volume = ramp((2, 3, 4));
        let reversed = reverse_axes(&volume);
        assert_eq!(reversed.dim(), (4, 3, 2));
        assert_eq!(reversed[[3, 1, 0]], volume[[0, 1, 3]]);
        assert!(reversed.is_standard_layout());
    }

    #[test]
    fn test_pad_puts_odd_element_high() {
        let volume = Array3::from_elem((1, 2, 4), 1.0f32);
        let padded = pad_to_at_least(&volume, (4, 5, 2));
        assert_eq!(padded.dim(), (4, 5, 4));
        // z: 3 extra -> 1 before, 2 after
        assert_eq!(padded[[0, 1, 0]], 0.0);
        assert_eq!(padded[[1, 1, 0]], 1.0);
        assert_eq!(padded[[2, 1, 0]], 0.0);
        // y: 3 extra -> 1 before, 2 after
        assert_eq!(padded[[1, 0, 0]], 0.0);
        assert_eq!(padded[[1, 2, 0]], 1.0);
        assert_eq!(padded[[1, 3, 0]], 0.0);
        assert_eq!(padded.sum(), 8.0);
    }

    #[test]
    fn test_center_crop_takes_middle_window() {
        let volume = ramp((5, 4, 3));
        let cropped = center_crop(&volume, (2, 2, 3));
        assert_eq!(cropped.dim(), (2, 2, 3));
        // z start = (5 - 2) / 2 = 1, y start = 1
        assert_eq!(cropped[[0, 0, 0]], volume[[1, 1, 0]]);
        assert_eq!(cropped[[1, 1, 2]], volume[[2, 2, 2]]);
    }

    #[test]
    fn test_normalize_range_maps_to_unit_interval() {
        let mut volume = ramp((2, 2, 2));
        normalize_range(&mut volume);
        assert_eq!(volume[[0, 0, 0]], -1.0);
        assert_eq!(volume[[1, 1, 1]], 1.0);
        assert!(volume.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_normalize_range_leaves_constant_volume() {
        let mut volume = Array3::from_elem((2, 2, 2), 0.25f32);
        normalize_range(&mut volume);
        assert!(volume.iter().all(|v| *v == 0.25));
    }
}
