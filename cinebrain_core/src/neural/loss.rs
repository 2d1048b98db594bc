//! Reconstruction losses.

use ndarray::{Array, Array5, Dimension, Zip};

/// Mean absolute error with its gradient w.r.t. `predicted`.
///
/// The gradient is `sign(predicted - target) / N`, with `sign(0) = 0`.
///
/// # Returns
///
/// Tuple of (loss value, gradient w.r.t. predicted)
pub fn l1_loss_with_gradients(predicted: &Array5<f32>, target: &Array5<f32>) -> (f32, Array5<f32>) {
    let n = predicted.len().max(1) as f32;
    let mut total = 0.0f64;
    let mut gradient = Array5::zeros(predicted.raw_dim());
    Zip::from(&mut gradient)
        .and(predicted)
        .and(target)
        .for_each(|g, &p, &t| {
            let diff = p - t;
            total += diff.abs() as f64;
            *g = if diff > 0.0 {
                1.0 / n
            } else if diff < 0.0 {
                -1.0 / n
            } else {
                0.0
            };
        });
    ((total / n as f64) as f32, gradient)
}

/// Mean squared error, accumulated in `f64`.
///
/// # Examples
///
/// ```
/// use cinebrain_core::neural::mse;
/// use ndarray::array;
///
/// let a = array![1.0f32, 2.0];
/// let b = array![1.0f32, 4.0];
/// assert!((mse(&a, &b) - 2.0).abs() < 1e-12);
/// ```
pub fn mse<D: Dimension>(predicted: &Array<f32, D>, target: &Array<f32, D>) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    let mut total = 0.0f64;
    Zip::from(predicted).and(target).for_each(|&p, &t| {
        let diff = p as f64 - t as f64;
        total += diff * diff;
    });
    total / predicted.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l1_loss_and_gradient() {
        let predicted = Array5::from_shape_vec((1, 1, 1, 1, 4), vec![1.0, -1.0, 0.5, 0.0])
            .expect("shape");
        let target = Array5::from_shape_vec((1, 1, 1, 1, 4), vec![0.0, 0.0, 0.5, 1.0])
            .expect("shape");
        let (loss, grad) = l1_loss_with_gradients(&predicted, &target);
        assert!((loss - 0.75).abs() < 1e-6);
        assert_eq!(grad.into_raw_vec(), vec![0.25, -0.25, 0.0, -0.25]);
    }

    #[test]
    fn test_mse_zero_for_identical() {
        let a = Array5::from_elem((1, 1, 2, 2, 2), 0.3f32);
        assert_eq!(mse(&a, &a), 0.0);
    }
}
