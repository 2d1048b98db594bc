//! Optimizers for training the volumetric autoencoder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-parameter Adam moments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdamMoments {
    pub first: Vec<f32>,
    pub second: Vec<f32>,
    pub t: u32,
}

/// Adam with decoupled weight decay (AdamW).
///
/// Implements the update rule:
/// ```text
/// param = param * (1 - lr * weight_decay)
/// m = beta1 * m + (1 - beta1) * grad
/// v = beta2 * v + (1 - beta2) * grad^2
/// param = param - lr * m_hat / (sqrt(v_hat) + epsilon)
/// ```
///
/// Moments are keyed by parameter name, so one optimizer serves a whole
/// network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamW {
    /// Learning rate
    pub learning_rate: f32,
    /// Exponential decay rate for first moment (typically 0.9)
    pub beta1: f32,
    /// Exponential decay rate for second moment (typically 0.999)
    pub beta2: f32,
    /// Small constant for numerical stability
    pub epsilon: f32,
    /// Decoupled weight decay
    pub weight_decay: f32,
    moments: HashMap<String, AdamMoments>,
}

impl AdamW {
    /// Creates a new AdamW optimizer.
    ///
    /// # Examples
    ///
    /// ```
    /// use cinebrain_core::neural::AdamW;
    ///
    /// let optimizer = AdamW::new(1e-3, 1e-4);
    /// assert_eq!(optimizer.beta1, 0.9);
    /// ```
    pub fn new(learning_rate: f32, weight_decay: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay,
            moments: HashMap::new(),
        }
    }

    /// Updates `param` in place from `gradient`.
    ///
    /// Each parameter keeps its own step counter, so the bias correction is
    /// exact even when parameters are visited in different orders.
    pub fn step(&mut self, param_name: &str, param: &mut [f32], gradient: &[f32]) {
        debug_assert_eq!(param.len(), gradient.len());
        let state = self
            .moments
            .entry(param_name.to_string())
            .or_insert_with(|| AdamMoments {
                first: vec![0.0; param.len()],
                second: vec![0.0; param.len()],
                t: 0,
            });
        state.t += 1;

        let (beta1, beta2) = (self.beta1, self.beta2);
        let bias1 = 1.0 - beta1.powi(state.t as i32);
        let bias2 = 1.0 - beta2.powi(state.t as i32);
        let step_size = self.learning_rate / bias1;
        let decay = 1.0 - self.learning_rate * self.weight_decay;
        let bias2_sqrt = bias2.sqrt();

        for (((p, &g), m), v) in param
            .iter_mut()
            .zip(gradient.iter())
            .zip(state.first.iter_mut())
            .zip(state.second.iter_mut())
        {
            *p *= decay;
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let denominator = v.sqrt() / bias2_sqrt + self.epsilon;
            *p -= step_size * *m / denominator;
        }
    }

    /// Number of parameters with optimizer state.
    pub fn tracked_parameters(&self) -> usize {
        self.moments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut optimizer = AdamW::new(0.1, 0.0);
        let mut param = vec![1.0f32, -1.0];
        optimizer.step("w", &mut param, &[2.0, -0.5]);
        // m_hat / sqrt(v_hat) == sign(grad) on the first step
        assert!((param[0] - 0.9).abs() < 1e-5);
        assert!((param[1] + 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_weight_decay_is_decoupled() {
        let mut optimizer = AdamW::new(0.1, 0.5);
        let mut param = vec![2.0f32];
        optimizer.step("w", &mut param, &[0.0]);
        // zero gradient: only the decay term applies
        assert!((param[0] - 2.0 * (1.0 - 0.05)).abs() < 1e-6);
    }

    #[test]
    fn test_moments_keyed_by_name() {
        let mut optimizer = AdamW::new(0.01, 0.0);
        let mut a = vec![0.0f32; 3];
        let mut b = vec![0.0f32; 5];
        optimizer.step("a", &mut a, &[1.0; 3]);
        optimizer.step("b", &mut b, &[1.0; 5]);
        optimizer.step("a", &mut a, &[1.0; 3]);
        assert_eq!(optimizer.tracked_parameters(), 2);
    }

    #[test]
    fn test_moments_accumulate_across_steps() {
        let mut optimizer = AdamW::new(0.1, 0.0);
        let mut param = vec![0.0f32];
        optimizer.step("w", &mut param, &[1.0]);
        optimizer.step("w", &mut param, &[-1.0]);
        let state = &optimizer.moments["w"];
        assert_eq!(state.t, 2);
        // m = 0.9 * 0.1 + 0.1 * -1.0
        assert!((state.first[0] + 0.01).abs() < 1e-6);
        // a sign-flipped second gradient only partially undoes the first step
        assert!(param[0] < 0.0 && param[0] > -0.1);
    }
}
