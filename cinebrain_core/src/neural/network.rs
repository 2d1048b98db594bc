//! Volumetric convolutional autoencoder.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array5, ArrayD};

use crate::error::{PipelineError, PipelineResult};
use crate::neural::gradient::ConvGeometry;
use crate::neural::layer::{BatchNorm3d, Conv3d, ConvTranspose3d, Layer, Relu, Tanh};
use crate::neural::optimizer::AdamW;
use crate::tensor::Volume;

/// Named persistent tensors, e.g. `enc.net.0.weight`.
pub type StateDict = BTreeMap<String, ArrayD<f32>>;

/// Encoder stage: kernel 3, stride 2, padding 1.
pub const ENCODER_GEOMETRY: ConvGeometry = ConvGeometry::new(3, 2, 1);
/// Decoder stage: kernel 4, stride 2, padding 1.
pub const DECODER_GEOMETRY: ConvGeometry = ConvGeometry::new(4, 2, 1);

/// Layers applied in order, with tensors named `{prefix}.{index}.{local}`.
#[derive(Debug, Clone)]
pub struct Sequential {
    prefix: String,
    layers: Vec<Layer>,
}

impl Sequential {
    pub fn new(prefix: impl Into<String>, layers: Vec<Layer>) -> Self {
        Self {
            prefix: prefix.into(),
            layers,
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn forward_eval(&self, input: &Array5<f32>) -> Array5<f32> {
        let mut iter = self.layers.iter();
        let Some(first) = iter.next() else {
            return input.clone();
        };
        iter.fold(first.forward_eval(input), |x, layer| layer.forward_eval(&x))
    }

    pub fn forward_train(&mut self, input: &Array5<f32>) -> Array5<f32> {
        let mut iter = self.layers.iter_mut();
        let Some(first) = iter.next() else {
            return input.clone();
        };
        iter.fold(first.forward_train(input), |x, layer| layer.forward_train(&x))
    }

    pub fn backward(&mut self, grad_output: &Array5<f32>) -> Array5<f32> {
        self.layers
            .iter_mut()
            .rev()
            .fold(grad_output.clone(), |grad, layer| layer.backward(&grad))
    }

    /// Applies the stored gradients of every layer through `optimizer`.
    pub fn apply_gradients(&mut self, optimizer: &mut AdamW) {
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            for slot in layer.parameters_mut() {
                let name = format!("{}.{}.{}", self.prefix, idx, slot.name);
                optimizer.step(&name, slot.value, slot.grad);
            }
        }
    }

    pub fn state_dict_into(&self, dict: &mut StateDict) {
        for (idx, layer) in self.layers.iter().enumerate() {
            for (local, value) in layer.state() {
                dict.insert(format!("{}.{}.{}", self.prefix, idx, local), value);
            }
        }
    }

    /// Loads every tensor this sequence owns from `dict`; returns the keys used.
    pub fn load_state_dict(&mut self, dict: &StateDict) -> PipelineResult<Vec<String>> {
        let mut used = Vec::new();
        for (idx, layer) in self.layers.iter_mut().enumerate() {
            for (local, _) in layer.state() {
                let key = format!("{}.{}.{}", self.prefix, idx, local);
                let value = dict.get(&key).ok_or_else(|| {
                    PipelineError::invalid_config("state_dict", &key, "missing tensor")
                })?;
                layer.load_state(local, value)?;
                used.push(key);
            }
        }
        Ok(used)
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| match layer {
                Layer::Conv(conv) => conv.weight.len() + conv.bias.len(),
                Layer::ConvTranspose(conv) => conv.weight.len() + conv.bias.len(),
                Layer::BatchNorm(bn) => bn.weight.len() + bn.bias.len(),
                Layer::Relu(_) | Layer::Tanh(_) => 0,
            })
            .sum()
    }
}

/// Symmetric 3D convolutional autoencoder.
///
/// # Architecture
///
/// ```text
/// encoder: [Conv3d(k3, s2, p1) → BatchNorm3d → ReLU] × 3
///          widths base_ch, 2·base_ch, 4·base_ch
/// decoder: [ConvTranspose3d(k4, s2, p1) → BatchNorm3d → ReLU] × 2
///          → ConvTranspose3d(k4, s2, p1) → Tanh
///          widths 2·base_ch, base_ch, in_ch
/// ```
///
/// Each spatial axis shrinks by 8 in the encoder and grows back by 8 in the
/// decoder, so inputs must be divisible by 8 on every axis.
///
/// # Examples
///
/// ```
/// use cinebrain_core::{Autoencoder, Volume};
///
/// let model = Autoencoder::new(1, 2, 42);
/// let volume = Volume::zeros((8, 8, 8));
/// let reconstruction = model.reconstruct(&volume).unwrap();
/// assert_eq!(reconstruction.shape(), volume.shape());
/// ```
#[derive(Debug, Clone)]
pub struct Autoencoder {
    encoder: Sequential,
    decoder: Sequential,
    in_ch: usize,
    base_ch: usize,
}

impl Autoencoder {
    /// Total spatial reduction of the encoder along each axis.
    pub const SPATIAL_FACTOR: usize = 8;

    pub fn new(in_ch: usize, base_ch: usize, seed: u64) -> Self {
        let widths = [in_ch, base_ch, base_ch * 2, base_ch * 4];
        let mut encoder = Vec::with_capacity(9);
        for stage in 0..3 {
            let (cin, cout) = (widths[stage], widths[stage + 1]);
            encoder.push(Layer::Conv(Conv3d::new(
                cin,
                cout,
                ENCODER_GEOMETRY,
                seed.wrapping_add(stage as u64),
            )));
            encoder.push(Layer::BatchNorm(BatchNorm3d::new(cout)));
            encoder.push(Layer::Relu(Relu::default()));
        }

        let mut decoder = Vec::with_capacity(8);
        for stage in 0..3 {
            let (cin, cout) = (widths[3 - stage], widths[2 - stage]);
            decoder.push(Layer::ConvTranspose(ConvTranspose3d::new(
                cin,
                cout,
                DECODER_GEOMETRY,
                seed.wrapping_add(100 + stage as u64),
            )));
            if stage < 2 {
                decoder.push(Layer::BatchNorm(BatchNorm3d::new(cout)));
                decoder.push(Layer::Relu(Relu::default()));
            } else {
                decoder.push(Layer::Tanh(Tanh::default()));
            }
        }

        Self {
            encoder: Sequential::new("enc.net", encoder),
            decoder: Sequential::new("dec.net", decoder),
            in_ch,
            base_ch,
        }
    }

    /// Builds a model of the given widths and loads `state_dict` into it.
    pub fn from_state_dict(
        in_ch: usize,
        base_ch: usize,
        state_dict: &StateDict,
    ) -> PipelineResult<Self> {
        let mut model = Self::new(in_ch, base_ch, 0);
        model.load_state_dict(state_dict)?;
        Ok(model)
    }

    pub fn in_channels(&self) -> usize {
        self.in_ch
    }

    pub fn base_channels(&self) -> usize {
        self.base_ch
    }

    pub fn encoder(&self) -> &Sequential {
        &self.encoder
    }

    pub fn decoder(&self) -> &Sequential {
        &self.decoder
    }

    /// Latent shape `(4·base_ch, Z/8, Y/8, X/8)` for a spatial input shape.
    pub fn latent_shape(&self, spatial: (usize, usize, usize)) -> (usize, usize, usize, usize) {
        let f = Self::SPATIAL_FACTOR;
        (self.base_ch * 4, spatial.0 / f, spatial.1 / f, spatial.2 / f)
    }

    /// Checks that a spatial shape survives the encoder/decoder round trip.
    pub fn check_spatial_shape(&self, spatial: (usize, usize, usize)) -> PipelineResult<()> {
        let (z, y, x) = spatial;
        let f = Self::SPATIAL_FACTOR;
        if [z, y, x].iter().any(|&axis| axis == 0 || axis % f != 0) {
            return Err(PipelineError::invalid_config(
                "shape",
                format!("{z},{y},{x}"),
                format!("autoencoder input axes must be positive multiples of {f}"),
            ));
        }
        Ok(())
    }

    fn check_batch(&self, batch: &Array5<f32>) -> PipelineResult<()> {
        let (n, c, z, y, x) = batch.dim();
        if c != self.in_ch {
            return Err(PipelineError::shape_mismatch(
                &[n, self.in_ch, z, y, x],
                &[n, c, z, y, x],
                "autoencoder input channels",
            ));
        }
        self.check_spatial_shape((z, y, x))
    }

    /// Inference forward pass over a `[n, in_ch, z, y, x]` batch.
    pub fn forward_eval(&self, batch: &Array5<f32>) -> PipelineResult<Array5<f32>> {
        self.check_batch(batch)?;
        let latent = self.encoder.forward_eval(batch);
        Ok(self.decoder.forward_eval(&latent))
    }

    /// Reconstructs one volume. Leaves the model untouched.
    pub fn reconstruct(&self, volume: &Volume) -> PipelineResult<Volume> {
        let output = self.forward_eval(&volume.as_batch().to_owned())?;
        Volume::from_batch(&output, 0)
    }

    /// Training forward pass; batch norm uses batch statistics and every
    /// layer caches activations for [`Autoencoder::backward`].
    pub fn forward_train(&mut self, batch: &Array5<f32>) -> PipelineResult<Array5<f32>> {
        self.check_batch(batch)?;
        let latent = self.encoder.forward_train(batch);
        Ok(self.decoder.forward_train(&latent))
    }

    pub fn backward(&mut self, grad_output: &Array5<f32>) {
        let grad_latent = self.decoder.backward(grad_output);
        self.encoder.backward(&grad_latent);
    }

    pub fn apply_gradients(&mut self, optimizer: &mut AdamW) {
        self.encoder.apply_gradients(optimizer);
        self.decoder.apply_gradients(optimizer);
    }

    pub fn state_dict(&self) -> StateDict {
        let mut dict = StateDict::new();
        self.encoder.state_dict_into(&mut dict);
        self.decoder.state_dict_into(&mut dict);
        dict
    }

    /// Strict load: every tensor must be present with the right shape and
    /// no unknown keys are allowed.
    pub fn load_state_dict(&mut self, state_dict: &StateDict) -> PipelineResult<()> {
        let mut used: BTreeSet<String> = self.encoder.load_state_dict(state_dict)?.into_iter().collect();
        used.extend(self.decoder.load_state_dict(state_dict)?);
        if let Some(extra) = state_dict.keys().find(|key| !used.contains(*key)) {
            return Err(PipelineError::invalid_config(
                "state_dict",
                extra,
                "unexpected tensor for this architecture",
            ));
        }
        Ok(())
    }

    pub fn parameter_count(&self) -> usize {
        self.encoder.parameter_count() + self.decoder.parameter_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::loss::l1_loss_with_gradients;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_batch(shape: (usize, usize, usize, usize, usize), seed: u64) -> Array5<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array5::from_shape_simple_fn(shape, || rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn test_latent_and_output_shapes() {
        let mut model = Autoencoder::new(1, 2, 42);
        assert_eq!(model.latent_shape((16, 8, 24)), (8, 2, 1, 3));

        let batch = random_batch((2, 1, 16, 8, 24), 1);
        let latent = model.encoder.forward_eval(&batch);
        assert_eq!(latent.dim(), (2, 8, 2, 1, 3));
        let output = model.forward_train(&batch).expect("valid shape");
        assert_eq!(output.dim(), batch.dim());
        assert!(output.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_rejects_indivisible_shape() {
        let model = Autoencoder::new(1, 2, 42);
        let err = model.reconstruct(&Volume::zeros((12, 8, 8))).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }

    #[test]
    fn test_reconstruct_has_no_side_effects() {
        let model = Autoencoder::new(1, 2, 7);
        let volume = Volume::from_array(random_batch((1, 1, 8, 8, 8), 3).index_axis_move(ndarray::Axis(0), 0))
            .expect("volume");
        let before = model.state_dict();
        let first = model.reconstruct(&volume).expect("reconstruct");
        let second = model.reconstruct(&volume).expect("reconstruct");
        assert_eq!(first, second);
        assert_eq!(before, model.state_dict());
    }

    #[test]
    fn test_state_dict_names_and_round_trip() {
        let source = Autoencoder::new(1, 2, 5);
        let dict = source.state_dict();
        assert!(dict.contains_key("enc.net.0.weight"));
        assert!(dict.contains_key("enc.net.1.running_var"));
        assert!(dict.contains_key("dec.net.6.bias"));
        assert_eq!(dict["enc.net.0.weight"].shape(), &[2, 1, 3, 3, 3]);
        assert_eq!(dict["dec.net.0.weight"].shape(), &[8, 4, 4, 4, 4]);

        let restored = Autoencoder::from_state_dict(1, 2, &dict).expect("load");
        assert_eq!(restored.state_dict(), dict);
    }

    #[test]
    fn test_load_rejects_wrong_width_and_extra_keys() {
        let dict = Autoencoder::new(1, 2, 5).state_dict();
        assert!(Autoencoder::from_state_dict(1, 4, &dict).is_err());

        let mut extra = dict.clone();
        extra.insert("head.weight".to_string(), ArrayD::zeros(ndarray::IxDyn(&[1])));
        assert!(Autoencoder::from_state_dict(1, 2, &extra).is_err());
    }

    #[test]
    fn test_training_steps_reduce_loss() {
        let mut model = Autoencoder::new(1, 2, 11);
        let mut optimizer = AdamW::new(1e-2, 0.0);
        let batch = random_batch((2, 1, 8, 8, 8), 4).mapv(|v| 0.5 * v);

        let mut losses = Vec::new();
        for _ in 0..15 {
            let output = model.forward_train(&batch).expect("shape");
            let (loss, grad) = l1_loss_with_gradients(&output, &batch);
            model.backward(&grad);
            model.apply_gradients(&mut optimizer);
            losses.push(loss);
        }
        assert!(losses.iter().all(|l| l.is_finite()));
        assert!(losses[losses.len() - 1] < losses[0]);
    }
}
