//! Autoencoder training loop.

use std::path::PathBuf;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointArgs;
use crate::data::VolumeCache;
use crate::device::Device;
use crate::error::{PipelineError, PipelineResult};
use crate::logging;
use crate::neural::{l1_loss_with_gradients, AdamW, Autoencoder};
use crate::tensor::{SliceComparison, Volume};
use crate::weights::ModelWeights;

/// Optimization hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of passes over the (cycled) cache
    pub epochs: usize,
    pub batch_size: usize,
    /// Fixed AdamW learning rate
    pub learning_rate: f32,
    /// Decoupled AdamW weight decay
    pub weight_decay: f32,
    /// Minimum draws per epoch; small caches are cycled to reach it
    pub min_epoch_len: usize,
    /// Shuffle the epoch order
    pub shuffle: bool,
    /// Seed for the epoch shuffle
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            batch_size: 8,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            min_epoch_len: 16,
            shuffle: true,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_config(
                "batch_size",
                self.batch_size,
                "must be >= 1",
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PipelineError::invalid_config(
                "learning_rate",
                self.learning_rate,
                "must be finite and positive",
            ));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(PipelineError::invalid_config(
                "weight_decay",
                self.weight_decay,
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Training metrics for a single epoch
#[derive(Debug, Clone, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean of the per-batch L1 losses
    pub mean_loss: f32,
    pub batches: usize,
    pub samples: usize,
    pub elapsed_ms: u128,
}

/// One cached volume and its reconstruction by the trained model.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionPair {
    pub input: Volume,
    pub reconstruction: Volume,
}

impl ReconstructionPair {
    pub fn comparison(&self) -> SliceComparison {
        SliceComparison::new(&self.input, &self.reconstruction)
    }
}

/// Result of [`Trainer::train`].
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub weights: ModelWeights,
    pub epoch_metrics: Vec<EpochMetrics>,
    /// First cached volume reconstructed in evaluation mode
    pub example: ReconstructionPair,
}

impl TrainingOutcome {
    pub fn final_loss(&self) -> Option<f32> {
        self.epoch_metrics.last().map(|m| m.mean_loss)
    }
}

/// Minimizes L1 reconstruction error of an [`Autoencoder`] over a
/// [`VolumeCache`].
///
/// Every epoch draws [`VolumeCache::epoch_indices`], splits them into
/// batches and runs forward, loss, backward and an AdamW step per batch. A
/// non-finite batch loss aborts training before the optimizer step.
///
/// # Examples
///
/// ```no_run
/// use cinebrain_core::{Autoencoder, Device, PreprocessConfig, RawSample, Trainer,
///     TrainingConfig, VolumeCache};
///
/// let device = Device::cpu(0)?;
/// let config = PreprocessConfig::new((1, 1, 1), (8, 8, 8))?;
/// let samples = vec![RawSample::new("a", vec![1.0; 600])];
/// let cache = VolumeCache::from_samples(&samples, 10, &config, &device)?;
/// let trainer = Trainer::new(Autoencoder::new(1, 4, 42), TrainingConfig::default(), device)?;
/// let outcome = trainer.train(&cache)?;
/// println!("final loss {:?}", outcome.final_loss());
/// # Ok::<(), cinebrain_core::PipelineError>(())
/// ```
pub struct Trainer {
    model: Autoencoder,
    optimizer: AdamW,
    config: TrainingConfig,
    device: Device,
    log_dir: Option<PathBuf>,
    max_files: Option<usize>,
    model_seed: u64,
}

impl Trainer {
    pub fn new(model: Autoencoder, config: TrainingConfig, device: Device) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            optimizer: AdamW::new(config.learning_rate, config.weight_decay),
            model,
            config,
            device,
            log_dir: None,
            max_files: None,
            model_seed: 0,
        })
    }

    /// Appends per-batch and per-epoch JSON lines under `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Source limit and initialization seed recorded in the checkpoint args.
    pub fn with_provenance(mut self, max_files: usize, model_seed: u64) -> Self {
        self.max_files = Some(max_files);
        self.model_seed = model_seed;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn train(mut self, cache: &VolumeCache) -> PipelineResult<TrainingOutcome> {
        if cache.is_empty() {
            return Err(PipelineError::no_data("training cache is empty"));
        }
        let preprocess = *cache.config();
        self.model.check_spatial_shape(preprocess.out_shape)?;

        tracing::info!(
            volumes = cache.len(),
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            parameters = self.model.parameter_count(),
            device = ?self.device,
            "starting training"
        );

        let device = self.device.clone();
        let epoch_metrics = device.install(|| self.run_epochs(cache))?;

        let first = cache
            .get(0)
            .ok_or_else(|| PipelineError::no_data("training cache is empty"))?;
        let reconstruction = device.install(|| self.model.reconstruct(first))?;
        let example = ReconstructionPair {
            input: first.clone(),
            reconstruction,
        };

        let args = CheckpointArgs {
            base_ch: self.model.base_channels(),
            in_ch: self.model.in_channels(),
            down: preprocess.down_string(),
            shape: preprocess.shape_string(),
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            max_files: self.max_files.unwrap_or(cache.len()),
            min_epoch_len: self.config.min_epoch_len,
            model_seed: self.model_seed,
            train_seed: self.config.seed,
        };

        Ok(TrainingOutcome {
            weights: ModelWeights::new(self.model, preprocess, args),
            epoch_metrics,
            example,
        })
    }

    fn run_epochs(&mut self, cache: &VolumeCache) -> PipelineResult<Vec<EpochMetrics>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut metrics = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            let epoch_start = Instant::now();
            let indices =
                cache.epoch_indices(self.config.min_epoch_len, self.config.shuffle, &mut rng);
            let mut loss_sum = 0.0f64;
            let mut batches = 0;

            for (batch_idx, chunk) in indices.chunks(self.config.batch_size).enumerate() {
                let volumes: Vec<&Volume> = chunk.iter().filter_map(|&i| cache.get(i)).collect();
                let loss = self.step(&volumes, epoch, batch_idx)?;
                loss_sum += loss as f64;
                batches += 1;

                tracing::debug!(epoch, batch = batch_idx, loss, "batch complete");
                if let Some(dir) = &self.log_dir {
                    logging::best_effort(
                        "training",
                        logging::log_training_step(dir, epoch, batch_idx, chunk.len(), loss),
                    );
                }
            }

            let epoch_metrics = EpochMetrics {
                epoch,
                mean_loss: (loss_sum / batches.max(1) as f64) as f32,
                batches,
                samples: indices.len(),
                elapsed_ms: epoch_start.elapsed().as_millis(),
            };
            tracing::info!(
                epoch = epoch + 1,
                of = self.config.epochs,
                loss = epoch_metrics.mean_loss,
                elapsed_ms = epoch_metrics.elapsed_ms as u64,
                "epoch complete"
            );
            if let Some(dir) = &self.log_dir {
                logging::best_effort("epoch", logging::log_epoch(dir, &epoch_metrics));
            }
            metrics.push(epoch_metrics);
        }
        Ok(metrics)
    }

    fn step(&mut self, volumes: &[&Volume], epoch: usize, batch: usize) -> PipelineResult<f32> {
        let inputs = Volume::stack(volumes)?;
        let outputs = self.model.forward_train(&inputs)?;
        let (loss, grad) = l1_loss_with_gradients(&outputs, &inputs);
        if !loss.is_finite() {
            return Err(PipelineError::NonFiniteLoss { epoch, batch, loss });
        }
        self.model.backward(&grad);
        self.model.apply_gradients(&mut self.optimizer);
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{PreprocessConfig, RawSample};

    fn cache(count: usize) -> VolumeCache {
        let config = PreprocessConfig::new((1, 1, 1), (8, 8, 8)).unwrap();
        let samples: Vec<RawSample> = (0..count)
            .map(|i| {
                RawSample::new(
                    format!("s{i}"),
                    (0..512).map(|v| ((v * (i + 3)) % 17) as f32).collect(),
                )
            })
            .collect();
        VolumeCache::from_samples(&samples, count, &config, &Device::cpu(1).unwrap()).unwrap()
    }

    fn small_config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            batch_size: 2,
            learning_rate: 5e-3,
            weight_decay: 1e-4,
            min_epoch_len: 4,
            shuffle: true,
            seed: 9,
        }
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        let result = Trainer::new(Autoencoder::new(1, 2, 1), config, Device::cpu(1).unwrap());
        assert!(matches!(result, Err(PipelineError::InvalidConfig { .. })));
    }

    #[test]
    fn trains_and_records_args() {
        let cache = cache(3);
        let trainer = Trainer::new(Autoencoder::new(1, 2, 1), small_config(3), Device::cpu(2).unwrap())
            .unwrap()
            .with_provenance(10, 1);
        let outcome = trainer.train(&cache).unwrap();

        assert_eq!(outcome.epoch_metrics.len(), 3);
        // 3 volumes cycled to min_epoch_len 4, batches of 2
        assert!(outcome.epoch_metrics.iter().all(|m| m.samples == 4 && m.batches == 2));
        assert!(outcome.epoch_metrics.iter().all(|m| m.mean_loss.is_finite()));

        let args = outcome.weights.args();
        assert_eq!(args.down, "1,1,1");
        assert_eq!(args.shape, "8,8,8");
        assert_eq!(args.base_ch, 2);
        assert_eq!(args.max_files, 10);
        assert_eq!(outcome.example.input.shape(), (1, 8, 8, 8));
        assert_eq!(outcome.example.reconstruction.shape(), outcome.example.input.shape());
    }

    #[test]
    fn training_is_deterministic_across_thread_counts() {
        let cache = cache(2);
        let run = |threads| {
            Trainer::new(Autoencoder::new(1, 2, 5), small_config(2), Device::cpu(threads).unwrap())
                .unwrap()
                .train(&cache)
                .unwrap()
        };
        let a = run(1);
        let b = run(3);
        assert_eq!(a.weights.model().state_dict(), b.weights.model().state_dict());
        assert_eq!(a.example, b.example);
    }

    #[test]
    fn rejects_shape_not_divisible_by_eight() {
        let config = PreprocessConfig::new((1, 1, 1), (6, 8, 8)).unwrap();
        let samples = vec![RawSample::new("a", vec![1.0; 64])];
        let device = Device::cpu(1).unwrap();
        let cache = VolumeCache::from_samples(&samples, 1, &config, &device).unwrap();
        let trainer = Trainer::new(Autoencoder::new(1, 2, 1), small_config(1), device).unwrap();
        assert!(matches!(
            trainer.train(&cache).unwrap_err(),
            PipelineError::InvalidConfig { .. }
        ));
    }

    #[test]
    fn non_finite_input_fails_fast() {
        let config = PreprocessConfig::new((1, 1, 1), (8, 8, 8)).unwrap();
        let mut values = vec![1.0f32; 512];
        values[3] = f32::INFINITY;
        let samples = vec![RawSample::new("inf", values)];
        let device = Device::cpu(1).unwrap();
        let cache = VolumeCache::from_samples(&samples, 1, &config, &device).unwrap();
        let trainer = Trainer::new(Autoencoder::new(1, 2, 1), small_config(1), device).unwrap();
        let err = trainer.train(&cache).unwrap_err();
        assert!(matches!(err, PipelineError::NonFiniteLoss { epoch: 0, batch: 0, .. }));
    }
}
