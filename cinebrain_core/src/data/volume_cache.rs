use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::data::loader::load_raw_sample;
use crate::device::Device;
use crate::error::{PipelineError, PipelineResult};
use crate::preprocess::{build_volume, PreprocessConfig, RawSample};
use crate::tensor::Volume;

/// Volumes built once from a bounded list of sources and held in memory.
///
/// The autoencoder target is the input itself, so [`VolumeCache::pair`]
/// returns the same volume twice.
#[derive(Debug, Clone)]
pub struct VolumeCache {
    volumes: Vec<Volume>,
    sources: Vec<String>,
    config: PreprocessConfig,
}

impl VolumeCache {
    /// Loads and builds the first `max_files` of `paths`, in order.
    ///
    /// Files are read in parallel on `device`; the cache keeps source order.
    pub fn build<P>(
        paths: &[P],
        max_files: usize,
        config: &PreprocessConfig,
        device: &Device,
    ) -> PipelineResult<Self>
    where
        P: AsRef<Path> + Sync,
    {
        if paths.is_empty() || max_files == 0 {
            return Err(PipelineError::no_data("volume cache received no source files"));
        }
        let selected = &paths[..paths.len().min(max_files)];
        let samples: Vec<RawSample> = device.install(|| {
            selected
                .par_iter()
                .map(load_raw_sample)
                .collect::<PipelineResult<Vec<_>>>()
        })?;
        Self::from_samples(&samples, max_files, config, device)
    }

    /// Builds volumes for the first `max_files` in-memory samples.
    pub fn from_samples(
        samples: &[RawSample],
        max_files: usize,
        config: &PreprocessConfig,
        device: &Device,
    ) -> PipelineResult<Self> {
        if samples.is_empty() || max_files == 0 {
            return Err(PipelineError::no_data("volume cache received no samples"));
        }
        let selected = &samples[..samples.len().min(max_files)];
        let volumes = device.install(|| {
            selected
                .par_iter()
                .map(|sample| build_volume(sample, config))
                .collect::<PipelineResult<Vec<_>>>()
        })?;

        tracing::info!(
            volumes = volumes.len(),
            config = %config,
            "volume cache built"
        );
        Ok(Self {
            volumes,
            sources: selected.iter().map(|s| s.id().to_string()).collect(),
            config: *config,
        })
    }

    /// Number of distinct cached volumes.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn get(&self, index: usize) -> Option<&Volume> {
        self.volumes.get(index)
    }

    /// `(input, target)` for item `index`; the target is the input.
    pub fn pair(&self, index: usize) -> Option<(&Volume, &Volume)> {
        self.get(index).map(|volume| (volume, volume))
    }

    /// Item order for one epoch.
    ///
    /// Cycles through the cache until at least `min_epoch_len` draws (and at
    /// least one full pass) have been made, then optionally shuffles.
    pub fn epoch_indices(&self, min_epoch_len: usize, shuffle: bool, rng: &mut StdRng) -> Vec<usize> {
        let len = self.len();
        if len == 0 {
            return Vec::new();
        }
        let draws = min_epoch_len.max(len);
        let mut indices: Vec<usize> = (0..draws).map(|i| i % len).collect();
        if shuffle {
            indices.shuffle(rng);
        }
        indices
    }
}
