//! End-to-end training and prediction runs driven by a [`PipelineConfig`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::data::{find_default_sample, list_data_files, load_raw_sample, save_slices, VolumeCache};
use crate::error::{PipelineError, PipelineResult};
use crate::logging;
use crate::neural::Autoencoder;
use crate::scoring::{PredictionRecord, Scorer};
use crate::training::{Trainer, TrainingOutcome};

/// Grid image of the example input/reconstruction slices.
pub const COMPARISON_IMAGE: &str = "results_comparison.png";

/// Pixel scale applied to each slice in [`COMPARISON_IMAGE`].
const IMAGE_SCALE: u32 = 8;

/// Lists samples, builds the cache, trains, then writes the checkpoint, the
/// six example slices and the comparison image into `data.out_dir`.
pub fn run_training(config: &PipelineConfig) -> PipelineResult<TrainingOutcome> {
    let device = config.device()?;
    let files = list_data_files(&config.data.data_dir)?;
    if files.is_empty() {
        return Err(PipelineError::no_data(format!(
            "no .npy files under '{}'",
            config.data.data_dir.display()
        )));
    }
    tracing::info!(
        files = files.len(),
        max_files = config.data.max_files,
        data_dir = %config.data.data_dir.display(),
        "found training samples"
    );

    let preprocess = config.preprocess_or_default();
    let cache = VolumeCache::build(&files, config.data.max_files, &preprocess, &device)?;
    let model = Autoencoder::new(config.model.in_ch, config.model.base_ch, config.model.seed);
    let outcome = Trainer::new(model, config.training.clone(), device)?
        .with_log_dir(&config.engine.log_dir)
        .with_provenance(config.data.max_files, config.model.seed)
        .train(&cache)?;

    let out_dir = &config.data.out_dir;
    fs::create_dir_all(out_dir).map_err(|err| PipelineError::io(out_dir.display().to_string(), err))?;

    let checkpoint = config.data.checkpoint_path();
    outcome.weights.save(&checkpoint)?;
    tracing::info!(path = %checkpoint.display(), "saved checkpoint");

    let comparison = outcome.example.comparison();
    let slices = save_slices(out_dir, &comparison)?;
    tracing::info!(count = slices.len(), dir = %out_dir.display(), "saved example slices");

    let image = out_dir.join(COMPARISON_IMAGE);
    comparison
        .to_png(&image, IMAGE_SCALE)
        .map_err(|err| PipelineError::io(image.display().to_string(), err))?;
    tracing::info!(path = %image.display(), "saved comparison image");

    Ok(outcome)
}

/// Scores `input`, or the first sample under `data.data_dir` when `None`,
/// with the checkpoint at `scoring.model_path`; the record is appended to
/// the prediction log.
///
/// Volumes are built with the checkpoint's preprocessing. An explicit
/// `[preprocess]` section is only compared against it under
/// `scoring.config_policy`.
pub fn run_prediction(
    config: &PipelineConfig,
    input: Option<&Path>,
) -> PipelineResult<PredictionRecord> {
    let device = config.device()?;
    let mut scorer = Scorer::from_checkpoint(&config.scoring.model_path, device)?;
    if let Some(expected) = config.preprocess {
        scorer = scorer.with_expected_config(expected, config.scoring.config_policy)?;
    }

    let path: PathBuf = match input {
        Some(path) => path.to_path_buf(),
        None => {
            let found = find_default_sample(&config.data.data_dir)?;
            tracing::info!(path = %found.display(), "no input given; using first sample");
            found
        }
    };

    let sample = load_raw_sample(&path)?;
    let record = scorer.predict(
        &sample,
        config.scoring.threshold,
        &config.scoring.dataset_id,
        &config.scoring.model_id,
    )?;
    tracing::info!(
        sample = sample.id(),
        label = %record.result.label,
        score = record.result.score,
        "prediction complete"
    );
    logging::best_effort(
        "prediction",
        logging::log_prediction(&config.engine.log_dir, &record),
    );
    Ok(record)
}
