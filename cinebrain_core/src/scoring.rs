//! Anomaly scoring with a frozen autoencoder.
//!
//! A sample is rebuilt into a volume with the checkpoint's own
//! [`PreprocessConfig`], reconstructed, and scored as
//! `MSE(reconstruction, input) * 1000`. Scores strictly above the threshold
//! are anomalies.

use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{PipelineError, PipelineResult};
use crate::neural::mse;
use crate::preprocess::{PreprocessConfig, RawSample, VolumeBuilder};
use crate::weights::ModelWeights;

/// Multiplier applied to the reconstruction MSE.
pub const SCORE_SCALE: f64 = 1000.0;

/// Decimal places kept in reported scores.
pub const SCORE_DECIMALS: i32 = 4;

/// How a caller-supplied [`PreprocessConfig`] that disagrees with the
/// checkpoint is treated. Volumes are always built with the checkpoint's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigPolicy {
    /// Refuse to score
    #[default]
    Strict,
    /// Warn and use the checkpoint's config
    PreferCheckpoint,
}

impl FromStr for ConfigPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ConfigPolicy::Strict),
            "prefer_checkpoint" => Ok(ConfigPolicy::PreferCheckpoint),
            other => Err(PipelineError::invalid_config(
                "config_policy",
                other,
                "expected \"strict\" or \"prefer_checkpoint\"",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyLabel {
    Normal,
    Anomaly,
}

impl AnomalyLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyLabel::Normal => "Normal",
            AnomalyLabel::Anomaly => "Anomaly",
        }
    }
}

impl Display for AnomalyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Anomaly` iff `score > threshold`; equality is `Normal`.
///
/// # Examples
///
/// ```
/// use cinebrain_core::scoring::{classify, AnomalyLabel};
///
/// assert_eq!(classify(50.0, 50.0), AnomalyLabel::Normal);
/// assert_eq!(classify(50.0001, 50.0), AnomalyLabel::Anomaly);
/// ```
pub fn classify(score: f64, threshold: f64) -> AnomalyLabel {
    if score > threshold {
        AnomalyLabel::Anomaly
    } else {
        AnomalyLabel::Normal
    }
}

/// Scales a reconstruction MSE into an anomaly score.
pub fn anomaly_score(mse: f64) -> f64 {
    mse * SCORE_SCALE
}

fn round_score(score: f64) -> f64 {
    let factor = 10f64.powi(SCORE_DECIMALS);
    (score * factor).round() / factor
}

/// Outcome of scoring one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub label: AnomalyLabel,
    /// Rounded to [`SCORE_DECIMALS`] places; the label is decided before rounding
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    pub sample_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: AnomalyLabel,
    pub score: f64,
}

/// JSON prediction output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub dataset_id: String,
    pub model_id: String,
    pub result: PredictionResult,
    /// `0x`-prefixed BLAKE3 digest binding weights, input and result
    pub attestation_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Read-only inference over a trained [`ModelWeights`].
#[derive(Debug, Clone)]
pub struct Scorer {
    weights: ModelWeights,
    builder: VolumeBuilder,
    device: Device,
}

impl Scorer {
    pub fn new(weights: ModelWeights, device: Device) -> PipelineResult<Self> {
        let builder = VolumeBuilder::new(*weights.preprocess())?;
        weights
            .model()
            .check_spatial_shape(weights.preprocess().out_shape)?;
        Ok(Self {
            weights,
            builder,
            device,
        })
    }

    /// Loads a checkpoint; fails with [`PipelineError::CheckpointLoad`]
    /// before any volume is built.
    pub fn from_checkpoint<P: AsRef<Path>>(path: P, device: Device) -> PipelineResult<Self> {
        let path = path.as_ref();
        let weights = ModelWeights::load(path)?;
        tracing::info!(
            path = %path.display(),
            base_ch = weights.base_ch(),
            preprocess = %weights.preprocess(),
            "loaded checkpoint"
        );
        Self::new(weights, device)
    }

    /// Compares `supplied` with the checkpoint's config under `policy`.
    pub fn with_expected_config(
        self,
        supplied: PreprocessConfig,
        policy: ConfigPolicy,
    ) -> PipelineResult<Self> {
        let recorded = *self.config();
        if supplied == recorded {
            return Ok(self);
        }
        match policy {
            ConfigPolicy::Strict => Err(PipelineError::ConfigMismatch { recorded, supplied }),
            ConfigPolicy::PreferCheckpoint => {
                tracing::warn!(
                    %recorded,
                    %supplied,
                    "preprocess config differs from checkpoint; using checkpoint"
                );
                Ok(self)
            }
        }
    }

    pub fn weights(&self) -> &ModelWeights {
        &self.weights
    }

    /// The checkpoint's preprocessing, used for every volume.
    pub fn config(&self) -> &PreprocessConfig {
        self.builder.config()
    }

    /// Unrounded anomaly score of `sample`.
    pub fn reconstruction_score(&self, sample: &RawSample) -> PipelineResult<f64> {
        let volume = self.builder.build(sample)?;
        let reconstruction = self
            .device
            .install(|| self.weights.model().reconstruct(&volume))?;
        Ok(anomaly_score(mse(&reconstruction.data, &volume.data)))
    }

    pub fn score(&self, sample: &RawSample, threshold: f64) -> PipelineResult<AnomalyResult> {
        let raw = self.reconstruction_score(sample)?;
        let label = classify(raw, threshold);
        tracing::debug!(sample = sample.id(), score = raw, threshold, %label, "scored sample");
        Ok(AnomalyResult {
            label,
            score: round_score(raw),
            timestamp: Utc::now(),
            sample_id: sample.id().to_string(),
        })
    }

    /// Scores `sample` and wraps the result in an attested record.
    pub fn predict(
        &self,
        sample: &RawSample,
        threshold: f64,
        dataset_id: &str,
        model_id: &str,
    ) -> PipelineResult<PredictionRecord> {
        let result = self.score(sample, threshold)?;
        Ok(PredictionRecord {
            dataset_id: dataset_id.to_string(),
            model_id: model_id.to_string(),
            attestation_hash: self.attestation_hash(sample, &result),
            result: PredictionResult {
                label: result.label,
                score: result.score,
            },
            timestamp: result.timestamp,
        })
    }

    /// BLAKE3 over the state dict (names and little-endian values in key
    /// order), the input values, the label and the reported score.
    pub fn attestation_hash(&self, sample: &RawSample, result: &AnomalyResult) -> String {
        let mut hasher = blake3::Hasher::new();
        for (name, tensor) in self.weights.model().state_dict() {
            hasher.update(name.as_bytes());
            for value in tensor.iter() {
                hasher.update(&value.to_le_bytes());
            }
        }
        for value in sample.values() {
            hasher.update(&value.to_le_bytes());
        }
        hasher.update(result.label.as_str().as_bytes());
        hasher.update(&result.score.to_le_bytes());
        format!("0x{}", hasher.finalize().to_hex())
    }
}
