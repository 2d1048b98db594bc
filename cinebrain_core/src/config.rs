//! Pipeline configuration via TOML files.
//!
//! Every section is optional; missing keys fall back to the defaults of the
//! reference training run (`down = "1,1,1"`, `shape = "32,32,32"`,
//! `base_ch = 32`, 30 epochs of batch 8 at `lr = 1e-3`).
//!
//! `[preprocess]` is the one section whose absence is remembered: training
//! falls back to the defaults, while prediction simply uses whatever the
//! checkpoint recorded and skips the consistency check.
//!
//! ```toml
//! [engine]
//! device = "cpu"
//! threads = 0
//! log_dir = "logs"
//!
//! [preprocess]
//! down = "1,1,1"
//! shape = "32,32,32"
//!
//! [model]
//! base_ch = 32
//!
//! [training]
//! data_dir = "cinebrain_data"
//! epochs = 30
//!
//! [scoring]
//! threshold = 50.0
//! config_policy = "strict"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::Device;
use crate::error::PipelineResult;
use crate::preprocess::PreprocessConfig;
use crate::scoring::ConfigPolicy;
use crate::training::TrainingConfig;

/// Spatial axes fed to the autoencoder must be divisible by this.
pub const MODEL_SHAPE_MULTIPLE: usize = 8;

/// Volumes are single-channel.
pub const MODEL_IN_CHANNELS: usize = 1;

/// Complete configuration of a training or prediction run.
///
/// # Examples
///
/// ```
/// use cinebrain_core::PipelineConfig;
///
/// let config = PipelineConfig::from_str("[model]\nbase_ch = 8").unwrap();
/// assert_eq!(config.model.base_ch, 8);
/// assert!(config.preprocess.is_none());
/// assert_eq!(config.preprocess_or_default().shape_string(), "32,32,32");
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    /// `None` when the file has no `[preprocess]` section
    pub preprocess: Option<PreprocessConfig>,
    pub model: ModelConfig,
    pub data: DataConfig,
    pub training: TrainingConfig,
    pub scoring: ScoringConfig,
}

impl PipelineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawPipelineConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let engine = EngineConfig::try_from(&raw.engine)?;
        let preprocess = raw.preprocess.as_ref().map(preprocess_try_from).transpose()?;
        let model = ModelConfig::try_from(&raw.model)?;
        let (data, training) = split_training(&raw.training)?;
        let scoring = ScoringConfig::try_from(&raw.scoring)?;

        Ok(Self {
            engine,
            preprocess,
            model,
            data,
            training,
            scoring,
        })
    }

    /// Preprocessing used to build training volumes.
    pub fn preprocess_or_default(&self) -> PreprocessConfig {
        self.preprocess.unwrap_or_default()
    }

    /// Builds the compute device named in `[engine]`.
    pub fn device(&self) -> PipelineResult<Device> {
        Device::from_name(&self.engine.device, self.engine.threads)
    }
}

/// `[engine]`: compute device and run-log location.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    /// Target device; only `"cpu"` is available
    pub device: String,
    /// Worker threads for the compute pool, 0 for one per core
    pub threads: usize,
    /// Directory for `train.jsonl` and `predictions.jsonl`
    pub log_dir: PathBuf,
}

impl EngineConfig {
    fn try_from(raw: &RawEngine) -> Result<Self, ConfigError> {
        if !raw.device.eq_ignore_ascii_case("cpu") {
            return Err(ConfigError::Parse(format!(
                "engine.device '{}' is not supported (expected \"cpu\")",
                raw.device
            )));
        }
        Ok(Self {
            device: raw.device.to_ascii_lowercase(),
            threads: raw.threads,
            log_dir: raw.log_dir.clone(),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            threads: 0,
            log_dir: default_log_dir(),
        }
    }
}

/// `[model]`: autoencoder width and initialization seed.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelConfig {
    pub base_ch: usize,
    pub in_ch: usize,
    pub seed: u64,
}

impl ModelConfig {
    fn try_from(raw: &RawModel) -> Result<Self, ConfigError> {
        if raw.base_ch == 0 {
            return Err(ConfigError::Parse("model.base_ch must be >= 1".into()));
        }
        if raw.in_ch != MODEL_IN_CHANNELS {
            return Err(ConfigError::Parse(format!(
                "model.in_ch must be {MODEL_IN_CHANNELS} (volumes are single-channel)"
            )));
        }
        Ok(Self {
            base_ch: raw.base_ch,
            in_ch: raw.in_ch,
            seed: raw.seed,
        })
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_ch: default_base_ch(),
            in_ch: default_in_ch(),
            seed: default_seed(),
        }
    }
}

/// Source and artifact locations, read from `[training]`.
#[derive(Debug, Clone, Serialize)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Only the first `max_files` sorted sources are cached
    pub max_files: usize,
}

impl DataConfig {
    /// Where the trained checkpoint is written.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.out_dir.join(CHECKPOINT_FILE_NAME)
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            out_dir: default_out_dir(),
            max_files: default_max_files(),
        }
    }
}

/// File name of the checkpoint inside the output directory.
pub const CHECKPOINT_FILE_NAME: &str = "cinebrain_ae.bin";

/// `[scoring]`: checkpoint to load and how to classify.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringConfig {
    pub model_path: PathBuf,
    /// Scores strictly above this are anomalies
    pub threshold: f64,
    pub dataset_id: String,
    pub model_id: String,
    pub config_policy: ConfigPolicy,
}

impl ScoringConfig {
    fn try_from(raw: &RawScoring) -> Result<Self, ConfigError> {
        if !raw.threshold.is_finite() {
            return Err(ConfigError::Parse("scoring.threshold must be finite".into()));
        }
        Ok(Self {
            model_path: raw.model_path.clone(),
            threshold: raw.threshold,
            dataset_id: raw.dataset_id.clone(),
            model_id: raw.model_id.clone(),
            config_policy: raw.config_policy,
        })
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            threshold: default_threshold(),
            dataset_id: default_dataset_id(),
            model_id: default_model_id(),
            config_policy: ConfigPolicy::default(),
        }
    }
}

fn preprocess_try_from(raw: &RawPreprocess) -> Result<PreprocessConfig, ConfigError> {
    let config = PreprocessConfig::from_encoded(&raw.down, &raw.shape)
        .map_err(|err| ConfigError::Parse(format!("preprocess: {err}")))?;
    let (z, y, x) = config.out_shape;
    if [z, y, x].iter().any(|axis| axis % MODEL_SHAPE_MULTIPLE != 0) {
        return Err(ConfigError::Parse(format!(
            "preprocess.shape '{}' must be divisible by {MODEL_SHAPE_MULTIPLE} on every axis",
            raw.shape
        )));
    }
    Ok(config)
}

fn split_training(raw: &RawTraining) -> Result<(DataConfig, TrainingConfig), ConfigError> {
    if raw.max_files == 0 {
        return Err(ConfigError::Parse("training.max_files must be >= 1".into()));
    }
    if raw.batch_size == 0 {
        return Err(ConfigError::Parse("training.batch_size must be >= 1".into()));
    }
    if !raw.lr.is_finite() || raw.lr <= 0.0 {
        return Err(ConfigError::Parse("training.lr must be positive".into()));
    }
    if !raw.weight_decay.is_finite() || raw.weight_decay < 0.0 {
        return Err(ConfigError::Parse(
            "training.weight_decay must be >= 0".into(),
        ));
    }

    let data = DataConfig {
        data_dir: raw.data_dir.clone(),
        out_dir: raw.out_dir.clone(),
        max_files: raw.max_files,
    };
    let training = TrainingConfig {
        epochs: raw.epochs,
        batch_size: raw.batch_size,
        learning_rate: raw.lr,
        weight_decay: raw.weight_decay,
        min_epoch_len: raw.min_epoch_len,
        shuffle: raw.shuffle,
        seed: raw.seed,
    };
    Ok((data, training))
}

#[derive(Debug, Default, Deserialize)]
struct RawPipelineConfig {
    #[serde(default)]
    engine: RawEngine,
    #[serde(default)]
    preprocess: Option<RawPreprocess>,
    #[serde(default)]
    model: RawModel,
    #[serde(default)]
    training: RawTraining,
    #[serde(default)]
    scoring: RawScoring,
}

#[derive(Debug, Deserialize)]
struct RawEngine {
    #[serde(default = "default_device")]
    device: String,
    #[serde(default)]
    threads: usize,
    #[serde(default = "default_log_dir")]
    log_dir: PathBuf,
}

impl Default for RawEngine {
    fn default() -> Self {
        Self {
            device: default_device(),
            threads: 0,
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPreprocess {
    #[serde(default = "default_down")]
    down: String,
    #[serde(default = "default_shape")]
    shape: String,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    #[serde(default = "default_base_ch")]
    base_ch: usize,
    #[serde(default = "default_in_ch")]
    in_ch: usize,
    #[serde(default = "default_seed")]
    seed: u64,
}

impl Default for RawModel {
    fn default() -> Self {
        Self {
            base_ch: default_base_ch(),
            in_ch: default_in_ch(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTraining {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default = "default_out_dir")]
    out_dir: PathBuf,
    #[serde(default = "default_max_files")]
    max_files: usize,
    #[serde(default = "default_epochs")]
    epochs: usize,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default = "default_lr")]
    lr: f32,
    #[serde(default = "default_weight_decay")]
    weight_decay: f32,
    #[serde(default = "default_min_epoch_len")]
    min_epoch_len: usize,
    #[serde(default = "default_shuffle")]
    shuffle: bool,
    #[serde(default = "default_seed")]
    seed: u64,
}

impl Default for RawTraining {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            out_dir: default_out_dir(),
            max_files: default_max_files(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            lr: default_lr(),
            weight_decay: default_weight_decay(),
            min_epoch_len: default_min_epoch_len(),
            shuffle: default_shuffle(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawScoring {
    #[serde(default = "default_model_path")]
    model_path: PathBuf,
    #[serde(default = "default_threshold")]
    threshold: f64,
    #[serde(default = "default_dataset_id")]
    dataset_id: String,
    #[serde(default = "default_model_id")]
    model_id: String,
    #[serde(default)]
    config_policy: ConfigPolicy,
}

impl Default for RawScoring {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            threshold: default_threshold(),
            dataset_id: default_dataset_id(),
            model_id: default_model_id(),
            config_policy: ConfigPolicy::default(),
        }
    }
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_down() -> String {
    "1,1,1".to_string()
}

fn default_shape() -> String {
    "32,32,32".to_string()
}

fn default_base_ch() -> usize {
    32
}

fn default_in_ch() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("cinebrain_data")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_max_files() -> usize {
    1000
}

fn default_epochs() -> usize {
    30
}

fn default_batch_size() -> usize {
    8
}

fn default_lr() -> f32 {
    1e-3
}

fn default_weight_decay() -> f32 {
    1e-4
}

fn default_min_epoch_len() -> usize {
    16
}

fn default_shuffle() -> bool {
    true
}

fn default_model_path() -> PathBuf {
    default_out_dir().join(CHECKPOINT_FILE_NAME)
}

fn default_threshold() -> f64 {
    50.0
}

fn default_dataset_id() -> String {
    "CineBrain-sub-0002".to_string()
}

fn default_model_id() -> String {
    "anomaly-v2-npy".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let config = PipelineConfig::from_str("").unwrap();
        assert_eq!(config.preprocess, None);
        assert_eq!(config.preprocess_or_default(), PreprocessConfig::default());
        assert_eq!(config.model.base_ch, 32);
        assert_eq!(config.data.max_files, 1000);
        assert_eq!(config.training.epochs, 30);
        assert_eq!(config.training.batch_size, 8);
        assert!((config.training.learning_rate - 1e-3).abs() < f32::EPSILON);
        assert_eq!(config.scoring.threshold, 50.0);
        assert_eq!(config.scoring.config_policy, ConfigPolicy::Strict);
        assert_eq!(config.scoring.dataset_id, "CineBrain-sub-0002");
    }

    #[test]
    fn parses_custom_values() {
        let toml = "[engine]\nthreads = 2\nlog_dir = \"run_logs\"\n\
                    [preprocess]\ndown = \"2,2,2\"\nshape = \"16,16,16\"\n\
                    [model]\nbase_ch = 4\n\
                    [training]\nepochs = 3\nbatch_size = 2\nlr = 0.01\nshuffle = false\n\
                    [scoring]\nthreshold = 12.5\nconfig_policy = \"prefer_checkpoint\"";
        let config = PipelineConfig::from_str(toml).unwrap();
        assert_eq!(config.engine.threads, 2);
        assert_eq!(config.engine.log_dir, PathBuf::from("run_logs"));
        let preprocess = config.preprocess.expect("section present");
        assert_eq!(preprocess.downsample_factors, (2, 2, 2));
        assert_eq!(preprocess.out_shape, (16, 16, 16));
        assert_eq!(config.model.base_ch, 4);
        assert_eq!(config.training.epochs, 3);
        assert!(!config.training.shuffle);
        assert_eq!(config.scoring.threshold, 12.5);
        assert_eq!(config.scoring.config_policy, ConfigPolicy::PreferCheckpoint);
    }

    #[test]
    fn rejects_shape_not_divisible_by_eight() {
        let err = PipelineConfig::from_str("[preprocess]\nshape = \"12,16,16\"").unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn rejects_zero_downsample_factor() {
        assert!(PipelineConfig::from_str("[preprocess]\ndown = \"1,0,1\"").is_err());
    }

    #[test]
    fn rejects_unknown_device() {
        let err = PipelineConfig::from_str("[engine]\ndevice = \"cuda\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_bad_hyperparameters() {
        assert!(PipelineConfig::from_str("[training]\nbatch_size = 0").is_err());
        assert!(PipelineConfig::from_str("[training]\nlr = -1.0").is_err());
        assert!(PipelineConfig::from_str("[model]\nbase_ch = 0").is_err());
    }

    #[test]
    fn rejects_multi_channel_model() {
        let err = PipelineConfig::from_str("[model]\nin_ch = 2").unwrap_err();
        assert!(err.to_string().contains("in_ch"));
        assert!(PipelineConfig::from_str("[model]\nin_ch = 1").is_ok());
    }

    #[test]
    fn partial_preprocess_section_counts_as_explicit() {
        let config = PipelineConfig::from_str("[preprocess]\nshape = \"16,16,16\"").unwrap();
        let preprocess = config.preprocess.expect("section present");
        assert_eq!(preprocess.downsample_factors, (1, 1, 1));
        assert_eq!(preprocess.out_shape, (16, 16, 16));
    }

    #[test]
    fn checkpoint_path_lives_in_out_dir() {
        let config = PipelineConfig::from_str("[training]\nout_dir = \"runs/a\"").unwrap();
        assert_eq!(
            config.data.checkpoint_path(),
            PathBuf::from("runs/a").join(CHECKPOINT_FILE_NAME)
        );
    }
}
