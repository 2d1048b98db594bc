//! # CineBrain Core
//!
//! A deterministic Rust engine that turns flat brain-signal recordings into
//! fixed-shape normalized 3D volumes, trains a 3D convolutional autoencoder
//! to reconstruct them, and scores new recordings by reconstruction error.
//!
//! ## Quick Start
//!
//! ```rust
//! use cinebrain_core::{build_volume, PreprocessConfig, RawSample};
//!
//! // 27 values fold into a 3x3x3 cube
//! let sample = RawSample::new("run-01", (0..27).map(|v| v as f32).collect());
//! let config = PreprocessConfig::new((1, 1, 1), (8, 8, 8)).unwrap();
//!
//! let volume = build_volume(&sample, &config).unwrap();
//! assert_eq!(volume.shape(), (1, 8, 8, 8));
//!
//! let stats = volume.statistics();
//! assert!(stats.min >= -1.0 && stats.max <= 1.0);
//! ```
//!
//! ## Core Modules
//!
//! - [`preprocess`] - Raw sample to volume conversion
//! - [`tensor`] - Volume type and the primitive volume operations
//! - [`data`] - `.npy` discovery and I/O, in-memory volume cache
//! - [`neural`] - 3D convolution layers, autoencoder, AdamW
//! - [`training`] - Training loop and metrics
//! - [`scoring`] - Anomaly scoring and prediction records
//! - [`checkpoint`] - Binary checkpoint persistence
//! - [`config`] - Pipeline configuration via TOML
//! - [`logging`] - Tracing setup and JSON line-delimited run logs
//! - [`pipeline`] - End-to-end training and prediction runs

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod logging;
pub mod neural;
pub mod pipeline;
pub mod preprocess;
pub mod scoring;
pub mod tensor;
pub mod training;
pub mod weights;

pub use checkpoint::{CheckpointArgs, CheckpointError, Checkpointable, ModelCheckpoint};
pub use config::{
    ConfigError, DataConfig, EngineConfig, ModelConfig, PipelineConfig, ScoringConfig,
};
pub use data::{find_default_sample, list_data_files, load_raw_sample, save_slice, VolumeCache};
pub use device::Device;
pub use error::{PipelineError, PipelineResult};
pub use neural::{Autoencoder, StateDict};
pub use pipeline::{run_prediction, run_training};
pub use preprocess::{build_volume, PreprocessConfig, RawSample, VolumeBuilder};
pub use scoring::{
    classify, AnomalyLabel, AnomalyResult, ConfigPolicy, PredictionRecord, Scorer,
};
pub use tensor::{SliceComparison, Volume};
pub use training::{EpochMetrics, ReconstructionPair, Trainer, TrainingConfig, TrainingOutcome};
pub use weights::ModelWeights;
