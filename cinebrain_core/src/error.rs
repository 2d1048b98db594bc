//! Error types for the volume pipeline
//!
//! Every failure the preprocessing, training and scoring stages can raise is a
//! variant of [`PipelineError`]. None of them is retried internally; callers
//! report them and stop.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::preprocess::PreprocessConfig;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error taxonomy shared by the builder, cache, trainer and scorer
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A raw sample with zero elements was handed to the volume builder
    #[error("Empty input: sample '{sample}' has no elements")]
    EmptyInput { sample: String },

    /// The volume cache received no sources to build from
    #[error("No data: {context}")]
    NoData { context: String },

    /// A checkpoint was missing, corrupt or incompatible
    #[error("Failed to load checkpoint '{path}': {source}")]
    CheckpointLoad {
        path: String,
        #[source]
        source: CheckpointError,
    },

    /// A trained model could not be persisted
    #[error("Failed to save checkpoint '{path}': {source}")]
    CheckpointSave {
        path: String,
        #[source]
        source: CheckpointError,
    },

    /// The caller's preprocessing parameters disagree with the checkpoint
    #[error("Preprocess config mismatch: checkpoint uses {recorded}, caller supplied {supplied}")]
    ConfigMismatch {
        recorded: PreprocessConfig,
        supplied: PreprocessConfig,
    },

    /// Invalid hyperparameter or configuration value
    #[error("Invalid configuration for '{parameter}' = '{value}': {reason}")]
    InvalidConfig {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Two tensors that must agree in shape did not
    #[error("Shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
        context: String,
    },

    /// Training produced a NaN or infinite loss
    #[error("Non-finite loss {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f32 },

    /// Failure while reading a sample or writing an artifact
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed array file
    #[error("Could not decode array file '{path}': {details}")]
    ArrayFormat { path: String, details: String },

    /// Configuration file could not be parsed
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Create an empty input error
    pub fn empty_input(sample: impl Into<String>) -> Self {
        PipelineError::EmptyInput {
            sample: sample.into(),
        }
    }

    /// Create a no data error
    pub fn no_data(context: impl Into<String>) -> Self {
        PipelineError::NoData {
            context: context.into(),
        }
    }

    /// Create a checkpoint load error
    pub fn checkpoint_load(path: impl Into<String>, source: CheckpointError) -> Self {
        PipelineError::CheckpointLoad {
            path: path.into(),
            source,
        }
    }

    /// Create a checkpoint save error
    pub fn checkpoint_save(path: impl Into<String>, source: CheckpointError) -> Self {
        PipelineError::CheckpointSave {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(
        parameter: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        PipelineError::InvalidConfig {
            parameter: parameter.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize], context: impl Into<String>) -> Self {
        PipelineError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
            context: context.into(),
        }
    }

    /// Create an I/O error tagged with the offending path
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an array decoding error
    pub fn array_format(path: impl Into<String>, details: impl Into<String>) -> Self {
        PipelineError::ArrayFormat {
            path: path.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_display() {
        let err = PipelineError::empty_input("sub-0002/run-01.npy");
        let msg = err.to_string();
        assert!(msg.contains("Empty input"));
        assert!(msg.contains("sub-0002/run-01.npy"));
    }

    #[test]
    fn test_config_mismatch_display() {
        let err = PipelineError::ConfigMismatch {
            recorded: PreprocessConfig::from_encoded("2,2,2", "16,16,16").expect("valid"),
            supplied: PreprocessConfig::from_encoded("1,1,1", "16,16,16").expect("valid"),
        };
        let msg = err.to_string();
        assert!(msg.contains("down=2,2,2"));
        assert!(msg.contains("down=1,1,1"));
    }

    #[test]
    fn test_non_finite_loss_display() {
        let err = PipelineError::NonFiniteLoss {
            epoch: 3,
            batch: 7,
            loss: f32::NAN,
        };
        let msg = err.to_string();
        assert!(msg.contains("epoch 3"));
        assert!(msg.contains("batch 7"));
    }

    #[test]
    fn test_checkpoint_load_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = PipelineError::checkpoint_load("model.bin", CheckpointError::Io(io));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("model.bin"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipelineError>();
    }
}
