//! Self-describing trained model: parameters plus the preprocessing that
//! produced its training volumes.

use std::path::Path;

use crate::checkpoint::{CheckpointArgs, CheckpointError, Checkpointable, ModelCheckpoint};
use crate::config::MODEL_IN_CHANNELS;
use crate::error::{PipelineError, PipelineResult};
use crate::neural::Autoencoder;
use crate::preprocess::PreprocessConfig;

/// A trained [`Autoencoder`] bound to its [`PreprocessConfig`].
///
/// Created once by [`crate::Trainer`] and consumed read-only by
/// [`crate::Scorer`].
#[derive(Debug, Clone)]
pub struct ModelWeights {
    model: Autoencoder,
    preprocess: PreprocessConfig,
    args: CheckpointArgs,
}

impl ModelWeights {
    /// Binds `model` to `preprocess`; `args.down`/`args.shape` are rewritten
    /// from `preprocess` so the two can never disagree.
    pub fn new(model: Autoencoder, preprocess: PreprocessConfig, mut args: CheckpointArgs) -> Self {
        args.base_ch = model.base_channels();
        args.in_ch = model.in_channels();
        args.down = preprocess.down_string();
        args.shape = preprocess.shape_string();
        Self {
            model,
            preprocess,
            args,
        }
    }

    pub fn model(&self) -> &Autoencoder {
        &self.model
    }

    pub fn preprocess(&self) -> &PreprocessConfig {
        &self.preprocess
    }

    pub fn args(&self) -> &CheckpointArgs {
        &self.args
    }

    pub fn base_ch(&self) -> usize {
        self.model.base_channels()
    }

    pub fn to_checkpoint(&self) -> ModelCheckpoint {
        ModelCheckpoint::new(self.model.state_dict(), self.args.clone())
    }

    /// Rebuilds the model and preprocessing config from a checkpoint record.
    ///
    /// Records that could never score a [`crate::Volume`] (multi-channel
    /// input, or a shape the autoencoder cannot halve three times) are
    /// rejected here, before any sample is touched.
    pub fn from_checkpoint(checkpoint: ModelCheckpoint) -> Result<Self, CheckpointError> {
        let args = checkpoint.args;
        if args.in_ch != MODEL_IN_CHANNELS {
            return Err(CheckpointError::InvalidFormat(format!(
                "in_ch {} is not supported (volumes have {MODEL_IN_CHANNELS} channel)",
                args.in_ch
            )));
        }
        let preprocess = PreprocessConfig::from_encoded(&args.down, &args.shape)
            .map_err(|err| CheckpointError::InvalidFormat(err.to_string()))?;
        let model = Autoencoder::from_state_dict(args.in_ch, args.base_ch, &checkpoint.state_dict)
            .map_err(|err| CheckpointError::InvalidFormat(err.to_string()))?;
        model
            .check_spatial_shape(preprocess.out_shape)
            .map_err(|err| CheckpointError::InvalidFormat(err.to_string()))?;
        Ok(Self {
            model,
            preprocess,
            args,
        })
    }

    /// [`Checkpointable::load_checkpoint`] with failures reported as
    /// [`PipelineError::CheckpointLoad`].
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        Self::load_checkpoint(path)
            .map_err(|err| PipelineError::checkpoint_load(path.display().to_string(), err))
    }

    /// [`Checkpointable::save_checkpoint`] with failures reported as
    /// [`PipelineError::CheckpointSave`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PipelineResult<()> {
        let path = path.as_ref();
        self.save_checkpoint(path)
            .map_err(|err| PipelineError::checkpoint_save(path.display().to_string(), err))
    }
}

impl Checkpointable for ModelWeights {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        self.to_checkpoint().save_checkpoint(path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        Self::from_checkpoint(ModelCheckpoint::load_checkpoint(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Volume;

    fn args() -> CheckpointArgs {
        CheckpointArgs {
            base_ch: 0,
            in_ch: 0,
            down: String::new(),
            shape: String::new(),
            epochs: 1,
            batch_size: 1,
            lr: 1e-3,
            weight_decay: 1e-4,
            max_files: 1,
            min_epoch_len: 1,
            model_seed: 3,
            train_seed: 4,
        }
    }

    #[test]
    fn new_records_preprocess_and_widths() {
        let preprocess = PreprocessConfig::from_encoded("2,2,2", "16,16,16").unwrap();
        let weights = ModelWeights::new(Autoencoder::new(1, 2, 3), preprocess, args());
        assert_eq!(weights.args().down, "2,2,2");
        assert_eq!(weights.args().shape, "16,16,16");
        assert_eq!(weights.args().base_ch, 2);
        assert_eq!(weights.args().in_ch, 1);
    }

    #[test]
    fn save_load_preserves_model_and_config() {
        let preprocess = PreprocessConfig::from_encoded("1,2,1", "8,8,16").unwrap();
        let weights = ModelWeights::new(Autoencoder::new(1, 2, 9), preprocess, args());
        let path = std::env::temp_dir().join(format!("cinebrain_weights_{}.bin", uuid::Uuid::new_v4()));
        weights.save(&path).unwrap();
        let loaded = ModelWeights::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.preprocess(), &preprocess);
        assert_eq!(loaded.base_ch(), 2);
        assert_eq!(loaded.model().state_dict(), weights.model().state_dict());
        let volume = Volume::zeros((8, 8, 16));
        assert_eq!(
            loaded.model().reconstruct(&volume).unwrap(),
            weights.model().reconstruct(&volume).unwrap()
        );
    }

    fn saved_record(tag: &str, checkpoint: ModelCheckpoint) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("cinebrain_{tag}_{}.bin", uuid::Uuid::new_v4()));
        checkpoint.save_checkpoint(&path).unwrap();
        path
    }

    #[test]
    fn multi_channel_checkpoint_is_load_error() {
        let model = Autoencoder::new(2, 2, 5);
        let mut record = args();
        record.in_ch = 2;
        record.base_ch = 2;
        record.down = "1,1,1".into();
        record.shape = "8,8,8".into();
        let path = saved_record("in_ch", ModelCheckpoint::new(model.state_dict(), record));
        let err = ModelWeights::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, PipelineError::CheckpointLoad { .. }));
        assert!(err.to_string().contains("in_ch"));
    }

    #[test]
    fn shape_not_divisible_by_eight_is_load_error() {
        let model = Autoencoder::new(1, 2, 5);
        let mut record = args();
        record.in_ch = 1;
        record.base_ch = 2;
        record.down = "1,1,1".into();
        record.shape = "12,8,8".into();
        let path = saved_record("odd_shape", ModelCheckpoint::new(model.state_dict(), record));
        let err = ModelWeights::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, PipelineError::CheckpointLoad { .. }));
    }

    #[test]
    fn missing_checkpoint_is_load_error() {
        let err = ModelWeights::load("/nonexistent/cinebrain_ae.bin").unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointLoad { .. }));
    }
}
