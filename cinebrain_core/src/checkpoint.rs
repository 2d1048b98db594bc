//! Checkpoint trait and error handling for deterministic state persistence.
//!
//! [`Checkpointable`] gives every persisted component the same contract: a
//! fixed little-endian bincode encoding, a version header inside the payload,
//! and atomic replacement of the target file (write to a sibling temp file,
//! then rename), so a crash never leaves a half-written checkpoint behind.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::neural::StateDict;

/// Current layout of [`ModelCheckpoint`].
pub const MODEL_CHECKPOINT_VERSION: u32 = 1;

/// Errors that can occur while saving or loading checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Underlying I/O failure while reading or writing checkpoint files.
    #[error("I/O error while accessing checkpoint: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization error from the binary codec.
    #[error("Failed to (de)serialize checkpoint payload: {0}")]
    Serialization(#[from] bincode::Error),
    /// The checkpoint file was well formed but has an incompatible schema version.
    #[error("Checkpoint version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    /// The checkpoint file did not match the expected structure.
    #[error("Checkpoint file has invalid structure: {0}")]
    InvalidFormat(String),
}

/// Deterministic binary codec options shared by all checkpoint implementations.
fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Components that support deterministic persistence implement this trait.
pub trait Checkpointable: Sized {
    /// Save the current state to `path` using the deterministic codec.
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError>;

    /// Load a state from `path`.
    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError>;

    /// Writes `snapshot` to a temp file next to `path` and renames it into place.
    fn write_snapshot<P, T>(snapshot: &T, path: P) -> Result<(), CheckpointError>
    where
        P: AsRef<Path>,
        T: Serialize,
    {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temp_path(path);
        let result = (|| -> Result<(), CheckpointError> {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            codec().serialize_into(&mut writer, snapshot)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|err| CheckpointError::Io(err.into_error()))?
                .sync_all()?;
            fs::rename(&tmp, path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    /// Utility for reading a serializable snapshot with the shared codec.
    fn read_snapshot<P, T>(path: P) -> Result<T, CheckpointError>
    where
        P: AsRef<Path>,
        T: serde::de::DeserializeOwned,
    {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Ok(codec().deserialize_from(&mut reader)?)
    }
}

/// Run arguments stored next to the weights.
///
/// `down` and `shape` use the `"a,b,c"` encoding and are sufficient to
/// rebuild the preprocessing config; the rest is provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointArgs {
    pub base_ch: usize,
    pub in_ch: usize,
    pub down: String,
    pub shape: String,
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f32,
    pub weight_decay: f32,
    pub max_files: usize,
    pub min_epoch_len: usize,
    pub model_seed: u64,
    pub train_seed: u64,
}

/// On-disk checkpoint record: `{version, state_dict, args}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub version: u32,
    pub state_dict: StateDict,
    pub args: CheckpointArgs,
}

impl ModelCheckpoint {
    pub fn new(state_dict: StateDict, args: CheckpointArgs) -> Self {
        Self {
            version: MODEL_CHECKPOINT_VERSION,
            state_dict,
            args,
        }
    }
}

impl Checkpointable for ModelCheckpoint {
    fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        Self::write_snapshot(self, path)
    }

    fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let checkpoint: ModelCheckpoint = Self::read_snapshot(path)?;
        if checkpoint.version != MODEL_CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: MODEL_CHECKPOINT_VERSION,
                found: checkpoint.version,
            });
        }
        if checkpoint.state_dict.is_empty() {
            return Err(CheckpointError::InvalidFormat(
                "checkpoint contains no tensors".to_string(),
            ));
        }
        Ok(checkpoint)
    }
}
