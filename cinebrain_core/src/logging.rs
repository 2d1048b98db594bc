//! Diagnostics: `tracing` subscriber setup and append-only JSON-lines run logs.

use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::scoring::PredictionRecord;
use crate::training::EpochMetrics;

/// Per-batch training log, one JSON object per line.
pub const TRAIN_LOG: &str = "train.jsonl";
/// Per-epoch summaries.
pub const EPOCH_LOG: &str = "epochs.jsonl";
/// Prediction records.
pub const PREDICTION_LOG: &str = "predictions.jsonl";

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(io::stdout().is_terminal());
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

fn append_json_line<T: Serialize>(dir: &Path, file: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(file))?;
    let mut line = serde_json::to_vec(value).map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    line.push(b'\n');
    file.write_all(&line)
}

#[derive(Debug, Serialize)]
pub struct TrainingLogEntry {
    pub epoch: usize,
    pub batch: usize,
    pub batch_size: usize,
    pub loss: f32,
    pub timestamp_ms: u128,
}

pub fn log_training_step(
    dir: &Path,
    epoch: usize,
    batch: usize,
    batch_size: usize,
    loss: f32,
) -> io::Result<()> {
    let entry = TrainingLogEntry {
        epoch,
        batch,
        batch_size,
        loss,
        timestamp_ms: timestamp_ms(),
    };
    append_json_line(dir, TRAIN_LOG, &entry)
}

pub fn log_epoch(dir: &Path, metrics: &EpochMetrics) -> io::Result<()> {
    append_json_line(dir, EPOCH_LOG, metrics)
}

pub fn log_prediction(dir: &Path, record: &PredictionRecord) -> io::Result<()> {
    append_json_line(dir, PREDICTION_LOG, record)
}

/// Runs a log write and downgrades failure to a warning; run logs never
/// abort the pipeline.
pub(crate) fn best_effort(what: &str, result: io::Result<()>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "failed to write {what} log entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_steps_append_lines() {
        let dir = std::env::temp_dir().join(format!("cinebrain_logs_{}", uuid::Uuid::new_v4()));
        log_training_step(&dir, 0, 0, 4, 0.5).unwrap();
        log_training_step(&dir, 0, 1, 4, 0.25).unwrap();
        let contents = fs::read_to_string(dir.join(TRAIN_LOG)).unwrap();
        fs::remove_dir_all(&dir).ok();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["batch"], 1);
        assert_eq!(second["loss"], 0.25);
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}
