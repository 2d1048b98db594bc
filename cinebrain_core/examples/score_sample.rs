//! Scores one `.npy` sample against a trained checkpoint and prints the
//! prediction record as JSON.
//!
//! Usage: cargo run --example score_sample -- [config/pipeline.toml] [sample.npy]
//!
//! Without a sample path the first `.npy` file under the data directory is
//! used.

use std::path::PathBuf;

use anyhow::Context;
use cinebrain_core::logging::init_tracing;
use cinebrain_core::{run_prediction, PipelineConfig};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PipelineConfig::load_from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => PipelineConfig::default(),
    };
    let input = args.next().map(PathBuf::from);

    let record = run_prediction(&config, input.as_deref()).context("prediction failed")?;

    println!("\n--- Prediction Result ---");
    println!("{}", serde_json::to_string_pretty(&record)?);
    println!("-------------------------\n");

    Ok(())
}
