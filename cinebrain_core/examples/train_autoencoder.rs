//! Trains the volume autoencoder on every `.npy` sample under the configured
//! data directory and writes the checkpoint, example slices and comparison
//! image to the output directory.
//!
//! Usage: cargo run --example train_autoencoder -- [config/pipeline.toml]

use anyhow::Context;
use cinebrain_core::logging::init_tracing;
use cinebrain_core::{run_training, PipelineConfig};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load_from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => PipelineConfig::default(),
    };

    println!("CineBrain autoencoder training");
    println!("  data dir:   {}", config.data.data_dir.display());
    println!("  preprocess: {}", config.preprocess_or_default());
    println!("  base_ch:    {}", config.model.base_ch);
    println!(
        "  epochs:     {} (batch {}, lr {})",
        config.training.epochs, config.training.batch_size, config.training.learning_rate
    );
    println!();

    let outcome = run_training(&config).context("training run failed")?;

    for metrics in &outcome.epoch_metrics {
        println!(
            "Epoch {:3}/{} | loss {:.6} | {} batches | {} ms",
            metrics.epoch + 1,
            config.training.epochs,
            metrics.mean_loss,
            metrics.batches,
            metrics.elapsed_ms
        );
    }
    println!();
    println!("Checkpoint: {}", config.data.checkpoint_path().display());
    println!("Input example:          {}", outcome.example.input);
    println!("Reconstruction example: {}", outcome.example.reconstruction);

    Ok(())
}
