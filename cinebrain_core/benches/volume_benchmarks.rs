//! Performance benchmarks for volume building and autoencoder inference
//!
//! Run with: cargo bench --bench volume_benchmarks

use cinebrain_core::{build_volume, Autoencoder, PreprocessConfig, RawSample, Volume};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn sample(len: usize) -> RawSample {
    RawSample::new("bench", (0..len).map(|i| ((i % 251) as f32).sin()).collect())
}

/// Benchmark the full preprocessing chain at different raw lengths
fn bench_build_volume(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_volume");
    let config = PreprocessConfig::default();

    for len in [4_096usize, 32_768, 262_144] {
        let raw = sample(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &raw, |b, raw| {
            b.iter(|| black_box(build_volume(raw, &config).expect("valid sample")));
        });
    }

    group.finish();
}

/// Benchmark a single eval-mode reconstruction
fn bench_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct");
    group.sample_size(10);

    for (side, base_ch) in [(16usize, 8usize), (32, 8), (32, 32)] {
        let model = Autoencoder::new(1, base_ch, 42);
        let config = PreprocessConfig::new((1, 1, 1), (side, side, side)).expect("valid config");
        let volume: Volume = build_volume(&sample(side * side * side), &config).expect("volume");

        group.bench_with_input(
            BenchmarkId::new(format!("base_ch_{base_ch}"), side),
            &volume,
            |b, volume| {
                b.iter(|| black_box(model.reconstruct(volume).expect("divisible shape")));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_build_volume, bench_reconstruct);
criterion_main!(benches);
