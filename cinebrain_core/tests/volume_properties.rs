use cinebrain_core::tensor::operations::{cube, cube_side, reverse_axes};
use cinebrain_core::{build_volume, PipelineError, PreprocessConfig, RawSample};

fn ramp(len: usize) -> RawSample {
    RawSample::new(format!("ramp-{len}"), (0..len).map(|v| (v as f32 * 0.37).cos()).collect())
}

#[test]
fn output_shape_matches_target_for_any_length() {
    let configs = [
        PreprocessConfig::new((1, 1, 1), (8, 8, 8)).unwrap(),
        PreprocessConfig::new((2, 2, 2), (16, 8, 8)).unwrap(),
        PreprocessConfig::new((3, 1, 2), (4, 6, 5)).unwrap(),
    ];
    for config in &configs {
        for len in [1, 2, 7, 26, 27, 28, 64, 500, 4097] {
            let volume = build_volume(&ramp(len), config).unwrap();
            assert_eq!(volume.spatial_shape(), config.out_shape, "len {len}, {config}");
            assert_eq!(volume.shape().0, 1);
        }
    }
}

#[test]
fn building_twice_is_bit_identical() {
    let config = PreprocessConfig::new((2, 1, 1), (8, 8, 8)).unwrap();
    let sample = ramp(1234);
    let first = build_volume(&sample, &config).unwrap();
    let second = build_volume(&sample, &config).unwrap();
    assert!(first
        .data
        .iter()
        .zip(second.data.iter())
        .all(|(a, b)| a.to_bits() == b.to_bits()));
}

#[test]
fn values_are_within_unit_range() {
    let config = PreprocessConfig::new((1, 1, 1), (8, 8, 8)).unwrap();
    let volume = build_volume(&ramp(300), &config).unwrap();
    let stats = volume.statistics();
    assert!((stats.min + 1.0).abs() < 1e-6);
    assert!((stats.max - 1.0).abs() < 1e-6);
    assert!(volume.data.iter().all(|v| (-1.0..=1.0).contains(v)));
}

#[test]
fn perfect_cube_is_reversed_reshape() {
    // N = 27 into (3,3,3): standardized then min-max scaled, axes reversed
    let sample = RawSample::new("cube", (0..27).map(|v| v as f32).collect());
    let config = PreprocessConfig::new((1, 1, 1), (3, 3, 3)).unwrap();
    let volume = build_volume(&sample, &config).unwrap();
    assert_eq!(volume.shape(), (1, 3, 3, 3));

    for c in 0..3 {
        for b in 0..3 {
            for a in 0..3 {
                let original = (a * 9 + b * 3 + c) as f32;
                let expected = 2.0 * original / 26.0 - 1.0;
                assert!((volume.data[[0, c, b, a]] - expected).abs() < 1e-5);
            }
        }
    }
}

#[test]
fn short_sample_is_zero_padded_into_cube() {
    assert_eq!(cube_side(10), 3);
    let cubed = cube(&(1..=10).map(|v| v as f32).collect::<Vec<_>>());
    assert_eq!(cubed.dim(), (3, 3, 3));
    assert_eq!(cubed.iter().filter(|v| **v == 0.0).count(), 17);
    assert_eq!(reverse_axes(&cubed)[[0, 0, 1]], cubed[[1, 0, 0]]);

    let config = PreprocessConfig::new((1, 1, 1), (4, 4, 4)).unwrap();
    let volume = build_volume(&ramp(10), &config).unwrap();
    assert_eq!(volume.spatial_shape(), (4, 4, 4));
}

#[test]
fn zero_sample_stays_finite_zero() {
    let sample = RawSample::new("zeros", vec![0.0; 64]);
    let config = PreprocessConfig::new((1, 1, 1), (4, 4, 4)).unwrap();
    let volume = build_volume(&sample, &config).unwrap();
    assert!(volume.data.iter().all(|v| *v == 0.0));
}

#[test]
fn empty_sample_is_rejected() {
    let sample = RawSample::new("empty", Vec::new());
    let err = build_volume(&sample, &PreprocessConfig::default()).unwrap_err();
    assert!(matches!(err, PipelineError::EmptyInput { .. }));
}
