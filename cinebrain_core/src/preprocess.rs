//! Raw vector → canonical volume.
//!
//! [`build_volume`] is the only path from a [`RawSample`] to a [`Volume`].
//! Training and scoring both call it, parameterized solely by a
//! [`PreprocessConfig`], so a checkpoint's recorded config reproduces the
//! training volumes exactly.

use std::fmt::{self, Display};

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::tensor::operations::{
    center_crop, cube, downsample, normalize_range, pad_to_at_least, reverse_axes, standardize,
    Shape3,
};
use crate::tensor::Volume;

/// Downsampling and output-shape parameters shared by training and inference.
///
/// Persisted in checkpoints as the strings `down = "dz,dy,dx"` and
/// `shape = "Z,Y,X"`.
///
/// # Examples
///
/// ```
/// use cinebrain_core::PreprocessConfig;
///
/// let config = PreprocessConfig::from_encoded("2,2,2", "16,16,16").unwrap();
/// assert_eq!(config.downsample_factors, (2, 2, 2));
/// assert_eq!(config.shape_string(), "16,16,16");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Strides `(dz, dy, dx)` applied to the cubed vector
    pub downsample_factors: Shape3,
    /// Final spatial shape `(Z, Y, X)`
    pub out_shape: Shape3,
}

impl PreprocessConfig {
    /// Creates a validated config; every factor and axis must be at least 1.
    pub fn new(downsample_factors: Shape3, out_shape: Shape3) -> PipelineResult<Self> {
        let config = Self {
            downsample_factors,
            out_shape,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses the checkpoint string encoding, e.g. `("1,1,1", "32,32,32")`.
    pub fn from_encoded(down: &str, shape: &str) -> PipelineResult<Self> {
        Self::new(parse_triple("down", down)?, parse_triple("shape", shape)?)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let (dz, dy, dx) = self.downsample_factors;
        if dz == 0 || dy == 0 || dx == 0 {
            return Err(PipelineError::invalid_config(
                "down",
                self.down_string(),
                "downsample factors must be >= 1",
            ));
        }
        let (z, y, x) = self.out_shape;
        if z == 0 || y == 0 || x == 0 {
            return Err(PipelineError::invalid_config(
                "shape",
                self.shape_string(),
                "output axes must be >= 1",
            ));
        }
        Ok(())
    }

    /// `"dz,dy,dx"`
    pub fn down_string(&self) -> String {
        encode_triple(self.downsample_factors)
    }

    /// `"Z,Y,X"`
    pub fn shape_string(&self) -> String {
        encode_triple(self.out_shape)
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            downsample_factors: (1, 1, 1),
            out_shape: (32, 32, 32),
        }
    }
}

impl Display for PreprocessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "down={} shape={}", self.down_string(), self.shape_string())
    }
}

fn encode_triple((a, b, c): Shape3) -> String {
    format!("{a},{b},{c}")
}

/// Parses `"a,b,c"` into three unsigned integers.
pub fn parse_triple(field: &str, text: &str) -> PipelineResult<Shape3> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(PipelineError::invalid_config(
            field,
            text,
            "expected three comma-separated integers",
        ));
    }
    let mut values = [0usize; 3];
    for (slot, part) in values.iter_mut().zip(parts.iter()) {
        *slot = part.parse().map_err(|_| {
            PipelineError::invalid_config(field, text, format!("'{part}' is not an integer"))
        })?;
    }
    Ok((values[0], values[1], values[2]))
}

/// One flattened source vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    id: String,
    values: Vec<f32>,
}

impl RawSample {
    pub fn new(id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            values,
        }
    }

    /// Identifier, usually the source file path.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Builds a volume from `sample` under `config`.
///
/// Stages, in order: standardize, cube, downsample, reverse axes, pad up to
/// `out_shape`, centre-crop down to `out_shape`, rescale to `[-1, 1]`, add the
/// channel axis. The spatial shape of the result always equals
/// `config.out_shape`.
///
/// # Errors
///
/// [`PipelineError::EmptyInput`] for a zero-length sample and
/// [`PipelineError::InvalidConfig`] for zero factors or axes.
///
/// # Examples
///
/// ```
/// use cinebrain_core::{build_volume, PreprocessConfig, RawSample};
///
/// let config = PreprocessConfig::new((1, 1, 1), (4, 4, 4)).unwrap();
/// let sample = RawSample::new("demo", (0..10).map(|v| v as f32).collect());
/// let volume = build_volume(&sample, &config).unwrap();
/// assert_eq!(volume.shape(), (1, 4, 4, 4));
/// ```
pub fn build_volume(sample: &RawSample, config: &PreprocessConfig) -> PipelineResult<Volume> {
    if sample.is_empty() {
        return Err(PipelineError::empty_input(sample.id()));
    }
    config.validate()?;

    let standardized = standardize(sample.values());
    let cubed = cube(&standardized);
    let downsampled = downsample(&cubed, config.downsample_factors);
    let reordered = reverse_axes(&downsampled);
    let padded = pad_to_at_least(&reordered, config.out_shape);
    let mut cropped = center_crop(&padded, config.out_shape);
    normalize_range(&mut cropped);

    let volume = Volume::from_array(cropped.insert_axis(Axis(0)))?;
    tracing::debug!(sample = sample.id(), %volume, "built volume");
    Ok(volume)
}

/// A [`PreprocessConfig`] bound to [`build_volume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeBuilder {
    config: PreprocessConfig,
}

impl VolumeBuilder {
    pub fn new(config: PreprocessConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn build(&self, sample: &RawSample) -> PipelineResult<Volume> {
        build_volume(sample, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_sample(n: usize) -> RawSample {
        RawSample::new("ramp", (0..n).map(|v| v as f32).collect())
    }

    #[test]
    fn test_parse_triple() {
        assert_eq!(parse_triple("down", "2, 1,4").expect("valid"), (2, 1, 4));
        assert!(parse_triple("down", "2,1").is_err());
        assert!(parse_triple("down", "a,b,c").is_err());
    }

    #[test]
    fn test_encoded_roundtrip() {
        let config = PreprocessConfig::from_encoded("2,3,4", "16,8,32").expect("valid");
        assert_eq!(config.down_string(), "2,3,4");
        assert_eq!(config.shape_string(), "16,8,32");
        assert_eq!(config.to_string(), "down=2,3,4 shape=16,8,32");
    }

    #[test]
    fn test_zero_factor_rejected() {
        let err = PreprocessConfig::from_encoded("0,1,1", "8,8,8").expect_err("zero stride");
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
        assert!(PreprocessConfig::new((1, 1, 1), (8, 0, 8)).is_err());
    }

    #[test]
    fn test_empty_sample_rejected() {
        let config = PreprocessConfig::new((1, 1, 1), (4, 4, 4)).expect("valid");
        let err = build_volume(&RawSample::new("empty", Vec::new()), &config)
            .expect_err("empty input");
        assert!(matches!(err, PipelineError::EmptyInput { .. }));
    }

    #[test]
    fn test_perfect_cube_is_reversed_reshape() {
        let config = PreprocessConfig::new((1, 1, 1), (3, 3, 3)).expect("valid");
        let volume = build_volume(&ramp_sample(27), &config).expect("build");
        assert_eq!(volume.shape(), (1, 3, 3, 3));
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    let source_index = x * 9 + y * 3 + z;
                    let expected = 2.0 * source_index as f32 / 26.0 - 1.0;
                    assert!((volume.data[[0, z, y, x]] - expected).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_short_vector_pads_before_cubing() {
        let config = PreprocessConfig::new((1, 1, 1), (4, 4, 4)).expect("valid");
        let volume = build_volume(&ramp_sample(10), &config).expect("build");
        assert_eq!(volume.shape(), (1, 4, 4, 4));
        // 3^3 cube sits at offset (0, 0, 0) after padding 1 on the high side.
        let minimum = volume.data.iter().cloned().fold(f32::INFINITY, f32::min);
        assert_eq!(volume.data[[0, 3, 3, 3]], volume.data[[0, 3, 0, 0]]);
        assert_eq!(minimum, -1.0);
        // The first raw value sits at cube (0,0,0) -> volume (0,0,0).
        assert_eq!(volume.data[[0, 0, 0, 0]], -1.0);
    }

    #[test]
    fn test_zero_vector_stays_zero() {
        let config = PreprocessConfig::new((1, 1, 1), (4, 4, 4)).expect("valid");
        let volume = build_volume(&RawSample::new("zeros", vec![0.0; 64]), &config).expect("build");
        assert!(volume.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_builder_matches_free_function() {
        let config = PreprocessConfig::new((2, 1, 2), (5, 6, 7)).expect("valid");
        let builder = VolumeBuilder::new(config).expect("valid");
        let sample = ramp_sample(500);
        assert_eq!(
            builder.build(&sample).expect("build"),
            build_volume(&sample, &config).expect("build")
        );
    }
}
