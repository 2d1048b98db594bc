use std::fmt::{self, Display};

use ndarray::{s, Array2, Array4, Array5, ArrayView5, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// A single-channel 3D intensity volume.
///
/// The array layout is `[channel, z, y, x]` with `channel == 1`. Volumes
/// produced by [`crate::VolumeBuilder`] hold values in `[-1, 1]` unless the
/// source was degenerate (all elements equal).
///
/// # Examples
///
/// ```
/// use cinebrain_core::Volume;
///
/// let volume = Volume::zeros((8, 8, 8));
/// assert_eq!(volume.shape(), (1, 8, 8, 8));
/// assert_eq!(volume.spatial_shape(), (8, 8, 8));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Voxel values as a 4D array: [channel, z, y, x]
    pub data: Array4<f32>,
}

impl Volume {
    /// Creates a zero-filled volume of the given spatial shape.
    pub fn zeros(spatial: (usize, usize, usize)) -> Self {
        let (z, y, x) = spatial;
        Self {
            data: Array4::zeros((1, z, y, x)),
        }
    }

    /// Wraps an existing `[1, z, y, x]` array.
    ///
    /// Fails with [`PipelineError::ShapeMismatch`] if the channel axis is not 1.
    pub fn from_array(data: Array4<f32>) -> PipelineResult<Self> {
        let (channels, z, y, x) = data.dim();
        if channels != 1 {
            return Err(PipelineError::shape_mismatch(
                &[1, z, y, x],
                &[channels, z, y, x],
                "volume channel axis",
            ));
        }
        Ok(Self {
            data: data.as_standard_layout().into_owned(),
        })
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// Spatial extent `(z, y, x)` without the channel axis.
    pub fn spatial_shape(&self) -> (usize, usize, usize) {
        let (_, z, y, x) = self.data.dim();
        (z, y, x)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the volume as a batch of one: `[1, 1, z, y, x]`.
    pub fn as_batch(&self) -> ArrayView5<'_, f32> {
        self.data.view().insert_axis(Axis(0))
    }

    /// Stacks volumes of identical shape into an `[n, 1, z, y, x]` batch.
    pub fn stack(volumes: &[&Volume]) -> PipelineResult<Array5<f32>> {
        let first = volumes
            .first()
            .ok_or_else(|| PipelineError::no_data("cannot stack an empty batch"))?;
        let (c, z, y, x) = first.shape();
        let mut batch = Array5::zeros((volumes.len(), c, z, y, x));
        for (idx, volume) in volumes.iter().enumerate() {
            if volume.shape() != first.shape() {
                let (ec, ez, ey, ex) = first.shape();
                let (gc, gz, gy, gx) = volume.shape();
                return Err(PipelineError::shape_mismatch(
                    &[ec, ez, ey, ex],
                    &[gc, gz, gy, gx],
                    "batch stacking",
                ));
            }
            batch.index_axis_mut(Axis(0), idx).assign(&volume.data);
        }
        Ok(batch)
    }

    /// Extracts item `index` of an `[n, 1, z, y, x]` batch as a volume.
    pub fn from_batch(batch: &Array5<f32>, index: usize) -> PipelineResult<Self> {
        Self::from_array(batch.index_axis(Axis(0), index).to_owned())
    }

    /// Three orthogonal planes through the volume centre.
    pub fn mid_slices(&self) -> MidSlices {
        let (z, y, x) = self.spatial_shape();
        let (zc, yc, xc) = (z / 2, y / 2, x / 2);
        MidSlices {
            z: self.data.slice(s![0, zc, .., ..]).to_owned(),
            y: self.data.slice(s![0, .., yc, ..]).to_owned(),
            x: self.data.slice(s![0, .., .., xc]).to_owned(),
        }
    }

    pub fn statistics(&self) -> VolumeStatistics {
        let mut sum = 0.0f64;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &value in self.data.iter() {
            sum += value as f64;
            min = min.min(value);
            max = max.max(value);
        }
        let count = self.data.len().max(1) as f64;
        let mean = sum / count;
        let variance = self
            .data
            .iter()
            .map(|&value| {
                let diff = value as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / count;

        VolumeStatistics {
            mean: mean as f32,
            variance: variance as f32,
            min,
            max,
        }
    }
}

impl Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.statistics();
        let (z, y, x) = self.spatial_shape();
        write!(
            f,
            "Volume {}x{}x{} mean={:.4} variance={:.5} range=[{:.3},{:.3}]",
            z, y, x, stats.mean, stats.variance, stats.min, stats.max,
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct VolumeStatistics {
    pub mean: f32,
    pub variance: f32,
    pub min: f32,
    pub max: f32,
}

/// Mid-volume planes: `z` is `[y, x]`, `y` is `[z, x]`, `x` is `[z, y]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MidSlices {
    pub z: Array2<f32>,
    pub y: Array2<f32>,
    pub x: Array2<f32>,
}

impl MidSlices {
    /// Planes paired with their axis tag, in `Z, Y, X` order.
    pub fn planes(&self) -> [(&'static str, &Array2<f32>); 3] {
        [("Z", &self.z), ("Y", &self.y), ("X", &self.x)]
    }
}
