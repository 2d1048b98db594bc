pub mod operations;
pub mod slices;
pub mod volume;

pub use slices::SliceComparison;
pub use volume::{MidSlices, Volume, VolumeStatistics};
