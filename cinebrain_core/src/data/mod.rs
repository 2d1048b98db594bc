//! Sample discovery, `.npy` I/O and the in-memory volume cache.

pub mod loader;
pub mod volume_cache;

pub use loader::{find_default_sample, list_data_files, load_raw_sample, save_slice, save_slices};
pub use volume_cache::VolumeCache;
