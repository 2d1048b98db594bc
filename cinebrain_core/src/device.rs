//! Explicit compute device.
//!
//! Kernels in [`crate::neural`] fan out with rayon; running them inside
//! [`Device::install`] confines that work to the device's own pool instead
//! of the global one.

use std::fmt;
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{PipelineError, PipelineResult};

/// A CPU thread pool handed to [`crate::Trainer`] and [`crate::Scorer`].
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone)]
pub struct Device {
    pool: Arc<ThreadPool>,
}

impl Device {
    /// CPU pool with `threads` workers; 0 picks one per logical core.
    pub fn cpu(threads: usize) -> PipelineResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("cinebrain-cpu-{idx}"))
            .build()
            .map_err(|err| PipelineError::invalid_config("threads", threads, err.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Resolves a device name from configuration. Only `"cpu"` exists.
    pub fn from_name(name: &str, threads: usize) -> PipelineResult<Self> {
        if name.eq_ignore_ascii_case("cpu") {
            Self::cpu(threads)
        } else {
            Err(PipelineError::invalid_config(
                "device",
                name,
                "only the cpu device is available",
            ))
        }
    }

    pub fn name(&self) -> &'static str {
        "cpu"
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op` with this device's pool as the current rayon pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name())
            .field("threads", &self.threads())
            .finish()
    }
}
