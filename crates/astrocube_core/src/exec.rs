//! Thread pool selection and timing logs.

use std::time::Instant;

use log::{debug, info};
use rayon::ThreadPoolBuilder;

use crate::error::{CubeError, CubeResult};
use crate::grid::Grid;

// =============================================================================
// Environment
// =============================================================================

const NUM_THREADS_ENV: &str = "ASTROCUBE_NUM_THREADS";
const PROFILE_TIMING_ENV: &str = "ASTROCUBE_PROFILE_TIMING";

/// Thread count requested through the environment, if any.
pub fn resolve_num_threads() -> Option<usize> {
    std::env::var(NUM_THREADS_ENV)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
}

/// Whether kernel timings are promoted from `debug` to `info`.
pub fn resolve_profile_timing() -> bool {
    std::env::var(PROFILE_TIMING_ENV)
        .ok()
        .map(|value| parse_flag(&value))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    let v = value.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

// =============================================================================
// Execution config
// =============================================================================

/// Parallelism settings for one kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecConfig {
    /// Worker count. `0` uses the environment override or the global rayon pool.
    pub cores: usize,
}

impl ExecConfig {
    pub fn with_cores(cores: usize) -> Self {
        Self { cores }
    }

    /// Explicit core count, falling back to the environment; `0` means global pool.
    pub fn resolved_cores(&self) -> usize {
        if self.cores > 0 {
            self.cores
        } else {
            resolve_num_threads().unwrap_or(0)
        }
    }

    /// Run `op` on a dedicated pool of the resolved size, or inline on the global pool.
    pub fn install<R, OP>(&self, op: OP) -> CubeResult<R>
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        let cores = self.resolved_cores();
        if cores == 0 {
            return Ok(op());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(cores)
            .build()
            .map_err(|e| {
                CubeError::DegenerateParameters(format!("cannot build {cores}-thread pool: {e}"))
            })?;
        Ok(pool.install(op))
    }
}

/// Log elapsed wall time of a kernel.
pub fn log_timing(label: &str, grid: Grid, started: Instant) {
    let ms = started.elapsed().as_secs_f64() * 1e3;
    if resolve_profile_timing() {
        info!(
            "astrocube_profile op={} dims={}x{}x{} wall_ms={:.3}",
            label, grid.nx, grid.ny, grid.nz, ms
        );
    } else {
        debug!(
            "{} on {}x{}x{} took {:.3} ms",
            label, grid.nx, grid.ny, grid.nz, ms
        );
    }
}
