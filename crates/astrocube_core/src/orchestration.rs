//! Host-facing entry points.
//!
//! Every operation here:
//! - rejects integer cubes with `UnsupportedDataKind`
//! - moves the [`ProgressToken`] to running, and to done (100) on every
//!   terminal outcome so a polling progress bar never stalls
//! - runs the kernel on the configured thread pool
//! - logs its wall time
//!
//! A failed or canceled call never hands back a result, so the caller can
//! only publish output from an `Ok`.

use std::time::Instant;

use log::{info, warn};

use crate::bounds::{Region, VoxelBounds};
use crate::error::{CubeError, CubeResult};
use crate::exec::{log_timing, ExecConfig};
use crate::float_trait::CubeFloat;
use crate::grid::Grid;
use crate::masking::{apply_mask, MaskConfig, MaskOutput};
use crate::moments::{compute_moments, MomentConfig, MomentMaps};
use crate::profile::{compute_profile, ProfileConfig, SpectralProfile};
use crate::progress::ProgressToken;
use crate::smoothing::{apply_smoothing, SmoothingConfig};
use crate::statistics::{compute_statistics, StatisticsConfig, StatisticsRecord, StatisticsTable};
use crate::volume::{AnyVolume, MaskVolume, ScalarVolume};
use crate::world::AxisTransform;

// =============================================================================
// Typed results
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AnyMomentMaps {
    Float32(MomentMaps<f32>),
    Float64(MomentMaps<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnyProfile {
    Float32(SpectralProfile<f32>),
    Float64(SpectralProfile<f64>),
}

/// Output of a blank or crop; `bounds` is set for crops.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedVolume {
    pub volume: AnyVolume,
    pub bounds: Option<VoxelBounds>,
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Run `op` under the token lifecycle and on the pool of `exec`.
pub fn run_operation<R, OP>(
    label: &str,
    grid: Grid,
    exec: &ExecConfig,
    progress: &ProgressToken,
    op: OP,
) -> CubeResult<R>
where
    OP: FnOnce() -> CubeResult<R> + Send,
    R: Send,
{
    if let Err(e) = progress.begin() {
        warn!("{label}: canceled before start");
        progress.finish();
        return Err(e);
    }
    let started = Instant::now();
    let result = exec.install(op).and_then(|r| r);
    progress.finish();

    match &result {
        Ok(_) => {
            log_timing(label, grid, started);
            info!("{label} finished on {}x{}x{}", grid.nx, grid.ny, grid.nz);
        }
        Err(e) if e.is_canceled() => warn!("{label} canceled, result discarded"),
        Err(e) => warn!("{label} failed: {e}"),
    }
    result
}

fn unsupported(volume: &AnyVolume) -> CubeError {
    CubeError::UnsupportedDataKind(volume.kind())
}

// =============================================================================
// Entry points
// =============================================================================

/// Smooth a cube with the filter selected in `config`.
pub fn smooth_volume(
    volume: &AnyVolume,
    config: &SmoothingConfig,
    progress: &ProgressToken,
) -> CubeResult<AnyVolume> {
    let exec = ExecConfig::with_cores(config.cores);
    run_operation("smoothing", volume.grid(), &exec, progress, || match volume {
        AnyVolume::Float32(v) => apply_smoothing(v, config, progress).map(AnyVolume::from),
        AnyVolume::Float64(v) => apply_smoothing(v, config, progress).map(AnyVolume::from),
        other => Err(unsupported(other)),
    })
}

/// Blank or crop a cube.
pub fn mask_volume(
    volume: &AnyVolume,
    region: &Region<'_>,
    config: &MaskConfig,
    progress: &ProgressToken,
) -> CubeResult<MaskedVolume> {
    fn split<F>(output: MaskOutput<F>) -> (AnyVolume, Option<VoxelBounds>)
    where
        F: CubeFloat,
        AnyVolume: From<ScalarVolume<F>>,
    {
        match output {
            MaskOutput::Blanked(v) => (AnyVolume::from(v), None),
            MaskOutput::Cropped(c) => (AnyVolume::from(c.volume), Some(c.bounds)),
        }
    }

    let (volume, bounds) = run_operation(
        "masking",
        volume.grid(),
        &ExecConfig::with_cores(config.cores),
        progress,
        || match volume {
            AnyVolume::Float32(v) => apply_mask(v, region, config, progress).map(split),
            AnyVolume::Float64(v) => apply_mask(v, region, config, progress).map(split),
            other => Err(unsupported(other)),
        },
    )?;
    Ok(MaskedVolume { volume, bounds })
}

/// Moment maps along the spectral axis.
pub fn moment_maps(
    volume: &AnyVolume,
    mask: Option<&MaskVolume>,
    config: &MomentConfig,
    transform: &dyn AxisTransform,
    progress: &ProgressToken,
) -> CubeResult<AnyMomentMaps> {
    run_operation(
        "moment maps",
        volume.grid(),
        &ExecConfig::with_cores(config.cores),
        progress,
        || match volume {
            AnyVolume::Float32(v) => {
                compute_moments(v, mask, config, transform, progress).map(AnyMomentMaps::Float32)
            }
            AnyVolume::Float64(v) => {
                compute_moments(v, mask, config, transform, progress).map(AnyMomentMaps::Float64)
            }
            other => Err(unsupported(other)),
        },
    )
}

/// Integrated spectral profile.
pub fn spectral_profile(
    volume: &AnyVolume,
    mask: Option<&MaskVolume>,
    config: &ProfileConfig,
    transform: &dyn AxisTransform,
    progress: &ProgressToken,
) -> CubeResult<AnyProfile> {
    run_operation(
        "profile",
        volume.grid(),
        &ExecConfig::with_cores(config.cores),
        progress,
        || match volume {
            AnyVolume::Float32(v) => {
                compute_profile(v, mask, config, transform, progress).map(AnyProfile::Float32)
            }
            AnyVolume::Float64(v) => {
                compute_profile(v, mask, config, transform, progress).map(AnyProfile::Float64)
            }
            other => Err(unsupported(other)),
        },
    )
}

/// Compute statistics of a selection and append them to `table`.
pub fn volume_statistics(
    volume: &AnyVolume,
    selection: &Region<'_>,
    config: &StatisticsConfig,
    table: &mut StatisticsTable,
    progress: &ProgressToken,
) -> CubeResult<StatisticsRecord> {
    let record = run_operation(
        "statistics",
        volume.grid(),
        &ExecConfig::with_cores(config.cores),
        progress,
        || match volume {
            AnyVolume::Float32(v) => compute_statistics(v, selection, config, progress),
            AnyVolume::Float64(v) => compute_statistics(v, selection, config, progress),
            other => Err(unsupported(other)),
        },
    )?;
    Ok(table.push(record).clone())
}
