//! Moment maps along the spectral axis.
//!
//! For each (x, y) column the selected voxels `v` at spectral coordinate `c`
//! give
//!
//! ```text
//! M0 = sum(v) * dV
//! M1 = sum(v c) / sum(v)
//! M2 = sqrt(sum(v (c - M1)^2) / sum(v))
//! ```
//!
//! Voxels are selected either by a mask (`mask > 0`, whole column) or by an
//! index range derived from a velocity window plus an exclusive intensity
//! window. NaN voxels never contribute. Near-zero denominators or
//! accumulators resolve to 0.

use log::warn;
use ndarray::{s, Array2, Axis, Zip};

use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::progress::{CancelGate, ProgressBand, ProgressToken};
use crate::volume::{mask_positive, MaskVolume, ScalarVolume};
use crate::world::{AxisTransform, VelocityUnit};

// =============================================================================
// Types
// =============================================================================

/// Which maps to produce and how voxels are selected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentConfig {
    pub generate_zeroth: bool,
    pub generate_first: bool,
    /// Also forces the first moment.
    pub generate_second: bool,
    /// Velocity window in km/s. `None` spans the whole spectral axis.
    pub velocity_range: Option<(f64, f64)>,
    /// Exclusive intensity window, applied when no mask is given.
    pub intensity_range: (f64, f64),
    /// Unit of the coordinates returned by the axis transform.
    pub unit: VelocityUnit,
    /// Worker threads, 0 = all. Default: 0
    pub cores: usize,
}

impl Default for MomentConfig {
    fn default() -> Self {
        Self {
            generate_zeroth: true,
            generate_first: true,
            generate_second: true,
            velocity_range: None,
            intensity_range: (f64::NEG_INFINITY, f64::INFINITY),
            unit: VelocityUnit::default(),
            cores: 0,
        }
    }
}

impl MomentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.generate_zeroth || self.generate_first || self.generate_second) {
            return Err("no moment map requested".to_string());
        }
        let (lo, hi) = self.intensity_range;
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return Err(format!("invalid intensity range ({lo}, {hi})"));
        }
        if let Some((v0, v1)) = self.velocity_range {
            if !v0.is_finite() || !v1.is_finite() {
                return Err(format!("invalid velocity range ({v0}, {v1})"));
            }
        }
        Ok(())
    }

    fn needs_first(&self) -> bool {
        self.generate_first || self.generate_second
    }
}

/// Moment maps of shape `(ny, nx)`; unrequested maps are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentMaps<F: CubeFloat> {
    pub zeroth: Option<Array2<F>>,
    pub first: Option<Array2<F>>,
    pub second: Option<Array2<F>>,
}

/// Inclusive spectral index range `[z_min, z_max]` and channel width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralWindow {
    pub z_min: usize,
    pub z_max: usize,
    pub channel_width: f64,
}

// =============================================================================
// Window resolution
// =============================================================================

/// Map a velocity window onto clamped spectral indices.
///
/// Indices are truncated toward the lower channel, clamped to the cube and
/// swapped when the axis runs backwards. A window entirely outside the cube
/// is rejected.
pub fn resolve_spectral_window(
    nz: usize,
    transform: &dyn AxisTransform,
    config: &MomentConfig,
) -> CubeResult<SpectralWindow> {
    if nz == 0 {
        return Err(CubeError::MissingInput("cube has no spectral channels".into()));
    }
    let last = (nz - 1) as f64;
    let factor = config.unit.to_km_s();
    let (v_lo, v_hi) = match config.velocity_range {
        Some(range) => range,
        None => (
            transform.index_to_world(0.0) * factor,
            transform.index_to_world(last) * factor,
        ),
    };
    let i0 = transform.world_to_index(v_lo / factor);
    let i1 = transform.world_to_index(v_hi / factor);
    if i0.is_nan() || i1.is_nan() {
        return Err(CubeError::DegenerateParameters(
            "velocity window does not map to spectral indices".into(),
        ));
    }
    let (i0, i1) = if i0 <= i1 { (i0, i1) } else { (i1, i0) };
    // Tolerance absorbs round-off of the transform at the cube ends.
    if i1 < -1e-6 || i0 > last + 1e-6 {
        return Err(CubeError::DegenerateParameters(format!(
            "velocity window ({v_lo}, {v_hi}) lies outside the cube"
        )));
    }
    let clamp = |i: f64| (i + 1e-6).floor().clamp(0.0, last) as usize;
    let (z_min, z_max) = (clamp(i0), clamp(i1));
    let span = (z_max - z_min).max(1) as f64;
    Ok(SpectralWindow {
        z_min,
        z_max,
        channel_width: nonzero_channel_width((v_hi - v_lo).abs() / span, transform, factor),
    })
}

/// Channel width for the mask path: full velocity extent over `nz`.
fn masked_channel_width(nz: usize, transform: &dyn AxisTransform, config: &MomentConfig) -> f64 {
    let factor = config.unit.to_km_s();
    let (v_lo, v_hi) = config.velocity_range.unwrap_or_else(|| {
        (
            transform.index_to_world(0.0) * factor,
            transform.index_to_world((nz.max(1) - 1) as f64) * factor,
        )
    });
    nonzero_channel_width((v_hi - v_lo).abs() / nz.max(1) as f64, transform, factor)
}

/// Falls back to the spacing of the first two channels when the velocity
/// extent collapses (single-channel cube or a zero-width window).
fn nonzero_channel_width(width: f64, transform: &dyn AxisTransform, factor: f64) -> f64 {
    if width > 0.0 {
        return width;
    }
    let native = (transform.index_to_world(1.0) - transform.index_to_world(0.0)).abs() * factor;
    warn!("velocity extent is zero, using native channel width {native} km/s");
    native
}

// =============================================================================
// Column reduction
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ColumnMoments<F> {
    zeroth: F,
    first: F,
    second: F,
}

#[inline]
fn guarded_ratio<F: CubeFloat>(num: F, den: F) -> F {
    if den.abs() < F::MOMENT_EPSILON || num.abs() < F::MOMENT_EPSILON {
        F::zero()
    } else {
        num / den
    }
}

/// Reduce one column given a selection predicate over `(z, value)`.
fn reduce_column<F, S>(
    values: impl Iterator<Item = (usize, F)> + Clone,
    coords: &[F],
    z_offset: usize,
    need_first: bool,
    need_second: bool,
    selected: S,
) -> ColumnMoments<F>
where
    F: CubeFloat,
    S: Fn(usize, F) -> bool,
{
    let mut sum = F::zero();
    let mut weighted = F::zero();
    for (z, v) in values.clone() {
        if v.is_nan() || !selected(z, v) {
            continue;
        }
        sum += v;
        if need_first {
            weighted += v * coords[z - z_offset];
        }
    }

    let first = if need_first {
        guarded_ratio(weighted, sum)
    } else {
        F::zero()
    };

    let second = if need_second {
        let mut spread = F::zero();
        for (z, v) in values {
            if v.is_nan() || !selected(z, v) {
                continue;
            }
            let d = coords[z - z_offset] - first;
            spread += v * d * d;
        }
        let ratio = guarded_ratio(spread, sum);
        if ratio > F::zero() {
            ratio.sqrt()
        } else {
            F::zero()
        }
    } else {
        F::zero()
    };

    ColumnMoments {
        zeroth: sum,
        first,
        second,
    }
}

// =============================================================================
// Entry point
// =============================================================================

/// Compute the requested moment maps of `input`.
///
/// With a mask the whole column is used wherever `mask > 0`; otherwise the
/// velocity window and intensity window of `config` select the voxels.
pub fn compute_moments<F: CubeFloat>(
    input: &ScalarVolume<F>,
    mask: Option<&MaskVolume>,
    config: &MomentConfig,
    transform: &dyn AxisTransform,
    progress: &ProgressToken,
) -> CubeResult<MomentMaps<F>> {
    config.validate().map_err(CubeError::DegenerateParameters)?;
    let grid = input.grid();
    if grid.is_empty() {
        return Err(CubeError::MissingInput("cube has no voxels".into()));
    }
    if let Some(mask) = mask {
        mask.ensure_matches(grid)?;
    }
    let gate = CancelGate::new(progress);
    gate.check()?;

    let (z_min, z_max, channel_width) = match mask {
        Some(_) => (
            0,
            grid.nz.saturating_sub(1),
            masked_channel_width(grid.nz, transform, config),
        ),
        None => {
            let window = resolve_spectral_window(grid.nz, transform, config)?;
            (window.z_min, window.z_max, window.channel_width)
        }
    };

    let factor = config.unit.to_km_s();
    let coords: Vec<F> = (z_min..=z_max)
        .map(|z| F::from_f64_c(transform.index_to_world(z as f64) * factor))
        .collect();
    let need_first = config.needs_first();
    let need_second = config.generate_second;
    let dv = F::from_f64_c(channel_width);
    let lo = F::from_f64_c(config.intensity_range.0);
    let hi = F::from_f64_c(config.intensity_range.1);

    let mut zeroth = Array2::<F>::zeros((grid.ny, grid.nx));
    let mut first = Array2::<F>::zeros((grid.ny, grid.nx));
    let mut second = Array2::<F>::zeros((grid.ny, grid.nx));
    let band = ProgressBand::new(progress, 1, 99, grid.ny * grid.nx);
    let window = input.data().slice(s![z_min..=z_max, .., ..]);

    Zip::indexed(&mut zeroth)
        .and(&mut first)
        .and(&mut second)
        .and(window.lanes(Axis(0)))
        .par_for_each(|(y, x), m0, m1, m2, lane| {
            if gate.poll() {
                return;
            }
            let values = lane.iter().copied().enumerate().map(|(i, v)| (i + z_min, v));
            let column = match mask {
                Some(mask) => {
                    let column_mask = mask.data().slice(s![.., y, x]);
                    reduce_column(values, &coords, z_min, need_first, need_second, |z, _| {
                        mask_positive(column_mask[z])
                    })
                }
                None => reduce_column(values, &coords, z_min, need_first, need_second, |_, v| {
                    v > lo && v < hi
                }),
            };
            *m0 = column.zeroth * dv;
            *m1 = column.first;
            *m2 = column.second;
            band.tick();
        });
    gate.finish_region()?;

    Ok(MomentMaps {
        zeroth: config.generate_zeroth.then_some(zeroth),
        first: need_first.then_some(first),
        second: need_second.then_some(second),
    })
}
