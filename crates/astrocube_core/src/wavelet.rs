//! Wavelet lifting denoiser.
//!
//! The cube is zero-padded so every axis longer than one voxel is a multiple
//! of `2^levels`, transformed in place level by level, hard-thresholded while
//! the levels are inverted, then cropped back.
//!
//! At level `l` only samples on the `h = 2^(l-1)` lattice take part. Along an
//! axis, lattice samples alternate even (approximation) and odd (detail):
//!
//! ```text
//! Haar      predict  d[k] = o[k] - e[k]
//!           update   e[k] += d[k] / 2
//! Le Gall   predict  d[k] = o[k] - (e[k] + e[k+1]) / 2     (e[k+1] -> e[k] at the right edge)
//! 5/3       update   e[k] += (d[k-1] + d[k]) / 4           (skipped for k = 0)
//! ```
//!
//! Before a level is inverted, every detail coefficient of that level with
//! magnitude below `threshold_multiplier * noise_sigma` is set to zero.
//! NaN voxels are lifted as zero and restored to NaN in the output.

use ndarray::{s, Array3, ArrayViewMut1, ArrayViewMut3, Zip};

use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::grid::{CubeAxis, Grid};
use crate::progress::{CancelGate, ProgressToken};
use crate::volume::ScalarVolume;

/// Deepest decomposition accepted.
pub const MAX_LEVELS: usize = 12;

pub const DEFAULT_LEVELS: usize = 3;
pub const DEFAULT_THRESHOLD_MULTIPLIER: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveletKind {
    #[default]
    Haar,
    LeGall53,
}

/// Parameters of one wavelet denoising run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveletParams {
    pub kind: WaveletKind,
    pub levels: usize,
    pub threshold_multiplier: f64,
    /// Noise sigma the threshold is scaled by.
    pub noise_sigma: f64,
}

impl Default for WaveletParams {
    fn default() -> Self {
        Self {
            kind: WaveletKind::Haar,
            levels: DEFAULT_LEVELS,
            threshold_multiplier: DEFAULT_THRESHOLD_MULTIPLIER,
            noise_sigma: 0.0,
        }
    }
}

impl WaveletParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.levels == 0 || self.levels > MAX_LEVELS {
            return Err(format!(
                "levels must be in 1..={}, got {}",
                MAX_LEVELS, self.levels
            ));
        }
        if !(self.threshold_multiplier >= 0.0) || !self.threshold_multiplier.is_finite() {
            return Err("threshold_multiplier must be finite and >= 0".to_string());
        }
        if !(self.noise_sigma >= 0.0) || !self.noise_sigma.is_finite() {
            return Err("noise_sigma must be finite and >= 0".to_string());
        }
        Ok(())
    }

    /// Absolute detail threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold_multiplier * self.noise_sigma
    }
}

// =============================================================================
// 1-D lifting on a lattice lane
// =============================================================================

fn forward_lane<F: CubeFloat>(lane: &mut ArrayViewMut1<'_, F>, kind: WaveletKind) {
    let n = lane.len();
    let pairs = n / 2;
    let half = F::from_f64_c(0.5);
    match kind {
        WaveletKind::Haar => {
            for k in 0..pairs {
                let d = lane[2 * k + 1] - lane[2 * k];
                lane[2 * k + 1] = d;
                lane[2 * k] += d * half;
            }
        }
        WaveletKind::LeGall53 => {
            let quarter = F::from_f64_c(0.25);
            for k in 0..pairs {
                let left = lane[2 * k];
                let right = if 2 * k + 2 < n { lane[2 * k + 2] } else { left };
                lane[2 * k + 1] -= (left + right) * half;
            }
            for k in 1..pairs {
                let update = (lane[2 * k - 1] + lane[2 * k + 1]) * quarter;
                lane[2 * k] += update;
            }
        }
    }
}

fn inverse_lane<F: CubeFloat>(lane: &mut ArrayViewMut1<'_, F>, kind: WaveletKind) {
    let n = lane.len();
    let pairs = n / 2;
    let half = F::from_f64_c(0.5);
    match kind {
        WaveletKind::Haar => {
            for k in 0..pairs {
                let d = lane[2 * k + 1];
                lane[2 * k] -= d * half;
                lane[2 * k + 1] = d + lane[2 * k];
            }
        }
        WaveletKind::LeGall53 => {
            let quarter = F::from_f64_c(0.25);
            for k in 1..pairs {
                let update = (lane[2 * k - 1] + lane[2 * k + 1]) * quarter;
                lane[2 * k] -= update;
            }
            for k in 0..pairs {
                let left = lane[2 * k];
                let right = if 2 * k + 2 < n { lane[2 * k + 2] } else { left };
                lane[2 * k + 1] += (left + right) * half;
            }
        }
    }
}

// =============================================================================
// Level transforms
// =============================================================================

/// Axes that get lifted; singleton axes are left alone.
fn active_axes(grid: Grid) -> impl Iterator<Item = CubeAxis> {
    CubeAxis::ALL
        .into_iter()
        .filter(move |&axis| grid.extent(axis) > 1)
}

/// View of the lattice samples taking part in `level` (1-based).
fn lattice_view<F: CubeFloat>(data: &mut Array3<F>, level: usize) -> ArrayViewMut3<'_, F> {
    let h = 1isize << level.saturating_sub(1);
    data.slice_mut(s![..;h, ..;h, ..;h])
}

/// Forward X, Y, Z lifting of one level.
pub fn forward_level<F: CubeFloat>(data: &mut Array3<F>, kind: WaveletKind, level: usize) {
    let grid = Grid::from_shape(data.shape());
    let mut view = lattice_view(data, level);
    for axis in active_axes(grid) {
        Zip::from(view.lanes_mut(axis.array_axis()))
            .par_for_each(|mut lane| forward_lane(&mut lane, kind));
    }
}

/// Zero the small detail coefficients of one level, then undo its Z, Y, X lifting.
pub fn inverse_level<F: CubeFloat>(
    data: &mut Array3<F>,
    kind: WaveletKind,
    level: usize,
    threshold: F,
) {
    let grid = Grid::from_shape(data.shape());
    let mut view = lattice_view(data, level);
    if threshold > F::zero() {
        Zip::indexed(&mut view).par_for_each(|(z, y, x), v| {
            let is_detail = x % 2 == 1 || y % 2 == 1 || z % 2 == 1;
            if is_detail && v.abs() < threshold {
                *v = F::zero();
            }
        });
    }
    let axes: Vec<CubeAxis> = active_axes(grid).collect();
    for axis in axes.into_iter().rev() {
        Zip::from(view.lanes_mut(axis.array_axis()))
            .par_for_each(|mut lane| inverse_lane(&mut lane, kind));
    }
}

// =============================================================================
// Padding
// =============================================================================

/// Zero-filled copy grown to `padded`; NaN voxels become zero.
fn pad_volume<F: CubeFloat>(input: &ScalarVolume<F>, padded: Grid) -> Array3<F> {
    let grid = input.grid();
    let mut buffer = Array3::<F>::zeros(padded.shape());
    buffer
        .slice_mut(s![..grid.nz, ..grid.ny, ..grid.nx])
        .zip_mut_with(input.data(), |dst, &src| {
            *dst = if src.is_nan() { F::zero() } else { src };
        });
    buffer
}

/// Lift, threshold and reconstruct `input`.
pub fn apply_wavelet_threshold<F: CubeFloat>(
    input: &ScalarVolume<F>,
    params: &WaveletParams,
    progress: &ProgressToken,
) -> CubeResult<ScalarVolume<F>> {
    params.validate().map_err(CubeError::DegenerateParameters)?;
    let gate = CancelGate::new(progress);
    gate.check()?;

    let grid = input.grid();
    let padded = grid.padded_to_multiple(1 << params.levels);
    let mut buffer = pad_volume(input, padded);
    let threshold = F::from_f64_c(params.threshold());
    let levels = params.levels as i32;

    for level in 1..=params.levels {
        gate.check()?;
        forward_level(&mut buffer, params.kind, level);
        progress.report(level as i32 * 50 / levels);
    }
    for level in (1..=params.levels).rev() {
        gate.check()?;
        inverse_level(&mut buffer, params.kind, level, threshold);
        progress.report(50 + (levels - level as i32 + 1) * 50 / levels);
    }

    let mut output = buffer
        .slice(s![..grid.nz, ..grid.ny, ..grid.nx])
        .to_owned();
    output.zip_mut_with(input.data(), |dst, &src| {
        if src.is_nan() {
            *dst = src;
        }
    });
    Ok(ScalarVolume::new(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use rand::prelude::*;

    fn random_array(shape: (usize, usize, usize), seed: u64) -> Array3<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn(shape, |_| rng.gen_range(-10.0..10.0))
    }

    fn forward_transform(data: &mut Array3<f64>, kind: WaveletKind, levels: usize) {
        for level in 1..=levels {
            forward_level(data, kind, level);
        }
    }

    fn inverse_transform(data: &mut Array3<f64>, kind: WaveletKind, levels: usize, threshold: f64) {
        for level in (1..=levels).rev() {
            inverse_level(data, kind, level, threshold);
        }
    }

    fn max_abs_diff(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_haar_lane_values() {
        let mut lane = Array1::from(vec![4.0f64, 6.0, 10.0, 2.0]);
        forward_lane(&mut lane.view_mut(), WaveletKind::Haar);
        assert_eq!(lane.to_vec(), vec![5.0, 2.0, 6.0, -8.0]);
        inverse_lane(&mut lane.view_mut(), WaveletKind::Haar);
        assert_eq!(lane.to_vec(), vec![4.0, 6.0, 10.0, 2.0]);
    }

    #[test]
    fn test_legall_lane_kills_linear_ramp_details() {
        let mut lane = Array1::from((0..8).map(|i| i as f64).collect::<Vec<_>>());
        forward_lane(&mut lane.view_mut(), WaveletKind::LeGall53);
        // Interior odd samples of a ramp are predicted exactly.
        for k in 0..3 {
            assert!(lane[2 * k + 1].abs() < 1e-12);
        }
        // Right edge replicates the left neighbour: d = 7 - 6.
        assert!((lane[7] - 1.0).abs() < 1e-12);
        // First even sample is not updated.
        assert_eq!(lane[0], 0.0);
    }

    #[test]
    fn test_round_trip_zero_threshold() {
        for kind in [WaveletKind::Haar, WaveletKind::LeGall53] {
            for levels in 1..=3 {
                let original = random_array((8, 16, 8), 3 + levels as u64);
                let mut data = original.clone();
                forward_transform(&mut data, kind, levels);
                assert!(max_abs_diff(&data, &original) > 1e-3);
                inverse_transform(&mut data, kind, levels, 0.0);
                assert!(max_abs_diff(&data, &original) < 1e-9, "{kind:?} levels {levels}");
            }
        }
    }

    #[test]
    fn test_apply_round_trip_with_padding() {
        let original = random_array((5, 7, 9), 21);
        let volume = ScalarVolume::new(original.clone());
        let token = ProgressToken::new();
        for kind in [WaveletKind::Haar, WaveletKind::LeGall53] {
            let params = WaveletParams {
                kind,
                levels: 3,
                threshold_multiplier: 0.0,
                noise_sigma: 1.0,
            };
            let out = apply_wavelet_threshold(&volume, &params, &token).unwrap();
            assert_eq!(out.dims(), [9, 7, 5]);
            assert!(max_abs_diff(out.data(), &original) < 1e-9);
        }
        assert_eq!(token.status(), 99);
    }

    #[test]
    fn test_singleton_axes_are_not_lifted() {
        let original = random_array((1, 1, 16), 9);
        let mut data = original.clone();
        forward_transform(&mut data, WaveletKind::Haar, 4);
        inverse_transform(&mut data, WaveletKind::Haar, 4, 0.0);
        assert!(max_abs_diff(&data, &original) < 1e-12);
        assert_eq!(Grid::new(16, 1, 1).padded_to_multiple(16).dims(), [16, 1, 1]);
    }

    #[test]
    fn test_threshold_removes_small_noise_keeps_constant() {
        let mut rng = StdRng::seed_from_u64(5);
        let shape = (8, 8, 8);
        let noisy = Array3::from_shape_fn(shape, |_| 10.0_f64 + rng.gen_range(-0.01..0.01));
        let volume = ScalarVolume::new(noisy);
        let params = WaveletParams {
            kind: WaveletKind::Haar,
            levels: 3,
            threshold_multiplier: 3.0,
            noise_sigma: 1.0,
        };
        let out = apply_wavelet_threshold(&volume, &params, &ProgressToken::new()).unwrap();
        let mean = out.data().mean().unwrap();
        assert!(out.data().iter().all(|v| (v - mean).abs() < 1e-9));
        assert!((mean - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_nan_voxels_restored() {
        let mut data = random_array((4, 4, 4), 2);
        data[[1, 2, 3]] = f64::NAN;
        let volume = ScalarVolume::new(data);
        let params = WaveletParams {
            threshold_multiplier: 0.0,
            ..WaveletParams::default()
        };
        let out = apply_wavelet_threshold(&volume, &params, &ProgressToken::new()).unwrap();
        assert!(out.get(3, 2, 1).unwrap().is_nan());
        assert_eq!(out.data().iter().filter(|v| v.is_nan()).count(), 1);
    }

    #[test]
    fn test_validation_and_cancel() {
        let volume = ScalarVolume::new(random_array((4, 4, 4), 1));
        let bad = WaveletParams {
            levels: 0,
            ..WaveletParams::default()
        };
        let err = apply_wavelet_threshold(&volume, &bad, &ProgressToken::new()).unwrap_err();
        assert!(matches!(err, CubeError::DegenerateParameters(_)));

        let token = ProgressToken::new();
        token.request_cancel();
        let err = apply_wavelet_threshold(&volume, &WaveletParams::default(), &token).unwrap_err();
        assert!(err.is_canceled());
    }
}
