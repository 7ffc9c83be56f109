//! Box and Gaussian smoothing engine.
//!
//! Two paths share one weighting rule:
//! - Isotropic: three 1-D passes (X, then Y, then Z) ping-ponging between
//!   two owned buffers.
//! - Anisotropic: one fused pass over the full 3-D kernel footprint.
//!
//! Each output voxel is the weighted mean of the in-bounds, non-NaN taps,
//! divided by the summed weight of exactly those taps. Taps past an edge are
//! dropped (edge truncation), so a constant cube stays constant everywhere.
//! A NaN voxel stays NaN.

use log::debug;
use ndarray::{Array3, ArrayView1, ArrayViewMut1, Axis, Zip};
use rayon::prelude::*;

use crate::error::CubeResult;
use crate::float_trait::CubeFloat;
use crate::grid::{tap_window, CubeAxis};
use crate::kernels::{Kernel1D, Kernel3D};
use crate::progress::{CancelGate, ProgressBand, ProgressToken};
use crate::volume::ScalarVolume;

/// Cubes smaller than this run the 1-D passes on the calling thread.
const PARALLEL_VOXEL_THRESHOLD: usize = 32 * 32 * 32;

/// Status band of each separable pass.
const PASS_BANDS: [(i32, i32); 3] = [(1, 33), (33, 66), (66, 99)];

// =============================================================================
// Lane convolution
// =============================================================================

/// Truncated, renormalized convolution of one contiguous lane.
fn convolve_lane<F: CubeFloat>(input: &[F], weights: &[F], half: usize, output: &mut [F]) {
    let n = input.len();
    for (i, out) in output.iter_mut().enumerate() {
        if input[i].is_nan() {
            *out = F::nan();
            continue;
        }
        let mut acc = F::zero();
        let mut norm = F::zero();
        for t in tap_window(i, half, n) {
            let v = input[t];
            if v.is_nan() {
                continue;
            }
            let w = weights[t + half - i];
            acc += w * v;
            norm += w;
        }
        *out = if norm > F::zero() { acc / norm } else { F::nan() };
    }
}

/// Gather a strided lane, convolve it, scatter the result.
fn filter_lane<F: CubeFloat>(
    src: ArrayView1<'_, F>,
    mut dst: ArrayViewMut1<'_, F>,
    kernel: &Kernel1D<F>,
    scratch: &mut Vec<F>,
    out: &mut Vec<F>,
) {
    scratch.clear();
    scratch.extend(src.iter().copied());
    out.clear();
    out.resize(scratch.len(), F::zero());
    convolve_lane(scratch, kernel.weights(), kernel.half_width(), out);
    for (d, &v) in dst.iter_mut().zip(out.iter()) {
        *d = v;
    }
}

/// One 1-D pass along `axis` from `src` into `dst`.
fn run_pass<F: CubeFloat>(
    src: &Array3<F>,
    dst: &mut Array3<F>,
    axis: Axis,
    kernel: &Kernel1D<F>,
    gate: &CancelGate<'_>,
    band: &ProgressBand<'_>,
) {
    let zip = Zip::from(dst.lanes_mut(axis)).and(src.lanes(axis));
    if src.len() < PARALLEL_VOXEL_THRESHOLD {
        let mut scratch = Vec::new();
        let mut out = Vec::new();
        zip.for_each(|dst_lane, src_lane| {
            if gate.poll() {
                return;
            }
            filter_lane(src_lane, dst_lane, kernel, &mut scratch, &mut out);
            band.tick();
        });
    } else {
        zip.par_for_each(|dst_lane, src_lane| {
            if gate.poll() {
                return;
            }
            let mut scratch = Vec::with_capacity(src_lane.len());
            let mut out = Vec::with_capacity(src_lane.len());
            filter_lane(src_lane, dst_lane, kernel, &mut scratch, &mut out);
            band.tick();
        });
    }
}

// =============================================================================
// Public entry points
// =============================================================================

/// Isotropic path: X, Y then Z passes with the given per-axis kernels.
///
/// An identity kernel skips its pass and the data flows through unchanged.
pub fn convolve_separable<F: CubeFloat>(
    input: &ScalarVolume<F>,
    kernels: &[Kernel1D<F>; 3],
    progress: &ProgressToken,
) -> CubeResult<ScalarVolume<F>> {
    let gate = CancelGate::new(progress);
    gate.check()?;

    let mut current = input.data().clone();
    let mut next = Array3::<F>::zeros(current.raw_dim());
    let lanes_per_axis = |axis: CubeAxis| {
        let grid = input.grid();
        grid.len() / grid.extent(axis).max(1)
    };

    for (pass, axis) in CubeAxis::ALL.into_iter().enumerate() {
        let kernel = &kernels[axis.index()];
        let (start, end) = PASS_BANDS[pass];
        if kernel.is_identity() {
            debug!("{:?} pass skipped, kernel extent below threshold", axis);
            progress.report(end);
            continue;
        }
        debug!("{:?} pass with {} taps", axis, kernel.len());
        let band = ProgressBand::new(progress, start, end, lanes_per_axis(axis));
        run_pass(&current, &mut next, axis.array_axis(), kernel, &gate, &band);
        gate.finish_region()?;
        std::mem::swap(&mut current, &mut next);
    }

    Ok(ScalarVolume::new(current))
}

/// Anisotropic path: every voxel sums over the full 3-D footprint.
pub fn convolve_fused<F: CubeFloat>(
    input: &ScalarVolume<F>,
    kernel: &Kernel3D<F>,
    progress: &ProgressToken,
) -> CubeResult<ScalarVolume<F>> {
    let gate = CancelGate::new(progress);
    gate.check()?;

    let grid = input.grid();
    let src = input.view();
    let [hx, hy, hz] = kernel.half_widths();
    let band = ProgressBand::new(progress, 1, 99, grid.nz);
    let mut output = Array3::<F>::zeros(grid.shape());

    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, mut slab)| {
            if gate.poll() {
                return;
            }
            for y in 0..grid.ny {
                for x in 0..grid.nx {
                    let center = src[[z, y, x]];
                    if center.is_nan() {
                        slab[[y, x]] = F::nan();
                        continue;
                    }
                    let mut acc = F::zero();
                    let mut norm = F::zero();
                    for zz in tap_window(z, hz, grid.nz) {
                        let dz = zz as isize - z as isize;
                        for yy in tap_window(y, hy, grid.ny) {
                            let dy = yy as isize - y as isize;
                            for xx in tap_window(x, hx, grid.nx) {
                                let v = src[[zz, yy, xx]];
                                if v.is_nan() {
                                    continue;
                                }
                                let w = kernel.weight(xx as isize - x as isize, dy, dz);
                                acc += w * v;
                                norm += w;
                            }
                        }
                    }
                    slab[[y, x]] = if norm > F::zero() { acc / norm } else { F::nan() };
                }
            }
            band.tick();
        });

    gate.finish_region()?;
    Ok(ScalarVolume::new(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CubeError;
    use crate::exec::ExecConfig;
    use crate::grid::Grid;
    use crate::kernels::{box_kernel_1d, box_kernel_3d, gaussian_kernel_1d, gaussian_kernel_3d};
    use crate::progress::cancel_when_status_reaches;
    use rand::prelude::*;

    fn random_volume(grid: Grid, seed: u64) -> ScalarVolume<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        ScalarVolume::new(Array3::from_shape_fn(grid.shape(), |_| rng.gen::<f64>()))
    }

    fn box_kernels(p: [f64; 3]) -> [Kernel1D<f64>; 3] {
        [box_kernel_1d(p[0]), box_kernel_1d(p[1]), box_kernel_1d(p[2])]
    }

    #[test]
    fn test_convolve_lane_truncates_edges() {
        let input = [1.0f64, 2.0, 3.0, 4.0];
        let weights = [1.0f64; 3];
        let mut out = [0.0f64; 4];
        convolve_lane(&input, &weights, 1, &mut out);
        assert_eq!(out, [1.5, 2.0, 3.0, 3.5]);
    }

    #[test]
    fn test_convolve_lane_skips_nan_taps() {
        let input = [1.0f64, f64::NAN, 3.0];
        let weights = [1.0f64; 3];
        let mut out = [0.0f64; 3];
        convolve_lane(&input, &weights, 1, &mut out);
        assert_eq!(out[0], 1.0);
        assert!(out[1].is_nan());
        assert_eq!(out[2], 3.0);
    }

    #[test]
    fn test_null_box_is_identity() {
        let volume = random_volume(Grid::new(6, 5, 4), 11);
        let token = ProgressToken::new();
        let out = convolve_separable(&volume, &box_kernels([1.0; 3]), &token).unwrap();
        assert_eq!(out, volume);

        let fused = convolve_fused(&volume, &box_kernel_3d([1.0; 3]), &token).unwrap();
        assert_eq!(fused, volume);
    }

    #[test]
    fn test_constant_input_stays_constant() {
        let grid = Grid::new(7, 6, 5);
        let volume = ScalarVolume::filled(grid, 2.5f64);
        let token = ProgressToken::new();

        let iso = convolve_separable(&volume, &box_kernels([5.0; 3]), &token).unwrap();
        assert!(iso.data().iter().all(|&v| (v - 2.5).abs() < 1e-12));

        let gauss = [
            gaussian_kernel_1d(4.0, 3.0),
            gaussian_kernel_1d(4.0, 3.0),
            gaussian_kernel_1d(4.0, 3.0),
        ];
        let iso_g = convolve_separable(&volume, &gauss, &token).unwrap();
        assert!(iso_g.data().iter().all(|&v| (v - 2.5).abs() < 1e-12));

        let aniso = convolve_fused(&volume, &box_kernel_3d([3.0, 5.0, 1.0]), &token).unwrap();
        assert!(aniso.data().iter().all(|&v| (v - 2.5).abs() < 1e-12));

        let k = gaussian_kernel_3d([6.0, 3.0, 4.0], 3.0, [10.0, 20.0, 30.0]);
        let aniso_g = convolve_fused(&volume, &k, &token).unwrap();
        assert!(aniso_g.data().iter().all(|&v| (v - 2.5).abs() < 1e-12));
    }

    #[test]
    fn test_separable_matches_fused_box_in_interior() {
        let grid = Grid::new(9, 9, 9);
        let volume = random_volume(grid, 5);
        let token = ProgressToken::new();
        let iso = convolve_separable(&volume, &box_kernels([3.0; 3]), &token).unwrap();
        let fused = convolve_fused(&volume, &box_kernel_3d([3.0; 3]), &token).unwrap();
        for z in 1..8 {
            for y in 1..8 {
                for x in 1..8 {
                    let a = iso.get(x, y, z).unwrap();
                    let b = fused.get(x, y, z).unwrap();
                    assert!((a - b).abs() < 1e-12, "mismatch at ({x},{y},{z})");
                }
            }
        }
    }

    #[test]
    fn test_separable_matches_fused_everywhere() {
        // Edge renormalization factorizes for box kernels too.
        let grid = Grid::new(6, 5, 4);
        let volume = random_volume(grid, 17);
        let token = ProgressToken::new();
        let iso = convolve_separable(&volume, &box_kernels([3.0, 5.0, 3.0]), &token).unwrap();
        let fused = convolve_fused(&volume, &box_kernel_3d([3.0, 5.0, 3.0]), &token).unwrap();
        for (a, b) in iso.data().iter().zip(fused.data().iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_single_axis_pass_only_touches_that_axis() {
        let grid = Grid::new(5, 3, 3);
        let volume = ScalarVolume::new(Array3::from_shape_fn(grid.shape(), |(z, y, _)| {
            (10 * z + y) as f64
        }));
        let token = ProgressToken::new();
        let out = convolve_separable(&volume, &box_kernels([5.0, 0.0, 0.0]), &token).unwrap();
        assert_eq!(out, volume);
    }

    #[test]
    fn test_large_cube_parallel_path() {
        let grid = Grid::new(40, 36, 32);
        let volume = ScalarVolume::filled(grid, 1.0f32);
        let token = ProgressToken::new();
        let kernels = [
            box_kernel_1d::<f32>(3.0),
            box_kernel_1d(3.0),
            box_kernel_1d(3.0),
        ];
        let out = convolve_separable(&volume, &kernels, &token).unwrap();
        assert!(out.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(token.status() >= 66);
    }

    #[test]
    fn test_cancel_before_call() {
        let volume = random_volume(Grid::new(4, 4, 4), 1);
        let token = ProgressToken::new();
        token.request_cancel();
        let err = convolve_separable(&volume, &box_kernels([3.0; 3]), &token).unwrap_err();
        assert!(err.is_canceled());
        let err = convolve_fused(&volume, &box_kernel_3d([3.0; 3]), &token).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn test_cancel_between_separable_passes() {
        let volume = random_volume(Grid::new(64, 64, 64), 2);
        let token = ProgressToken::new();
        // Fires once the X pass has filled its band.
        let watcher = cancel_when_status_reaches(&token, PASS_BANDS[0].1);
        let result = ExecConfig::with_cores(2)
            .install(|| convolve_separable(&volume, &box_kernels([15.0; 3]), &token))
            .unwrap();
        watcher.join().unwrap();
        assert_eq!(result.unwrap_err(), CubeError::Canceled);
    }

    #[test]
    fn test_cancel_during_fused_pass() {
        let volume = random_volume(Grid::new(64, 64, 64), 3);
        let token = ProgressToken::new();
        let watcher = cancel_when_status_reaches(&token, 1);
        let result = ExecConfig::with_cores(2)
            .install(|| convolve_fused(&volume, &box_kernel_3d([9.0, 9.0, 7.0]), &token))
            .unwrap();
        watcher.join().unwrap();
        assert_eq!(result.unwrap_err(), CubeError::Canceled);
        assert!(token.is_cancel_requested());
    }
}
