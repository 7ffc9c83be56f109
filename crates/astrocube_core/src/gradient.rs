//! Intensity-driven anisotropic diffusion.
//!
//! Explicit Perona-Malik style scheme. Each step, for every voxel `v`:
//!
//! ```text
//! c_a  = ((v[a-1] - v) + (v[a+1] - v)) * weight_a      for a in {x, y, z}
//! norm = 1 + v^2 / (K * sigma)^2
//! v'   = v + dt * (c_x + c_y + c_z) / norm
//! ```
//!
//! Neighbours past an edge are replaced by the voxel itself, so that side of
//! the stencil contributes nothing. Bright structure (large `v` relative to
//! the noise) diffuses slowly; the noise floor is smoothed strongly.

use log::debug;
use ndarray::{Array3, Axis};
use rayon::prelude::*;

use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::grid::clamped_neighbor;
use crate::noise_estimation::estimate_noise;
use crate::progress::{CancelGate, ProgressToken};
use crate::volume::ScalarVolume;

/// Default explicit time step.
pub const DEFAULT_TIME_STEP: f64 = 0.0325;

/// Default edge-stopping factor applied to the noise sigma.
pub const DEFAULT_K: f64 = 1.5;

/// Default number of diffusion steps.
pub const DEFAULT_ITERATIONS: usize = 20;

/// Parameters of one diffusion run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffusionParams {
    /// Per-axis conductance weights `[cx, cy, cz]`.
    pub weights: [f64; 3],
    pub k: f64,
    /// Noise sigma of the input cube.
    pub noise_sigma: f64,
    pub time_step: f64,
    pub iterations: usize,
    /// Subtract the background mean of the result.
    pub dc_correction: bool,
}

impl Default for DiffusionParams {
    fn default() -> Self {
        Self {
            weights: [5.0; 3],
            k: DEFAULT_K,
            noise_sigma: 1.0,
            time_step: DEFAULT_TIME_STEP,
            iterations: DEFAULT_ITERATIONS,
            dc_correction: true,
        }
    }
}

impl DiffusionParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.iterations == 0 {
            return Err("iterations must be > 0".to_string());
        }
        if !(self.time_step > 0.0) || !self.time_step.is_finite() {
            return Err("time_step must be a positive finite number".to_string());
        }
        let scale = self.k * self.noise_sigma;
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(format!(
                "K * noise_sigma must be positive and finite, got {}",
                scale
            ));
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("axis weights must be finite and >= 0".to_string());
        }
        Ok(())
    }
}

/// One explicit step from `src` into `dst`.
fn diffusion_step<F: CubeFloat>(
    src: &Array3<F>,
    dst: &mut Array3<F>,
    weights: [F; 3],
    dt: F,
    noise2: F,
    gate: &CancelGate<'_>,
) {
    let (nz, ny, nx) = src.dim();
    dst.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, mut slab)| {
            if gate.poll() {
                return;
            }
            let z1 = clamped_neighbor(z, -1, nz);
            let z2 = clamped_neighbor(z, 1, nz);
            for y in 0..ny {
                let y1 = clamped_neighbor(y, -1, ny);
                let y2 = clamped_neighbor(y, 1, ny);
                for x in 0..nx {
                    let x1 = clamped_neighbor(x, -1, nx);
                    let x2 = clamped_neighbor(x, 1, nx);
                    let v = src[[z, y, x]];
                    let stencil = [
                        src[[z, y, x1]],
                        src[[z, y, x2]],
                        src[[z, y1, x]],
                        src[[z, y2, x]],
                        src[[z1, y, x]],
                        src[[z2, y, x]],
                    ];
                    if v.is_nan() || stencil.iter().any(|s| s.is_nan()) {
                        slab[[y, x]] = v;
                        continue;
                    }
                    let cx = ((stencil[0] - v) + (stencil[1] - v)) * weights[0];
                    let cy = ((stencil[2] - v) + (stencil[3] - v)) * weights[1];
                    let cz = ((stencil[4] - v) + (stencil[5] - v)) * weights[2];
                    let norm = F::one() + v * v / noise2;
                    slab[[y, x]] = v + dt * (cx + cy + cz) / norm;
                }
            }
        });
}

/// Run `params.iterations` diffusion steps, then remove the background DC level.
pub fn apply_gradient_diffusion<F: CubeFloat>(
    input: &ScalarVolume<F>,
    params: &DiffusionParams,
    progress: &ProgressToken,
) -> CubeResult<ScalarVolume<F>> {
    params.validate().map_err(CubeError::DegenerateParameters)?;
    let gate = CancelGate::new(progress);

    let weights = params.weights.map(F::from_f64_c);
    let dt = F::from_f64_c(params.time_step);
    let noise2 = F::from_f64_c((params.noise_sigma * params.k).powi(2));

    let mut current = input.data().clone();
    let mut next = Array3::<F>::zeros(current.raw_dim());

    for i in 0..params.iterations {
        gate.check()?;
        diffusion_step(&current, &mut next, weights, dt, noise2, &gate);
        gate.finish_region()?;
        std::mem::swap(&mut current, &mut next);
        progress.report(((i + 1) * 100 / params.iterations) as i32);
    }

    let mut result = ScalarVolume::new(current);
    if params.dc_correction {
        let background = estimate_noise(&result).mean;
        debug!("diffusion DC correction: subtracting {}", background);
        result.view_mut().mapv_inplace(|v| v - background);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::progress::cancel_when_status_reaches;
    use rand::prelude::*;
    use rand_distr::Normal;

    fn params(iterations: usize) -> DiffusionParams {
        DiffusionParams {
            weights: [1.0; 3],
            k: 1.5,
            noise_sigma: 1.0,
            time_step: 0.05,
            iterations,
            dc_correction: false,
        }
    }

    #[test]
    fn test_validate() {
        assert!(DiffusionParams::default().validate().is_ok());
        assert!(params(0).validate().is_err());
        let mut p = params(3);
        p.noise_sigma = 0.0;
        assert!(p.validate().is_err());
        p = params(3);
        p.time_step = -1.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_constant_cube_is_fixed_point() {
        let volume = ScalarVolume::filled(Grid::new(5, 5, 5), 3.0f64);
        let token = ProgressToken::new();
        let out = apply_gradient_diffusion(&volume, &params(10), &token).unwrap();
        assert_eq!(out, volume);
        assert_eq!(token.status(), 99);
    }

    #[test]
    fn test_dc_correction_removes_background() {
        let volume = ScalarVolume::filled(Grid::new(4, 4, 10), 2.0f32);
        let token = ProgressToken::new();
        let mut p = params(2);
        p.dc_correction = true;
        let out = apply_gradient_diffusion(&volume, &p, &token).unwrap();
        assert!(out.data().iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_single_step_matches_hand_computation() {
        // Impulse of height 1 at the centre of a 3x3x3 cube of zeros.
        let grid = Grid::new(3, 3, 3);
        let mut data = Array3::<f64>::zeros(grid.shape());
        data[[1, 1, 1]] = 1.0;
        let volume = ScalarVolume::new(data);
        let token = ProgressToken::new();
        let out = apply_gradient_diffusion(&volume, &params(1), &token).unwrap();

        let noise2 = 1.5f64 * 1.5;
        let norm = 1.0 + 1.0 / noise2;
        let expected_center = 1.0 + 0.05 * (-6.0) / norm;
        assert!((out.get(1, 1, 1).unwrap() - expected_center).abs() < 1e-12);
        // Face neighbour: one incoming unit difference, norm 1 at v = 0.
        assert!((out.get(2, 1, 1).unwrap() - 0.05).abs() < 1e-12);
        assert_eq!(out.get(0, 0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_smoothing_reduces_noise() {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let grid = Grid::new(16, 16, 16);
        let data = Array3::from_shape_fn(grid.shape(), |_| normal.sample(&mut rng));
        let volume = ScalarVolume::new(data);
        let token = ProgressToken::new();
        let out = apply_gradient_diffusion(&volume, &params(10), &token).unwrap();
        let var = |v: &ScalarVolume<f64>| v.data().iter().map(|x| x * x).sum::<f64>();
        assert!(var(&out) < 0.5 * var(&volume));
    }

    #[test]
    fn test_nan_neighbourhood_is_carried_through() {
        let grid = Grid::new(3, 1, 1);
        let volume = ScalarVolume::new(
            Array3::from_shape_vec(grid.shape(), vec![1.0f64, f64::NAN, 5.0]).unwrap(),
        );
        let token = ProgressToken::new();
        let out = apply_gradient_diffusion(&volume, &params(1), &token).unwrap();
        assert_eq!(out.get(0, 0, 0), Some(1.0));
        assert!(out.get(1, 0, 0).unwrap().is_nan());
        assert_eq!(out.get(2, 0, 0), Some(5.0));
    }

    #[test]
    fn test_cancel_stops_before_dc_correction() {
        let volume = ScalarVolume::filled(Grid::new(4, 4, 4), 1.0f64);
        let token = ProgressToken::new();
        token.request_cancel();
        let err = apply_gradient_diffusion(&volume, &params(5), &token).unwrap_err();
        assert_eq!(err, CubeError::Canceled);
    }

    #[test]
    fn test_cancel_while_iterating() {
        // Far more steps than could finish before the first progress report.
        let volume = ScalarVolume::filled(Grid::new(16, 16, 16), 1.0f32);
        let token = ProgressToken::new();
        let watcher = cancel_when_status_reaches(&token, 1);
        let err = apply_gradient_diffusion(&volume, &params(1_000_000), &token).unwrap_err();
        watcher.join().unwrap();
        assert_eq!(err, CubeError::Canceled);
    }
}
