//! Smoothing filter dispatch.
//!
//! Picks the engine and builds its parameters from one [`SmoothingConfig`]:
//! - **Box / Gaussian**: separable X, Y, Z passes when the per-axis extents
//!   agree (and, for the Gaussian, no rotation is set), otherwise one fused
//!   3-D kernel pass
//! - **Gradient**: intensity-driven diffusion
//! - **Wavelet**: lifting transform with detail thresholding

use log::debug;

use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::gradient::{
    apply_gradient_diffusion, DiffusionParams, DEFAULT_ITERATIONS, DEFAULT_K, DEFAULT_TIME_STEP,
};
use crate::kernels::{
    box_kernel_1d, box_kernel_3d, gaussian_kernel_1d, gaussian_kernel_3d, AXIS_SKIP_EPSILON,
    DEFAULT_GAUSSIAN_ACCURACY,
};
use crate::noise_estimation::NoiseEstimator;
use crate::progress::ProgressToken;
use crate::separable::{convolve_fused, convolve_separable};
use crate::volume::ScalarVolume;
use crate::wavelet::{
    apply_wavelet_threshold, WaveletKind, WaveletParams, DEFAULT_LEVELS,
    DEFAULT_THRESHOLD_MULTIPLIER,
};

// =============================================================================
// Constants
// =============================================================================

/// Default per-axis extent in voxels
const DEFAULT_AXIS_PARAM: f64 = 5.0;

/// Tolerance below which two axis extents count as equal
const ISOTROPY_TOLERANCE: f64 = 0.001;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmoothingFilter {
    #[default]
    Box,
    Gaussian,
    Gradient,
    Wavelet,
}

impl SmoothingFilter {
    /// Host filter index: 0 box, 1 Gaussian, 2 gradient, 3 wavelet.
    pub fn from_index(index: i32) -> CubeResult<Self> {
        match index {
            0 => Ok(SmoothingFilter::Box),
            1 => Ok(SmoothingFilter::Gaussian),
            2 => Ok(SmoothingFilter::Gradient),
            3 => Ok(SmoothingFilter::Wavelet),
            other => Err(CubeError::DegenerateParameters(format!(
                "unknown smoothing filter index {other}"
            ))),
        }
    }
}

/// Configuration of one smoothing run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingConfig {
    pub filter: SmoothingFilter,
    /// Per-axis extent `[x, y, z]`: box width, Gaussian FWHM or gradient
    /// conductance. Default: 5
    pub params: [f64; 3],
    /// Gaussian support in sigmas. Default: 3
    pub accuracy: f64,
    /// Gaussian rotation about X, Y, Z in degrees. Default: 0
    pub rotations: [f64; 3],
    /// Gradient time step. Default: 0.0325
    pub time_step: f64,
    /// Gradient edge-stopping factor. Default: 1.5
    pub k: f64,
    /// Gradient iterations. Default: 20
    pub iterations: usize,
    pub wavelet_kind: WaveletKind,
    /// Wavelet decomposition depth. Default: 3
    pub wavelet_levels: usize,
    /// Detail threshold in noise sigmas. Default: 3
    pub threshold_multiplier: f64,
    /// Noise sigma for gradient and wavelet; `None` estimates it from the cube.
    pub noise_sigma: Option<f64>,
    /// Estimator used when `noise_sigma` is `None`. Default: edge-slab std
    pub noise_estimator: NoiseEstimator,
    /// Worker threads, 0 = all. Default: 0
    pub cores: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            filter: SmoothingFilter::Box,
            params: [DEFAULT_AXIS_PARAM; 3],
            accuracy: DEFAULT_GAUSSIAN_ACCURACY,
            rotations: [0.0; 3],
            time_step: DEFAULT_TIME_STEP,
            k: DEFAULT_K,
            iterations: DEFAULT_ITERATIONS,
            wavelet_kind: WaveletKind::Haar,
            wavelet_levels: DEFAULT_LEVELS,
            threshold_multiplier: DEFAULT_THRESHOLD_MULTIPLIER,
            noise_sigma: None,
            noise_estimator: NoiseEstimator::default(),
            cores: 0,
        }
    }
}

impl SmoothingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.params.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(format!("axis parameters must be finite and >= 0, got {:?}", self.params));
        }
        if self.rotations.iter().any(|r| !r.is_finite()) {
            return Err("rotations must be finite".to_string());
        }
        match self.filter {
            SmoothingFilter::Box => {}
            SmoothingFilter::Gaussian => {
                if !(self.accuracy > 0.0) || !self.accuracy.is_finite() {
                    return Err("accuracy must be a positive finite number".to_string());
                }
            }
            SmoothingFilter::Gradient | SmoothingFilter::Wavelet => {
                if let Some(sigma) = self.noise_sigma {
                    if !(sigma >= 0.0) || !sigma.is_finite() {
                        return Err(format!("noise sigma must be finite and >= 0, got {sigma}"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Equal extents on all three axes.
    pub fn is_isotropic(&self) -> bool {
        let [px, py, pz] = self.params;
        (px - py).abs() < ISOTROPY_TOLERANCE && (py - pz).abs() < ISOTROPY_TOLERANCE
    }

    fn is_rotated(&self) -> bool {
        self.rotations.iter().any(|r| r.abs() > AXIS_SKIP_EPSILON)
    }

    fn diffusion_params(&self, noise_sigma: f64) -> DiffusionParams {
        DiffusionParams {
            weights: self.params,
            k: self.k,
            noise_sigma,
            time_step: self.time_step,
            iterations: self.iterations,
            dc_correction: true,
        }
    }

    fn wavelet_params(&self, noise_sigma: f64) -> WaveletParams {
        WaveletParams {
            kind: self.wavelet_kind,
            levels: self.wavelet_levels,
            threshold_multiplier: self.threshold_multiplier,
            noise_sigma,
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Smooth `input` with the filter selected in `config`.
///
/// Runs on the calling thread's rayon pool; thread count selection is left
/// to the orchestration layer.
pub fn apply_smoothing<F: CubeFloat>(
    input: &ScalarVolume<F>,
    config: &SmoothingConfig,
    progress: &ProgressToken,
) -> CubeResult<ScalarVolume<F>> {
    config.validate().map_err(CubeError::DegenerateParameters)?;
    let noise_sigma = || {
        config.noise_sigma.unwrap_or_else(|| {
            let sigma = config.noise_estimator.sigma(input).to_f64_c();
            debug!("estimated noise sigma {} ({:?})", sigma, config.noise_estimator);
            sigma
        })
    };

    match config.filter {
        SmoothingFilter::Box if config.is_isotropic() => {
            let kernels = config.params.map(box_kernel_1d::<F>);
            convolve_separable(input, &kernels, progress)
        }
        SmoothingFilter::Box => convolve_fused(input, &box_kernel_3d(config.params), progress),
        SmoothingFilter::Gaussian if config.is_isotropic() && !config.is_rotated() => {
            let kernels = config
                .params
                .map(|p| gaussian_kernel_1d::<F>(p, config.accuracy));
            convolve_separable(input, &kernels, progress)
        }
        SmoothingFilter::Gaussian => {
            let kernel = gaussian_kernel_3d(config.params, config.accuracy, config.rotations);
            debug!("fused Gaussian kernel with {} taps", kernel.tap_count());
            convolve_fused(input, &kernel, progress)
        }
        SmoothingFilter::Gradient => {
            let params = config.diffusion_params(noise_sigma());
            apply_gradient_diffusion(input, &params, progress)
        }
        SmoothingFilter::Wavelet => {
            let params = config.wavelet_params(noise_sigma());
            apply_wavelet_threshold(input, &params, progress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use ndarray::Array3;
    use rand::prelude::*;
    use rand_distr::Normal;

    fn noisy_volume(grid: Grid, seed: u64) -> ScalarVolume<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        ScalarVolume::new(Array3::from_shape_fn(grid.shape(), |_| normal.sample(&mut rng)))
    }

    fn config(filter: SmoothingFilter, params: [f64; 3]) -> SmoothingConfig {
        SmoothingConfig {
            filter,
            params,
            ..SmoothingConfig::default()
        }
    }

    #[test]
    fn test_filter_index() {
        assert_eq!(SmoothingFilter::from_index(1).unwrap(), SmoothingFilter::Gaussian);
        assert_eq!(SmoothingFilter::from_index(3).unwrap(), SmoothingFilter::Wavelet);
        assert!(SmoothingFilter::from_index(4).is_err());
    }

    #[test]
    fn test_isotropy() {
        assert!(config(SmoothingFilter::Box, [3.0, 3.0005, 3.0]).is_isotropic());
        assert!(!config(SmoothingFilter::Box, [3.0, 3.0, 5.0]).is_isotropic());
    }

    #[test]
    fn test_validate() {
        assert!(SmoothingConfig::default().validate().is_ok());
        assert!(config(SmoothingFilter::Box, [-1.0, 1.0, 1.0]).validate().is_err());
        let mut c = config(SmoothingFilter::Gaussian, [1.0; 3]);
        c.accuracy = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_null_box_is_identity() {
        let volume = noisy_volume(Grid::new(6, 5, 4), 1);
        let out = apply_smoothing(
            &volume,
            &config(SmoothingFilter::Box, [1.0; 3]),
            &ProgressToken::new(),
        )
        .unwrap();
        assert_eq!(out, volume);

        let single = ScalarVolume::new(volume.data().mapv(|v| v as f32));
        let out = apply_smoothing(
            &single,
            &config(SmoothingFilter::Box, [1.0; 3]),
            &ProgressToken::new(),
        )
        .unwrap();
        assert_eq!(out, single);
    }

    #[test]
    fn test_constant_input_is_preserved_by_every_convolution_path() {
        let grid = Grid::new(7, 6, 5);
        let volume = ScalarVolume::filled(grid, 2.5f64);
        let cases = [
            config(SmoothingFilter::Box, [3.0; 3]),
            config(SmoothingFilter::Box, [3.0, 5.0, 1.0]),
            config(SmoothingFilter::Gaussian, [4.0; 3]),
            config(SmoothingFilter::Gaussian, [2.0, 6.0, 3.0]),
            SmoothingConfig {
                rotations: [30.0, 0.0, 45.0],
                ..config(SmoothingFilter::Gaussian, [4.0, 4.0, 4.0])
            },
        ];
        for case in cases {
            let out = apply_smoothing(&volume, &case, &ProgressToken::new()).unwrap();
            for v in out.data().iter() {
                assert!((v - 2.5).abs() < 1e-12, "{:?} gave {}", case.filter, v);
            }
        }
    }

    #[test]
    fn test_gaussian_reduces_noise() {
        let volume = noisy_volume(Grid::new(16, 16, 16), 5);
        let out = apply_smoothing(
            &volume,
            &config(SmoothingFilter::Gaussian, [4.0; 3]),
            &ProgressToken::new(),
        )
        .unwrap();
        let power = |v: &ScalarVolume<f64>| v.data().iter().map(|x| x * x).sum::<f64>();
        assert!(power(&out) < 0.2 * power(&volume));
    }

    #[test]
    fn test_gradient_and_wavelet_dispatch() {
        let volume = noisy_volume(Grid::new(8, 8, 20), 9);
        let token = ProgressToken::new();
        let gradient = SmoothingConfig {
            iterations: 3,
            ..config(SmoothingFilter::Gradient, [1.0; 3])
        };
        let out = apply_smoothing(&volume, &gradient, &token).unwrap();
        assert_eq!(out.dims(), volume.dims());

        let wavelet = SmoothingConfig {
            noise_sigma: Some(1.0),
            threshold_multiplier: 0.0,
            ..config(SmoothingFilter::Wavelet, [1.0; 3])
        };
        let out = apply_smoothing(&volume, &wavelet, &token).unwrap();
        let diff = out
            .data()
            .iter()
            .zip(volume.data().iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(diff < 1e-9);
    }

    #[test]
    fn test_mad_estimator_sets_wavelet_threshold() {
        // Flat background with one hot edge voxel and weak noise in the centre.
        let noise = noisy_volume(Grid::new(8, 8, 20), 13);
        let data = Array3::from_shape_fn((20, 8, 8), |(z, y, x)| match (z, y, x) {
            (0, 3, 3) => 50.0,
            (5..=14, _, _) => 1.0 + 0.5 * noise.data()[[z, y, x]],
            _ => 1.0,
        });
        let volume = ScalarVolume::new(data);
        let max_change = |out: &ScalarVolume<f64>| {
            out.data()
                .iter()
                .zip(volume.data().iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max)
        };

        let robust = SmoothingConfig {
            noise_estimator: NoiseEstimator::EdgeMad,
            ..config(SmoothingFilter::Wavelet, [1.0; 3])
        };
        let out = apply_smoothing(&volume, &robust, &ProgressToken::new()).unwrap();
        assert!(max_change(&out) < 1e-9);

        let plain = config(SmoothingFilter::Wavelet, [1.0; 3]);
        let out = apply_smoothing(&volume, &plain, &ProgressToken::new()).unwrap();
        assert!(max_change(&out) > 1e-3);
    }

    #[test]
    fn test_canceled_before_start() {
        let token = ProgressToken::new();
        token.request_cancel();
        let volume = ScalarVolume::filled(Grid::new(4, 4, 4), 1.0f32);
        for filter in [
            SmoothingFilter::Box,
            SmoothingFilter::Gaussian,
            SmoothingFilter::Gradient,
            SmoothingFilter::Wavelet,
        ] {
            let case = SmoothingConfig {
                noise_sigma: Some(1.0),
                ..config(filter, [3.0; 3])
            };
            let err = apply_smoothing(&volume, &case, &token).unwrap_err();
            assert!(err.is_canceled(), "{filter:?}");
        }
    }
}
