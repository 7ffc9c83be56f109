//! Integrated spectral profile: one summed flux value per Z slice.

use log::warn;
use ndarray::{Array1, Axis};
use rayon::prelude::*;

use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::moments::{resolve_spectral_window, MomentConfig};
use crate::progress::{CancelGate, ProgressBand, ProgressToken};
use crate::volume::{mask_positive, MaskVolume, ScalarVolume};
use crate::world::{AxisTransform, BeamInfo, VelocityUnit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileConfig {
    /// Velocity window in km/s for the unmasked path.
    pub velocity_range: Option<(f64, f64)>,
    /// Exclusive intensity window for the unmasked path.
    pub intensity_range: (f64, f64),
    pub unit: VelocityUnit,
    /// Jy/beam -> Jy conversion; raw sums are reported without it.
    pub beam: Option<BeamInfo>,
    /// Worker threads, 0 = all. Default: 0
    pub cores: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            velocity_range: None,
            intensity_range: (f64::NEG_INFINITY, f64::INFINITY),
            unit: VelocityUnit::default(),
            beam: None,
            cores: 0,
        }
    }
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<(), String> {
        let (lo, hi) = self.intensity_range;
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return Err(format!("invalid intensity range ({lo}, {hi})"));
        }
        Ok(())
    }

    fn as_moment_config(&self) -> MomentConfig {
        MomentConfig {
            velocity_range: self.velocity_range,
            intensity_range: self.intensity_range,
            unit: self.unit,
            cores: self.cores,
            ..MomentConfig::default()
        }
    }
}

/// Profile samples with their spectral coordinate in km/s.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralProfile<F: CubeFloat> {
    pub velocity: Array1<f64>,
    /// Summed flux per slice; NaN marks "no flux" or an excluded slice.
    pub flux: Array1<F>,
    /// Whether `flux` was converted with the beam factor.
    pub converted: bool,
}

/// Sum the selected voxels of every Z slice.
///
/// A mask selects `mask > 0` voxels in all slices. Without one, only slices
/// inside the velocity window are summed (others are NaN) and voxels must lie
/// strictly inside the intensity window. Sums whose magnitude falls below
/// `PROFILE_EPSILON` are reported as NaN.
pub fn compute_profile<F: CubeFloat>(
    input: &ScalarVolume<F>,
    mask: Option<&MaskVolume>,
    config: &ProfileConfig,
    transform: &dyn AxisTransform,
    progress: &ProgressToken,
) -> CubeResult<SpectralProfile<F>> {
    config.validate().map_err(CubeError::DegenerateParameters)?;
    let grid = input.grid();
    if let Some(mask) = mask {
        mask.ensure_matches(grid)?;
    }
    let gate = CancelGate::new(progress);
    gate.check()?;

    let (z_min, z_max) = match mask {
        Some(_) => (0, grid.nz.saturating_sub(1)),
        None => {
            let window = resolve_spectral_window(grid.nz, transform, &config.as_moment_config())?;
            (window.z_min, window.z_max)
        }
    };

    let factor = match config.beam.and_then(|beam| beam.unit_conversion()) {
        Some(f) => Some(F::from_f64_c(f)),
        None => {
            warn!("beam information unavailable, profile reported as raw sum of Jy/beam");
            None
        }
    };
    let lo = F::from_f64_c(config.intensity_range.0);
    let hi = F::from_f64_c(config.intensity_range.1);
    let band = ProgressBand::new(progress, 1, 99, grid.nz);

    let flux: Vec<F> = input
        .data()
        .axis_iter(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(z, slab)| {
            if gate.poll() || z < z_min || z > z_max {
                return F::nan();
            }
            let sum = match mask {
                Some(mask) => slab
                    .iter()
                    .zip(mask.data().index_axis(Axis(0), z).iter())
                    .filter(|(v, m)| !v.is_nan() && mask_positive(**m))
                    .fold(F::zero(), |acc, (v, _)| acc + *v),
                None => slab
                    .iter()
                    .filter(|v| **v > lo && **v < hi)
                    .fold(F::zero(), |acc, v| acc + *v),
            };
            band.tick();
            let sum = factor.map_or(sum, |f| sum * f);
            if sum.abs() < F::PROFILE_EPSILON {
                F::nan()
            } else {
                sum
            }
        })
        .collect();
    gate.finish_region()?;

    let unit = config.unit.to_km_s();
    let velocity = Array1::from_shape_fn(grid.nz, |z| transform.index_to_world(z as f64) * unit);

    Ok(SpectralProfile {
        velocity,
        flux: Array1::from(flux),
        converted: factor.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::LinearAxis;
    use ndarray::Array3;

    fn cube() -> ScalarVolume<f64> {
        // Slice z holds the value z + 1 everywhere except slice 2, which is empty.
        ScalarVolume::new(Array3::from_shape_fn((5, 2, 2), |(z, _, _)| {
            if z == 2 {
                0.0
            } else {
                (z + 1) as f64
            }
        }))
    }

    #[test]
    fn test_raw_profile_marks_empty_slice_nan() {
        let profile = compute_profile(
            &cube(),
            None,
            &ProfileConfig::default(),
            &LinearAxis::pixel(),
            &ProgressToken::new(),
        )
        .unwrap();
        assert!(!profile.converted);
        assert_eq!(profile.flux[0], 4.0);
        assert_eq!(profile.flux[1], 8.0);
        assert!(profile.flux[2].is_nan());
        assert_eq!(profile.flux[4], 20.0);
        assert_eq!(profile.velocity[3], 3.0);
    }

    #[test]
    fn test_velocity_window_blanks_outside_slices() {
        let config = ProfileConfig {
            velocity_range: Some((1.0, 3.0)),
            ..ProfileConfig::default()
        };
        let profile = compute_profile(
            &cube(),
            None,
            &config,
            &LinearAxis::pixel(),
            &ProgressToken::new(),
        )
        .unwrap();
        assert!(profile.flux[0].is_nan());
        assert_eq!(profile.flux[1], 8.0);
        assert_eq!(profile.flux[3], 16.0);
        assert!(profile.flux[4].is_nan());
    }

    #[test]
    fn test_mask_and_beam_conversion() {
        let mask = MaskVolume::new(Array3::from_shape_fn((5, 2, 2), |(_, y, x)| {
            if x == 0 && y == 0 {
                1
            } else {
                0
            }
        }));
        let beam = BeamInfo {
            bmaj: 1.0,
            bmin: 1.0,
            cdelt1: 1.0,
            cdelt2: 1.13,
        };
        let config = ProfileConfig {
            beam: Some(beam),
            ..ProfileConfig::default()
        };
        let profile = compute_profile(
            &cube(),
            Some(&mask),
            &config,
            &LinearAxis::pixel(),
            &ProgressToken::new(),
        )
        .unwrap();
        assert!(profile.converted);
        assert!((profile.flux[0] - 1.0).abs() < 1e-12);
        assert!((profile.flux[4] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_nan_voxels_are_skipped() {
        let mut data = Array3::<f32>::from_elem((1, 2, 2), 1.0);
        data[[0, 1, 1]] = f32::NAN;
        let profile = compute_profile(
            &ScalarVolume::new(data),
            None,
            &ProfileConfig::default(),
            &LinearAxis::pixel(),
            &ProgressToken::new(),
        )
        .unwrap();
        assert_eq!(profile.flux[0], 3.0);
    }

    #[test]
    fn test_cancel() {
        let token = ProgressToken::new();
        token.request_cancel();
        let result = compute_profile(
            &cube(),
            None,
            &ProfileConfig::default(),
            &LinearAxis::pixel(),
            &token,
        );
        assert_eq!(result.unwrap_err(), CubeError::Canceled);
    }
}
