use ndarray::Axis;
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::float_trait::CubeFloat;
use crate::volume::ScalarVolume;

/// Fraction of the spectral axis sampled at each end for noise statistics.
const EDGE_SLAB_FRACTION: usize = 10;

/// Scale from median absolute deviation to Gaussian sigma.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Background level and scatter of a cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseEstimate<F: CubeFloat> {
    pub mean: F,
    pub sigma: F,
}

/// How the noise sigma of a cube is estimated when the host does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseEstimator {
    /// Standard deviation of the edge-slab voxels.
    #[default]
    EdgeStd,
    /// Median absolute deviation of the edge slabs, robust to stray emission.
    EdgeMad,
}

impl NoiseEstimator {
    pub fn sigma<F: CubeFloat>(self, volume: &ScalarVolume<F>) -> F {
        match self {
            NoiseEstimator::EdgeStd => estimate_noise(volume).sigma,
            NoiseEstimator::EdgeMad => estimate_noise_sigma_mad(volume),
        }
    }
}

impl<F: CubeFloat> Default for NoiseEstimate<F> {
    fn default() -> Self {
        Self {
            mean: F::zero(),
            sigma: F::zero(),
        }
    }
}

/// Z slices used for noise estimation: the first and last tenth of the cube.
///
/// Spectral cubes usually carry emission in the central channels only, so
/// the edge channels sample the background.
pub fn edge_slab_indices(nz: usize) -> Vec<usize> {
    let n_edge = (nz / EDGE_SLAB_FRACTION).max(1);
    if nz <= 2 * n_edge {
        return (0..nz).collect();
    }
    (0..n_edge).chain(nz - n_edge..nz).collect()
}

fn gather_edge_values<F: CubeFloat>(volume: &ScalarVolume<F>) -> Vec<F> {
    let data = volume.data();
    edge_slab_indices(volume.grid().nz)
        .into_par_iter()
        .flat_map_iter(|z| {
            data.index_axis(Axis(0), z)
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .collect::<Vec<F>>()
        })
        .collect()
}

/// Mean and standard deviation of the non-NaN edge-slab voxels.
///
/// Returns zeros when no finite sample exists.
pub fn estimate_noise<F: CubeFloat>(volume: &ScalarVolume<F>) -> NoiseEstimate<F> {
    let values = gather_edge_values(volume);
    if values.is_empty() {
        return NoiseEstimate::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| v.to_f64_c()).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| {
            let d = v.to_f64_c() - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    NoiseEstimate {
        mean: F::from_f64_c(mean),
        sigma: F::from_f64_c(var.sqrt()),
    }
}

/// Robust sigma from the median absolute deviation of the edge slabs.
pub fn estimate_noise_sigma_mad<F: CubeFloat>(volume: &ScalarVolume<F>) -> F {
    let mut values = gather_edge_values(volume);
    if values.is_empty() {
        return F::zero();
    }
    let median = median_of_slice(&mut values);
    let mut deviations: Vec<F> = values.iter().map(|&v| (v - median).abs()).collect();
    median_of_slice(&mut deviations) * F::from_f64_c(MAD_TO_SIGMA)
}

/// Median via selection; NaN-free input expected.
pub fn median_of_slice<F: CubeFloat>(data: &mut [F]) -> F {
    let len = data.len();
    if len == 0 {
        return F::zero();
    }
    let mid = len / 2;

    let (lower, &mut upper_mid, _) =
        data.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    if len % 2 == 1 {
        upper_mid
    } else {
        let lower_mid = lower
            .iter()
            .copied()
            .fold(F::neg_infinity(), |acc, v| if v > acc { v } else { acc });
        (lower_mid + upper_mid) / F::from_f64_c(2.0)
    }
}
