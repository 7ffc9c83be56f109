//! Box and Gaussian kernel construction.
//!
//! Filter extents are given per axis in voxels. For the Gaussian they are a
//! FWHM, converted to sigma before sampling. Every kernel has an odd tap
//! count so the window is symmetric about the centre voxel.

use ndarray::Array3;

use crate::float_trait::CubeFloat;

// =============================================================================
// Constants
// =============================================================================

/// FWHM = sigma * 2 sqrt(2 ln 2).
pub const SIGMA_TO_FWHM: f64 = 2.354_820_045_030_949_3;

/// Lower bound for a Gaussian sigma in voxels.
pub const MIN_SIGMA: f64 = 0.001;

/// Axis extents at or below this are treated as "no smoothing on this axis".
pub const AXIS_SKIP_EPSILON: f64 = 0.001;

/// Default Gaussian support in sigmas.
pub const DEFAULT_GAUSSIAN_ACCURACY: f64 = 3.0;

/// Force a tap count to be odd (even counts grow by one).
#[inline]
pub fn odd_length(n: usize) -> usize {
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

/// Sigma in voxels for a FWHM extent.
#[inline]
pub fn fwhm_to_sigma(fwhm: f64) -> f64 {
    (fwhm / SIGMA_TO_FWHM).max(MIN_SIGMA)
}

/// Tap count of a box kernel of extent `param`.
pub fn box_length(param: f64) -> usize {
    if !(param > AXIS_SKIP_EPSILON) {
        return 1;
    }
    odd_length(param.floor() as usize)
}

/// Tap count of a Gaussian kernel with FWHM `param` sampled over `accuracy` sigmas.
pub fn gaussian_length(param: f64, accuracy: f64) -> usize {
    if !(param > AXIS_SKIP_EPSILON) {
        return 1;
    }
    let n = (fwhm_to_sigma(param) * accuracy.max(0.0)).floor();
    odd_length(n as usize)
}

#[inline]
fn gauss(x: f64, sigma: f64) -> f64 {
    (-(x * x) / (2.0 * sigma * sigma)).exp()
}

// =============================================================================
// 1-D kernels
// =============================================================================

/// Odd-length 1-D kernel centred on its middle tap.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel1D<F: CubeFloat> {
    weights: Vec<F>,
}

impl<F: CubeFloat> Kernel1D<F> {
    /// Single unit tap; applying it copies the lane through.
    pub fn identity() -> Self {
        Self {
            weights: vec![F::one()],
        }
    }

    pub fn weights(&self) -> &[F] {
        &self.weights
    }

    #[inline]
    pub fn half_width(&self) -> usize {
        self.weights.len() / 2
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.weights.len() == 1
    }
}

/// Uniform kernel; division happens by the taps that actually contribute.
pub fn box_kernel_1d<F: CubeFloat>(param: f64) -> Kernel1D<F> {
    Kernel1D {
        weights: vec![F::one(); box_length(param)],
    }
}

/// Sampled Gaussian `exp(-x^2 / 2 sigma^2)`, normalized to unit sum.
pub fn gaussian_kernel_1d<F: CubeFloat>(param: f64, accuracy: f64) -> Kernel1D<F> {
    let n = gaussian_length(param, accuracy);
    if n == 1 {
        return Kernel1D::identity();
    }
    let sigma = fwhm_to_sigma(param);
    let half = (n / 2) as f64;
    let raw: Vec<f64> = (0..n).map(|i| gauss(i as f64 - half, sigma)).collect();
    let sum: f64 = raw.iter().sum();
    Kernel1D {
        weights: raw.iter().map(|&w| F::from_f64_c(w / sum)).collect(),
    }
}

// =============================================================================
// 3-D kernels
// =============================================================================

/// Dense kernel with odd extents, stored `(lz, ly, lx)` like a cube.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel3D<F: CubeFloat> {
    weights: Array3<F>,
}

impl<F: CubeFloat> Kernel3D<F> {
    pub fn weights(&self) -> &Array3<F> {
        &self.weights
    }

    /// Half widths in `[x, y, z]` order.
    pub fn half_widths(&self) -> [usize; 3] {
        let s = self.weights.shape();
        [s[2] / 2, s[1] / 2, s[0] / 2]
    }

    /// Weight at signed offset `(dx, dy, dz)` from the centre.
    #[inline]
    pub fn weight(&self, dx: isize, dy: isize, dz: isize) -> F {
        let [hx, hy, hz] = self.half_widths();
        self.weights[[
            (dz + hz as isize) as usize,
            (dy + hy as isize) as usize,
            (dx + hx as isize) as usize,
        ]]
    }

    pub fn tap_count(&self) -> usize {
        self.weights.len()
    }
}

/// Uniform 3-D box with independent extents per axis.
pub fn box_kernel_3d<F: CubeFloat>(params: [f64; 3]) -> Kernel3D<F> {
    let shape = (
        box_length(params[2]),
        box_length(params[1]),
        box_length(params[0]),
    );
    Kernel3D {
        weights: Array3::from_elem(shape, F::one()),
    }
}

/// Anisotropic Gaussian, optionally rotated by `rotation_deg = [rx, ry, rz]`.
///
/// Offsets are rotated before evaluation:
///
/// ```text
/// x' = i cy cz - j cy sz + k sy
/// y' = i (cz sx sy + cx sz) + j (cx cz - sx sy sz) - k cy sx
/// z' = i (sx sz - cx cz sy) + j (cz sx + cx sy sz) + k cx cy
/// ```
///
/// and the weights are normalized to unit sum.
pub fn gaussian_kernel_3d<F: CubeFloat>(
    params: [f64; 3],
    accuracy: f64,
    rotation_deg: [f64; 3],
) -> Kernel3D<F> {
    let lx = gaussian_length(params[0], accuracy);
    let ly = gaussian_length(params[1], accuracy);
    let lz = gaussian_length(params[2], accuracy);
    let (hx, hy, hz) = ((lx / 2) as f64, (ly / 2) as f64, (lz / 2) as f64);

    let sx2 = 2.0 * fwhm_to_sigma(params[0]).powi(2);
    let sy2 = 2.0 * fwhm_to_sigma(params[1]).powi(2);
    let sz2 = 2.0 * fwhm_to_sigma(params[2]).powi(2);

    let [rx, ry, rz] = rotation_deg.map(f64::to_radians);
    let (sinx, cosx) = rx.sin_cos();
    let (siny, cosy) = ry.sin_cos();
    let (sinz, cosz) = rz.sin_cos();

    let raw = Array3::from_shape_fn((lz, ly, lx), |(kz, ky, kx)| {
        let i = kx as f64 - hx;
        let j = ky as f64 - hy;
        let k = kz as f64 - hz;
        let xr = i * cosy * cosz - j * cosy * sinz + k * siny;
        let yr = i * (cosz * sinx * siny + cosx * sinz) + j * (cosx * cosz - sinx * siny * sinz)
            - k * cosy * sinx;
        let zr = i * (sinx * sinz - cosx * cosz * siny)
            + j * (cosz * sinx + cosx * siny * sinz)
            + k * cosx * cosy;
        (-(xr * xr / sx2 + yr * yr / sy2 + zr * zr / sz2)).exp()
    });
    let sum: f64 = raw.sum();
    Kernel3D {
        weights: raw.mapv(|w| F::from_f64_c(w / sum)),
    }
}
