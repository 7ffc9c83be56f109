//! Float trait abstraction for f32/f64 cubes.
//!
//! Every kernel in this crate is written once against [`CubeFloat`] and
//! monomorphized for the two supported voxel kinds.

use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::{Debug, Display};
use std::iter::Sum;

use crate::volume::DataKind;

/// Trait alias for the floating point voxel types a cube may hold.
///
/// Combines the bounds needed by the smoothing and reduction kernels:
/// - Basic float operations (Float, NumAssign)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Thread-safety for rayon workers
pub trait CubeFloat:
    Float + FromPrimitive + NumAssign + Sum + Debug + Display + Send + Sync + 'static
{
    /// The data kind tag reported for volumes of this element type.
    const DATA_KIND: DataKind;

    /// Magnitude below which a moment accumulator is treated as zero.
    ///
    /// Eight machine epsilons for both kinds, so the guard scales with the
    /// precision of the element type instead of being picked per code path.
    const MOMENT_EPSILON: Self;

    /// Absolute flux below which a spectral profile bin is reported as NaN.
    const PROFILE_EPSILON: Self;

    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Widen to f64 for accumulation and reporting.
    fn to_f64_c(self) -> f64;
}

impl CubeFloat for f32 {
    const DATA_KIND: DataKind = DataKind::Float32;
    const MOMENT_EPSILON: Self = 9.536_743e-7;
    const PROFILE_EPSILON: Self = 1e-16;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn to_f64_c(self) -> f64 {
        self as f64
    }
}

impl CubeFloat for f64 {
    const DATA_KIND: DataKind = DataKind::Float64;
    const MOMENT_EPSILON: Self = 1.776_356_839_400_250_5e-15;
    const PROFILE_EPSILON: Self = 1e-16;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn to_f64_c(self) -> f64 {
        self
    }
}
