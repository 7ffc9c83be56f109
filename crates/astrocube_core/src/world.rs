//! Injected world-coordinate collaborators.
//!
//! Header state is owned by the host. Reductions only need two things from
//! it: a mapping between spectral voxel index and physical coordinate, and
//! the beam geometry used to convert summed flux into Jy.

use crate::error::{CubeError, CubeResult};

/// Beam-area factor of the flux conversion, `pi / (4 ln 2)` rounded.
const BEAM_AREA_FACTOR: f64 = 1.13;

/// Voxel index <-> physical coordinate along the spectral (Z) axis.
///
/// Indices are 0-based and may be fractional.
pub trait AxisTransform: Sync {
    fn index_to_world(&self, index: f64) -> f64;
    fn world_to_index(&self, world: f64) -> f64;
}

/// Linear FITS axis: `world = crval + (index + 1 - crpix) * cdelt`.
///
/// `crpix` keeps the FITS 1-based convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearAxis {
    pub crval: f64,
    pub crpix: f64,
    pub cdelt: f64,
}

impl LinearAxis {
    pub fn new(crval: f64, crpix: f64, cdelt: f64) -> CubeResult<Self> {
        if !(cdelt.is_finite() && cdelt != 0.0) || !crval.is_finite() || !crpix.is_finite() {
            return Err(CubeError::DegenerateParameters(format!(
                "linear axis needs finite crval/crpix and non-zero cdelt, got ({crval}, {crpix}, {cdelt})"
            )));
        }
        Ok(Self { crval, crpix, cdelt })
    }

    /// Plain voxel-index axis.
    pub fn pixel() -> Self {
        Self {
            crval: 0.0,
            crpix: 1.0,
            cdelt: 1.0,
        }
    }
}

impl AxisTransform for LinearAxis {
    #[inline]
    fn index_to_world(&self, index: f64) -> f64 {
        self.crval + (index + 1.0 - self.crpix) * self.cdelt
    }

    #[inline]
    fn world_to_index(&self, world: f64) -> f64 {
        (world - self.crval) / self.cdelt + self.crpix - 1.0
    }
}

/// Adapter for a pair of closures.
pub struct FnAxis<P, Q> {
    forward: P,
    inverse: Q,
}

impl<P, Q> FnAxis<P, Q>
where
    P: Fn(f64) -> f64 + Sync,
    Q: Fn(f64) -> f64 + Sync,
{
    pub fn new(forward: P, inverse: Q) -> Self {
        Self { forward, inverse }
    }
}

impl<P, Q> AxisTransform for FnAxis<P, Q>
where
    P: Fn(f64) -> f64 + Sync,
    Q: Fn(f64) -> f64 + Sync,
{
    fn index_to_world(&self, index: f64) -> f64 {
        (self.forward)(index)
    }

    fn world_to_index(&self, world: f64) -> f64 {
        (self.inverse)(world)
    }
}

/// Unit of the spectral axis as declared by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VelocityUnit {
    #[default]
    KilometersPerSecond,
    MetersPerSecond,
}

impl VelocityUnit {
    /// Parse a FITS `CUNIT3` value. Anything other than `m/s` is taken as km/s.
    pub fn from_cunit(cunit: &str) -> Self {
        if cunit.trim() == "m/s" {
            VelocityUnit::MetersPerSecond
        } else {
            VelocityUnit::KilometersPerSecond
        }
    }

    /// Multiplier from header units to km/s.
    pub fn to_km_s(self) -> f64 {
        match self {
            VelocityUnit::KilometersPerSecond => 1.0,
            VelocityUnit::MetersPerSecond => 0.001,
        }
    }
}

/// Beam and pixel geometry, all in the same angular unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamInfo {
    pub bmaj: f64,
    pub bmin: f64,
    pub cdelt1: f64,
    pub cdelt2: f64,
}

impl BeamInfo {
    /// Jy/beam -> Jy factor `|cdelt1 * cdelt2 / (1.13 * bmaj * bmin)|`.
    ///
    /// `None` if any quantity is missing, zero or non-finite.
    pub fn unit_conversion(&self) -> Option<f64> {
        let all_defined = [self.bmaj, self.bmin, self.cdelt1, self.cdelt2]
            .iter()
            .all(|v| v.is_finite() && *v != 0.0);
        if !all_defined {
            return None;
        }
        Some((self.cdelt1 * self.cdelt2 / (BEAM_AREA_FACTOR * self.bmaj * self.bmin)).abs())
    }
}
