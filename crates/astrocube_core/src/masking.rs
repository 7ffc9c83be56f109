//! Blanking and cropping.
//!
//! Blanking replaces the voxels of a region (or of its complement) with a
//! fill value and keeps the cube dims. Cropping copies a bounding box into a
//! new, smaller cube. A segmentation-driven crop first blanks everything
//! outside the segment with NaN.

use log::{debug, info};
use ndarray::{s, Array3, Axis, Zip};
use rayon::prelude::*;

use crate::bounds::{Region, VoxelBounds};
use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::grid::Grid;
use crate::progress::{CancelGate, ProgressBand, ProgressToken};
use crate::volume::{mask_member, MaskVolume, ScalarVolume};

// =============================================================================
// Blank value
// =============================================================================

/// Fill value written by [`apply_blank`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlankValue {
    value: f64,
    /// NaN or the literal `"0"` / `"0."`: erasing the whole cube with it is refused.
    destructive: bool,
}

impl BlankValue {
    pub fn nan() -> Self {
        Self {
            value: f64::NAN,
            destructive: true,
        }
    }

    pub fn value(value: f64) -> Self {
        Self {
            value,
            destructive: value.is_nan(),
        }
    }

    /// Parse the host's textual blank value. Any string containing `nan`
    /// (case-insensitive) is NaN; everything else must parse as a number.
    pub fn parse(text: &str) -> CubeResult<Self> {
        let trimmed = text.trim();
        if trimmed.to_ascii_lowercase().contains("nan") {
            return Ok(Self::nan());
        }
        let value: f64 = trimmed.parse().map_err(|_| {
            CubeError::DegenerateParameters(format!("blank value {text:?} is not a number"))
        })?;
        Ok(Self {
            value,
            destructive: matches!(trimmed, "0" | "0."),
        })
    }

    pub fn get(&self) -> f64 {
        self.value
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }
}

impl Default for BlankValue {
    fn default() -> Self {
        Self::nan()
    }
}

// =============================================================================
// Blank
// =============================================================================

/// Write `fill` into every voxel whose region membership equals `region_inside`.
fn blank_voxels<F: CubeFloat>(
    input: &ScalarVolume<F>,
    region: &Region<'_>,
    region_inside: bool,
    fill: F,
    progress: &ProgressToken,
) -> CubeResult<ScalarVolume<F>> {
    let gate = CancelGate::new(progress);
    gate.check()?;
    let grid = input.grid();
    let band = ProgressBand::new(progress, 1, 99, grid.nz);
    let mut out = Array3::<F>::zeros(grid.shape());

    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(input.data().axis_iter(Axis(0)))
        .enumerate()
        .for_each(|(z, (mut dst, src))| {
            if gate.poll() {
                return;
            }
            Zip::indexed(&mut dst).and(&src).for_each(|(y, x), d, &v| {
                *d = if region.contains(x, y, z) == region_inside {
                    fill
                } else {
                    v
                };
            });
            band.tick();
        });
    gate.finish_region()?;
    Ok(ScalarVolume::new(out))
}

/// Blank a region of `input`.
///
/// With `region_inside` the voxels inside the region are replaced by `blank`
/// and the rest copied; otherwise the voxels outside it are replaced. For a
/// segmentation a voxel is inside when `mask >= 1`.
///
/// Blanking the entire cube with NaN or a literal zero is refused with
/// `DegenerateParameters`.
pub fn apply_blank<F: CubeFloat>(
    input: &ScalarVolume<F>,
    region: &Region<'_>,
    region_inside: bool,
    blank: BlankValue,
    progress: &ProgressToken,
) -> CubeResult<ScalarVolume<F>> {
    let grid = input.grid();
    region.ensure_fits(grid)?;
    if region_inside && blank.is_destructive() && region.covers(grid) {
        return Err(CubeError::DegenerateParameters(
            "refusing to fill the entire cube with NaN or zero".into(),
        ));
    }
    debug!(
        "blank {} region with {}",
        if region_inside { "inside" } else { "outside" },
        blank.get()
    );
    blank_voxels(
        input,
        region,
        region_inside,
        F::from_f64_c(blank.get()),
        progress,
    )
}

// =============================================================================
// Crop
// =============================================================================

/// Tight bounding box of the `mask >= 1` voxels, or `None` for an empty mask.
pub fn mask_bounds(mask: &MaskVolume) -> Option<VoxelBounds> {
    let extend = |acc: Option<VoxelBounds>, p: [usize; 3]| {
        Some(match acc {
            None => VoxelBounds { min: p, max: p },
            Some(b) => VoxelBounds {
                min: [b.min[0].min(p[0]), b.min[1].min(p[1]), b.min[2].min(p[2])],
                max: [b.max[0].max(p[0]), b.max[1].max(p[1]), b.max[2].max(p[2])],
            },
        })
    };
    let merge = |a: Option<VoxelBounds>, b: Option<VoxelBounds>| match (a, b) {
        (None, other) | (other, None) => other,
        (Some(a), Some(b)) => extend(Some(a), b.min).and_then(|m| extend(Some(m), b.max)),
    };

    mask.data()
        .axis_iter(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(z, slab)| {
            slab.indexed_iter()
                .filter(|(_, m)| mask_member(**m))
                .fold(None, |acc, ((y, x), _)| extend(acc, [x, y, z]))
        })
        .reduce(|| None, merge)
}

/// Reference pixel of a cropped cube: `crpix - bounds.min` per axis.
pub fn recenter_reference_pixel(crpix: [f64; 3], bounds: &VoxelBounds) -> [f64; 3] {
    [
        crpix[0] - bounds.min[0] as f64,
        crpix[1] - bounds.min[1] as f64,
        crpix[2] - bounds.min[2] as f64,
    ]
}

/// A cropped cube and the input bounds it was cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct CropResult<F: CubeFloat> {
    pub volume: ScalarVolume<F>,
    pub bounds: VoxelBounds,
}

fn copy_box<F: CubeFloat>(
    input: &ScalarVolume<F>,
    bounds: &VoxelBounds,
    gate: &CancelGate<'_>,
) -> CubeResult<ScalarVolume<F>> {
    let [nx, ny, nz] = bounds.dims();
    let window = input.data().slice(s![
        bounds.min[2]..=bounds.max[2],
        bounds.min[1]..=bounds.max[1],
        bounds.min[0]..=bounds.max[0]
    ]);
    let mut out = Array3::<F>::zeros(Grid::new(nx, ny, nz).shape());
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(window.axis_iter(Axis(0)))
        .for_each(|(mut dst, src)| {
            if gate.poll() {
                return;
            }
            dst.assign(&src);
        });
    gate.finish_region()?;
    Ok(ScalarVolume::new(out))
}

/// Crop `input` to a box or to the bounding box of a segmentation.
///
/// The output dims are `max - min + 1` per axis. For a segmentation, voxels
/// outside the segment read as NaN in the result.
pub fn apply_crop<F: CubeFloat>(
    input: &ScalarVolume<F>,
    region: &Region<'_>,
    progress: &ProgressToken,
) -> CubeResult<CropResult<F>> {
    let grid = input.grid();
    region.ensure_fits(grid)?;
    let gate = CancelGate::new(progress);
    gate.check()?;

    let (source, bounds) = match region {
        Region::Roi(bounds) => (None, *bounds),
        Region::Segmentation(mask) => {
            let bounds = mask_bounds(mask).ok_or_else(|| {
                CubeError::DegenerateParameters("segment has no voxels to crop to".into())
            })?;
            let blanked = blank_voxels(input, region, false, F::nan(), progress)?;
            (Some(blanked), bounds)
        }
    };
    let volume = copy_box(source.as_ref().unwrap_or(input), &bounds, &gate)?;
    info!(
        "cropped {:?} to {:?} at {:?}",
        grid.dims(),
        volume.dims(),
        bounds.min
    );
    Ok(CropResult { volume, bounds })
}

// =============================================================================
// Dispatch
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MaskOperation {
    #[default]
    Blank,
    Crop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskConfig {
    pub operation: MaskOperation,
    /// Blank the inside of the region rather than the outside.
    pub region_inside: bool,
    pub blank: BlankValue,
    /// Worker threads, 0 = all. Default: 0
    pub cores: usize,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            operation: MaskOperation::Blank,
            region_inside: false,
            blank: BlankValue::nan(),
            cores: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaskOutput<F: CubeFloat> {
    Blanked(ScalarVolume<F>),
    Cropped(CropResult<F>),
}

impl<F: CubeFloat> MaskOutput<F> {
    pub fn volume(&self) -> &ScalarVolume<F> {
        match self {
            MaskOutput::Blanked(v) => v,
            MaskOutput::Cropped(c) => &c.volume,
        }
    }
}

pub fn apply_mask<F: CubeFloat>(
    input: &ScalarVolume<F>,
    region: &Region<'_>,
    config: &MaskConfig,
    progress: &ProgressToken,
) -> CubeResult<MaskOutput<F>> {
    match config.operation {
        MaskOperation::Blank => {
            apply_blank(input, region, config.region_inside, config.blank, progress)
                .map(MaskOutput::Blanked)
        }
        MaskOperation::Crop => apply_crop(input, region, progress).map(MaskOutput::Cropped),
    }
}
