//! Scalar statistics over a voxel selection.
//!
//! Three phases separated by real barriers: a parallel count/min/max/sum
//! reduction, a parallel squared-deviation pass around the finalized mean,
//! and a gather of the selected values for the median. NaN voxels are never
//! selected.

use log::{debug, warn};
use ndarray::{s, ArrayView2, Axis};
use rayon::prelude::*;

use crate::bounds::Region;
use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::noise_estimation::median_of_slice;
use crate::progress::{CancelGate, ProgressBand, ProgressToken};
use crate::volume::{mask_member, ScalarVolume};
use crate::world::BeamInfo;

// =============================================================================
// Configuration
// =============================================================================

/// Which quantities to compute. Disabled quantities are reported as NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsFlags {
    pub npixels: bool,
    pub min: bool,
    pub max: bool,
    pub mean: bool,
    pub std: bool,
    pub median: bool,
    pub sum: bool,
    pub total_flux: bool,
}

impl Default for StatisticsFlags {
    fn default() -> Self {
        Self {
            npixels: true,
            min: true,
            max: true,
            mean: true,
            std: true,
            median: true,
            sum: true,
            total_flux: true,
        }
    }
}

impl StatisticsFlags {
    fn any(&self) -> bool {
        self.npixels
            || self.min
            || self.max
            || self.mean
            || self.std
            || self.median
            || self.sum
            || self.total_flux
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatisticsConfig {
    pub flags: StatisticsFlags,
    pub beam: Option<BeamInfo>,
    /// Worker threads, 0 = all. Default: 0
    pub cores: usize,
}

// =============================================================================
// Results
// =============================================================================

/// One row of a statistics table.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRecord {
    pub selection: String,
    pub npixels: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub sum: f64,
    pub total_flux: f64,
}

/// Rows accumulated for one volume, named `<volume>_selection_<serial>`.
#[derive(Debug, Clone, Default)]
pub struct StatisticsTable {
    volume_name: String,
    rows: Vec<StatisticsRecord>,
}

impl StatisticsTable {
    pub fn new(volume_name: impl Into<String>) -> Self {
        Self {
            volume_name: volume_name.into(),
            rows: Vec::new(),
        }
    }

    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// Serial the next appended row will receive.
    pub fn next_serial(&self) -> usize {
        self.rows.len()
    }

    /// Name `record` after the next serial and append it.
    pub fn push(&mut self, mut record: StatisticsRecord) -> &StatisticsRecord {
        record.selection = format!("{}_selection_{}", self.volume_name, self.next_serial());
        self.rows.push(record);
        &self.rows[self.rows.len() - 1]
    }

    pub fn rows(&self) -> &[StatisticsRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

// =============================================================================
// Reduction
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    min: f64,
    max: f64,
    sum: f64,
}

impl Accumulator {
    fn empty() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }

    fn push(mut self, v: f64) -> Self {
        self.count += 1;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
        }
    }
}

/// Selected, non-NaN values of one Z slab.
fn slab_values<'s, F: CubeFloat>(
    slab: ArrayView2<'s, F>,
    z: usize,
    selection: &'s Region<'_>,
) -> Box<dyn Iterator<Item = f64> + 's> {
    match selection {
        Region::Roi(bounds) => {
            if z < bounds.min[2] || z > bounds.max[2] {
                return Box::new(std::iter::empty());
            }
            let window = slab.slice_move(s![
                bounds.min[1]..=bounds.max[1],
                bounds.min[0]..=bounds.max[0]
            ]);
            Box::new(
                window
                    .into_iter()
                    .filter(|v| !v.is_nan())
                    .map(|v| v.to_f64_c()),
            )
        }
        Region::Segmentation(mask) => Box::new(
            slab.into_iter()
                .zip(mask.data().index_axis(Axis(0), z))
                .filter(|(v, m)| !v.is_nan() && mask_member(**m))
                .map(|(v, _)| v.to_f64_c()),
        ),
    }
}

/// Compute the statistics of the selected voxels of `input`.
///
/// The returned record has an empty `selection` name; [`StatisticsTable::push`]
/// assigns it.
pub fn compute_statistics<F: CubeFloat>(
    input: &ScalarVolume<F>,
    selection: &Region<'_>,
    config: &StatisticsConfig,
    progress: &ProgressToken,
) -> CubeResult<StatisticsRecord> {
    let flags = config.flags;
    if !flags.any() {
        return Err(CubeError::DegenerateParameters(
            "no statistic requested".into(),
        ));
    }
    let grid = input.grid();
    selection.ensure_fits(grid)?;
    let gate = CancelGate::new(progress);
    gate.check()?;
    let data = input.data();

    // Pass 1: count, min, max, sum.
    let band = ProgressBand::new(progress, 1, 40, grid.nz);
    let acc = data
        .axis_iter(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(z, slab)| {
            if gate.poll() {
                return Accumulator::empty();
            }
            let acc = slab_values(slab, z, selection).fold(Accumulator::empty(), Accumulator::push);
            band.tick();
            acc
        })
        .reduce(Accumulator::empty, Accumulator::merge);
    gate.finish_region()?;

    let n = acc.count as f64;
    let mean = if acc.count > 0 { acc.sum / n } else { f64::NAN };

    // Pass 2: standard deviation around the finalized mean.
    let std = if flags.std && acc.count > 0 {
        let band = ProgressBand::new(progress, 40, 70, grid.nz);
        let squares: f64 = data
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(z, slab)| {
                if gate.poll() {
                    return 0.0;
                }
                let s: f64 = slab_values(slab, z, selection)
                    .map(|v| (v - mean) * (v - mean))
                    .sum();
                band.tick();
                s
            })
            .sum();
        gate.finish_region()?;
        (squares / n).sqrt()
    } else {
        f64::NAN
    };

    // Pass 3: median of the gathered selection.
    let median = if flags.median && acc.count > 0 {
        let mut values: Vec<f64> = data
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .flat_map_iter(|(z, slab)| {
                if gate.poll() {
                    return Vec::new();
                }
                slab_values(slab, z, selection).collect::<Vec<f64>>()
            })
            .collect();
        gate.finish_region()?;
        progress.report(85);
        median_of_slice(&mut values)
    } else {
        f64::NAN
    };

    let total_flux = if flags.total_flux {
        match config.beam.and_then(|beam| beam.unit_conversion()) {
            Some(factor) => acc.sum * factor,
            None => {
                warn!("beam information unavailable, total flux not computed");
                f64::NAN
            }
        }
    } else {
        f64::NAN
    };
    debug!(
        "statistics over {} voxels: sum {} mean {}",
        acc.count, acc.sum, mean
    );

    let pick = |enabled: bool, value: f64| if enabled { value } else { f64::NAN };
    let (min, max) = if acc.count > 0 {
        (acc.min, acc.max)
    } else {
        (f64::NAN, f64::NAN)
    };
    Ok(StatisticsRecord {
        selection: String::new(),
        npixels: pick(flags.npixels, n),
        min: pick(flags.min, min),
        max: pick(flags.max, max),
        mean: pick(flags.mean, mean),
        std,
        median,
        sum: pick(flags.sum, acc.sum),
        total_flux,
    })
}
