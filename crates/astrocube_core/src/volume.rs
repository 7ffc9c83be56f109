//! Cube storage types.
//!
//! [`ScalarVolume`] owns a dense `(nz, ny, nx)` array of floats. Kernels
//! borrow it for one call and always hand back a freshly allocated result.
//! [`MaskVolume`] is the integer segmentation companion, and [`AnyVolume`]
//! is the type-erased form used at the orchestration boundary.

use ndarray::{Array3, ArrayView3, ArrayViewMut3};

use crate::error::{CubeError, CubeResult};
use crate::float_trait::CubeFloat;
use crate::grid::Grid;

/// Scalar element kind of a voxel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Float32,
    Float64,
    Int16,
    UInt8,
}

impl DataKind {
    /// Whether the smoothing and reduction kernels accept this kind.
    pub fn is_supported(self) -> bool {
        matches!(self, DataKind::Float32 | DataKind::Float64)
    }
}

/// Dense single-component float cube.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarVolume<F: CubeFloat> {
    data: Array3<F>,
}

impl<F: CubeFloat> ScalarVolume<F> {
    /// Wrap an `(nz, ny, nx)` array, converting to standard layout if needed.
    pub fn new(data: Array3<F>) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self { data }
    }

    pub fn zeros(grid: Grid) -> Self {
        Self {
            data: Array3::zeros(grid.shape()),
        }
    }

    pub fn filled(grid: Grid, value: F) -> Self {
        Self {
            data: Array3::from_elem(grid.shape(), value),
        }
    }

    /// Build from a flat X-fastest buffer as handed over by the host layer.
    ///
    /// `dims` is `[nx, ny, nz]`. The buffer length must be exactly
    /// `nx * ny * nz * components`, and only single-component cubes are accepted.
    pub fn from_raw(dims: [usize; 3], components: usize, buffer: Vec<F>) -> CubeResult<Self> {
        if components != 1 {
            return Err(CubeError::UnsupportedComponents(components));
        }
        let grid = Grid::new(dims[0], dims[1], dims[2]);
        if buffer.len() != grid.len() {
            return Err(CubeError::MissingInput(format!(
                "buffer holds {} voxels but dims {:?} need {}",
                buffer.len(),
                dims,
                grid.len()
            )));
        }
        let data = Array3::from_shape_vec(grid.shape(), buffer)
            .map_err(|e| CubeError::MissingInput(format!("invalid buffer shape: {e}")))?;
        Ok(Self { data })
    }

    #[inline]
    pub fn grid(&self) -> Grid {
        Grid::from_shape(self.data.shape())
    }

    /// Extents in `[nx, ny, nz]` order.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.grid().dims()
    }

    pub fn kind(&self) -> DataKind {
        F::DATA_KIND
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Voxel at `(x, y, z)`, or `None` outside the cube.
    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<F> {
        self.data.get([z, y, x]).copied()
    }

    pub fn data(&self) -> &Array3<F> {
        &self.data
    }

    pub fn view(&self) -> ArrayView3<'_, F> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, F> {
        self.data.view_mut()
    }

    /// Flat X-fastest copy of the voxels.
    pub fn to_raw(&self) -> Vec<F> {
        self.data.iter().copied().collect()
    }
}

/// Integer segmentation mask paired with a [`ScalarVolume`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaskVolume {
    data: Array3<i16>,
}

impl MaskVolume {
    pub fn new(data: Array3<i16>) -> Self {
        Self { data }
    }

    pub fn from_fn<G>(grid: Grid, mut f: G) -> Self
    where
        G: FnMut(usize, usize, usize) -> i16,
    {
        Self {
            data: Array3::from_shape_fn(grid.shape(), |(z, y, x)| f(x, y, z)),
        }
    }

    #[inline]
    pub fn grid(&self) -> Grid {
        Grid::from_shape(self.data.shape())
    }

    pub fn data(&self) -> &Array3<i16> {
        &self.data
    }

    pub fn view(&self) -> ArrayView3<'_, i16> {
        self.data.view()
    }

    /// Fail with `MissingInput` unless the mask covers exactly `grid`.
    pub fn ensure_matches(&self, grid: Grid) -> CubeResult<()> {
        if self.grid() != grid {
            return Err(CubeError::MissingInput(format!(
                "mask dims {:?} do not match volume dims {:?}",
                self.grid().dims(),
                grid.dims()
            )));
        }
        Ok(())
    }
}

/// Strict membership test used by the moment and profile reductions.
#[inline]
pub fn mask_positive(value: i16) -> bool {
    value > 0
}

/// Segment membership test used by blanking, cropping and statistics.
#[inline]
pub fn mask_member(value: i16) -> bool {
    value >= 1
}

/// A cube of any element kind, as received from the host layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyVolume {
    Float32(ScalarVolume<f32>),
    Float64(ScalarVolume<f64>),
    Int16(Array3<i16>),
    UInt8(Array3<u8>),
}

impl AnyVolume {
    pub fn kind(&self) -> DataKind {
        match self {
            AnyVolume::Float32(_) => DataKind::Float32,
            AnyVolume::Float64(_) => DataKind::Float64,
            AnyVolume::Int16(_) => DataKind::Int16,
            AnyVolume::UInt8(_) => DataKind::UInt8,
        }
    }

    pub fn grid(&self) -> Grid {
        match self {
            AnyVolume::Float32(v) => v.grid(),
            AnyVolume::Float64(v) => v.grid(),
            AnyVolume::Int16(a) => Grid::from_shape(a.shape()),
            AnyVolume::UInt8(a) => Grid::from_shape(a.shape()),
        }
    }

    pub fn as_f32(&self) -> Option<&ScalarVolume<f32>> {
        match self {
            AnyVolume::Float32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ScalarVolume<f64>> {
        match self {
            AnyVolume::Float64(v) => Some(v),
            _ => None,
        }
    }
}

impl From<ScalarVolume<f32>> for AnyVolume {
    fn from(volume: ScalarVolume<f32>) -> Self {
        AnyVolume::Float32(volume)
    }
}

impl From<ScalarVolume<f64>> for AnyVolume {
    fn from(volume: ScalarVolume<f64>) -> Self {
        AnyVolume::Float64(volume)
    }
}
