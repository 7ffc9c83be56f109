//! Inclusive voxel bounding boxes.

use crate::error::{CubeError, CubeResult};
use crate::grid::Grid;
use crate::volume::{mask_member, MaskVolume};

/// Inclusive box `[x_min, x_max] x [y_min, y_max] x [z_min, z_max]` in voxel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelBounds {
    pub min: [usize; 3],
    pub max: [usize; 3],
}

impl VoxelBounds {
    /// Build from the six-element host form `[x0, x1, y0, y1, z0, z1]`.
    ///
    /// Negative or reversed extents are rejected.
    pub fn from_extent(extent: [i64; 6]) -> CubeResult<Self> {
        let mut min = [0usize; 3];
        let mut max = [0usize; 3];
        for axis in 0..3 {
            let (lo, hi) = (extent[2 * axis], extent[2 * axis + 1]);
            if lo < 0 || hi < lo {
                return Err(CubeError::DegenerateParameters(format!(
                    "invalid bounds {extent:?} on axis {axis}"
                )));
            }
            min[axis] = lo as usize;
            max[axis] = hi as usize;
        }
        Ok(Self { min, max })
    }

    /// The whole grid.
    pub fn full(grid: Grid) -> Self {
        Self {
            min: [0; 3],
            max: [
                grid.nx.saturating_sub(1),
                grid.ny.saturating_sub(1),
                grid.nz.saturating_sub(1),
            ],
        }
    }

    pub fn to_extent(&self) -> [i64; 6] {
        [
            self.min[0] as i64,
            self.max[0] as i64,
            self.min[1] as i64,
            self.max[1] as i64,
            self.min[2] as i64,
            self.max[2] as i64,
        ]
    }

    /// Output extents `[nx, ny, nz]` of a crop to these bounds.
    pub fn dims(&self) -> [usize; 3] {
        [
            self.max[0] - self.min[0] + 1,
            self.max[1] - self.min[1] + 1,
            self.max[2] - self.min[2] + 1,
        ]
    }

    pub fn voxel_count(&self) -> usize {
        self.dims().iter().product()
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        (self.min[0]..=self.max[0]).contains(&x)
            && (self.min[1]..=self.max[1]).contains(&y)
            && (self.min[2]..=self.max[2]).contains(&z)
    }

    /// Fail unless the box lies inside `grid`.
    pub fn ensure_within(&self, grid: Grid) -> CubeResult<()> {
        let dims = grid.dims();
        if grid.is_empty() || (0..3).any(|a| self.max[a] >= dims[a]) {
            return Err(CubeError::DegenerateParameters(format!(
                "bounds {:?} exceed volume dims {:?}",
                self.to_extent(),
                dims
            )));
        }
        Ok(())
    }

    /// Whether the box spans every voxel of `grid`.
    pub fn covers(&self, grid: Grid) -> bool {
        *self == Self::full(grid)
    }
}

/// A voxel selection: a box or the members (`mask >= 1`) of a segmentation.
#[derive(Debug, Clone, Copy)]
pub enum Region<'a> {
    Roi(VoxelBounds),
    Segmentation(&'a MaskVolume),
}

impl Region<'_> {
    /// Fail unless the region can be evaluated on `grid`.
    pub fn ensure_fits(&self, grid: Grid) -> CubeResult<()> {
        match self {
            Region::Roi(bounds) => bounds.ensure_within(grid),
            Region::Segmentation(mask) => mask.ensure_matches(grid),
        }
    }

    #[inline]
    pub fn contains(&self, x: usize, y: usize, z: usize) -> bool {
        match self {
            Region::Roi(bounds) => bounds.contains(x, y, z),
            Region::Segmentation(mask) => mask.data().get([z, y, x]).is_some_and(|m| mask_member(*m)),
        }
    }

    /// Whether every voxel of `grid` belongs to the region.
    pub fn covers(&self, grid: Grid) -> bool {
        match self {
            Region::Roi(bounds) => bounds.covers(grid),
            Region::Segmentation(mask) => {
                mask.grid() == grid && mask.data().iter().all(|m| mask_member(*m))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_roundtrip_and_dims() {
        let b = VoxelBounds::from_extent([1, 3, 0, 0, 2, 5]).unwrap();
        assert_eq!(b.dims(), [3, 1, 4]);
        assert_eq!(b.voxel_count(), 12);
        assert_eq!(b.to_extent(), [1, 3, 0, 0, 2, 5]);
        assert!(b.contains(3, 0, 5));
        assert!(!b.contains(0, 0, 2));
    }

    #[test]
    fn test_rejects_bad_extents() {
        assert!(VoxelBounds::from_extent([2, 1, 0, 0, 0, 0]).is_err());
        assert!(VoxelBounds::from_extent([-1, 1, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_within_and_covers() {
        let grid = Grid::new(4, 3, 2);
        let full = VoxelBounds::full(grid);
        assert!(full.covers(grid));
        assert!(full.ensure_within(grid).is_ok());
        let too_big = VoxelBounds::from_extent([0, 4, 0, 2, 0, 1]).unwrap();
        assert!(too_big.ensure_within(grid).is_err());
        assert!(!VoxelBounds::from_extent([0, 3, 0, 2, 0, 0])
            .unwrap()
            .covers(grid));
    }

    #[test]
    fn test_region_membership() {
        let grid = Grid::new(3, 1, 1);
        let mask = MaskVolume::from_fn(grid, |x, _, _| x as i16);
        let seg = Region::Segmentation(&mask);
        assert!(!seg.contains(0, 0, 0));
        assert!(seg.contains(2, 0, 0));
        assert!(!seg.contains(5, 0, 0));
        assert!(!seg.covers(grid));
        assert!(Region::Roi(VoxelBounds::full(grid)).covers(grid));

        let all = MaskVolume::from_fn(grid, |_, _, _| 1);
        assert!(Region::Segmentation(&all).covers(grid));
        assert!(Region::Segmentation(&all).ensure_fits(Grid::new(2, 1, 1)).is_err());
    }
}
