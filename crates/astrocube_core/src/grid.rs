//! Index arithmetic for dense cubes.
//!
//! A cube is stored row-major with X fastest, then Y, then Z. In ndarray terms
//! that is an `Array3` of shape `(nz, ny, nx)`. [`Grid`] carries the three
//! extents and the boundary policy every kernel uses: neighbours that fall
//! outside the cube are dropped (edge truncation), never wrapped or reflected.

use ndarray::Axis;
use std::ops::Range;

/// One of the three cube axes, named in (x, y, z) voxel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeAxis {
    X,
    Y,
    Z,
}

impl CubeAxis {
    /// Axes in the order the separable passes visit them.
    pub const ALL: [CubeAxis; 3] = [CubeAxis::X, CubeAxis::Y, CubeAxis::Z];

    /// The ndarray axis of an `(nz, ny, nx)` array that runs along this cube axis.
    #[inline]
    pub fn array_axis(self) -> Axis {
        match self {
            CubeAxis::X => Axis(2),
            CubeAxis::Y => Axis(1),
            CubeAxis::Z => Axis(0),
        }
    }

    /// Position of this axis in `[x, y, z]` ordered triples.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            CubeAxis::X => 0,
            CubeAxis::Y => 1,
            CubeAxis::Z => 2,
        }
    }
}

/// Extents of a cube and the flat addressing derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl Grid {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    /// Build from an ndarray shape `[nz, ny, nx]`.
    pub fn from_shape(shape: &[usize]) -> Self {
        Self {
            nx: shape.get(2).copied().unwrap_or(1),
            ny: shape.get(1).copied().unwrap_or(1),
            nz: shape.first().copied().unwrap_or(1),
        }
    }

    /// ndarray shape `(nz, ny, nx)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nz, self.ny, self.nx)
    }

    /// Extents in `[nx, ny, nz]` order.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn extent(&self, axis: CubeAxis) -> usize {
        self.dims()[axis.index()]
    }

    /// Grid padded on every axis longer than one voxel up to a multiple of `multiple`.
    pub fn padded_to_multiple(&self, multiple: usize) -> Grid {
        let pad = |n: usize| {
            if n <= 1 || multiple <= 1 {
                n
            } else {
                n.div_ceil(multiple) * multiple
            }
        };
        Grid::new(pad(self.nx), pad(self.ny), pad(self.nz))
    }
}

/// Taps of a centered window of half-width `half` at `pos` that stay inside `0..len`.
#[inline]
pub fn tap_window(pos: usize, half: usize, len: usize) -> Range<usize> {
    pos.saturating_sub(half)..(pos + half + 1).min(len)
}

/// `pos + delta` if it lies in `0..len`.
#[inline]
pub fn truncated_neighbor(pos: usize, delta: isize, len: usize) -> Option<usize> {
    let target = pos as isize + delta;
    if target < 0 || target as usize >= len {
        None
    } else {
        Some(target as usize)
    }
}

/// `pos + delta` if it lies in `0..len`, otherwise `pos` itself.
///
/// A finite difference against the clamped neighbour is zero, which drops
/// that side of the stencil at the boundary.
#[inline]
pub fn clamped_neighbor(pos: usize, delta: isize, len: usize) -> usize {
    truncated_neighbor(pos, delta, len).unwrap_or(pos)
}
