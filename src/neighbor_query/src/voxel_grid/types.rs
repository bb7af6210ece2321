//! Type definitions for the dense voxel grid.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Dense grid dimensions `(R1, R2, R3)` along `(z, y, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    pub r1: usize,
    pub r2: usize,
    pub r3: usize,
}

impl GridShape {
    pub fn new(r1: usize, r2: usize, r3: usize) -> Self {
        Self { r1, r2, r3 }
    }

    /// Total number of cells.
    pub fn num_cells(&self) -> usize {
        self.r1 * self.r2 * self.r3
    }

    /// Row-major flat index: `z * R2 * R3 + y * R3 + x`.
    ///
    /// The caller guarantees the cell lies inside the grid.
    #[inline]
    pub fn flat_index(&self, z: usize, y: usize, x: usize) -> usize {
        (z * self.r2 + y) * self.r3 + x
    }

    /// Inverse of [`flat_index`](Self::flat_index), returning `(z, y, x)`.
    pub fn unflatten(&self, flat: usize) -> (usize, usize, usize) {
        let plane = self.r2 * self.r3;
        let z = flat / plane;
        let remainder = flat % plane;
        (z, remainder / self.r3, remainder % self.r3)
    }

    /// Whether the signed cell `(z, y, x)` lies inside the grid.
    pub fn contains(&self, z: i32, y: i32, x: i32) -> bool {
        in_axis(z, self.r1) && in_axis(y, self.r2) && in_axis(x, self.r3)
    }

    /// Cells within `±half_width` of `center` along one axis, clamped to
    /// `[0, extent)`. Empty when the window misses the grid.
    #[inline]
    pub fn clamped_axis(center: i32, half_width: i32, extent: usize) -> RangeInclusive<usize> {
        let lo = (i64::from(center) - i64::from(half_width)).max(0);
        let hi = (i64::from(center) + i64::from(half_width)).min(extent as i64 - 1);
        if lo > hi {
            // Canonical empty range.
            return 1..=0;
        }
        lo as usize..=hi as usize
    }
}

fn in_axis(value: i32, extent: usize) -> bool {
    value >= 0 && (value as usize) < extent
}

/// Voxel coordinate of a query point, decoded from a `(batch, z, y, x)` row.
///
/// A negative batch id marks the query as invalid: it is skipped and its
/// output row keeps the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelCoord {
    pub batch: i32,
    pub z: i32,
    pub y: i32,
    pub x: i32,
}

impl VoxelCoord {
    pub fn new(batch: i32, z: i32, y: i32, x: i32) -> Self {
        Self { batch, z, y, x }
    }

    /// Whether this query takes part in the search.
    pub fn is_valid(&self) -> bool {
        self.batch >= 0
    }

    /// Compute the cell holding `point` for a voxelization config.
    ///
    /// Returns `None` for non-finite points and points outside the
    /// configured point-cloud range.
    pub fn from_point(point: &[f32; 3], batch: i32, config: &VoxelizeConfig) -> Option<Self> {
        let shape = config.grid_shape();
        let mut cell = [0i32; 3];
        // xyz order in the point, zyx order in the grid.
        for axis in 0..3 {
            let value = point[axis];
            if !value.is_finite() {
                return None;
            }
            let local = (value - config.point_cloud_range[axis]) / config.voxel_size[axis];
            let index = local.floor();
            if index < 0.0 || index > i32::MAX as f32 {
                return None;
            }
            cell[axis] = index as i32;
        }
        let coord = Self::new(batch, cell[2], cell[1], cell[0]);
        shape.contains(coord.z, coord.y, coord.x).then_some(coord)
    }
}

impl From<[i32; 4]> for VoxelCoord {
    fn from(row: [i32; 4]) -> Self {
        Self::new(row[0], row[1], row[2], row[3])
    }
}

impl From<VoxelCoord> for [i32; 4] {
    fn from(coord: VoxelCoord) -> Self {
        [coord.batch, coord.z, coord.y, coord.x]
    }
}

/// Configuration for mapping raw points onto a dense voxel grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelizeConfig {
    /// Voxel side lengths along x, y, z.
    pub voxel_size: [f32; 3],
    /// `[x_min, y_min, z_min, x_max, y_max, z_max]`.
    pub point_cloud_range: [f32; 6],
}

impl Default for VoxelizeConfig {
    fn default() -> Self {
        Self {
            voxel_size: [0.1, 0.1, 0.1],
            point_cloud_range: [0.0, -40.0, -3.0, 70.4, 40.0, 1.0],
        }
    }
}

impl VoxelizeConfig {
    /// Grid shape covering the configured range, `(R1, R2, R3)` along `(z, y, x)`.
    pub fn grid_shape(&self) -> GridShape {
        let cells = |axis: usize| -> usize {
            let extent = self.point_cloud_range[axis + 3] - self.point_cloud_range[axis];
            (extent / self.voxel_size[axis]).round().max(0.0) as usize
        };
        GridShape::new(cells(2), cells(1), cells(0))
    }
}
