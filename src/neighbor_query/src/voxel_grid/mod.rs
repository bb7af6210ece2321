//! Dense voxel grid index for neighbor lookup.
//!
//! The grid maps every voxel of a dense `(R1, R2, R3)` grid to the candidate
//! points it contains. It is stored CSR style:
//!
//! - `cumulative_counts[flat]` is the number of indexed points in all cells up
//!   to and including `flat` (row-major over `(z, y, x)`).
//! - `point_indices` lists global point indices grouped by cell in the same
//!   flattened order.
//!
//! The points of cell `flat` are therefore
//! `point_indices[cumulative_counts[flat - 1]..cumulative_counts[flat]]`, with
//! the start taken as 0 for the first cell.
//!
//! An index can be handed in from an external voxelizer via
//! [`VoxelIndex::from_parts`], or built here from voxel coordinates or raw
//! points (see [`cpu`]).

pub mod cpu;
pub mod types;

pub use types::{GridShape, VoxelCoord, VoxelizeConfig};

use std::ops::Range;

use crate::error::{check_len, QueryError, Result};

/// CSR-style voxel grid: cumulative per-cell counts plus sorted point indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelIndex {
    shape: GridShape,
    cumulative_counts: Vec<u32>,
    point_indices: Vec<u32>,
    /// One past the largest stored point index.
    required_points: usize,
}

impl VoxelIndex {
    /// Wrap externally built buffers after checking they are consistent.
    ///
    /// # Arguments
    /// * `shape` - Grid dimensions `(R1, R2, R3)`
    /// * `cumulative_counts` - `R1 * R2 * R3` non-decreasing running totals
    /// * `point_indices` - Global point indices grouped by cell
    /// * `num_points` - Size of the candidate point array the indices address
    pub fn from_parts(
        shape: GridShape,
        cumulative_counts: Vec<u32>,
        point_indices: Vec<u32>,
        num_points: usize,
    ) -> Result<Self> {
        check_len(
            "cumulative_counts",
            cumulative_counts.len(),
            shape.num_cells(),
        )?;

        let mut previous = 0u32;
        for (flat, &total) in cumulative_counts.iter().enumerate() {
            if total < previous {
                return Err(QueryError::InvalidGrid {
                    flat,
                    reason: "cumulative counts decrease",
                });
            }
            previous = total;
        }
        if previous as usize > point_indices.len() {
            return Err(QueryError::InvalidGrid {
                flat: cumulative_counts.len().saturating_sub(1),
                reason: "cumulative count exceeds point_indices length",
            });
        }

        if let Some((position, &index)) = point_indices
            .iter()
            .enumerate()
            .find(|&(_, &index)| index as usize >= num_points)
        {
            return Err(QueryError::PointIndexOutOfRange {
                position,
                index,
                num_points,
            });
        }

        let required_points = required_points(&point_indices);
        Ok(Self {
            shape,
            cumulative_counts,
            point_indices,
            required_points,
        })
    }

    /// Assemble an index whose consistency is guaranteed by construction.
    pub(crate) fn from_raw(
        shape: GridShape,
        cumulative_counts: Vec<u32>,
        point_indices: Vec<u32>,
    ) -> Self {
        debug_assert_eq!(cumulative_counts.len(), shape.num_cells());
        let required_points = required_points(&point_indices);
        Self {
            shape,
            cumulative_counts,
            point_indices,
            required_points,
        }
    }

    /// Check that every stored index addresses one of `num_points` points.
    pub fn check_points(&self, num_points: usize) -> Result<()> {
        if self.required_points <= num_points {
            return Ok(());
        }
        match self
            .point_indices
            .iter()
            .position(|&index| index as usize >= num_points)
        {
            Some(position) => Err(QueryError::PointIndexOutOfRange {
                position,
                index: self.point_indices[position],
                num_points,
            }),
            None => Ok(()),
        }
    }

    /// Grid dimensions.
    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.cumulative_counts.last().map_or(0, |&total| total as usize)
    }

    /// Whether no point is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Range into [`point_indices`](Self::point_indices) for cell `flat`.
    #[inline]
    pub fn cell_range(&self, flat: usize) -> Range<usize> {
        let end = self.cumulative_counts[flat] as usize;
        let start = if flat == 0 {
            0
        } else {
            self.cumulative_counts[flat - 1] as usize
        };
        start..end
    }

    /// Global indices of the points in cell `(z, y, x)`.
    pub fn points_in_cell(&self, z: usize, y: usize, x: usize) -> &[u32] {
        let range = self.cell_range(self.shape.flat_index(z, y, x));
        &self.point_indices[range]
    }

    /// Cumulative per-cell counts, `R1 * R2 * R3` entries.
    pub fn cumulative_counts(&self) -> &[u32] {
        &self.cumulative_counts
    }

    /// Point indices grouped by cell.
    pub fn point_indices(&self) -> &[u32] {
        &self.point_indices
    }

    /// Number of cells holding at least one point.
    pub fn occupied_cells(&self) -> usize {
        (0..self.shape.num_cells())
            .filter(|&flat| !self.cell_range(flat).is_empty())
            .count()
    }
}

fn required_points(point_indices: &[u32]) -> usize {
    point_indices
        .iter()
        .max()
        .map_or(0, |&index| index as usize + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2x2x2 grid with points in cell 0 and cell 5.
    fn sample_index() -> VoxelIndex {
        let shape = GridShape::new(2, 2, 2);
        let cumulative = vec![2, 2, 2, 2, 2, 3, 3, 3];
        VoxelIndex::from_parts(shape, cumulative, vec![4, 1, 0], 5).unwrap()
    }

    #[test]
    fn test_cell_range_first_cell_starts_at_zero() {
        let index = sample_index();
        assert_eq!(index.cell_range(0), 0..2);
        assert_eq!(index.points_in_cell(0, 0, 0), &[4, 1]);
    }

    #[test]
    fn test_cell_range_uses_previous_total() {
        let index = sample_index();
        assert_eq!(index.cell_range(1), 2..2);
        assert_eq!(index.cell_range(5), 2..3);
        // flat 5 = (z=1, y=0, x=1)
        assert_eq!(index.points_in_cell(1, 0, 1), &[0]);
        assert!(index.points_in_cell(1, 1, 1).is_empty());
    }

    #[test]
    fn test_len_and_occupancy() {
        let index = sample_index();
        assert_eq!(index.len(), 3);
        assert!(!index.is_empty());
        assert_eq!(index.occupied_cells(), 2);
    }

    #[test]
    fn test_rejects_wrong_grid_length() {
        let err = VoxelIndex::from_parts(GridShape::new(2, 2, 2), vec![0; 7], vec![], 0)
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::BufferLength {
                name: "cumulative_counts",
                expected: 8,
                actual: 7,
            }
        );
    }

    #[test]
    fn test_rejects_decreasing_counts() {
        let err = VoxelIndex::from_parts(GridShape::new(1, 1, 3), vec![2, 1, 2], vec![0, 1], 2)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidGrid { flat: 1, .. }));
    }

    #[test]
    fn test_rejects_short_point_indices() {
        let err = VoxelIndex::from_parts(GridShape::new(1, 1, 2), vec![1, 3], vec![0, 1], 2)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidGrid { flat: 1, .. }));
    }

    #[test]
    fn test_rejects_out_of_range_point() {
        let err =
            VoxelIndex::from_parts(GridShape::new(1, 1, 1), vec![2], vec![0, 7], 3).unwrap_err();
        assert_eq!(
            err,
            QueryError::PointIndexOutOfRange {
                position: 1,
                index: 7,
                num_points: 3,
            }
        );
    }

    #[test]
    fn test_check_points() {
        let index = sample_index();
        assert!(index.check_points(5).is_ok());
        assert_eq!(
            index.check_points(3),
            Err(QueryError::PointIndexOutOfRange {
                position: 0,
                index: 4,
                num_points: 3,
            })
        );
    }

    #[test]
    fn test_empty_index() {
        let index = VoxelIndex::from_parts(GridShape::new(1, 2, 2), vec![0; 4], vec![], 0).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.occupied_cells(), 0);
    }
}
