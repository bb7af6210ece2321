//! CPU construction of the CSR voxel index.
//!
//! Points are bucketed with a counting sort: count points per cell, take the
//! running total, then scatter point indices into their cell's slot range.
//! The scatter walks points in ascending order, so within a cell the indices
//! stay sorted and the index is deterministic for a given input.

use rayon::prelude::*;
use tracing::debug;

use super::types::{GridShape, VoxelCoord, VoxelizeConfig};
use super::VoxelIndex;
use crate::error::{sentinel_for, Result};

/// Build a voxel index from the cell of every candidate point.
///
/// `coords[i]` is the cell of point `i`. Entries with a negative batch id or
/// lying outside `shape` are left out of the index.
///
/// # Arguments
/// * `coords` - One voxel coordinate per candidate point
/// * `shape` - Grid dimensions `(R1, R2, R3)`
///
/// # Errors
/// [`QueryError::TooManyPoints`](crate::error::QueryError::TooManyPoints) if
/// point indices would not fit in `u32`.
pub fn build_voxel_index(coords: &[VoxelCoord], shape: GridShape) -> Result<VoxelIndex> {
    // Every count, total and index below is bounded by this.
    sentinel_for(coords.len())?;
    let num_cells = shape.num_cells();

    // Flat cell per point, None for points the index skips.
    let point_cells: Vec<Option<usize>> = coords
        .par_iter()
        .map(|coord| {
            (coord.is_valid() && shape.contains(coord.z, coord.y, coord.x)).then(|| {
                shape.flat_index(coord.z as usize, coord.y as usize, coord.x as usize)
            })
        })
        .collect();

    // Single histogram: the grid is dense and can be far larger than the
    // cloud, so per-thread copies are not affordable.
    let mut cell_counts = vec![0u32; num_cells];
    for &flat in point_cells.iter().flatten() {
        cell_counts[flat] += 1;
    }

    // Inclusive running totals are the stored grid.
    let mut cumulative_counts = Vec::with_capacity(num_cells);
    let mut sum = 0u32;
    for &count in &cell_counts {
        sum += count;
        cumulative_counts.push(sum);
    }

    // Reuse the histogram as write cursors at each cell's exclusive offset.
    let mut cursors = cell_counts;
    for (cursor, &total) in cursors.iter_mut().zip(cumulative_counts.iter()) {
        *cursor = total - *cursor;
    }
    let mut point_indices = vec![0u32; sum as usize];
    for (point, cell) in point_cells.iter().enumerate() {
        if let Some(flat) = *cell {
            point_indices[cursors[flat] as usize] = point as u32;
            cursors[flat] += 1;
        }
    }

    debug!(
        num_points = coords.len(),
        indexed = sum,
        num_cells,
        "built voxel index"
    );

    Ok(VoxelIndex::from_raw(shape, cumulative_counts, point_indices))
}

/// Compute the voxel coordinate of every point.
///
/// Points that are non-finite or outside the configured range get batch id
/// `-1`, which both the index builder and the voxel query treat as invalid.
pub fn voxelize_points(points: &[[f32; 3]], batch: i32, config: &VoxelizeConfig) -> Vec<VoxelCoord> {
    points
        .par_iter()
        .map(|point| {
            VoxelCoord::from_point(point, batch, config)
                .unwrap_or_else(|| VoxelCoord::new(-1, 0, 0, 0))
        })
        .collect()
}

/// Voxelize a point cloud and index it in one step.
pub fn build_voxel_index_from_points(
    points: &[[f32; 3]],
    config: &VoxelizeConfig,
) -> Result<VoxelIndex> {
    let coords = voxelize_points(points, 0, config);
    build_voxel_index(&coords, config.grid_shape())
}
