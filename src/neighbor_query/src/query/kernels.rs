//! CubeCL GPU kernels for the neighbor queries.
//!
//! One thread per query point. Both kernels write the same rows as their CPU
//! counterparts in [`super::voxel`] and [`super::cube`]; the host uploads a
//! sentinel-filled `idx` and a zeroed mask before launch.

use cubecl::prelude::*;

/// Voxel query over a CSR voxel index.
///
/// # Inputs
/// - `new_xyz`: [M * 3] query points
/// - `xyz`: [N * 3] candidate points
/// - `new_coords`: [M * 4] `(batch, z, y, x)` per query
/// - `cumulative_counts`: [R1 * R2 * R3] running per-cell totals
/// - `point_indices`: point indices grouped by cell
/// - `radius_sq`: squared search radius
/// - `grid_r1`, `grid_r2`, `grid_r3`: grid dimensions along z, y, x
/// - `range_z`, `range_y`, `range_x`: neighborhood half-widths in cells
///
/// # Outputs
/// - `idx`: [M * nsample] neighbor indices, untouched past the found count
/// - `neighbor_counts`: [M] found count per query
#[cube(launch_unchecked)]
pub fn voxel_query_kernel<F: Float>(
    new_xyz: &Array<F>,
    xyz: &Array<F>,
    new_coords: &Array<i32>,
    cumulative_counts: &Array<u32>,
    point_indices: &Array<u32>,
    radius_sq: F,
    num_queries: u32,
    grid_r1: u32,
    grid_r2: u32,
    grid_r3: u32,
    range_z: i32,
    range_y: i32,
    range_x: i32,
    nsample: u32,
    idx: &mut Array<u32>,
    neighbor_counts: &mut Array<u32>,
) {
    let query_idx = ABSOLUTE_POS;

    if query_idx >= num_queries {
        terminate!();
    }

    let cbase = query_idx * 4;
    let batch = new_coords[cbase];
    if batch < 0i32 {
        terminate!();
    }

    let qbase = query_idx * 3;
    let qx = new_xyz[qbase];
    let qy = new_xyz[qbase + 1];
    let qz = new_xyz[qbase + 2];

    // Window clamped to the grid, inclusive bounds
    let cz = new_coords[cbase + 1];
    let cy = new_coords[cbase + 2];
    let cx = new_coords[cbase + 3];

    let mut z_lo = cz - range_z;
    let mut z_hi = cz + range_z;
    let mut y_lo = cy - range_y;
    let mut y_hi = cy + range_y;
    let mut x_lo = cx - range_x;
    let mut x_hi = cx + range_x;
    if z_lo < 0i32 {
        z_lo = 0i32;
    }
    if y_lo < 0i32 {
        y_lo = 0i32;
    }
    if x_lo < 0i32 {
        x_lo = 0i32;
    }
    let max_z = i32::cast_from(grid_r1) - 1i32;
    let max_y = i32::cast_from(grid_r2) - 1i32;
    let max_x = i32::cast_from(grid_r3) - 1i32;
    if z_hi > max_z {
        z_hi = max_z;
    }
    if y_hi > max_y {
        y_hi = max_y;
    }
    if x_hi > max_x {
        x_hi = max_x;
    }

    let out_base = query_idx * nsample;
    let mut count = 0u32;

    // NOTE: no `break` in these loops, CubeCL's uniformity analysis rejects it.
    // The `count < nsample` guards turn the remaining iterations into no-ops.
    if z_lo <= z_hi && y_lo <= y_hi && x_lo <= x_hi {
        let z_start = u32::cast_from(z_lo);
        let z_end = u32::cast_from(z_hi) + 1u32;
        let y_start = u32::cast_from(y_lo);
        let y_end = u32::cast_from(y_hi) + 1u32;
        let x_start = u32::cast_from(x_lo);
        let x_end = u32::cast_from(x_hi) + 1u32;

        for z in z_start..z_end {
            for y in y_start..y_end {
                for x in x_start..x_end {
                    if count < nsample {
                        let flat = (z * grid_r2 + y) * grid_r3 + x;
                        let end = cumulative_counts[flat];
                        let mut start = 0u32;
                        if flat > 0u32 {
                            start = cumulative_counts[flat - 1u32];
                        }

                        for k in start..end {
                            if count < nsample {
                                let point = point_indices[k];
                                let pbase = point * 3u32;
                                let dx = xyz[pbase] - qx;
                                let dy = xyz[pbase + 1] - qy;
                                let dz = xyz[pbase + 2] - qz;
                                let dist_sq = dx * dx + dy * dy + dz * dz;

                                if dist_sq <= radius_sq {
                                    idx[out_base + count] = point;
                                    count += 1u32;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    neighbor_counts[query_idx] = count;
}

/// Cube query over stacked batch elements.
///
/// # Inputs
/// - `new_xyz`: [M * 3] query points, stacked by batch element
/// - `query_offsets`: [B + 1] prefix sums of the per-element query counts
/// - `xyz`: [N * 3] candidate points, stacked by batch element
/// - `point_offsets`: [B + 1] prefix sums of the per-element point counts
/// - `radius_x`, `radius_y`, `radius_z`: box half-extents
///
/// # Outputs
/// - `idx`: [M * nsample] neighbor indices with fallback fill
/// - `non_padding`: [M * nsample] 1 for genuine neighbors
/// - `neighbor_counts`: [M] found count per query
#[cube(launch_unchecked)]
pub fn cube_query_kernel<F: Float>(
    new_xyz: &Array<F>,
    query_offsets: &Array<u32>,
    xyz: &Array<F>,
    point_offsets: &Array<u32>,
    radius_x: F,
    radius_y: F,
    radius_z: F,
    num_queries: u32,
    num_batches: u32,
    nsample: u32,
    idx: &mut Array<u32>,
    non_padding: &mut Array<F>,
    neighbor_counts: &mut Array<u32>,
) {
    let query_idx = ABSOLUTE_POS;

    if query_idx >= num_queries {
        terminate!();
    }

    // Last element whose query range starts at or before this query.
    // Empty elements share their start offset with the next one.
    let mut batch = 0u32;
    for b in 0..num_batches {
        if query_offsets[b] <= query_idx {
            batch = b;
        }
    }

    let qbase = query_idx * 3;
    let qx = new_xyz[qbase];
    let qy = new_xyz[qbase + 1];
    let qz = new_xyz[qbase + 2];

    let start = point_offsets[batch];
    let end = point_offsets[batch + 1];
    let out_base = query_idx * nsample;
    let one = F::new(1.0);
    let mut count = 0u32;

    for k in start..end {
        if count < nsample {
            let pbase = k * 3;
            let dx = xyz[pbase] - qx;
            let dy = xyz[pbase + 1] - qy;
            let dz = xyz[pbase + 2] - qz;
            let inside_x = dx <= radius_x && dx >= F::new(0.0) - radius_x;
            let inside_y = dy <= radius_y && dy >= F::new(0.0) - radius_y;
            let inside_z = dz <= radius_z && dz >= F::new(0.0) - radius_z;

            if inside_x && inside_y && inside_z {
                // First hit pads the whole row
                if count == 0u32 {
                    for s in 0..nsample {
                        idx[out_base + s] = k;
                    }
                }
                idx[out_base + count] = k;
                non_padding[out_base + count] = one;
                count += 1u32;
            }
        }
    }

    neighbor_counts[query_idx] = count;
}
