//! Voxel query: radius search pruned by a dense voxel index.
//!
//! # Algorithm
//!
//! For every query point with a valid voxel coordinate `(z, y, x)`:
//! 1. Visit the cells within `±range` of the query's cell, clamped to the
//!    grid, in ascending `z`, then `y`, then `x` order.
//! 2. For each cell, walk its points in stored order and accept those whose
//!    squared distance to the query is at most `radius²`.
//! 3. Stop as soon as `nsample` points are accepted.
//!
//! Slots past the found count keep the sentinel; there is no fallback fill.
//! Queries with a negative batch id are skipped entirely.

use rayon::prelude::*;
use tracing::debug;

use super::{NeighborIndices, QueryStats, VoxelQueryConfig};
use crate::error::{check_len, sentinel_for, QueryError, Result};
use crate::voxel_grid::{GridShape, VoxelCoord, VoxelIndex};

/// Run a voxel query into caller-provided output.
///
/// `idx` must hold `new_xyz.len() * nsample` entries, already filled with the
/// sentinel (`xyz.len()`). Only slots that receive a neighbor are written.
///
/// # Arguments
/// * `config` - Radius, capacity and neighborhood half-widths
/// * `new_xyz` - Query points `[M]`
/// * `xyz` - Candidate points `[N]`
/// * `new_coords` - `(batch, z, y, x)` per query `[M]`
/// * `index` - Voxel index over `xyz`
/// * `idx` - Output `[M * nsample]`
///
/// # Returns
/// Per-row found counts, or a precondition error before any row is touched.
pub fn voxel_query_into(
    config: &VoxelQueryConfig,
    new_xyz: &[[f32; 3]],
    xyz: &[[f32; 3]],
    new_coords: &[[i32; 4]],
    index: &VoxelIndex,
    idx: &mut [u32],
) -> Result<QueryStats> {
    validate_voxel_inputs(config, new_xyz, xyz, new_coords, index)?;
    let nsample = config.nsample;
    let num_queries = new_xyz.len();
    check_len("idx", idx.len(), num_queries * nsample)?;

    debug!(
        num_queries,
        num_points = xyz.len(),
        nsample,
        radius = config.radius,
        "dispatching voxel query"
    );

    let radius_sq = config.radius * config.radius;
    let neighbor_counts: Vec<u32> = idx
        .par_chunks_mut(nsample)
        .zip(new_xyz.par_iter().zip(new_coords.par_iter()))
        .map(|(row, (query, &coord))| {
            scan_voxel_neighborhood(
                query,
                VoxelCoord::from(coord),
                config.range,
                radius_sq,
                xyz,
                index,
                row,
            )
        })
        .collect();

    let stats = QueryStats { neighbor_counts };
    debug!(
        rows_with_neighbors = stats.rows_with_neighbors(),
        total_neighbors = stats.total_neighbors(),
        "voxel query finished"
    );
    Ok(stats)
}

/// Run a voxel query into freshly allocated, sentinel-filled output.
pub fn voxel_query(
    config: &VoxelQueryConfig,
    new_xyz: &[[f32; 3]],
    xyz: &[[f32; 3]],
    new_coords: &[[i32; 4]],
    index: &VoxelIndex,
) -> Result<NeighborIndices> {
    let sentinel = sentinel_for(xyz.len())?;
    let mut indices = vec![sentinel; new_xyz.len() * config.nsample];
    let stats = voxel_query_into(config, new_xyz, xyz, new_coords, index, &mut indices)?;
    Ok(NeighborIndices {
        indices,
        nsample: config.nsample,
        sentinel,
        stats,
    })
}

/// Check the input buffers of a voxel query.
pub(crate) fn validate_voxel_inputs(
    config: &VoxelQueryConfig,
    new_xyz: &[[f32; 3]],
    xyz: &[[f32; 3]],
    new_coords: &[[i32; 4]],
    index: &VoxelIndex,
) -> Result<()> {
    if config.nsample == 0 {
        return Err(QueryError::ZeroCapacity);
    }
    check_len("new_coords", new_coords.len(), new_xyz.len())?;
    sentinel_for(xyz.len())?;
    index.check_points(xyz.len())
}

/// Scan one query's voxel neighborhood, writing hits into `row`.
///
/// Returns the number of neighbors written.
pub(crate) fn scan_voxel_neighborhood(
    query: &[f32; 3],
    coord: VoxelCoord,
    range: [i32; 3],
    radius_sq: f32,
    xyz: &[[f32; 3]],
    index: &VoxelIndex,
    row: &mut [u32],
) -> u32 {
    if !coord.is_valid() {
        return 0;
    }

    let shape = index.shape();
    let capacity = row.len();
    let mut found = 0usize;

    'scan: for z in GridShape::clamped_axis(coord.z, range[0], shape.r1) {
        for y in GridShape::clamped_axis(coord.y, range[1], shape.r2) {
            for x in GridShape::clamped_axis(coord.x, range[2], shape.r3) {
                let cell = index.cell_range(shape.flat_index(z, y, x));
                for &point in &index.point_indices()[cell] {
                    let p = &xyz[point as usize];
                    let dx = p[0] - query[0];
                    let dy = p[1] - query[1];
                    let dz = p[2] - query[2];
                    if dx * dx + dy * dy + dz * dz <= radius_sq {
                        row[found] = point;
                        found += 1;
                        if found == capacity {
                            break 'scan;
                        }
                    }
                }
            }
        }
    }

    found as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        brute_force_radius, make_cube_grid, make_random_cube, make_random_sphere, ReferenceSearch,
    };
    use crate::voxel_grid::cpu::{build_voxel_index_from_points, voxelize_points};
    use crate::voxel_grid::VoxelizeConfig;

    /// 2x2x2 grid with three points in cell (0, 0, 0).
    fn single_cell_fixture() -> (Vec<[f32; 3]>, VoxelIndex) {
        let xyz = vec![[0.1, 0.1, 0.1], [0.2, 0.1, 0.1], [0.1, 0.3, 0.2]];
        // Cumulative total reaches 3 at cell 0 and stays there.
        let index =
            VoxelIndex::from_parts(GridShape::new(2, 2, 2), vec![3; 8], vec![0, 1, 2], 3).unwrap();
        (xyz, index)
    }

    #[test]
    fn test_single_cell_keeps_stored_order() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            radius: 1.0,
            nsample: 5,
            range: [1, 1, 1],
        };

        let result = voxel_query(&config, &[[0.0, 0.0, 0.0]], &xyz, &[[0, 0, 0, 0]], &index)
            .unwrap();

        assert_eq!(result.sentinel, 3);
        assert_eq!(result.row(0), &[0, 1, 2, 3, 3]);
        assert_eq!(result.stats.neighbor_counts, vec![3]);
    }

    #[test]
    fn test_negative_batch_skips_query() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            radius: 1.0,
            nsample: 4,
            range: [1, 1, 1],
        };

        let result = voxel_query(
            &config,
            &[[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
            &xyz,
            &[[-1, 0, 0, 0], [0, 0, 0, 0]],
            &index,
        )
        .unwrap();

        assert_eq!(result.row(0), &[3, 3, 3, 3]);
        assert_eq!(result.row(1), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_radius_filters_points() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            radius: 0.2,
            nsample: 3,
            range: [0, 0, 0],
        };

        // Distances from origin: 0.173, 0.245, 0.374
        let result =
            voxel_query(&config, &[[0.0, 0.0, 0.0]], &xyz, &[[0, 0, 0, 0]], &index).unwrap();

        assert_eq!(result.row(0), &[0, 3, 3]);
    }

    #[test]
    fn test_truncates_at_capacity() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            radius: 1.0,
            nsample: 2,
            range: [1, 1, 1],
        };

        // Nearest to this query are points 2 and 0.
        let result =
            voxel_query(&config, &[[0.1, 0.3, 0.2]], &xyz, &[[0, 0, 0, 0]], &index).unwrap();

        // First two in scan order, not the two nearest.
        assert_eq!(result.row(0), &[0, 1]);
        assert_eq!(result.stats.saturated_rows(2), 1);
    }

    #[test]
    fn test_capacity_stops_scan_across_cells() {
        // 1x1x3 grid: cell 0 holds points 4 and 0, cell 1 holds 5, 2 and 1,
        // cell 2 holds 3. All points lie within the radius.
        let xyz = vec![
            [0.6, 0.5, 0.5],
            [1.7, 0.5, 0.5],
            [1.5, 0.5, 0.5],
            [2.5, 0.5, 0.5],
            [0.4, 0.5, 0.5],
            [1.3, 0.5, 0.5],
        ];
        let index = VoxelIndex::from_parts(
            GridShape::new(1, 1, 3),
            vec![2, 5, 6],
            vec![4, 0, 5, 2, 1, 3],
            6,
        )
        .unwrap();
        let query = [[1.5, 0.5, 0.5]];
        let coord = [[0, 0, 0, 1]];
        let config = |nsample| VoxelQueryConfig {
            radius: 5.0,
            nsample,
            range: [0, 0, 1],
        };

        // Capacity runs out partway through cell 1.
        let result = voxel_query(&config(4), &query, &xyz, &coord, &index).unwrap();
        assert_eq!(result.row(0), &[4, 0, 5, 2]);
        assert!(!result.row(0).contains(&1));
        assert!(!result.row(0).contains(&3));
        assert_eq!(result.stats.neighbor_counts, vec![4]);

        // With room to spare the scan continues into cell 2.
        let result = voxel_query(&config(8), &query, &xyz, &coord, &index).unwrap();
        assert_eq!(result.row(0), &[4, 0, 5, 2, 1, 3, 6, 6]);
    }

    #[test]
    fn test_dense_grid_with_equal_distances() {
        // One point at the center of every 0.5 cell of a 5x5x5 grid. Point
        // (z, y, x) has index z * 25 + y * 5 + x.
        let xyz = make_cube_grid(2.0, 0.5, [0.25; 3]);
        let config = VoxelizeConfig {
            voxel_size: [0.5, 0.5, 0.5],
            point_cloud_range: [0.0, 0.0, 0.0, 2.5, 2.5, 2.5],
        };
        let index = build_voxel_index_from_points(&xyz, &config).unwrap();
        assert_eq!(index.occupied_cells(), 125);

        // Center plus six face neighbors, all at exactly the radius.
        let query = [[1.25, 1.25, 1.25]];
        let coord = [[0, 2, 2, 2]];
        let query_config = VoxelQueryConfig {
            radius: 0.5,
            nsample: 10,
            range: [1, 1, 1],
        };

        let result = voxel_query(&query_config, &query, &xyz, &coord, &index).unwrap();
        assert_eq!(
            result.row(0),
            &[37, 57, 61, 62, 63, 67, 87, 125, 125, 125]
        );
        assert_eq!(&result.row(0)[..7], &brute_force_radius(&query[0], &xyz, 0.5)[..]);

        // Truncation keeps the first hits in z, y, x cell order.
        let truncated = VoxelQueryConfig {
            nsample: 4,
            ..query_config
        };
        let result = voxel_query(&truncated, &query, &xyz, &coord, &index).unwrap();
        assert_eq!(result.row(0), &[37, 57, 61, 62]);
    }

    #[test]
    fn test_neighborhood_outside_grid_is_empty() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            radius: 100.0,
            nsample: 2,
            range: [1, 1, 1],
        };

        let result =
            voxel_query(&config, &[[0.0, 0.0, 0.0]], &xyz, &[[0, 5, 5, 5]], &index).unwrap();

        assert_eq!(result.row(0), &[3, 3]);
    }

    #[test]
    fn test_neighborhood_clamped_at_border() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            radius: 100.0,
            nsample: 3,
            range: [1, 1, 1],
        };

        // Cell (-1, 0, 0) is outside the grid but its window reaches cell (0, 0, 0).
        let result =
            voxel_query(&config, &[[0.0, 0.0, 0.0]], &xyz, &[[0, -1, 0, 0]], &index).unwrap();

        assert_eq!(result.row(0), &[0, 1, 2]);
    }

    #[test]
    fn test_scan_visits_cells_in_row_major_order() {
        // Cells along x in a 1x1x3 grid, the query sits in the middle cell.
        let xyz = vec![[2.5, 0.5, 0.5], [0.5, 0.5, 0.5], [1.5, 0.5, 0.5]];
        let index =
            VoxelIndex::from_parts(GridShape::new(1, 1, 3), vec![1, 2, 3], vec![1, 2, 0], 3)
                .unwrap();
        let config = VoxelQueryConfig {
            radius: 5.0,
            nsample: 3,
            range: [0, 0, 1],
        };

        let result =
            voxel_query(&config, &[[1.5, 0.5, 0.5]], &xyz, &[[0, 0, 0, 1]], &index).unwrap();

        assert_eq!(result.row(0), &[1, 2, 0]);
    }

    #[test]
    fn test_into_leaves_unwritten_slots() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            radius: 0.2,
            nsample: 3,
            range: [0, 0, 0],
        };

        let mut idx = vec![3u32; 3];
        let stats = voxel_query_into(
            &config,
            &[[0.0, 0.0, 0.0]],
            &xyz,
            &[[0, 0, 0, 0]],
            &index,
            &mut idx,
        )
        .unwrap();

        assert_eq!(idx, vec![0, 3, 3]);
        assert_eq!(stats.total_neighbors(), 1);
    }

    #[test]
    fn test_precondition_errors() {
        let (xyz, index) = single_cell_fixture();
        let config = VoxelQueryConfig {
            nsample: 2,
            ..Default::default()
        };

        let mut idx = vec![0u32; 3];
        let err = voxel_query_into(
            &config,
            &[[0.0; 3]],
            &xyz,
            &[[0, 0, 0, 0]],
            &index,
            &mut idx,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::BufferLength { name: "idx", .. }));

        let err = voxel_query(&config, &[[0.0; 3]], &xyz, &[], &index).unwrap_err();
        assert!(matches!(err, QueryError::BufferLength { name: "new_coords", .. }));

        let zero = VoxelQueryConfig {
            nsample: 0,
            ..Default::default()
        };
        let err = voxel_query(&zero, &[[0.0; 3]], &xyz, &[[0, 0, 0, 0]], &index).unwrap_err();
        assert_eq!(err, QueryError::ZeroCapacity);

        // Index built for more points than supplied
        let err = voxel_query(&config, &[[0.0; 3]], &xyz[..2], &[[0, 0, 0, 0]], &index)
            .unwrap_err();
        assert!(matches!(err, QueryError::PointIndexOutOfRange { index: 2, .. }));
    }

    #[test]
    fn test_no_queries() {
        let (xyz, index) = single_cell_fixture();
        let result =
            voxel_query(&VoxelQueryConfig::default(), &[], &xyz, &[], &index).unwrap();
        assert_eq!(result.num_queries(), 0);
        assert!(result.stats.neighbor_counts.is_empty());
    }

    #[test]
    fn test_matches_kdtree_on_random_cloud() {
        let config = VoxelizeConfig {
            voxel_size: [0.5, 0.5, 0.5],
            point_cloud_range: [0.0, 0.0, 0.0, 8.0, 8.0, 8.0],
        };
        let xyz = make_random_cube([0.0; 3], 8.0, 4000, 7);
        let queries = make_random_sphere([4.0; 3], 3.5, 200, 11);
        let index = build_voxel_index_from_points(&xyz, &config).unwrap();
        let search = ReferenceSearch::new(&xyz).unwrap();
        let new_coords: Vec<[i32; 4]> = voxelize_points(&queries, 0, &config)
            .into_iter()
            .map(Into::into)
            .collect();

        // A 2-cell window fully covers a 0.9 radius with 0.5 voxels.
        let query_config = VoxelQueryConfig {
            radius: 0.9,
            nsample: 64,
            range: [2, 2, 2],
        };
        let result = voxel_query(&query_config, &queries, &xyz, &new_coords, &index).unwrap();

        for (q, query) in queries.iter().enumerate() {
            let expected = search.within(query, query_config.radius);
            let row = result.row(q);
            let found = result.stats.neighbor_counts[q] as usize;

            // Every written entry is a true neighbor, the rest are sentinels.
            for &entry in &row[..found] {
                assert!(expected.contains(&entry), "query {q}: {entry} not within radius");
            }
            assert!(row[found..].iter().all(|&e| result.is_sentinel(e)));

            // Unsaturated rows are exhaustive.
            if found < query_config.nsample {
                assert_eq!(found, expected.len(), "query {q}");
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let config = VoxelizeConfig {
            voxel_size: [1.0, 1.0, 1.0],
            point_cloud_range: [0.0, 0.0, 0.0, 4.0, 4.0, 4.0],
        };
        let xyz = make_random_cube([0.0; 3], 4.0, 1000, 3);
        let queries = make_random_cube([0.0; 3], 4.0, 100, 5);
        let index = build_voxel_index_from_points(&xyz, &config).unwrap();
        let new_coords: Vec<[i32; 4]> = voxelize_points(&queries, 0, &config)
            .into_iter()
            .map(Into::into)
            .collect();
        let query_config = VoxelQueryConfig {
            radius: 0.8,
            nsample: 8,
            range: [1, 1, 1],
        };

        let first = voxel_query(&query_config, &queries, &xyz, &new_coords, &index).unwrap();
        let second = voxel_query(&query_config, &queries, &xyz, &new_coords, &index).unwrap();
        assert_eq!(first, second);
    }
}
