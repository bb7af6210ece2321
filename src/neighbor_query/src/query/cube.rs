//! Cube query: brute-force box search within each batch element.
//!
//! Each query scans every candidate of its own batch element in array order
//! and accepts those inside the axis-aligned box of half-extents
//! `(radius_x, radius_y, radius_z)` around it.
//!
//! # Fallback fill
//!
//! The first accepted candidate is copied into all `nsample` slots before it
//! is stored in slot 0, so a row with at least one neighbor never contains the
//! sentinel. Later neighbors overwrite slots 1, 2, ... in order. The
//! non-padding mask is 1 exactly for the overwritten slots. A row with no
//! neighbor keeps the sentinel everywhere and an all-zero mask.

use std::ops::Range;

use rayon::prelude::*;
use tracing::debug;

use super::{CubeNeighbors, CubeQueryConfig, NeighborIndices, QueryStats};
use crate::batch::BatchLayout;
use crate::error::{check_len, sentinel_for, QueryError, Result};

/// Run a cube query into caller-provided output.
///
/// `idx` and `non_padding` must hold `new_xyz.len() * nsample` entries,
/// filled with the sentinel (`xyz.len()`) and `0.0` respectively.
///
/// # Arguments
/// * `config` - Box half-extents and capacity
/// * `new_xyz` - Query points of all batch elements, stacked `[M]`
/// * `new_xyz_batch_cnt` - Queries per batch element `[B]`
/// * `xyz` - Candidate points of all batch elements, stacked `[N]`
/// * `xyz_batch_cnt` - Candidates per batch element `[B]`
/// * `idx` - Output indices `[M * nsample]`
/// * `non_padding` - Output mask `[M * nsample]`
pub fn cube_query_into(
    config: &CubeQueryConfig,
    new_xyz: &[[f32; 3]],
    new_xyz_batch_cnt: &[u32],
    xyz: &[[f32; 3]],
    xyz_batch_cnt: &[u32],
    idx: &mut [u32],
    non_padding: &mut [f32],
) -> Result<QueryStats> {
    let CubeLayouts {
        queries: query_layout,
        points: point_layout,
    } = validate_cube_inputs(config, new_xyz, new_xyz_batch_cnt, xyz, xyz_batch_cnt)?;
    let nsample = config.nsample;
    let num_queries = new_xyz.len();
    check_len("idx", idx.len(), num_queries * nsample)?;
    check_len("non_padding", non_padding.len(), num_queries * nsample)?;

    debug!(
        num_batches = query_layout.num_batches(),
        num_queries,
        num_points = xyz.len(),
        nsample,
        "dispatching cube query"
    );

    let neighbor_counts: Vec<u32> = idx
        .par_chunks_mut(nsample)
        .zip(non_padding.par_chunks_mut(nsample))
        .zip(new_xyz.par_iter())
        .enumerate()
        .map(|(query_idx, ((row, mask), query))| {
            let candidates = query_layout
                .batch_of(query_idx)
                .map_or(0..0, |batch| point_layout.range(batch));
            scan_batch_box(query, config.radius, xyz, candidates, row, mask)
        })
        .collect();

    let stats = QueryStats { neighbor_counts };
    debug!(
        rows_with_neighbors = stats.rows_with_neighbors(),
        total_neighbors = stats.total_neighbors(),
        "cube query finished"
    );
    Ok(stats)
}

/// Run a cube query into freshly allocated output.
pub fn cube_query(
    config: &CubeQueryConfig,
    new_xyz: &[[f32; 3]],
    new_xyz_batch_cnt: &[u32],
    xyz: &[[f32; 3]],
    xyz_batch_cnt: &[u32],
) -> Result<CubeNeighbors> {
    let sentinel = sentinel_for(xyz.len())?;
    let len = new_xyz.len() * config.nsample;
    let mut indices = vec![sentinel; len];
    let mut non_padding = vec![0.0f32; len];
    let stats = cube_query_into(
        config,
        new_xyz,
        new_xyz_batch_cnt,
        xyz,
        xyz_batch_cnt,
        &mut indices,
        &mut non_padding,
    )?;
    Ok(CubeNeighbors {
        neighbors: NeighborIndices {
            indices,
            nsample: config.nsample,
            sentinel,
            stats,
        },
        non_padding,
    })
}

/// Validated batch layouts of a cube query.
pub(crate) struct CubeLayouts {
    pub queries: BatchLayout,
    pub points: BatchLayout,
}

/// Check the input buffers of a cube query and prefix-sum the batch counts.
pub(crate) fn validate_cube_inputs(
    config: &CubeQueryConfig,
    new_xyz: &[[f32; 3]],
    new_xyz_batch_cnt: &[u32],
    xyz: &[[f32; 3]],
    xyz_batch_cnt: &[u32],
) -> Result<CubeLayouts> {
    if config.nsample == 0 {
        return Err(QueryError::ZeroCapacity);
    }
    check_len(
        "new_xyz_batch_cnt",
        new_xyz_batch_cnt.len(),
        xyz_batch_cnt.len(),
    )?;
    let queries = BatchLayout::validated("new_xyz_batch_cnt", new_xyz_batch_cnt, new_xyz.len())?;
    let points = BatchLayout::validated("xyz_batch_cnt", xyz_batch_cnt, xyz.len())?;
    sentinel_for(xyz.len())?;
    Ok(CubeLayouts { queries, points })
}

/// Scan one query's batch element, writing hits into `row` and `mask`.
///
/// Returns the number of genuine neighbors written.
pub(crate) fn scan_batch_box(
    query: &[f32; 3],
    radius: [f32; 3],
    xyz: &[[f32; 3]],
    candidates: Range<usize>,
    row: &mut [u32],
    mask: &mut [f32],
) -> u32 {
    let capacity = row.len();
    let mut found = 0usize;

    for k in candidates {
        let p = &xyz[k];
        let inside = (p[0] - query[0]).abs() <= radius[0]
            && (p[1] - query[1]).abs() <= radius[1]
            && (p[2] - query[2]).abs() <= radius[2];
        if !inside {
            continue;
        }

        let k = k as u32;
        if found == 0 {
            row.fill(k);
        }
        row[found] = k;
        mask[found] = 1.0;
        found += 1;
        if found == capacity {
            break;
        }
    }

    found as u32
}
