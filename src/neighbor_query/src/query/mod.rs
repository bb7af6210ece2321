//! Fixed-capacity neighbor queries over stacked point clouds.
//!
//! Two engines share one execution model: a data-parallel map with one task
//! per query point, each task reading shared immutable inputs and writing only
//! its own output row of `nsample` entries.
//!
//! - [`voxel`]: radius search pruned by a dense voxel index. Slots past the
//!   found count keep the sentinel.
//! - [`cube`]: brute-force axis-aligned box search within the query's batch
//!   element, with fallback fill and a non-padding mask.
//!
//! In both engines the surviving neighbors are the first `nsample` hits in
//! scan order, not the nearest ones.
//!
//! # Example
//!
//! ```ignore
//! use neighbor_query::query::{cube_query, CubeQueryConfig};
//!
//! let config = CubeQueryConfig { radius: [0.5, 0.5, 0.2], nsample: 16 };
//! let result = cube_query(&config, &centers, &[2, 3], &points, &[100, 80])?;
//! for q in 0..result.neighbors.num_queries() {
//!     let row = result.neighbors.row(q);
//!     let mask = result.mask_row(q);
//!     // ...
//! }
//! ```

pub mod cube;
#[cfg(feature = "cuda")]
pub mod kernels;
pub mod voxel;

pub use cube::{cube_query, cube_query_into};
pub use voxel::{voxel_query, voxel_query_into};

use serde::{Deserialize, Serialize};

/// Parameters of a voxel query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelQueryConfig {
    /// Euclidean search radius in world units.
    pub radius: f32,
    /// Output slots per query.
    pub nsample: usize,
    /// Neighborhood half-width in cells along `(z, y, x)`.
    pub range: [i32; 3],
}

impl Default for VoxelQueryConfig {
    fn default() -> Self {
        Self {
            radius: 1.0,
            nsample: 16,
            range: [1, 1, 1],
        }
    }
}

/// Parameters of a cube query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeQueryConfig {
    /// Box half-extents along `(x, y, z)`.
    pub radius: [f32; 3],
    /// Output slots per query.
    pub nsample: usize,
}

impl Default for CubeQueryConfig {
    fn default() -> Self {
        Self {
            radius: [1.0, 1.0, 1.0],
            nsample: 16,
        }
    }
}

/// Genuine neighbors found per query row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Found count for every query, at most `nsample`.
    pub neighbor_counts: Vec<u32>,
}

impl QueryStats {
    /// Sum of found neighbors over all rows.
    pub fn total_neighbors(&self) -> usize {
        self.neighbor_counts.iter().map(|&c| c as usize).sum()
    }

    /// Rows with at least one neighbor.
    pub fn rows_with_neighbors(&self) -> usize {
        self.neighbor_counts.iter().filter(|&&c| c > 0).count()
    }

    /// Rows whose capacity was exhausted.
    pub fn saturated_rows(&self, nsample: usize) -> usize {
        self.neighbor_counts
            .iter()
            .filter(|&&c| c as usize == nsample)
            .count()
    }
}

/// Row-major `num_queries x nsample` neighbor index buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborIndices {
    /// Flat output, `num_queries * nsample` entries.
    pub indices: Vec<u32>,
    /// Slots per row.
    pub nsample: usize,
    /// Marker for "no neighbor written", equal to the candidate count.
    pub sentinel: u32,
    pub stats: QueryStats,
}

impl NeighborIndices {
    /// Number of query rows.
    pub fn num_queries(&self) -> usize {
        self.indices.len() / self.nsample
    }

    /// Output row of query `query`.
    pub fn row(&self, query: usize) -> &[u32] {
        &self.indices[query * self.nsample..(query + 1) * self.nsample]
    }

    /// Iterate over all rows in query order.
    pub fn rows(&self) -> impl Iterator<Item = &[u32]> {
        self.indices.chunks(self.nsample)
    }

    /// Whether an entry is the sentinel.
    pub fn is_sentinel(&self, index: u32) -> bool {
        index == self.sentinel
    }
}

/// Cube query output: indices plus the non-padding mask.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeNeighbors {
    pub neighbors: NeighborIndices,
    /// 1.0 for genuine neighbors, 0.0 for fallback fill or empty slots.
    pub non_padding: Vec<f32>,
}

impl CubeNeighbors {
    /// Mask row of query `query`.
    pub fn mask_row(&self, query: usize) -> &[f32] {
        let nsample = self.neighbors.nsample;
        &self.non_padding[query * nsample..(query + 1) * nsample]
    }
}
