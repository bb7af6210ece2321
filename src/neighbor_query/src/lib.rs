//! Fixed-capacity neighbor queries for stacked point clouds.
//!
//! This library gathers, for every query point, up to `nsample` candidate
//! point indices, using rayon on the CPU or CubeCL kernels on CUDA.
//!
//! # Architecture
//!
//! - [`voxel_grid`]: dense CSR voxel index over the candidate cloud
//! - [`query::voxel`]: radius search over the voxel neighborhood of each query
//! - [`query::cube`]: per-batch-element box search with fallback fill and a
//!   non-padding mask
//! - [`runtime`]: GPU execution of both queries (`cuda` feature)
//! - [`searcher`]: backend selection and a reusable indexed target
//!
//! Output rows always have `nsample` slots. Slots without a neighbor hold the
//! sentinel `N`, the number of candidate points.
//!
//! # Usage
//!
//! ```ignore
//! use neighbor_query::NeighborSearcher;
//!
//! let mut searcher = NeighborSearcher::builder()
//!     .radius(0.8)
//!     .nsample(32)
//!     .build()?;
//!
//! searcher.set_target(&map_points)?;
//! let neighbors = searcher.radius_search(&centers)?;
//! for row in neighbors.rows() {
//!     let found: Vec<_> = row.iter().filter(|&&i| !neighbors.is_sentinel(i)).collect();
//! }
//! ```

pub mod batch;
pub mod error;
pub mod query;
#[cfg(feature = "cuda")]
pub mod runtime;
pub mod searcher;
pub mod test_utils;
pub mod voxel_grid;

pub use batch::BatchLayout;
pub use error::{QueryError, Result};
pub use query::{
    cube_query, cube_query_into, voxel_query, voxel_query_into, CubeNeighbors, CubeQueryConfig,
    NeighborIndices, QueryStats, VoxelQueryConfig,
};
pub use voxel_grid::{GridShape, VoxelCoord, VoxelIndex, VoxelizeConfig};

// High-level API (recommended for most users)
pub use searcher::{NeighborSearcher, NeighborSearcherBuilder, NeighborSearcherConfig};

// GPU runtime (optional, for direct GPU access)
#[cfg(feature = "cuda")]
pub use runtime::{is_cuda_available, GpuRuntime};
