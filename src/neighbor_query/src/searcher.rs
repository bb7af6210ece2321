//! High-level neighbor search API.
//!
//! [`NeighborSearcher`] bundles the query configurations, an optional target
//! cloud with its voxel index, and the backend choice. Queries run on the GPU
//! when it was requested and initialized, and on the rayon CPU engines
//! otherwise. A failed GPU call is logged and retried on the CPU.
//!
//! # Example
//!
//! ```ignore
//! use neighbor_query::NeighborSearcher;
//!
//! let mut searcher = NeighborSearcher::builder()
//!     .radius(0.8)
//!     .nsample(32)
//!     .voxel_size([0.2, 0.2, 0.2])
//!     .build()?;
//!
//! searcher.set_target(&map_points)?;
//! let neighbors = searcher.radius_search(&centers)?;
//! ```

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::query::{
    cube_query, voxel_query, CubeNeighbors, CubeQueryConfig, NeighborIndices, VoxelQueryConfig,
};
#[cfg(feature = "cuda")]
use crate::runtime::{is_cuda_available, GpuRuntime};
use crate::voxel_grid::cpu::{build_voxel_index_from_points, voxelize_points};
use crate::voxel_grid::{VoxelIndex, VoxelizeConfig};

/// Configuration for [`NeighborSearcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NeighborSearcherConfig {
    /// Voxel query parameters.
    pub voxel: VoxelQueryConfig,

    /// Cube query parameters.
    pub cube: CubeQueryConfig,

    /// Grid used to index target clouds and voxelize radius-search queries.
    pub voxelize: VoxelizeConfig,

    /// Run queries on the GPU when available (requires the `cuda` feature).
    pub use_gpu: bool,
}

/// Builder for [`NeighborSearcher`] configuration.
#[derive(Debug, Clone, Default)]
pub struct NeighborSearcherBuilder {
    config: NeighborSearcherConfig,
}

impl NeighborSearcherBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Euclidean radius of the voxel query.
    pub fn radius(mut self, radius: f32) -> Self {
        self.config.voxel.radius = radius;
        self
    }

    /// Set the output slots per query of both queries.
    pub fn nsample(mut self, nsample: usize) -> Self {
        self.config.voxel.nsample = nsample;
        self.config.cube.nsample = nsample;
        self
    }

    /// Set the voxel neighborhood half-widths along `(z, y, x)`.
    pub fn voxel_range(mut self, range: [i32; 3]) -> Self {
        self.config.voxel.range = range;
        self
    }

    /// Set the box half-extents of the cube query.
    pub fn cube_radius(mut self, radius: [f32; 3]) -> Self {
        self.config.cube.radius = radius;
        self
    }

    /// Set the voxel edge lengths along `(x, y, z)`.
    pub fn voxel_size(mut self, voxel_size: [f32; 3]) -> Self {
        self.config.voxelize.voxel_size = voxel_size;
        self
    }

    /// Set the indexed region `[x_min, y_min, z_min, x_max, y_max, z_max]`.
    pub fn point_cloud_range(mut self, range: [f32; 6]) -> Self {
        self.config.voxelize.point_cloud_range = range;
        self
    }

    /// Enable GPU acceleration (requires the `cuda` feature).
    pub fn use_gpu(mut self, use_gpu: bool) -> Self {
        self.config.use_gpu = use_gpu;
        self
    }

    /// Build the searcher.
    pub fn build(self) -> Result<NeighborSearcher> {
        NeighborSearcher::with_config(self.config)
    }
}

/// Indexed target cloud.
#[derive(Debug, Clone)]
struct Target {
    points: Vec<[f32; 3]>,
    index: VoxelIndex,
}

/// Neighbor searcher.
///
/// Holds an optional target cloud for repeated radius searches and dispatches
/// the raw queries to the selected backend.
pub struct NeighborSearcher {
    /// Configuration.
    config: NeighborSearcherConfig,

    /// Target cloud and its voxel index.
    target: Option<Target>,

    /// GPU runtime (None if GPU not available/enabled).
    #[cfg(feature = "cuda")]
    gpu_runtime: Option<GpuRuntime>,
}

impl NeighborSearcher {
    /// Create a searcher with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(NeighborSearcherConfig::default())
    }

    /// Create a searcher with custom configuration.
    pub fn with_config(config: NeighborSearcherConfig) -> Result<Self> {
        if config.voxel.nsample == 0 || config.cube.nsample == 0 {
            bail!("nsample must be positive");
        }
        if config.voxelize.voxel_size.iter().any(|&s| s.is_nan() || s <= 0.0) {
            bail!(
                "voxel size must be positive, got {:?}",
                config.voxelize.voxel_size
            );
        }

        #[cfg(feature = "cuda")]
        let gpu_runtime = if config.use_gpu && is_cuda_available() {
            match GpuRuntime::new() {
                Ok(runtime) => {
                    tracing::info!("GPU runtime initialized");
                    Some(runtime)
                }
                Err(e) => {
                    warn!("failed to initialize GPU runtime: {e:#}, falling back to CPU");
                    None
                }
            }
        } else {
            if config.use_gpu {
                warn!("CUDA device not available, falling back to CPU");
            }
            None
        };

        #[cfg(not(feature = "cuda"))]
        {
            if config.use_gpu {
                warn!("built without the `cuda` feature, falling back to CPU");
            }
        }

        Ok(Self {
            config,
            target: None,
            #[cfg(feature = "cuda")]
            gpu_runtime,
        })
    }

    /// Create a builder for configuring the searcher.
    pub fn builder() -> NeighborSearcherBuilder {
        NeighborSearcherBuilder::new()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &NeighborSearcherConfig {
        &self.config
    }

    /// Check if a target has been set.
    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    /// Get the voxel index of the target.
    pub fn target_index(&self) -> Option<&VoxelIndex> {
        self.target.as_ref().map(|target| &target.index)
    }

    /// Set the target point cloud.
    ///
    /// Builds a voxel index over the points inside the configured range, used
    /// by subsequent [`radius_search`](Self::radius_search) calls. Points
    /// outside the range stay in the cloud but are never returned.
    pub fn set_target(&mut self, points: &[[f32; 3]]) -> Result<()> {
        if points.is_empty() {
            bail!("Target point cloud is empty");
        }

        let index = build_voxel_index_from_points(points, &self.config.voxelize)?;
        if index.is_empty() {
            bail!("No target point inside the point cloud range");
        }

        debug!(
            num_points = points.len(),
            indexed = index.len(),
            occupied_cells = index.occupied_cells(),
            "target indexed"
        );
        self.target = Some(Target {
            points: points.to_vec(),
            index,
        });
        Ok(())
    }

    /// Radius search of `queries` against the target.
    ///
    /// Queries are voxelized with the target's grid; those outside the range
    /// get an all-sentinel row.
    pub fn radius_search(&self, queries: &[[f32; 3]]) -> Result<NeighborIndices> {
        let Some(target) = self.target.as_ref() else {
            bail!("No target set, call set_target() first");
        };

        let coords: Vec<[i32; 4]> = voxelize_points(queries, 0, &self.config.voxelize)
            .into_iter()
            .map(Into::into)
            .collect();
        self.voxel_query(queries, &target.points, &coords, &target.index)
    }

    /// Voxel query against an externally built index.
    pub fn voxel_query(
        &self,
        new_xyz: &[[f32; 3]],
        xyz: &[[f32; 3]],
        new_coords: &[[i32; 4]],
        index: &VoxelIndex,
    ) -> Result<NeighborIndices> {
        #[cfg(feature = "cuda")]
        {
            if let Some(runtime) = self.gpu_runtime.as_ref() {
                match runtime.voxel_query(&self.config.voxel, new_xyz, xyz, new_coords, index) {
                    Ok(result) => return Ok(result),
                    Err(e) => warn!("GPU voxel query failed: {e:#}, retrying on CPU"),
                }
            }
        }

        Ok(voxel_query(
            &self.config.voxel,
            new_xyz,
            xyz,
            new_coords,
            index,
        )?)
    }

    /// Cube query over stacked batch elements.
    pub fn cube_query(
        &self,
        new_xyz: &[[f32; 3]],
        new_xyz_batch_cnt: &[u32],
        xyz: &[[f32; 3]],
        xyz_batch_cnt: &[u32],
    ) -> Result<CubeNeighbors> {
        #[cfg(feature = "cuda")]
        {
            if let Some(runtime) = self.gpu_runtime.as_ref() {
                match runtime.cube_query(
                    &self.config.cube,
                    new_xyz,
                    new_xyz_batch_cnt,
                    xyz,
                    xyz_batch_cnt,
                ) {
                    Ok(result) => return Ok(result),
                    Err(e) => warn!("GPU cube query failed: {e:#}, retrying on CPU"),
                }
            }
        }

        Ok(cube_query(
            &self.config.cube,
            new_xyz,
            new_xyz_batch_cnt,
            xyz,
            xyz_batch_cnt,
        )?)
    }

    /// Check if GPU acceleration is active.
    pub fn is_gpu_active(&self) -> bool {
        #[cfg(feature = "cuda")]
        {
            self.gpu_runtime.is_some()
        }
        #[cfg(not(feature = "cuda"))]
        {
            false
        }
    }
}
