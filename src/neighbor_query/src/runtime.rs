//! GPU runtime management for CubeCL CUDA execution.
//!
//! Mirrors the CPU engines in [`crate::query`]: the same precondition checks
//! run on the host before anything is uploaded, and the kernels write the same
//! rows, so results are interchangeable.
//!
//! # Example
//!
//! ```ignore
//! use neighbor_query::runtime::GpuRuntime;
//!
//! let runtime = GpuRuntime::new()?;
//! let result = runtime.cube_query(&config, &centers, &[2, 3], &points, &[100, 80])?;
//! ```

use anyhow::{Context, Result};
use cubecl::client::ComputeClient;
use cubecl::cuda::{CudaDevice, CudaRuntime};
use cubecl::prelude::*;
use tracing::debug;

use crate::error::sentinel_for;
use crate::query::cube::{validate_cube_inputs, CubeLayouts};
use crate::query::kernels::{cube_query_kernel, voxel_query_kernel};
use crate::query::voxel::validate_voxel_inputs;
use crate::query::{CubeNeighbors, CubeQueryConfig, NeighborIndices, QueryStats, VoxelQueryConfig};
use crate::voxel_grid::VoxelIndex;

/// Type alias for CUDA compute client
type CudaClient = ComputeClient<<CudaRuntime as Runtime>::Server>;

/// Threads per cube, one query per thread.
const CUBE_SIZE: u32 = 256;

/// GPU runtime for neighbor queries.
pub struct GpuRuntime {
    /// CUDA device (kept alive for runtime lifetime)
    #[allow(dead_code)]
    device: CudaDevice,
    /// Compute client for kernel execution
    client: CudaClient,
}

impl GpuRuntime {
    /// Create a new GPU runtime with the default CUDA device.
    pub fn new() -> Result<Self> {
        Self::with_device_id(0)
    }

    /// Create a new GPU runtime with a specific CUDA device.
    pub fn with_device_id(device_id: usize) -> Result<Self> {
        let device = CudaDevice::new(device_id);
        let client = CudaRuntime::client(&device);

        Ok(Self { device, client })
    }

    /// Get the underlying compute client.
    pub fn client(&self) -> &CudaClient {
        &self.client
    }

    /// Voxel query on the GPU.
    ///
    /// Same contract as [`crate::query::voxel_query`].
    pub fn voxel_query(
        &self,
        config: &VoxelQueryConfig,
        new_xyz: &[[f32; 3]],
        xyz: &[[f32; 3]],
        new_coords: &[[i32; 4]],
        index: &VoxelIndex,
    ) -> Result<NeighborIndices> {
        validate_voxel_inputs(config, new_xyz, xyz, new_coords, index)
            .context("invalid voxel query input")?;
        let sentinel = sentinel_for(xyz.len())?;
        let nsample = config.nsample;
        let num_queries = new_xyz.len();

        let mut result = NeighborIndices {
            indices: vec![sentinel; num_queries * nsample],
            nsample,
            sentinel,
            stats: QueryStats {
                neighbor_counts: vec![0; num_queries],
            },
        };
        // Nothing can match; skip the upload
        if num_queries == 0 || index.is_empty() {
            return Ok(result);
        }

        let shape = index.shape();
        let grid_r1 = u32::try_from(shape.r1).context("grid dimension exceeds u32")?;
        let grid_r2 = u32::try_from(shape.r2).context("grid dimension exceeds u32")?;
        let grid_r3 = u32::try_from(shape.r3).context("grid dimension exceeds u32")?;

        debug!(num_queries, num_points = xyz.len(), nsample, "launching voxel query kernel");

        let query_flat = flatten(new_xyz);
        let point_flat = flatten(xyz);
        let coords_flat: Vec<i32> = new_coords.iter().flat_map(|c| c.iter().copied()).collect();

        // Upload data to GPU
        let query_gpu = self.client.create(f32::as_bytes(&query_flat));
        let points_gpu = self.client.create(f32::as_bytes(&point_flat));
        let coords_gpu = self.client.create(i32::as_bytes(&coords_flat));
        let cumulative_gpu = self.client.create(u32::as_bytes(index.cumulative_counts()));
        let point_indices_gpu = self.client.create(u32::as_bytes(index.point_indices()));
        let idx_gpu = self.client.create(u32::as_bytes(&result.indices));
        let counts_gpu = self
            .client
            .create(u32::as_bytes(&result.stats.neighbor_counts));

        let cube_count = num_queries.div_ceil(CUBE_SIZE as usize) as u32;
        unsafe {
            voxel_query_kernel::launch_unchecked::<f32, CudaRuntime>(
                &self.client,
                CubeCount::Static(cube_count, 1, 1),
                CubeDim::new(CUBE_SIZE, 1, 1),
                ArrayArg::from_raw_parts::<f32>(&query_gpu, num_queries * 3, 1),
                ArrayArg::from_raw_parts::<f32>(&points_gpu, xyz.len() * 3, 1),
                ArrayArg::from_raw_parts::<i32>(&coords_gpu, num_queries * 4, 1),
                ArrayArg::from_raw_parts::<u32>(
                    &cumulative_gpu,
                    index.cumulative_counts().len(),
                    1,
                ),
                ArrayArg::from_raw_parts::<u32>(
                    &point_indices_gpu,
                    index.point_indices().len(),
                    1,
                ),
                ScalarArg::new(config.radius * config.radius),
                ScalarArg::new(num_queries as u32),
                ScalarArg::new(grid_r1),
                ScalarArg::new(grid_r2),
                ScalarArg::new(grid_r3),
                ScalarArg::new(config.range[0]),
                ScalarArg::new(config.range[1]),
                ScalarArg::new(config.range[2]),
                ScalarArg::new(nsample as u32),
                ArrayArg::from_raw_parts::<u32>(&idx_gpu, num_queries * nsample, 1),
                ArrayArg::from_raw_parts::<u32>(&counts_gpu, num_queries, 1),
            );
        }

        // Read results
        let idx_bytes = self.client.read_one(idx_gpu);
        result.indices = u32::from_bytes(&idx_bytes).to_vec();

        let counts_bytes = self.client.read_one(counts_gpu);
        result.stats.neighbor_counts = u32::from_bytes(&counts_bytes).to_vec();

        Ok(result)
    }

    /// Cube query on the GPU.
    ///
    /// Same contract as [`crate::query::cube_query`].
    pub fn cube_query(
        &self,
        config: &CubeQueryConfig,
        new_xyz: &[[f32; 3]],
        new_xyz_batch_cnt: &[u32],
        xyz: &[[f32; 3]],
        xyz_batch_cnt: &[u32],
    ) -> Result<CubeNeighbors> {
        let CubeLayouts { queries, points } =
            validate_cube_inputs(config, new_xyz, new_xyz_batch_cnt, xyz, xyz_batch_cnt)
                .context("invalid cube query input")?;
        let sentinel = sentinel_for(xyz.len())?;
        let nsample = config.nsample;
        let num_queries = new_xyz.len();

        let mut result = CubeNeighbors {
            neighbors: NeighborIndices {
                indices: vec![sentinel; num_queries * nsample],
                nsample,
                sentinel,
                stats: QueryStats {
                    neighbor_counts: vec![0; num_queries],
                },
            },
            non_padding: vec![0.0; num_queries * nsample],
        };
        if num_queries == 0 || xyz.is_empty() {
            return Ok(result);
        }

        debug!(
            num_batches = queries.num_batches(),
            num_queries,
            num_points = xyz.len(),
            nsample,
            "launching cube query kernel"
        );

        let query_offsets = to_u32_offsets(queries.offsets())?;
        let point_offsets = to_u32_offsets(points.offsets())?;
        let query_flat = flatten(new_xyz);
        let point_flat = flatten(xyz);

        // Upload data to GPU
        let query_gpu = self.client.create(f32::as_bytes(&query_flat));
        let query_offsets_gpu = self.client.create(u32::as_bytes(&query_offsets));
        let points_gpu = self.client.create(f32::as_bytes(&point_flat));
        let point_offsets_gpu = self.client.create(u32::as_bytes(&point_offsets));
        let idx_gpu = self
            .client
            .create(u32::as_bytes(&result.neighbors.indices));
        let mask_gpu = self.client.create(f32::as_bytes(&result.non_padding));
        let counts_gpu = self
            .client
            .create(u32::as_bytes(&result.neighbors.stats.neighbor_counts));

        let cube_count = num_queries.div_ceil(CUBE_SIZE as usize) as u32;
        unsafe {
            cube_query_kernel::launch_unchecked::<f32, CudaRuntime>(
                &self.client,
                CubeCount::Static(cube_count, 1, 1),
                CubeDim::new(CUBE_SIZE, 1, 1),
                ArrayArg::from_raw_parts::<f32>(&query_gpu, num_queries * 3, 1),
                ArrayArg::from_raw_parts::<u32>(&query_offsets_gpu, query_offsets.len(), 1),
                ArrayArg::from_raw_parts::<f32>(&points_gpu, xyz.len() * 3, 1),
                ArrayArg::from_raw_parts::<u32>(&point_offsets_gpu, point_offsets.len(), 1),
                ScalarArg::new(config.radius[0]),
                ScalarArg::new(config.radius[1]),
                ScalarArg::new(config.radius[2]),
                ScalarArg::new(num_queries as u32),
                ScalarArg::new(queries.num_batches() as u32),
                ScalarArg::new(nsample as u32),
                ArrayArg::from_raw_parts::<u32>(&idx_gpu, num_queries * nsample, 1),
                ArrayArg::from_raw_parts::<f32>(&mask_gpu, num_queries * nsample, 1),
                ArrayArg::from_raw_parts::<u32>(&counts_gpu, num_queries, 1),
            );
        }

        // Read results
        let idx_bytes = self.client.read_one(idx_gpu);
        result.neighbors.indices = u32::from_bytes(&idx_bytes).to_vec();

        let mask_bytes = self.client.read_one(mask_gpu);
        result.non_padding = f32::from_bytes(&mask_bytes).to_vec();

        let counts_bytes = self.client.read_one(counts_gpu);
        result.neighbors.stats.neighbor_counts = u32::from_bytes(&counts_bytes).to_vec();

        Ok(result)
    }
}

fn flatten(points: &[[f32; 3]]) -> Vec<f32> {
    points.iter().flat_map(|p| p.iter().copied()).collect()
}

fn to_u32_offsets(offsets: &[usize]) -> Result<Vec<u32>> {
    offsets
        .iter()
        .map(|&offset| u32::try_from(offset).context("batch offset exceeds u32"))
        .collect()
}

/// Check if CUDA is available on this system.
pub fn is_cuda_available() -> bool {
    // Try to create a device - if it fails, CUDA is not available
    std::panic::catch_unwind(|| {
        let _device = CudaDevice::new(0);
    })
    .is_ok()
}
