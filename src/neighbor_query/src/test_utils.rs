//! Synthetic point clouds and reference searches for testing.
//!
//! The generators are deterministic (seeded LCG) so failures reproduce. The
//! reference searches return every match in ascending index order, which is
//! the candidate-array scan order of the cube query.

use std::ops::Range;

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;

/// Print from tests only when the `test-verbose` feature is enabled.
#[macro_export]
macro_rules! test_println {
    ($($arg:tt)*) => {
        #[cfg(feature = "test-verbose")]
        {
            println!($($arg)*);
        }
    };
}

/// Bucket size for the reference KD-tree.
///
/// Larger than kiddo's default so dense, grid-aligned clouds with many equal
/// coordinates still build.
const BUCKET_SIZE: usize = 256;

/// Simple LCG yielding floats in `[0, 1)`.
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
    }
}

/// Generate uniformly random points in the axis-aligned cube
/// `[origin, origin + size)`.
pub fn make_random_cube(origin: [f32; 3], size: f32, num_points: usize, seed: u64) -> Vec<[f32; 3]> {
    let mut rng = Lcg(seed ^ 0x9E37_79B9_7F4A_7C15);
    (0..num_points)
        .map(|_| {
            [
                origin[0] + rng.next_f32() * size,
                origin[1] + rng.next_f32() * size,
                origin[2] + rng.next_f32() * size,
            ]
        })
        .collect()
}

/// Generate random points within a sphere.
///
/// # Arguments
/// * `center` - Center of the sphere
/// * `radius` - Radius of the sphere
/// * `num_points` - Number of points to generate
/// * `seed` - Random seed for reproducibility
pub fn make_random_sphere(
    center: [f32; 3],
    radius: f32,
    num_points: usize,
    seed: u64,
) -> Vec<[f32; 3]> {
    let mut rng = Lcg(seed);
    let mut points = Vec::with_capacity(num_points);

    while points.len() < num_points {
        // Rejection sampling inside the unit ball
        let u = rng.next_f32() * 2.0 - 1.0;
        let v = rng.next_f32() * 2.0 - 1.0;
        let w = rng.next_f32() * 2.0 - 1.0;
        if u * u + v * v + w * w <= 1.0 {
            points.push([
                center[0] + u * radius,
                center[1] + v * radius,
                center[2] + w * radius,
            ]);
        }
    }

    points
}

/// Generate a 3D grid of points (cube).
///
/// # Arguments
/// * `size` - Side length of the cube
/// * `interval` - Grid spacing between points
/// * `offset` - Offset to apply to all points
pub fn make_cube_grid(size: f32, interval: f32, offset: [f32; 3]) -> Vec<[f32; 3]> {
    let num_points = ((size / interval) as usize) + 1;
    let mut points = Vec::with_capacity(num_points * num_points * num_points);

    for i in 0..num_points {
        for j in 0..num_points {
            for k in 0..num_points {
                let x = offset[0] + interval * (k as f32);
                let y = offset[1] + interval * (j as f32);
                let z = offset[2] + interval * (i as f32);
                points.push([x, y, z]);
            }
        }
    }

    points
}

/// Stack several random clouds into one batched point set.
///
/// Returns the stacked points and the per-element counts.
pub fn make_stacked_clouds(counts: &[u32], size: f32, seed: u64) -> (Vec<[f32; 3]>, Vec<u32>) {
    let mut points = Vec::with_capacity(counts.iter().map(|&c| c as usize).sum());
    for (batch, &count) in counts.iter().enumerate() {
        points.extend(make_random_cube(
            [0.0; 3],
            size,
            count as usize,
            seed.wrapping_add(batch as u64),
        ));
    }
    (points, counts.to_vec())
}

/// All candidates within `radius` of `query`, by exhaustive scan.
pub fn brute_force_radius(query: &[f32; 3], xyz: &[[f32; 3]], radius: f32) -> Vec<u32> {
    let radius_sq = radius * radius;
    xyz.iter()
        .enumerate()
        .filter(|(_, p)| {
            let dx = p[0] - query[0];
            let dy = p[1] - query[1];
            let dz = p[2] - query[2];
            dx * dx + dy * dy + dz * dz <= radius_sq
        })
        .map(|(i, _)| i as u32)
        .collect()
}

/// All candidates in `candidates` inside the box of half-extents `radius`.
pub fn brute_force_box(
    query: &[f32; 3],
    xyz: &[[f32; 3]],
    candidates: Range<usize>,
    radius: [f32; 3],
) -> Vec<u32> {
    candidates
        .filter(|&k| {
            let p = &xyz[k];
            (p[0] - query[0]).abs() <= radius[0]
                && (p[1] - query[1]).abs() <= radius[1]
                && (p[2] - query[2]).abs() <= radius[2]
        })
        .map(|k| k as u32)
        .collect()
}

/// KD-tree radius search over a candidate cloud.
///
/// Used as an independent oracle for the voxel query on large clouds, where
/// the exhaustive scan gets slow.
#[derive(Debug)]
pub struct ReferenceSearch {
    /// Generic args: A=f32 (coordinate type), T=u64 (item/index type), K=3 (dimensions), B=bucket size
    kdtree: ImmutableKdTree<f32, u64, 3, BUCKET_SIZE>,
}

impl ReferenceSearch {
    /// Build a search index over `xyz`. Returns `None` for an empty cloud.
    pub fn new(xyz: &[[f32; 3]]) -> Option<Self> {
        if xyz.is_empty() {
            return None;
        }
        // Item value is the array index
        let kdtree: ImmutableKdTree<f32, u64, 3, BUCKET_SIZE> = xyz.into();
        Some(Self { kdtree })
    }

    /// Indices within `radius` of `point`, in ascending index order.
    pub fn within(&self, point: &[f32; 3], radius: f32) -> Vec<u32> {
        // Kiddo uses squared distance
        let radius_sq = radius * radius;
        let mut indices: Vec<u32> = self
            .kdtree
            .within::<SquaredEuclidean>(point, radius_sq)
            .iter()
            .map(|nn| nn.item as u32)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.kdtree.size()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.kdtree.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_cube_bounds_and_seed() {
        let points = make_random_cube([1.0, -2.0, 0.5], 3.0, 500, 42);
        assert_eq!(points.len(), 500);
        for p in &points {
            assert!(p[0] >= 1.0 && p[0] < 4.0);
            assert!(p[1] >= -2.0 && p[1] < 1.0);
            assert!(p[2] >= 0.5 && p[2] < 3.5);
        }
        assert_eq!(points, make_random_cube([1.0, -2.0, 0.5], 3.0, 500, 42));
        assert_ne!(points, make_random_cube([1.0, -2.0, 0.5], 3.0, 500, 43));
    }

    #[test]
    fn test_random_sphere_inside_radius() {
        let center = [1.0, 2.0, 3.0];
        let points = make_random_sphere(center, 2.0, 300, 1);
        assert_eq!(points.len(), 300);
        assert_eq!(brute_force_radius(&center, &points, 2.0001).len(), 300);
    }

    #[test]
    fn test_cube_grid_count() {
        let points = make_cube_grid(1.0, 0.5, [0.0; 3]);
        assert_eq!(points.len(), 27);
        assert_eq!(points[1], [0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_stacked_clouds() {
        let (points, counts) = make_stacked_clouds(&[10, 0, 5], 1.0, 3);
        assert_eq!(points.len(), 15);
        assert_eq!(counts, vec![10, 0, 5]);
    }

    #[test]
    fn test_brute_force_box_respects_range() {
        let xyz = vec![[0.0; 3], [0.0; 3], [0.0; 3]];
        assert_eq!(brute_force_box(&[0.0; 3], &xyz, 1..3, [0.1; 3]), vec![1, 2]);
    }

    #[test]
    fn test_reference_search_matches_brute_force() {
        let xyz = make_random_cube([0.0; 3], 5.0, 3000, 8);
        let search = ReferenceSearch::new(&xyz).unwrap();
        assert_eq!(search.len(), 3000);

        for query in make_random_cube([0.0; 3], 5.0, 50, 9) {
            assert_eq!(
                search.within(&query, 0.7),
                brute_force_radius(&query, &xyz, 0.7)
            );
        }
    }

    #[test]
    fn test_reference_search_empty() {
        assert!(ReferenceSearch::new(&[]).is_none());
    }
}
