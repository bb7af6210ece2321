//! Precondition errors raised by the host-side validation layer.
//!
//! These are detected before any query task is dispatched. Once a call has
//! passed validation, every per-query task is total and no error can occur.

use thiserror::Error;

/// Result alias for validated query entry points.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors from validating query input buffers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("`{name}` has length {actual}, expected {expected}")]
    BufferLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("`{name}` sums to {actual}, expected {expected}")]
    BatchCount {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("nsample must be at least 1")]
    ZeroCapacity,

    #[error("invalid voxel grid at cell {flat}: {reason}")]
    InvalidGrid { flat: usize, reason: &'static str },

    #[error("point_indices[{position}] = {index} is out of range for {num_points} points")]
    PointIndexOutOfRange {
        position: usize,
        index: u32,
        num_points: usize,
    },

    #[error("{0} candidate points exceed the u32 index range")]
    TooManyPoints(usize),
}

/// Check that a buffer has exactly the expected number of elements.
pub(crate) fn check_len(name: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(QueryError::BufferLength {
            name,
            expected,
            actual,
        })
    }
}

/// Sentinel index for a candidate set of `num_points` points.
pub(crate) fn sentinel_for(num_points: usize) -> Result<u32> {
    u32::try_from(num_points).map_err(|_| QueryError::TooManyPoints(num_points))
}
