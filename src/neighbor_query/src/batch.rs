//! Batch partitioning of stacked point sets.
//!
//! Point and query sets are stored back to back for all batch elements; a
//! per-element count sequence describes the split. [`BatchLayout`] turns a
//! count sequence into prefix sums once per call, so each query task can find
//! its own batch element and candidate range without rescanning the counts.

use std::ops::Range;

use crate::error::{QueryError, Result};

/// Prefix-summed batch counts.
///
/// `offsets` has `B + 1` entries: `offsets[b]..offsets[b + 1]` is the flat
/// index range of batch element `b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLayout {
    offsets: Vec<usize>,
}

impl BatchLayout {
    /// Build a layout from per-element counts.
    pub fn from_counts(counts: &[u32]) -> Self {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        offsets.push(0usize);
        let mut sum = 0usize;
        for &count in counts {
            sum += count as usize;
            offsets.push(sum);
        }
        Self { offsets }
    }

    /// Build a layout and check that the counts cover exactly `total` items.
    pub fn validated(name: &'static str, counts: &[u32], total: usize) -> Result<Self> {
        let layout = Self::from_counts(counts);
        if layout.total() != total {
            return Err(QueryError::BatchCount {
                name,
                expected: total,
                actual: layout.total(),
            });
        }
        Ok(layout)
    }

    /// Number of batch elements.
    pub fn num_batches(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of items over all batch elements.
    pub fn total(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Flat index range of batch element `batch`.
    pub fn range(&self, batch: usize) -> Range<usize> {
        self.offsets[batch]..self.offsets[batch + 1]
    }

    /// Batch element owning flat index `index`, or `None` past the end.
    ///
    /// Empty batch elements own no index, so the lookup skips over them.
    pub fn batch_of(&self, index: usize) -> Option<usize> {
        if index >= self.total() {
            return None;
        }
        // First offset strictly greater than `index`, minus one.
        Some(self.offsets.partition_point(|&offset| offset <= index) - 1)
    }

    /// The raw prefix sums (`B + 1` entries, starting at 0).
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
}
