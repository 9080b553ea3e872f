//! Ordered disjoint range set used for loaded-slice tracking

use serde::{Deserialize, Serialize};

/// A compact set of `usize` values stored as sorted, disjoint, inclusive
/// `(start, end)` ranges.
///
/// [`VoxelVolume`](crate::VoxelVolume) records which z-slices have been
/// written with this structure, so consumers can assert readiness before
/// running a scan that needs the whole volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSet {
    ranges: Vec<(usize, usize)>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Inserts one value, merging with overlapping or adjacent ranges.
    pub fn insert(&mut self, value: usize) {
        // index of the first range starting after `value`
        let idx = self.ranges.partition_point(|&(start, _)| start <= value);

        if idx > 0 {
            let (_, end) = self.ranges[idx - 1];
            if value <= end {
                return; // already covered
            }
            if value == end + 1 {
                self.ranges[idx - 1].1 = value;
                self.merge_with_next(idx - 1);
                return;
            }
        }
        if idx < self.ranges.len() && value + 1 == self.ranges[idx].0 {
            self.ranges[idx].0 = value;
            return;
        }
        self.ranges.insert(idx, (value, value));
    }

    fn merge_with_next(&mut self, idx: usize) {
        if idx + 1 < self.ranges.len() && self.ranges[idx].1 + 1 >= self.ranges[idx + 1].0 {
            self.ranges[idx].1 = self.ranges[idx].1.max(self.ranges[idx + 1].1);
            self.ranges.remove(idx + 1);
        }
    }

    pub fn contains(&self, value: usize) -> bool {
        let idx = self.ranges.partition_point(|&(start, _)| start <= value);
        idx > 0 && value <= self.ranges[idx - 1].1
    }

    /// Total count of values covered by the set.
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|&(start, end)| end - start + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Read-only view of the underlying inclusive ranges.
    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
