//! Splitting the frame index space across workers.
//!
//! [`partition`] divides `[0, total)` into contiguous, non-overlapping
//! [`WorkRange`]s of near-equal size. [`partition_strided`] does the same for
//! a frame stride, keeping every range boundary on a multiple of the stride so
//! that stepping from each range's start visits exactly the sampled frames.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::iter::StepBy;
use std::ops::Range;

/// A contiguous slice `[start, end)` of source frame indices handed to one
/// worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkRange {
    /// First index in the range.
    pub start: u64,
    /// One past the last index in the range.
    pub end: u64,
}

impl WorkRange {
    /// Create a range. `start` must be less than `end`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start < end, "empty work range {start}..{end}");
        Self { start, end }
    }

    /// Number of indices covered.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Always `false` for a range built by [`partition`].
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether `index` falls inside the range.
    pub fn contains(&self, index: u64) -> bool {
        index >= self.start && index < self.end
    }

    /// Indices visited when stepping through the range by `stride`.
    pub fn sampled(&self, stride: u64) -> StepBy<Range<u64>> {
        (self.start..self.end).step_by(stride.max(1) as usize)
    }
}

impl Display for WorkRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Split `[0, total)` into at most `workers` contiguous ranges.
///
/// Range sizes differ by at most one, larger ranges first. Fewer than
/// `workers` ranges are returned when `total < workers`; none when `total`
/// is zero.
pub fn partition(total: u64, workers: usize) -> Vec<WorkRange> {
    let slots = (workers.max(1) as u64).min(total);
    if slots == 0 {
        return Vec::new();
    }

    let base = total / slots;
    let remainder = total % slots;

    let mut ranges = Vec::with_capacity(slots as usize);
    let mut start = 0;
    for slot in 0..slots {
        let length = base + u64::from(slot < remainder);
        ranges.push(WorkRange::new(start, start + length));
        start += length;
    }
    ranges
}

/// Number of frames sampled from `total_frames` at `stride`.
///
/// Only whole strides count: a stride larger than the frame count samples
/// nothing.
pub fn sampled_count(total_frames: u64, stride: u64) -> u64 {
    total_frames / stride.max(1)
}

/// Partition the sampled frames of a `total_frames` animation.
///
/// The returned ranges cover `[0, sampled_count * stride)` and start on a
/// multiple of `stride`, so [`WorkRange::sampled`] yields the global sample
/// set `{ k * stride }` with no frame visited twice.
pub fn partition_strided(total_frames: u64, stride: u64, workers: usize) -> Vec<WorkRange> {
    let stride = stride.max(1);
    partition(sampled_count(total_frames, stride), workers)
        .into_iter()
        .map(|range| WorkRange::new(range.start * stride, range.end * stride))
        .collect()
}
