//! Side index of logical-time/offset checkpoints.
//!
//! The index lets a reader position itself near a requested logical time
//! without a full linear scan. It is advisory: with no usable checkpoint,
//! seeking degrades to scanning from the start of the stream.

use crate::types::FrameTime;

/// Sorted checkpoints of `(logical time, byte offset of the frame record)`.
///
/// Built by the writer at a configurable frame interval, and grown by
/// readers as they scan. Checkpoints always point at the first byte of a
/// frame record whose logical time equals the checkpoint time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceIndex {
    checkpoints: Vec<(FrameTime, u64)>,
}

impl TraceIndex {
    /// Creates an empty index.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            checkpoints: Vec::new(),
        }
    }

    /// Records a checkpoint.
    ///
    /// Entries must arrive in increasing logical-time order; an entry whose
    /// time does not exceed the last recorded checkpoint is ignored, which
    /// makes re-scans of already-indexed regions harmless.
    pub fn record(&mut self, time: FrameTime, offset: u64) {
        if let Some(&(last, _)) = self.checkpoints.last() {
            if time <= last {
                return;
            }
        }
        self.checkpoints.push((time, offset));
    }

    /// Returns the latest checkpoint at or before `time`, if any.
    ///
    /// Scanning forward from the returned offset is guaranteed to encounter
    /// the first frame with logical time ≥ `time`.
    #[must_use]
    pub fn nearest_at_or_before(&self, time: FrameTime) -> Option<(FrameTime, u64)> {
        let idx = self.checkpoints.partition_point(|&(t, _)| t <= time);
        if idx == 0 {
            None
        } else {
            Some(self.checkpoints[idx - 1])
        }
    }

    /// Returns the checkpoints, oldest first.
    #[must_use]
    pub fn checkpoints(&self) -> &[(FrameTime, u64)] {
        &self.checkpoints
    }

    /// Returns the number of checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Returns true if the index holds no checkpoints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}
