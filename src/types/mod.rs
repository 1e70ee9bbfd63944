//! Core types for the trace model.
//!
//! This module contains the fundamental scalar types used throughout the
//! crate:
//!
//! - [`FrameTime`]: process-wide logical time, strictly increasing per frame
//! - [`Ticks`]: per-thread deterministic progress metric
//! - [`ThreadId`]: OS thread identifier as captured in the trace

use core::fmt;

/// Process-wide logical time.
///
/// Incremented once per trace frame recorded, independent of which thread
/// produced the frame. Logical time defines a total order across the whole
/// trace: frames in a stream carry strictly increasing values, and equal
/// values across two frames are never permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameTime(u32);

impl FrameTime {
    /// Time zero. No recorded frame carries this value; the first frame of a
    /// trace is assigned `FrameTime::ZERO.next()`.
    pub const ZERO: Self = Self(0);

    /// Creates a logical time from a raw counter value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next logical time, or `None` if the counter is exhausted.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl fmt::Display for FrameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-thread deterministic progress metric.
///
/// Counts a deterministic hardware execution metric (for example retired
/// conditional branches) sampled at the moment an event is observed. Two runs
/// of the identical instruction stream on the same hardware class yield
/// identical tick counts at identical execution points, which is what makes
/// tick counts usable as reproducible positions during replay.
///
/// Within one thread's frame sequence tick counts are non-decreasing. The
/// exact metric and its interrupt-arming mechanism belong to the
/// process-control collaborator; this type treats ticks as an opaque
/// monotonically-comparable count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(u64);

impl Ticks {
    /// Zero ticks.
    pub const ZERO: Self = Self(0);

    /// Creates a tick count from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw tick count.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `self - other`, or `None` if `other` is ahead of `self`.
    ///
    /// Used to compute the arming delta when resuming a thread toward a
    /// recorded tick count.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a recorded thread.
///
/// Matches the host OS pid/tid width. The value is only meaningful within
/// one recording session; replay maps recorded ids onto live threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(i32);

impl ThreadId {
    /// Creates a thread id from a raw OS tid.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw OS tid.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.0)
    }
}
