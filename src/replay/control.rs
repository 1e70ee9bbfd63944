//! Process-control collaborator contract.
//!
//! The replay scheduler never touches OS threads itself; it drives an
//! implementation of [`ProcessControl`], which owns suspending, resuming,
//! and inspecting the live (replayed) threads and arming the deterministic
//! tick-metric interrupt. The exact metric is the collaborator's choice;
//! the scheduler only requires that it is per-thread, deterministic, and
//! monotonically comparable.
//!
//! Retry policy lives here too: whether to fall back to single-stepping
//! when an armed interrupt lands past the target is the collaborator's
//! decision. By the time [`ResumeOutcome::Overshoot`] reaches the
//! scheduler, the recorded execution is considered un-reproducible.

use thiserror::Error;

use crate::event::Event;
use crate::frame::{ExtraRegisters, Registers};
use crate::types::{ThreadId, Ticks};

/// Result of resuming a thread toward a target tick count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The thread stopped exactly at the target.
    ReachedTarget,
    /// The tick interrupt fired past the target, after any fallback the
    /// collaborator was willing to attempt.
    Overshoot {
        /// The tick count actually reached.
        actual: Ticks,
    },
    /// The thread exited before reaching the target.
    ThreadExited,
}

/// Unrecoverable process-control failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// A blocking wait was interrupted by a session abort.
    #[error("replay wait interrupted")]
    Interrupted,

    /// The thread no longer exists on the process-control side.
    #[error("{0} no longer exists")]
    ThreadGone(ThreadId),

    /// Any other backend failure.
    #[error("process-control backend error: {0}")]
    Backend(String),
}

/// Operations the replay core requires from the process-control layer.
pub trait ProcessControl {
    /// Resumes `thread` until its tick counter reaches `target`, leaving
    /// every other thread suspended.
    ///
    /// This is the scheduler's only blocking point and must be cancellable:
    /// an aborted session surfaces as [`ControlError::Interrupted`].
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] on unrecoverable backend failures.
    fn resume_until_ticks(
        &mut self,
        thread: ThreadId,
        target: Ticks,
    ) -> Result<ResumeOutcome, ControlError>;

    /// Returns `thread`'s current tick count.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] if the thread cannot be queried.
    fn current_ticks(&mut self, thread: ThreadId) -> Result<Ticks, ControlError>;

    /// Reads `thread`'s live general register state.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] if the thread cannot be inspected.
    fn registers(&mut self, thread: ThreadId) -> Result<Registers, ControlError>;

    /// Overwrites `thread`'s general register state with a recorded
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] if the state cannot be applied.
    fn set_registers(&mut self, thread: ThreadId, regs: &Registers) -> Result<(), ControlError>;

    /// Overwrites `thread`'s extended register state with a recorded
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] if the state cannot be applied.
    fn set_extra_registers(
        &mut self,
        thread: ThreadId,
        extra: &ExtraRegisters,
    ) -> Result<(), ControlError>;

    /// Delivers the event's effect on the live thread: permits or emulates
    /// a syscall, injects a signal, retires the thread on exit, and so on.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] if the effect cannot be delivered.
    fn apply_event(&mut self, thread: ThreadId, event: &Event) -> Result<(), ControlError>;
}
