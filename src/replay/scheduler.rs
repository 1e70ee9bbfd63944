//! Tick-driven replay scheduler.
//!
//! The scheduler consumes frames from a [`TraceReader`] in logical-time
//! order and drives the [`ProcessControl`] collaborator so the live threads
//! reach, in the same order, the same tick-count positions observed during
//! recording. One frame is processed at a time, and only one thread is ever
//! armed toward a target tick count per step; all other recorded threads
//! stay suspended. That cooperative, strictly-ordered model trades
//! parallelism for exact reproducibility.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use crate::error::ReplayError;
use crate::frame::{Registers, TraceFrame};
use crate::replay::control::{ControlError, ProcessControl, ResumeOutcome};
use crate::trace::reader::TraceReader;
use crate::types::{FrameTime, ThreadId, Ticks};

/// What to do when the live register state before overwrite differs from
/// the recorded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DivergencePolicy {
    /// Skip the pre-overwrite comparison entirely.
    Off,
    /// Log the mismatch and continue; never silently corrected without note.
    #[default]
    Warn,
    /// Treat the mismatch as fatal divergence.
    Fatal,
}

/// Configuration for a [`ReplayScheduler`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Register divergence checking policy.
    pub divergence_policy: DivergencePolicy,
}

impl SchedulerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the divergence policy.
    #[must_use]
    pub const fn with_divergence_policy(mut self, policy: DivergencePolicy) -> Self {
        self.divergence_policy = policy;
        self
    }
}

/// State of the replay state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Between frames; ready to pull the next one.
    Idle,
    /// A thread is resumed and armed toward a target tick count.
    AwaitingTick {
        /// The armed thread.
        thread: ThreadId,
        /// The recorded tick count to halt at.
        target: Ticks,
    },
    /// The thread halted on target; the frame's state and event are being
    /// applied.
    ApplyingEvent {
        /// The halted thread.
        thread: ThreadId,
        /// The frame's logical time.
        time: FrameTime,
    },
    /// Terminal failure state; replay cannot continue.
    Faulted,
    /// Terminal success state; the trace is exhausted.
    Done,
}

/// Result of one scheduler step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One frame was applied.
    Applied {
        /// Logical time the replay advanced to.
        time: FrameTime,
        /// The thread whose frame was applied.
        thread: ThreadId,
    },
    /// The trace is exhausted; replay completed.
    Complete,
}

/// Drives replayed threads through the recorded frame sequence.
#[derive(Debug)]
pub struct ReplayScheduler<R: Read + Seek, P: ProcessControl> {
    reader: TraceReader<R>,
    control: P,
    config: SchedulerConfig,
    state: ReplayState,
    time: FrameTime,
}

impl<R: Read + Seek, P: ProcessControl> ReplayScheduler<R, P> {
    /// Creates a scheduler over a trace reader and a process-control
    /// collaborator.
    #[must_use]
    pub fn new(reader: TraceReader<R>, control: P) -> Self {
        Self::with_config(reader, control, SchedulerConfig::new())
    }

    /// Creates a scheduler with a custom configuration.
    #[must_use]
    pub fn with_config(reader: TraceReader<R>, control: P, config: SchedulerConfig) -> Self {
        Self {
            reader,
            control,
            config,
            state: ReplayState::Idle,
            time: FrameTime::ZERO,
        }
    }

    /// Returns the current state of the machine.
    #[must_use]
    pub const fn state(&self) -> ReplayState {
        self.state
    }

    /// Returns the logical time replay has advanced to.
    #[must_use]
    pub const fn current_time(&self) -> FrameTime {
        self.time
    }

    /// Aborts the session: the machine moves to [`ReplayState::Faulted`]
    /// without touching reader state. An in-flight blocking wait is
    /// interrupted on the process-control side and surfaces as
    /// [`ReplayError::Aborted`].
    pub fn abort(&mut self) {
        if !matches!(self.state, ReplayState::Done) {
            self.state = ReplayState::Faulted;
        }
    }

    /// Pulls and applies the next frame.
    ///
    /// # Errors
    ///
    /// All errors are terminal for the session and leave the machine in
    /// [`ReplayState::Faulted`]; they are always distinguishable from the
    /// `Ok(StepOutcome::Complete)` end-of-trace result.
    pub fn step(&mut self) -> Result<StepOutcome, ReplayError> {
        match self.state {
            ReplayState::Done => return Ok(StepOutcome::Complete),
            ReplayState::Faulted => return Err(ReplayError::SessionFaulted),
            ReplayState::Idle | ReplayState::AwaitingTick { .. } | ReplayState::ApplyingEvent { .. } => {}
        }

        let frame = match self.reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.state = ReplayState::Done;
                return Ok(StepOutcome::Complete);
            }
            Err(err) => {
                self.state = ReplayState::Faulted;
                return Err(err.into());
            }
        };

        let thread = frame.tid();
        let target = frame.ticks();
        self.state = ReplayState::AwaitingTick { thread, target };
        self.await_tick(thread, target)?;

        self.state = ReplayState::ApplyingEvent {
            thread,
            time: frame.time(),
        };
        self.apply_frame(&frame)?;

        self.time = frame.time();
        self.state = ReplayState::Idle;
        debug!(
            time = self.time.as_u32(),
            tid = thread.as_raw(),
            ticks = target.as_u64(),
            "frame applied"
        );
        Ok(StepOutcome::Applied {
            time: self.time,
            thread,
        })
    }

    /// Runs the machine to completion.
    ///
    /// Returns the final logical time on success.
    ///
    /// # Errors
    ///
    /// Propagates the first terminal error from [`step`](Self::step).
    pub fn run(&mut self) -> Result<FrameTime, ReplayError> {
        loop {
            match self.step()? {
                StepOutcome::Applied { .. } => {}
                StepOutcome::Complete => return Ok(self.time),
            }
        }
    }

    /// Consumes the scheduler, returning the reader and collaborator.
    #[must_use]
    pub fn into_parts(self) -> (TraceReader<R>, P) {
        (self.reader, self.control)
    }

    /// Resumes `thread` and blocks until it reaches `target` exactly.
    fn await_tick(&mut self, thread: ThreadId, target: Ticks) -> Result<(), ReplayError> {
        let current = self
            .control
            .current_ticks(thread)
            .map_err(|e| self.fault_control(e))?;
        if target < current {
            self.state = ReplayState::Faulted;
            return Err(ReplayError::TickOvershoot {
                thread,
                recorded: target,
                actual: current,
            });
        }
        match self
            .control
            .resume_until_ticks(thread, target)
            .map_err(|e| self.fault_control(e))?
        {
            ResumeOutcome::ReachedTarget => Ok(()),
            ResumeOutcome::Overshoot { actual } => {
                self.state = ReplayState::Faulted;
                Err(ReplayError::TickOvershoot {
                    thread,
                    recorded: target,
                    actual,
                })
            }
            ResumeOutcome::ThreadExited => {
                self.state = ReplayState::Faulted;
                Err(ReplayError::ThreadExited { thread })
            }
        }
    }

    /// Applies a frame's recorded state and event effect to the halted
    /// thread.
    fn apply_frame(&mut self, frame: &TraceFrame) -> Result<(), ReplayError> {
        let thread = frame.tid();
        if let Some(exec) = frame.exec_state() {
            // The snapshot corrects instruction-count-invisible divergence
            // such as kernel-chosen syscall results.
            self.check_divergence(thread, exec.registers())?;
            self.control
                .set_registers(thread, exec.registers())
                .map_err(|e| self.fault_control(e))?;
            if let Some(extra) = frame.extra_registers() {
                self.control
                    .set_extra_registers(thread, extra)
                    .map_err(|e| self.fault_control(e))?;
            }
        }
        let event = frame.event().decode().map_err(|err| {
            self.state = ReplayState::Faulted;
            ReplayError::Trace(err.into())
        })?;
        self.control
            .apply_event(thread, &event)
            .map_err(|e| self.fault_control(e))?;
        Ok(())
    }

    /// Compares live registers against the recorded snapshot per policy.
    fn check_divergence(
        &mut self,
        thread: ThreadId,
        recorded: &Registers,
    ) -> Result<(), ReplayError> {
        if matches!(self.config.divergence_policy, DivergencePolicy::Off) {
            return Ok(());
        }
        let live = self
            .control
            .registers(thread)
            .map_err(|e| self.fault_control(e))?;
        let Some(details) = first_mismatch(recorded, &live) else {
            return Ok(());
        };
        match self.config.divergence_policy {
            DivergencePolicy::Off => Ok(()),
            DivergencePolicy::Warn => {
                warn!(
                    tid = thread.as_raw(),
                    mismatch = %details,
                    "live register state diverges from recorded snapshot"
                );
                Ok(())
            }
            DivergencePolicy::Fatal => {
                self.state = ReplayState::Faulted;
                Err(ReplayError::DivergentState { thread, details })
            }
        }
    }

    /// Maps a collaborator failure onto the faulted state, distinguishing
    /// session aborts from genuine backend errors.
    fn fault_control(&mut self, err: ControlError) -> ReplayError {
        self.state = ReplayState::Faulted;
        match err {
            ControlError::Interrupted => ReplayError::Aborted,
            other => ReplayError::Control(other),
        }
    }
}

/// Describes the first differing register slot, if any.
fn first_mismatch(recorded: &Registers, live: &Registers) -> Option<String> {
    recorded
        .slots()
        .iter()
        .zip(live.slots().iter())
        .enumerate()
        .find(|(_, (rec, liv))| rec != liv)
        .map(|(slot, (rec, liv))| {
            format!("slot {slot}: recorded {rec:#x}, live {liv:#x}")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mismatch_reports_slot_and_values() {
        let recorded = Registers::zeroed();
        let mut slots = *recorded.slots();
        slots[3] = 0xBEEF;
        let live = Registers::new(slots);
        let details = first_mismatch(&recorded, &live).expect("mismatch");
        assert!(details.contains("slot 3"));
        assert!(details.contains("0xbeef"));
    }

    #[test]
    fn identical_registers_have_no_mismatch() {
        let regs = Registers::zeroed();
        assert_eq!(first_mismatch(&regs, &regs), None);
    }
}
