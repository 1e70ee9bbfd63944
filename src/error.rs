//! Error types for the trace core.
//!
//! Error handling follows a fixed taxonomy, and every error is surfaced to
//! the caller of the writer/reader/scheduler, never swallowed:
//!
//! - [`EventError`](crate::event::EventError): payload out of range at encode
//!   time, or an encoding no encoder could have produced at decode time
//! - [`TraceError`]: writer/reader contract violations, stream corruption,
//!   and I/O failures
//! - [`ReplayError`]: divergence conditions during replay, kept
//!   distinguishable from ordinary end-of-trace completion
//!
//! Divergence conditions (tick overshoot, corrupt frames, divergent state)
//! are deterministic, not transient, so the core never retries them; any
//! fallback policy belongs to the process-control collaborator.

use std::io;

use thiserror::Error;

use crate::event::EventError;
use crate::replay::control::ControlError;
use crate::types::{FrameTime, ThreadId, Ticks};

/// Errors from the trace frame model, writer, and reader.
#[derive(Debug, Error)]
pub enum TraceError {
    /// An event payload failed validation before any I/O.
    #[error(transparent)]
    InvalidEvent(#[from] EventError),

    /// A frame was appended with a logical time that does not follow the
    /// previously accepted frame. This is a caller bug, fatal to the write
    /// session, and reported immediately rather than deferred.
    #[error("out-of-order frame: time {attempted} does not follow {last}")]
    OutOfOrderFrame {
        /// Logical time of the last accepted frame.
        last: FrameTime,
        /// Logical time of the rejected frame.
        attempted: FrameTime,
    },

    /// The reader encountered a malformed or truncated record. Fatal to the
    /// read session: the stream is one contiguous transaction, and the
    /// reader never guesses or skips past corruption.
    #[error("corrupt trace at byte {offset}: {reason}")]
    CorruptTrace {
        /// Byte offset of the record that failed to parse.
        offset: u64,
        /// What failed to parse.
        reason: &'static str,
    },

    /// The writer previously failed and refuses further appends.
    #[error("trace writer is faulted; no further appends accepted")]
    WriterFaulted,

    /// An execution-state block was attached twice with differing values.
    #[error("conflicting execution-state attachment")]
    ConflictingExecState,

    /// An extended-register snapshot exceeded the supported size.
    #[error("extended register snapshot of {len} bytes exceeds the supported size")]
    ExtraRegistersTooLarge {
        /// Offending snapshot length.
        len: usize,
    },

    /// The 32-bit logical clock ran out of values.
    #[error("logical clock exhausted")]
    ClockExhausted,

    /// An underlying I/O failure, reported synchronously to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from a replay session.
///
/// All variants are terminal for the session and distinguishable from normal
/// end-of-trace completion, so calling tools can report "replay diverged"
/// rather than "replay finished".
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A thread could not be halted exactly at its recorded tick count.
    /// Signals un-reproducible execution (environment drift, a
    /// nondeterministic instruction, or hardware counter mismatch).
    #[error("tick overshoot on {thread}: recorded {recorded}, reached {actual}")]
    TickOvershoot {
        /// The thread that overshot.
        thread: ThreadId,
        /// The recorded target tick count.
        recorded: Ticks,
        /// The tick count actually reached.
        actual: Ticks,
    },

    /// The live register state before overwrite differed from the recorded
    /// snapshot under [`DivergencePolicy::Fatal`](crate::replay::DivergencePolicy::Fatal).
    #[error("divergent register state on {thread}: {details}")]
    DivergentState {
        /// The diverging thread.
        thread: ThreadId,
        /// First observed mismatch.
        details: String,
    },

    /// A thread exited before reaching the tick count its next frame
    /// requires.
    #[error("{thread} exited before reaching its recorded tick count")]
    ThreadExited {
        /// The thread that exited early.
        thread: ThreadId,
    },

    /// The replay session was aborted while awaiting a tick-count interrupt.
    #[error("replay aborted")]
    Aborted,

    /// `step` was called on a scheduler already in the faulted state.
    #[error("replay session already faulted")]
    SessionFaulted,

    /// Reading or decoding the trace failed.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// The process-control collaborator failed unrecoverably.
    #[error("process control failed: {0}")]
    Control(#[from] ControlError),
}
