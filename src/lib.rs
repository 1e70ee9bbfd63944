//! Deterministic execution capture and replay core.
//!
//! `retrace` records the nondeterministic inputs of a traced program as a
//! totally ordered stream of [`TraceFrame`]s and replays them so the
//! program re-executes bit-identically. Each frame binds a logical
//! timestamp, a thread, an encoded event, and that thread's deterministic
//! tick count at the moment the event fired; frames carrying kernel-visible
//! state also snapshot the thread's registers so replay can overwrite any
//! divergence the tick metric cannot see.
//!
//! # Architecture
//!
//! - [`types`]: ordered newtypes for logical time, tick counts, and thread
//!   identity
//! - [`event`]: the closed event vocabulary and its fixed-width encoding
//! - [`frame`]: the trace frame and its optional execution-state blocks
//! - [`trace`]: the durable stream format, writer, reader, and seek index
//! - [`record`]: the recording session that stamps logical time
//! - [`replay`]: the tick-driven replay state machine and its
//!   process-control seam
//! - [`error`]: the crate's error taxonomy
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//!
//! use retrace::event::Event;
//! use retrace::frame::TraceFrame;
//! use retrace::trace::{TraceReader, TraceWriter};
//! use retrace::types::{FrameTime, ThreadId, Ticks};
//!
//! # fn main() -> Result<(), retrace::error::TraceError> {
//! let mut buf = Vec::new();
//! let mut writer = TraceWriter::new(&mut buf)?;
//! let frame = TraceFrame::new(
//!     FrameTime::new(1),
//!     ThreadId::new(42),
//!     &Event::Sched,
//!     Ticks::new(100),
//! )?;
//! writer.append(&frame)?;
//! let summary = writer.finish()?;
//! assert_eq!(summary.frames, 1);
//!
//! let mut reader = TraceReader::new(Cursor::new(buf))?;
//! let read_back = reader.next_frame()?;
//! assert_eq!(read_back.as_ref(), Some(&frame));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod event;
pub mod frame;
pub mod record;
pub mod replay;
pub mod trace;
pub mod types;
pub mod util;

pub use error::{ReplayError, TraceError};
pub use event::{Event, EventError, SyscallPhase};
pub use frame::{ExecState, ExtraRegisters, PerfExtra, Registers, TraceFrame};
pub use record::TraceRecorder;
pub use replay::{
    ControlError, DivergencePolicy, ProcessControl, ReplayScheduler, ReplayState, ResumeOutcome,
    SchedulerConfig, StepOutcome,
};
pub use trace::{TraceIndex, TraceReader, TraceSummary, TraceWriter, WriterConfig};
pub use types::{FrameTime, ThreadId, Ticks};
