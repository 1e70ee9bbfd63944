//! Tick-driven replay of a recorded trace.
//!
//! Replay is conceptually single-threaded control over many target threads:
//! the [`ReplayScheduler`] pulls frames in logical-time order and, for each,
//! arms exactly one thread toward the frame's recorded tick count via the
//! external [`ProcessControl`] collaborator. Cross-thread interleaving is
//! reproduced exactly because a thread's frames are gated on that thread's
//! own deterministic progress metric, never on wall-clock time.
//!
//! # Submodules
//!
//! - [`control`]: the process-control collaborator contract
//! - [`scheduler`]: the replay state machine

pub mod control;
pub mod scheduler;

pub use control::{ControlError, ProcessControl, ResumeOutcome};
pub use scheduler::{
    DivergencePolicy, ReplayScheduler, ReplayState, SchedulerConfig, StepOutcome,
};
