//! End-to-end replay scheduling over an in-memory trace and a scripted
//! process-control collaborator: ordering fidelity across threads, tick
//! overshoot, divergence policies, aborts, and terminal states.

use std::collections::HashMap;
use std::io::Cursor;

use retrace::event::{Event, SyscallPhase};
use retrace::frame::{ExtraRegisters, PerfExtra, Registers, TraceFrame};
use retrace::replay::{
    ControlError, DivergencePolicy, ProcessControl, ReplayScheduler, ReplayState, ResumeOutcome,
    SchedulerConfig, StepOutcome,
};
use retrace::trace::{TraceReader, TraceWriter};
use retrace::types::{FrameTime, ThreadId, Ticks};
use retrace::ReplayError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ===== scripted collaborator =====

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Resume { tid: i32, target: u64 },
    SetRegisters { tid: i32 },
    SetExtraRegisters { tid: i32, len: usize },
    ApplyEvent { tid: i32, event: Event },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeScript {
    Normal,
    OvershootBy(u64),
    ThreadExits,
    Interrupted,
}

/// Collaborator whose threads reach whatever tick target they are armed
/// with, unless scripted otherwise. Records every call for ordering
/// assertions.
#[derive(Debug)]
struct ScriptedControl {
    ticks: HashMap<i32, u64>,
    live_regs: HashMap<i32, Registers>,
    script: ResumeScript,
    calls: Vec<Call>,
}

impl ScriptedControl {
    fn new() -> Self {
        Self {
            ticks: HashMap::new(),
            live_regs: HashMap::new(),
            script: ResumeScript::Normal,
            calls: Vec::new(),
        }
    }

    fn with_script(script: ResumeScript) -> Self {
        Self {
            script,
            ..Self::new()
        }
    }
}

impl ProcessControl for ScriptedControl {
    fn resume_until_ticks(
        &mut self,
        thread: ThreadId,
        target: Ticks,
    ) -> Result<ResumeOutcome, ControlError> {
        self.calls.push(Call::Resume {
            tid: thread.as_raw(),
            target: target.as_u64(),
        });
        match self.script {
            ResumeScript::Normal => {
                self.ticks.insert(thread.as_raw(), target.as_u64());
                Ok(ResumeOutcome::ReachedTarget)
            }
            ResumeScript::OvershootBy(by) => {
                let actual = target.as_u64() + by;
                self.ticks.insert(thread.as_raw(), actual);
                Ok(ResumeOutcome::Overshoot {
                    actual: Ticks::new(actual),
                })
            }
            ResumeScript::ThreadExits => Ok(ResumeOutcome::ThreadExited),
            ResumeScript::Interrupted => Err(ControlError::Interrupted),
        }
    }

    fn current_ticks(&mut self, thread: ThreadId) -> Result<Ticks, ControlError> {
        Ok(Ticks::new(
            self.ticks.get(&thread.as_raw()).copied().unwrap_or(0),
        ))
    }

    fn registers(&mut self, thread: ThreadId) -> Result<Registers, ControlError> {
        Ok(self
            .live_regs
            .get(&thread.as_raw())
            .copied()
            .unwrap_or_else(Registers::zeroed))
    }

    fn set_registers(&mut self, thread: ThreadId, regs: &Registers) -> Result<(), ControlError> {
        self.calls.push(Call::SetRegisters {
            tid: thread.as_raw(),
        });
        self.live_regs.insert(thread.as_raw(), *regs);
        Ok(())
    }

    fn set_extra_registers(
        &mut self,
        thread: ThreadId,
        extra: &ExtraRegisters,
    ) -> Result<(), ControlError> {
        self.calls.push(Call::SetExtraRegisters {
            tid: thread.as_raw(),
            len: extra.len(),
        });
        Ok(())
    }

    fn apply_event(&mut self, thread: ThreadId, event: &Event) -> Result<(), ControlError> {
        self.calls.push(Call::ApplyEvent {
            tid: thread.as_raw(),
            event: *event,
        });
        Ok(())
    }
}

// ===== trace construction =====

struct Entry {
    time: u32,
    tid: i32,
    event: Event,
    ticks: u64,
    regs: Option<Registers>,
    extra: Option<Vec<u8>>,
}

impl Entry {
    fn bare(time: u32, tid: i32, event: Event, ticks: u64) -> Self {
        Self {
            time,
            tid,
            event,
            ticks,
            regs: None,
            extra: None,
        }
    }

    fn with_regs(mut self, regs: Registers) -> Self {
        self.regs = Some(regs);
        self
    }

    fn with_extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = Some(extra);
        self
    }
}

fn build_trace(entries: &[Entry]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut writer = TraceWriter::new(&mut buf).expect("writer");
    for entry in entries {
        let mut frame = TraceFrame::new(
            FrameTime::new(entry.time),
            ThreadId::new(entry.tid),
            &entry.event,
            Ticks::new(entry.ticks),
        )
        .expect("frame");
        if let Some(regs) = entry.regs {
            let extra = entry
                .extra
                .clone()
                .map(|data| ExtraRegisters::new(data).expect("extra"));
            frame
                .attach_exec_state(regs, PerfExtra::default(), extra)
                .expect("attach");
        }
        writer.append(&frame).expect("append");
    }
    writer.finish().expect("finish");
    buf
}

fn scheduler_over(
    buf: Vec<u8>,
    control: ScriptedControl,
    config: SchedulerConfig,
) -> ReplayScheduler<Cursor<Vec<u8>>, ScriptedControl> {
    let reader = TraceReader::new(Cursor::new(buf)).expect("reader");
    ReplayScheduler::with_config(reader, control, config)
}

fn marked_regs(value: u64) -> Registers {
    let mut slots = [0u64; 18];
    slots[0] = value;
    Registers::new(slots)
}

// ===== ordering =====

#[test]
fn frames_are_applied_in_logical_time_order_not_tick_order() {
    init_tracing();
    // Thread 1 recorded a syscall at tick 10 before thread 2's event at
    // tick 5: logical time decides, so thread 1 runs first.
    let buf = build_trace(&[
        Entry::bare(
            1,
            1,
            Event::Syscall {
                number: 1,
                phase: SyscallPhase::Entry,
            },
            10,
        ),
        Entry::bare(2, 2, Event::Sched, 5),
    ]);
    let mut scheduler = scheduler_over(buf, ScriptedControl::new(), SchedulerConfig::new());
    let time = scheduler.run().expect("run");
    assert_eq!(time, FrameTime::new(2));
    assert_eq!(scheduler.state(), ReplayState::Done);

    let (_, control) = scheduler.into_parts();
    assert_eq!(
        control.calls,
        vec![
            Call::Resume { tid: 1, target: 10 },
            Call::ApplyEvent {
                tid: 1,
                event: Event::Syscall {
                    number: 1,
                    phase: SyscallPhase::Entry,
                },
            },
            Call::Resume { tid: 2, target: 5 },
            Call::ApplyEvent {
                tid: 2,
                event: Event::Sched,
            },
        ]
    );
}

#[test]
fn step_reports_each_applied_frame_then_completion() {
    init_tracing();
    let buf = build_trace(&[
        Entry::bare(3, 1, Event::Sched, 1),
        Entry::bare(7, 1, Event::Yield, 2),
    ]);
    let mut scheduler = scheduler_over(buf, ScriptedControl::new(), SchedulerConfig::new());

    assert_eq!(
        scheduler.step().expect("step"),
        StepOutcome::Applied {
            time: FrameTime::new(3),
            thread: ThreadId::new(1),
        }
    );
    assert_eq!(scheduler.current_time(), FrameTime::new(3));
    assert_eq!(
        scheduler.step().expect("step"),
        StepOutcome::Applied {
            time: FrameTime::new(7),
            thread: ThreadId::new(1),
        }
    );
    assert_eq!(scheduler.step().expect("step"), StepOutcome::Complete);
    assert_eq!(scheduler.state(), ReplayState::Done);
    // Stepping a finished session stays terminal and successful.
    assert_eq!(scheduler.step().expect("step"), StepOutcome::Complete);
}

#[test]
fn recorded_state_is_applied_before_the_event_effect() {
    init_tracing();
    let regs = marked_regs(0x1234);
    let buf = build_trace(&[Entry::bare(
        1,
        5,
        Event::Syscall {
            number: 0,
            phase: SyscallPhase::Exit,
        },
        3,
    )
    .with_regs(regs)
    .with_extra(vec![0xAB; 16])]);
    let config = SchedulerConfig::new().with_divergence_policy(DivergencePolicy::Off);
    let mut scheduler = scheduler_over(buf, ScriptedControl::new(), config);
    scheduler.run().expect("run");

    let (_, control) = scheduler.into_parts();
    assert_eq!(
        control.calls,
        vec![
            Call::Resume { tid: 5, target: 3 },
            Call::SetRegisters { tid: 5 },
            Call::SetExtraRegisters { tid: 5, len: 16 },
            Call::ApplyEvent {
                tid: 5,
                event: Event::Syscall {
                    number: 0,
                    phase: SyscallPhase::Exit,
                },
            },
        ]
    );
    assert_eq!(control.live_regs.get(&5), Some(&regs));
}

// ===== overshoot =====

#[test]
fn overshoot_during_resume_is_terminal() {
    init_tracing();
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 100)]);
    let control = ScriptedControl::with_script(ResumeScript::OvershootBy(7));
    let mut scheduler = scheduler_over(buf, control, SchedulerConfig::new());

    let err = scheduler.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::TickOvershoot {
            thread,
            recorded,
            actual,
        } if thread == ThreadId::new(1)
            && recorded == Ticks::new(100)
            && actual == Ticks::new(107)
    ));
    assert_eq!(scheduler.state(), ReplayState::Faulted);
    assert!(matches!(
        scheduler.step().unwrap_err(),
        ReplayError::SessionFaulted
    ));
}

#[test]
fn thread_already_past_target_is_an_overshoot() {
    init_tracing();
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 10)]);
    let mut control = ScriptedControl::new();
    control.ticks.insert(1, 50);
    let mut scheduler = scheduler_over(buf, control, SchedulerConfig::new());

    let err = scheduler.step().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::TickOvershoot {
            recorded,
            actual,
            ..
        } if recorded == Ticks::new(10) && actual == Ticks::new(50)
    ));
    assert_eq!(scheduler.state(), ReplayState::Faulted);
}

// ===== divergence =====

#[test]
fn warn_policy_overwrites_diverged_registers_and_continues() {
    init_tracing();
    let recorded = marked_regs(0xAAAA);
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 1).with_regs(recorded)]);
    let mut control = ScriptedControl::new();
    control.live_regs.insert(1, marked_regs(0xBBBB));
    let config = SchedulerConfig::new().with_divergence_policy(DivergencePolicy::Warn);
    let mut scheduler = scheduler_over(buf, control, config);

    scheduler.run().expect("run");
    let (_, control) = scheduler.into_parts();
    assert_eq!(control.live_regs.get(&1), Some(&recorded));
}

#[test]
fn fatal_policy_turns_divergence_into_a_terminal_error() {
    init_tracing();
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 1).with_regs(marked_regs(0xAAAA))]);
    let mut control = ScriptedControl::new();
    control.live_regs.insert(1, marked_regs(0xBBBB));
    let config = SchedulerConfig::new().with_divergence_policy(DivergencePolicy::Fatal);
    let mut scheduler = scheduler_over(buf, control, config);

    let err = scheduler.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::DivergentState { thread, .. } if thread == ThreadId::new(1)
    ));
    assert_eq!(scheduler.state(), ReplayState::Faulted);

    // The snapshot was never applied past the failed check.
    let (_, control) = scheduler.into_parts();
    assert_eq!(
        control.calls,
        vec![Call::Resume { tid: 1, target: 1 }]
    );
}

#[test]
fn fatal_policy_accepts_matching_registers() {
    init_tracing();
    let recorded = marked_regs(0xCCCC);
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 1).with_regs(recorded)]);
    let mut control = ScriptedControl::new();
    control.live_regs.insert(1, recorded);
    let config = SchedulerConfig::new().with_divergence_policy(DivergencePolicy::Fatal);
    let mut scheduler = scheduler_over(buf, control, config);
    scheduler.run().expect("run");
    assert_eq!(scheduler.state(), ReplayState::Done);
}

#[test]
fn off_policy_never_reads_live_registers() {
    init_tracing();
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 1).with_regs(marked_regs(1))]);
    let mut control = ScriptedControl::new();
    control.live_regs.insert(1, marked_regs(2));
    let config = SchedulerConfig::new().with_divergence_policy(DivergencePolicy::Off);
    let mut scheduler = scheduler_over(buf, control, config);
    scheduler.run().expect("run");
    assert_eq!(scheduler.state(), ReplayState::Done);
}

// ===== aborts and exits =====

#[test]
fn interrupted_wait_surfaces_as_abort() {
    init_tracing();
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 1)]);
    let control = ScriptedControl::with_script(ResumeScript::Interrupted);
    let mut scheduler = scheduler_over(buf, control, SchedulerConfig::new());

    let err = scheduler.run().unwrap_err();
    assert!(matches!(err, ReplayError::Aborted));
    assert_eq!(scheduler.state(), ReplayState::Faulted);
}

#[test]
fn abort_marks_the_session_faulted() {
    init_tracing();
    let buf = build_trace(&[Entry::bare(1, 1, Event::Sched, 1)]);
    let mut scheduler = scheduler_over(buf, ScriptedControl::new(), SchedulerConfig::new());
    scheduler.abort();
    assert_eq!(scheduler.state(), ReplayState::Faulted);
    assert!(matches!(
        scheduler.step().unwrap_err(),
        ReplayError::SessionFaulted
    ));
}

#[test]
fn thread_exit_before_target_is_terminal() {
    init_tracing();
    let buf = build_trace(&[Entry::bare(1, 3, Event::Sched, 9)]);
    let control = ScriptedControl::with_script(ResumeScript::ThreadExits);
    let mut scheduler = scheduler_over(buf, control, SchedulerConfig::new());

    let err = scheduler.run().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::ThreadExited { thread } if thread == ThreadId::new(3)
    ));
    assert_eq!(scheduler.state(), ReplayState::Faulted);
}

#[test]
fn corrupt_trace_mid_replay_faults_the_session() {
    init_tracing();
    let mut buf = build_trace(&[
        Entry::bare(1, 1, Event::Sched, 1),
        Entry::bare(2, 1, Event::Yield, 2),
    ]);
    // Second frame loses its tail.
    buf.truncate(buf.len() - 10);
    let mut scheduler = scheduler_over(buf, ScriptedControl::new(), SchedulerConfig::new());

    scheduler.step().expect("first frame applies");
    let err = scheduler.step().unwrap_err();
    assert!(matches!(
        err,
        ReplayError::Trace(retrace::TraceError::CorruptTrace { .. })
    ));
    assert_eq!(scheduler.state(), ReplayState::Faulted);
}

#[test]
fn empty_trace_completes_immediately() {
    init_tracing();
    let buf = build_trace(&[]);
    let mut scheduler = scheduler_over(buf, ScriptedControl::new(), SchedulerConfig::new());
    let time = scheduler.run().expect("run");
    assert_eq!(time, FrameTime::ZERO);
    assert_eq!(scheduler.state(), ReplayState::Done);
}
