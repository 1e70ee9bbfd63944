//! Trace frames and the execution-state snapshots they carry.
//!
//! A [`TraceFrame`] is one record of the trace: logical time, thread id,
//! encoded event, and the thread's tick count at the moment the event was
//! observed. During recording a frame is built per significant event; during
//! replay a frame describes the next state the scheduler must drive the
//! target into.
//!
//! Frames that need exact state to reconstruct their event also carry an
//! execution-state block: the fixed general register file plus
//! performance-counter auxiliary values, and separately an optional
//! variable-length extended register snapshot. The extended snapshot is kept
//! out of the fixed block because most frames never need it.

use core::fmt;

use crate::error::TraceError;
use crate::event::{EncodedEvent, Event, EventError};
use crate::types::{FrameTime, ThreadId, Ticks};

/// Number of `u64` slots in the general register snapshot: sixteen general
/// purpose registers, the instruction pointer, and the flags word.
pub const GENERAL_REGISTER_SLOTS: usize = 18;

/// Slot index of the instruction pointer within [`Registers`].
pub const REG_SLOT_IP: usize = 16;

/// Slot index of the flags word within [`Registers`].
pub const REG_SLOT_FLAGS: usize = 17;

/// Upper bound on the extended register snapshot length, in bytes.
///
/// Generous for any vector/FPU save area; a length prefix beyond this in a
/// stream is treated as corruption rather than an allocation request.
pub const MAX_EXTRA_REGISTERS_LEN: usize = 1 << 20;

/// Fixed-size general register snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    slots: [u64; GENERAL_REGISTER_SLOTS],
}

impl Registers {
    /// Serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = GENERAL_REGISTER_SLOTS * 8;

    /// Creates a snapshot from raw slot values.
    #[must_use]
    pub const fn new(slots: [u64; GENERAL_REGISTER_SLOTS]) -> Self {
        Self { slots }
    }

    /// An all-zero snapshot.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            slots: [0; GENERAL_REGISTER_SLOTS],
        }
    }

    /// Returns all slots.
    #[must_use]
    pub const fn slots(&self) -> &[u64; GENERAL_REGISTER_SLOTS] {
        &self.slots
    }

    /// Returns the instruction pointer.
    #[must_use]
    pub const fn ip(&self) -> u64 {
        self.slots[REG_SLOT_IP]
    }

    /// Returns the flags word.
    #[must_use]
    pub const fn flags(&self) -> u64 {
        self.slots[REG_SLOT_FLAGS]
    }

    /// Serializes to little-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        for (i, slot) in self.slots.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&slot.to_le_bytes());
        }
        bytes
    }

    /// Parses from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SERIALIZED_SIZE]) -> Self {
        let mut slots = [0u64; GENERAL_REGISTER_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *slot = u64::from_le_bytes(word);
        }
        Self { slots }
    }
}

/// Performance-counter auxiliary values captured alongside the register file.
///
/// Present whenever a frame carries execution state at all. These are
/// diagnostic companions to the tick count: when replay diverges they tell
/// apart counter drift from genuine nondeterminism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerfExtra {
    /// Page faults taken by the thread so far.
    pub page_faults: u64,
    /// Hardware interrupts delivered to the thread so far.
    pub hw_interrupts: u64,
    /// Instructions retired by the thread so far.
    pub instructions_retired: u64,
}

impl PerfExtra {
    /// Serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = 24;

    /// Serializes to little-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        bytes[0..8].copy_from_slice(&self.page_faults.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.hw_interrupts.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.instructions_retired.to_le_bytes());
        bytes
    }

    /// Parses from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SERIALIZED_SIZE]) -> Self {
        let word = |range: core::ops::Range<usize>| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&bytes[range]);
            u64::from_le_bytes(w)
        };
        Self {
            page_faults: word(0..8),
            hw_interrupts: word(8..16),
            instructions_retired: word(16..24),
        }
    }
}

/// Variable-length extended (vector/FPU-class) register snapshot.
///
/// Modeled as an owned byte snapshot rather than a raw length-prefixed
/// buffer; presence is expressed at the frame level as
/// `Option<ExtraRegisters>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraRegisters {
    data: Vec<u8>,
}

impl ExtraRegisters {
    /// Wraps captured extended-register bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::ExtraRegistersTooLarge`] when the snapshot
    /// exceeds [`MAX_EXTRA_REGISTERS_LEN`].
    pub fn new(data: Vec<u8>) -> Result<Self, TraceError> {
        if data.len() > MAX_EXTRA_REGISTERS_LEN {
            return Err(TraceError::ExtraRegistersTooLarge { len: data.len() });
        }
        Ok(Self { data })
    }

    /// Returns the snapshot bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the snapshot length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The fixed part of a frame's execution-state block: general registers plus
/// performance-counter auxiliary values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecState {
    regs: Registers,
    perf: PerfExtra,
}

impl ExecState {
    /// Creates an execution-state block.
    #[must_use]
    pub const fn new(regs: Registers, perf: PerfExtra) -> Self {
        Self { regs, perf }
    }

    /// Returns the general register snapshot.
    #[must_use]
    pub const fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Returns the performance-counter auxiliary values.
    #[must_use]
    pub const fn perf_extra(&self) -> &PerfExtra {
        &self.perf
    }
}

/// One record of the trace stream.
///
/// A frame is a value: constructed by the recording path at the moment an
/// event is observed, serialized once, and immutable from then on. On replay
/// it is reconstructed fresh from the stream and discarded after the
/// scheduler consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    time: FrameTime,
    tid: ThreadId,
    event: EncodedEvent,
    ticks: Ticks,
    exec: Option<ExecState>,
    // Variable length and usually absent, so kept out of ExecState.
    extra_regs: Option<ExtraRegisters>,
}

impl TraceFrame {
    /// Constructs a frame from a rich event, encoding it.
    ///
    /// Pure value construction: no I/O, no validation beyond what the event
    /// encoder performs.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidEvent`] if the event payload is out of
    /// range.
    pub fn new(
        time: FrameTime,
        tid: ThreadId,
        event: &Event,
        ticks: Ticks,
    ) -> Result<Self, EventError> {
        Ok(Self::from_encoded(time, tid, event.encode()?, ticks))
    }

    /// Constructs a frame from an already-encoded event.
    #[must_use]
    pub const fn from_encoded(
        time: FrameTime,
        tid: ThreadId,
        event: EncodedEvent,
        ticks: Ticks,
    ) -> Self {
        Self {
            time,
            tid,
            event,
            ticks,
            exec: None,
            extra_regs: None,
        }
    }

    /// Attaches the optional execution-state block.
    ///
    /// Callable at most once with a given set of values. Re-attachment is
    /// permitted only when it repeats the already-attached values exactly
    /// (process-control may gather the fields progressively and re-deliver
    /// them); conflicting values are rejected. An extended-register snapshot
    /// may be added by a later attachment, but an already-attached one may
    /// not be replaced.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::ConflictingExecState`] if a differing block is
    /// already attached.
    pub fn attach_exec_state(
        &mut self,
        regs: Registers,
        perf: PerfExtra,
        extra_regs: Option<ExtraRegisters>,
    ) -> Result<(), TraceError> {
        let incoming = ExecState::new(regs, perf);
        if let Some(existing) = &self.exec {
            if *existing != incoming {
                return Err(TraceError::ConflictingExecState);
            }
            match (&self.extra_regs, extra_regs) {
                (_, None) => {}
                (None, Some(extra)) => self.extra_regs = Some(extra),
                (Some(existing_extra), Some(extra)) => {
                    if *existing_extra != extra {
                        return Err(TraceError::ConflictingExecState);
                    }
                }
            }
            return Ok(());
        }
        self.exec = Some(incoming);
        self.extra_regs = extra_regs;
        Ok(())
    }

    /// Returns the frame's logical time.
    #[must_use]
    pub const fn time(&self) -> FrameTime {
        self.time
    }

    /// Returns the recorded thread id.
    #[must_use]
    pub const fn tid(&self) -> ThreadId {
        self.tid
    }

    /// Returns the encoded event.
    #[must_use]
    pub const fn event(&self) -> EncodedEvent {
        self.event
    }

    /// Returns the thread's tick count at the event.
    #[must_use]
    pub const fn ticks(&self) -> Ticks {
        self.ticks
    }

    /// Returns the execution-state block, if the frame carries one.
    #[must_use]
    pub const fn exec_state(&self) -> Option<&ExecState> {
        self.exec.as_ref()
    }

    /// Returns the general register snapshot, if present.
    #[must_use]
    pub fn registers(&self) -> Option<&Registers> {
        self.exec.as_ref().map(ExecState::registers)
    }

    /// Returns the performance-counter auxiliary values, if present.
    #[must_use]
    pub fn perf_extra(&self) -> Option<&PerfExtra> {
        self.exec.as_ref().map(ExecState::perf_extra)
    }

    /// Returns the extended register snapshot, if present.
    #[must_use]
    pub const fn extra_registers(&self) -> Option<&ExtraRegisters> {
        self.extra_regs.as_ref()
    }

    /// Returns true if the frame carries an execution-state block.
    #[must_use]
    pub const fn has_exec_state(&self) -> bool {
        self.exec.is_some()
    }

    /// Writes a human-oriented rendering of the frame.
    ///
    /// Field labels and the decoded event name, ending with a newline. The
    /// record's closing `}` is deliberately omitted so a caller composing a
    /// larger structured log can append further fields before closing it.
    ///
    /// # Errors
    ///
    /// Propagates formatter errors.
    pub fn dump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out, "{{")?;
        write!(out, "  time: {}, tid: {}, ticks: {}", self.time, self.tid.as_raw(), self.ticks)?;
        match self.event.decode() {
            Ok(event) => writeln!(out, ", event: `{event}`")?,
            Err(_) => writeln!(
                out,
                ", event: `<unknown {:#04x}>`",
                self.event.discriminant()
            )?,
        }
        if let Some(exec) = &self.exec {
            writeln!(
                out,
                "  regs: ip={:#x} flags={:#x}",
                exec.registers().ip(),
                exec.registers().flags()
            )?;
            let perf = exec.perf_extra();
            writeln!(
                out,
                "  perf: faults={} hw_interrupts={} insns={}",
                perf.page_faults, perf.hw_interrupts, perf.instructions_retired
            )?;
        }
        if let Some(extra) = &self.extra_regs {
            writeln!(out, "  extra_regs: {} bytes", extra.len())?;
        }
        Ok(())
    }

    /// Writes a strict machine-parseable rendering of the frame.
    ///
    /// One line, space-separated scalar fields in stable order with no
    /// elisions:
    /// `time tid ticks discriminant flags payload has_exec has_extra`
    /// followed by every register slot and perf value when the execution
    /// state is present, then the extended-register byte length. Ends with a
    /// newline; like [`dump`](Self::dump), no closing delimiter is emitted.
    ///
    /// # Errors
    ///
    /// Propagates formatter errors.
    pub fn dump_raw(&self, out: &mut impl fmt::Write) -> fmt::Result {
        write!(
            out,
            "{} {} {} {} {} {} {} {}",
            self.time,
            self.tid.as_raw(),
            self.ticks,
            self.event.discriminant(),
            self.event.flags(),
            self.event.payload(),
            u8::from(self.exec.is_some()),
            u8::from(self.extra_regs.is_some()),
        )?;
        if let Some(exec) = &self.exec {
            for slot in exec.registers().slots() {
                write!(out, " {slot:#x}")?;
            }
            let perf = exec.perf_extra();
            write!(
                out,
                " {} {} {}",
                perf.page_faults, perf.hw_interrupts, perf.instructions_retired
            )?;
        }
        let extra_len = self.extra_regs.as_ref().map_or(0, ExtraRegisters::len);
        writeln!(out, " {extra_len}")
    }
}
