//! Append-only trace serializer.
//!
//! The writer converts frames, delivered in strictly increasing logical-time
//! order, into the durable stream format described in the
//! [module docs](crate::trace). There is exactly one writer per stream for
//! the duration of a recording.
//!
//! Durability contract: every append serializes the whole record and flushes
//! before acknowledging, so the last acknowledged append is recoverable even
//! if the process terminates immediately afterward. There is no background
//! buffering that could hide a partial write behind a crash.

use std::io::Write;

use crate::error::TraceError;
use crate::frame::TraceFrame;
use crate::trace::index::TraceIndex;
use crate::trace::{
    FLAG_EXEC_STATE, FLAG_EXTRA_REGS, FRAME_PREFIX_SIZE, HEADER_SIZE, TRACE_FORMAT_VERSION,
    TRACE_MAGIC,
};
use crate::types::FrameTime;

/// Default number of frames between index checkpoints.
pub const DEFAULT_INDEX_INTERVAL: u64 = 64;

/// Configuration for a [`TraceWriter`].
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Number of frames between index checkpoints. An interval of 1 indexes
    /// every frame.
    pub index_interval: u64,
}

impl WriterConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            index_interval: DEFAULT_INDEX_INTERVAL,
        }
    }

    /// Sets the index checkpoint interval. Clamped to at least 1.
    #[must_use]
    pub const fn with_index_interval(mut self, interval: u64) -> Self {
        self.index_interval = if interval == 0 { 1 } else { interval };
        self
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a completed write session.
#[derive(Debug, Clone)]
pub struct TraceSummary {
    /// Number of frames written.
    pub frames: u64,
    /// Total stream length in bytes, header included.
    pub bytes: u64,
    /// Checkpoint index built during the session.
    pub index: TraceIndex,
}

/// Append-only serializer for one trace stream.
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    sink: W,
    last_time: Option<FrameTime>,
    offset: u64,
    frames_written: u64,
    index: TraceIndex,
    config: WriterConfig,
    faulted: bool,
}

impl<W: Write> TraceWriter<W> {
    /// Creates a writer and writes the stream header.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Io`] if the header cannot be written.
    pub fn new(sink: W) -> Result<Self, TraceError> {
        Self::with_config(sink, WriterConfig::new())
    }

    /// Creates a writer with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Io`] if the header cannot be written.
    pub fn with_config(mut sink: W, config: WriterConfig) -> Result<Self, TraceError> {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&TRACE_MAGIC);
        header[4..8].copy_from_slice(&TRACE_FORMAT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&crate::event::EVENT_ENCODING_VERSION.to_le_bytes());
        sink.write_all(&header)?;
        sink.flush()?;
        Ok(Self {
            sink,
            last_time: None,
            offset: HEADER_SIZE as u64,
            frames_written: 0,
            index: TraceIndex::new(),
            config,
            faulted: false,
        })
    }

    /// Appends one frame to the stream.
    ///
    /// Frames must arrive in strictly increasing logical-time order. The
    /// record is fully serialized and flushed before this returns.
    ///
    /// # Errors
    ///
    /// - [`TraceError::WriterFaulted`] if a previous append failed; the
    ///   writer is terminal once faulted.
    /// - [`TraceError::OutOfOrderFrame`] if the frame's logical time does
    ///   not exceed the last accepted frame's. Fatal to the write session.
    /// - [`TraceError::Io`] if the sink fails; the writer transitions to the
    ///   faulted state.
    pub fn append(&mut self, frame: &TraceFrame) -> Result<(), TraceError> {
        if self.faulted {
            return Err(TraceError::WriterFaulted);
        }
        if let Some(last) = self.last_time {
            if frame.time() <= last {
                self.faulted = true;
                return Err(TraceError::OutOfOrderFrame {
                    last,
                    attempted: frame.time(),
                });
            }
        }

        let record = serialize_frame(frame);
        if let Err(err) = self.sink.write_all(&record).and_then(|()| self.sink.flush()) {
            self.faulted = true;
            return Err(TraceError::Io(err));
        }

        if self.frames_written % self.config.index_interval == 0 {
            self.index.record(frame.time(), self.offset);
        }
        self.offset += record.len() as u64;
        self.frames_written += 1;
        self.last_time = Some(frame.time());
        Ok(())
    }

    /// Returns the number of frames written so far.
    #[must_use]
    pub const fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Returns the logical time of the last accepted frame.
    #[must_use]
    pub const fn last_time(&self) -> Option<FrameTime> {
        self.last_time
    }

    /// Returns true if the writer has entered the terminal faulted state.
    #[must_use]
    pub const fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Returns the checkpoint index built so far.
    #[must_use]
    pub const fn index(&self) -> &TraceIndex {
        &self.index
    }

    /// Finishes the session: flushes the sink and returns the summary.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::WriterFaulted`] if the session faulted; a
    /// partial stream is never reported as a completed one. Returns
    /// [`TraceError::Io`] if the final flush fails.
    pub fn finish(mut self) -> Result<TraceSummary, TraceError> {
        if self.faulted {
            return Err(TraceError::WriterFaulted);
        }
        self.sink.flush()?;
        Ok(TraceSummary {
            frames: self.frames_written,
            bytes: self.offset,
            index: self.index,
        })
    }
}

/// Serializes one frame into its on-stream record.
fn serialize_frame(frame: &TraceFrame) -> Vec<u8> {
    let extra_len = frame.extra_registers().map_or(0, |e| e.len());
    let mut record = Vec::with_capacity(
        FRAME_PREFIX_SIZE + crate::trace::EXEC_BLOCK_SIZE + 4 + extra_len,
    );
    record.extend_from_slice(&frame.time().as_u32().to_le_bytes());
    record.extend_from_slice(&frame.tid().as_raw().to_le_bytes());
    record.extend_from_slice(&frame.event().to_bytes());
    record.extend_from_slice(&frame.ticks().as_u64().to_le_bytes());

    let mut flags = 0u8;
    if frame.has_exec_state() {
        flags |= FLAG_EXEC_STATE;
    }
    if frame.extra_registers().is_some() {
        flags |= FLAG_EXTRA_REGS;
    }
    record.push(flags);

    if let Some(exec) = frame.exec_state() {
        record.extend_from_slice(&exec.registers().to_bytes());
        record.extend_from_slice(&exec.perf_extra().to_bytes());
    }
    if let Some(extra) = frame.extra_registers() {
        record.extend_from_slice(&(extra.len() as u32).to_le_bytes());
        record.extend_from_slice(extra.data());
    }
    record
}
