//! Recording-side driver for the trace stream.
//!
//! The recorder sits between the process-control collaborator, which
//! observes significant events in the traced program, and the
//! [`TraceWriter`](crate::trace::TraceWriter), which persists them. It owns
//! the process-wide logical clock: each observed event is stamped with the
//! next logical time, building the total order that replay later reproduces.
//!
//! Although the traced program is multi-threaded, the recorder serializes
//! events onto a single logical timeline; the observation path is guarded by
//! one lock, so calls may arrive from any observing thread.
//!
//! A recording-side error stops the recorder permanently: a partial or
//! incorrect trace is worse than no trace, so nothing is ever silently
//! dropped or retried.

use std::io::Write;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::TraceError;
use crate::event::Event;
use crate::frame::{ExtraRegisters, PerfExtra, Registers, TraceFrame};
use crate::trace::writer::{TraceSummary, TraceWriter, WriterConfig};
use crate::types::{FrameTime, ThreadId, Ticks};

#[derive(Debug)]
struct RecorderInner<W: Write> {
    writer: TraceWriter<W>,
    time: FrameTime,
    stopped: bool,
}

/// Serializing recorder for one recording session.
///
/// Methods take `&self`; the observation path is serialized internally so
/// event observation is always ordered relative to trace appends.
#[derive(Debug)]
pub struct TraceRecorder<W: Write> {
    inner: Mutex<RecorderInner<W>>,
}

impl<W: Write> TraceRecorder<W> {
    /// Creates a recorder writing to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Io`] if the stream header cannot be written.
    pub fn new(sink: W) -> Result<Self, TraceError> {
        Self::with_config(sink, WriterConfig::new())
    }

    /// Creates a recorder with a custom writer configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Io`] if the stream header cannot be written.
    pub fn with_config(sink: W, config: WriterConfig) -> Result<Self, TraceError> {
        Ok(Self {
            inner: Mutex::new(RecorderInner {
                writer: TraceWriter::with_config(sink, config)?,
                time: FrameTime::ZERO,
                stopped: false,
            }),
        })
    }

    /// Records an event without execution state.
    ///
    /// Returns the logical time assigned to the frame.
    ///
    /// # Errors
    ///
    /// Any encode or write failure stops the recorder and is returned to the
    /// caller; subsequent calls fail with [`TraceError::WriterFaulted`].
    pub fn record(
        &self,
        tid: ThreadId,
        event: &Event,
        ticks: Ticks,
    ) -> Result<FrameTime, TraceError> {
        self.record_inner(tid, event, ticks, None)
    }

    /// Records an event together with its execution-state snapshot.
    ///
    /// Returns the logical time assigned to the frame.
    ///
    /// # Errors
    ///
    /// Same as [`TraceRecorder::record`].
    pub fn record_with_state(
        &self,
        tid: ThreadId,
        event: &Event,
        ticks: Ticks,
        regs: Registers,
        perf: PerfExtra,
        extra_regs: Option<ExtraRegisters>,
    ) -> Result<FrameTime, TraceError> {
        self.record_inner(tid, event, ticks, Some((regs, perf, extra_regs)))
    }

    fn record_inner(
        &self,
        tid: ThreadId,
        event: &Event,
        ticks: Ticks,
        state: Option<(Registers, PerfExtra, Option<ExtraRegisters>)>,
    ) -> Result<FrameTime, TraceError> {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Err(TraceError::WriterFaulted);
        }
        match Self::build_and_append(&mut inner, tid, event, ticks, state) {
            Ok(time) => Ok(time),
            Err(err) => {
                inner.stopped = true;
                warn!(tid = tid.as_raw(), error = %err, "recording stopped");
                Err(err)
            }
        }
    }

    fn build_and_append(
        inner: &mut RecorderInner<W>,
        tid: ThreadId,
        event: &Event,
        ticks: Ticks,
        state: Option<(Registers, PerfExtra, Option<ExtraRegisters>)>,
    ) -> Result<FrameTime, TraceError> {
        let time = inner.time.next().ok_or(TraceError::ClockExhausted)?;
        let mut frame = TraceFrame::new(time, tid, event, ticks)?;
        if let Some((regs, perf, extra_regs)) = state {
            frame.attach_exec_state(regs, perf, extra_regs)?;
        }
        inner.writer.append(&frame)?;
        inner.time = time;
        Ok(time)
    }

    /// Returns the number of frames recorded so far.
    #[must_use]
    pub fn frames_recorded(&self) -> u64 {
        self.inner.lock().writer.frames_written()
    }

    /// Returns true if a recording-side error stopped the session.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Finishes the session and returns the stream summary.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::WriterFaulted`] if the session was stopped by a
    /// recording-side error, so a partial trace never masquerades as a
    /// completed one. Returns [`TraceError::Io`] if the final flush fails.
    pub fn finish(self) -> Result<TraceSummary, TraceError> {
        let inner = self.inner.into_inner();
        if inner.stopped {
            return Err(TraceError::WriterFaulted);
        }
        inner.writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::reader::TraceReader;
    use std::io::{self, Cursor};

    #[test]
    fn assigns_strictly_increasing_times_starting_at_one() {
        let recorder = TraceRecorder::new(Vec::new()).expect("recorder");
        let t1 = recorder
            .record(ThreadId::new(1), &Event::Sched, Ticks::new(10))
            .expect("record");
        let t2 = recorder
            .record(ThreadId::new(2), &Event::Yield, Ticks::new(5))
            .expect("record");
        assert_eq!(t1, FrameTime::new(1));
        assert_eq!(t2, FrameTime::new(2));
        assert_eq!(recorder.frames_recorded(), 2);
    }

    #[test]
    fn recorded_stream_reads_back() {
        let mut buf = Vec::new();
        {
            let recorder = TraceRecorder::new(&mut buf).expect("recorder");
            recorder
                .record(ThreadId::new(7), &Event::Sched, Ticks::new(1))
                .expect("record");
            recorder
                .record_with_state(
                    ThreadId::new(7),
                    &Event::Signal { signum: 9 },
                    Ticks::new(2),
                    Registers::zeroed(),
                    PerfExtra::default(),
                    None,
                )
                .expect("record");
            recorder.finish().expect("finish");
        }
        let mut reader = TraceReader::new(Cursor::new(buf)).expect("reader");
        let first = reader.next_frame().expect("read").expect("frame");
        assert_eq!(first.time(), FrameTime::new(1));
        assert!(!first.has_exec_state());
        let second = reader.next_frame().expect("read").expect("frame");
        assert_eq!(second.time(), FrameTime::new(2));
        assert!(second.has_exec_state());
        assert!(reader.next_frame().expect("eof").is_none());
    }

    #[test]
    fn encode_failure_stops_the_recorder() {
        let recorder = TraceRecorder::new(Vec::new()).expect("recorder");
        let err = recorder
            .record(ThreadId::new(1), &Event::Signal { signum: 0 }, Ticks::ZERO)
            .unwrap_err();
        assert!(matches!(err, TraceError::InvalidEvent(_)));
        assert!(recorder.is_stopped());
        let err = recorder
            .record(ThreadId::new(1), &Event::Sched, Ticks::ZERO)
            .unwrap_err();
        assert!(matches!(err, TraceError::WriterFaulted));
    }

    #[test]
    fn finish_on_a_stopped_recorder_is_refused() {
        let recorder = TraceRecorder::new(Vec::new()).expect("recorder");
        recorder
            .record(ThreadId::new(1), &Event::Signal { signum: 0 }, Ticks::ZERO)
            .unwrap_err();
        assert!(recorder.is_stopped());
        assert!(matches!(
            recorder.finish().unwrap_err(),
            TraceError::WriterFaulted
        ));
    }

    /// Sink that fails after the header.
    struct FullSink {
        written: usize,
    }

    impl io::Write for FullSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written >= crate::trace::HEADER_SIZE {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "full"));
            }
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_stops_the_recorder() {
        let recorder = TraceRecorder::new(FullSink { written: 0 }).expect("recorder");
        let err = recorder
            .record(ThreadId::new(1), &Event::Sched, Ticks::ZERO)
            .unwrap_err();
        assert!(matches!(err, TraceError::Io(_)));
        assert!(recorder.is_stopped());
    }
}
