//! Sequential and random-access trace deserializer.
//!
//! The reader reconstructs frames from a stream previously produced by the
//! writer: a lazy, finite, forward sequence in written order, restartable
//! from the beginning, and positionable near a requested logical time with
//! [`TraceReader::seek`].
//!
//! The stream is one contiguous transaction: a truncated or malformed
//! record is reported as corruption, and the reader never guesses or skips
//! past it. Because a written stream is immutable, any number of independent
//! readers may consume it concurrently.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::TraceError;
use crate::event::EncodedEvent;
use crate::frame::{ExtraRegisters, PerfExtra, Registers, TraceFrame, MAX_EXTRA_REGISTERS_LEN};
use crate::trace::index::TraceIndex;
use crate::trace::writer::DEFAULT_INDEX_INTERVAL;
use crate::trace::{
    EXEC_BLOCK_SIZE, FLAG_EXEC_STATE, FLAG_EXTRA_REGS, FLAG_MASK, FRAME_PREFIX_SIZE, HEADER_SIZE,
    TRACE_FORMAT_VERSION, TRACE_MAGIC,
};
use crate::types::{FrameTime, ThreadId, Ticks};

const fn corrupt(offset: u64, reason: &'static str) -> TraceError {
    TraceError::CorruptTrace { offset, reason }
}

/// Reads `buf.len()` bytes unless EOF intervenes; returns the count read.
fn read_fully<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Sequential/seekable deserializer for one trace stream.
#[derive(Debug)]
pub struct TraceReader<R: Read + Seek> {
    source: R,
    offset: u64,
    last_time: Option<FrameTime>,
    index: TraceIndex,
    index_interval: u64,
    frames_scanned: u64,
    peeked: Option<TraceFrame>,
    corrupt: Option<(u64, &'static str)>,
}

impl<R: Read + Seek> TraceReader<R> {
    /// Opens a trace stream, validating its header.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::CorruptTrace`] for a short, mismatched, or
    /// incompatible header, and [`TraceError::Io`] for source failures.
    pub fn new(source: R) -> Result<Self, TraceError> {
        Self::with_index(source, TraceIndex::new())
    }

    /// Opens a trace stream with a previously built checkpoint index
    /// (typically the writer's, from [`TraceSummary`](crate::trace::TraceSummary)).
    ///
    /// # Errors
    ///
    /// Same as [`TraceReader::new`].
    pub fn with_index(mut source: R, index: TraceIndex) -> Result<Self, TraceError> {
        let mut header = [0u8; HEADER_SIZE];
        let n = read_fully(&mut source, &mut header)?;
        if n < HEADER_SIZE {
            return Err(corrupt(0, "truncated stream header"));
        }
        if header[0..4] != TRACE_MAGIC {
            return Err(corrupt(0, "bad stream magic"));
        }
        let format = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if format != TRACE_FORMAT_VERSION {
            return Err(corrupt(0, "unsupported stream format version"));
        }
        let event_version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if event_version != crate::event::EVENT_ENCODING_VERSION {
            return Err(corrupt(0, "unsupported event encoding version"));
        }
        Ok(Self {
            source,
            offset: HEADER_SIZE as u64,
            last_time: None,
            index,
            index_interval: DEFAULT_INDEX_INTERVAL,
            frames_scanned: 0,
            peeked: None,
            corrupt: None,
        })
    }

    /// Returns the next frame, or `None` at a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::CorruptTrace`] for a record that is truncated,
    /// carries undefined flag bits, fails event decoding, or breaks the
    /// strictly-increasing logical-time invariant. Corruption is terminal for
    /// the read session: every subsequent call repeats the same error rather
    /// than resuming at a misaligned offset, until [`rewind`](Self::rewind).
    pub fn next_frame(&mut self) -> Result<Option<TraceFrame>, TraceError> {
        if let Some(frame) = self.peeked.take() {
            return Ok(Some(frame));
        }
        self.read_record()
    }

    /// Restarts the reader at the first frame, clearing any latched
    /// corruption.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Io`] if the source cannot be repositioned.
    pub fn rewind(&mut self) -> Result<(), TraceError> {
        self.source.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        self.offset = HEADER_SIZE as u64;
        self.last_time = None;
        self.frames_scanned = 0;
        self.peeked = None;
        self.corrupt = None;
        Ok(())
    }

    /// Positions the reader at the first frame with logical time ≥ `time`.
    ///
    /// Uses the nearest earlier index checkpoint when one is available;
    /// otherwise degrades to a linear scan from the start of the stream. If
    /// every frame's time is below `time`, the reader is left at end of
    /// stream and the next read returns `None`.
    ///
    /// # Errors
    ///
    /// Propagates the same errors as [`TraceReader::next_frame`]. A latched
    /// corruption error persists across seeks; only a rewind clears it.
    pub fn seek(&mut self, time: FrameTime) -> Result<(), TraceError> {
        self.peeked = None;
        let start = match self.index.nearest_at_or_before(time) {
            Some((_, offset)) => offset,
            None => HEADER_SIZE as u64,
        };
        self.source.seek(SeekFrom::Start(start))?;
        self.offset = start;
        self.last_time = None;
        self.frames_scanned = 0;
        loop {
            match self.read_record()? {
                None => return Ok(()),
                Some(frame) if frame.time() >= time => {
                    self.peeked = Some(frame);
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    /// Returns an iterator over the remaining frames.
    pub fn frames(&mut self) -> Frames<'_, R> {
        Frames { reader: self }
    }

    /// Returns the checkpoint index, including checkpoints grown while
    /// scanning.
    #[must_use]
    pub const fn index(&self) -> &TraceIndex {
        &self.index
    }

    /// Returns the logical time of the most recently parsed frame.
    #[must_use]
    pub const fn last_time(&self) -> Option<FrameTime> {
        self.last_time
    }

    fn read_record(&mut self) -> Result<Option<TraceFrame>, TraceError> {
        if let Some((offset, reason)) = self.corrupt {
            return Err(corrupt(offset, reason));
        }
        match self.parse_record() {
            Err(TraceError::CorruptTrace { offset, reason }) => {
                self.corrupt = Some((offset, reason));
                Err(corrupt(offset, reason))
            }
            other => other,
        }
    }

    fn parse_record(&mut self) -> Result<Option<TraceFrame>, TraceError> {
        let start = self.offset;
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        let n = read_fully(&mut self.source, &mut prefix)?;
        if n == 0 {
            return Ok(None);
        }
        if n < FRAME_PREFIX_SIZE {
            return Err(corrupt(start, "truncated frame header"));
        }

        let time = FrameTime::new(u32::from_le_bytes([
            prefix[0], prefix[1], prefix[2], prefix[3],
        ]));
        let tid = ThreadId::new(i32::from_le_bytes([
            prefix[4], prefix[5], prefix[6], prefix[7],
        ]));
        let mut event_bytes = [0u8; EncodedEvent::SERIALIZED_SIZE];
        event_bytes.copy_from_slice(&prefix[8..16]);
        let event = EncodedEvent::from_bytes(event_bytes)
            .map_err(|_| corrupt(start, "malformed event encoding"))?;
        // Full payload validation up front; the scheduler relies on frames
        // from a reader decoding cleanly.
        event
            .decode()
            .map_err(|_| corrupt(start, "malformed event payload"))?;
        let ticks = Ticks::new(u64::from_le_bytes([
            prefix[16], prefix[17], prefix[18], prefix[19], prefix[20], prefix[21], prefix[22],
            prefix[23],
        ]));
        let flags = prefix[24];
        if flags & !FLAG_MASK != 0 {
            return Err(corrupt(start, "undefined frame flag bits"));
        }
        if flags & FLAG_EXTRA_REGS != 0 && flags & FLAG_EXEC_STATE == 0 {
            return Err(corrupt(start, "extended registers without execution state"));
        }
        if let Some(last) = self.last_time {
            if time <= last {
                return Err(corrupt(start, "non-monotonic logical time"));
            }
        }

        let mut frame = TraceFrame::from_encoded(time, tid, event, ticks);
        let mut consumed = FRAME_PREFIX_SIZE as u64;

        if flags & FLAG_EXEC_STATE != 0 {
            let mut block = [0u8; EXEC_BLOCK_SIZE];
            let n = read_fully(&mut self.source, &mut block)?;
            if n < EXEC_BLOCK_SIZE {
                return Err(corrupt(start, "truncated execution-state block"));
            }
            let mut reg_bytes = [0u8; Registers::SERIALIZED_SIZE];
            reg_bytes.copy_from_slice(&block[..Registers::SERIALIZED_SIZE]);
            let mut perf_bytes = [0u8; PerfExtra::SERIALIZED_SIZE];
            perf_bytes.copy_from_slice(&block[Registers::SERIALIZED_SIZE..]);
            consumed += EXEC_BLOCK_SIZE as u64;

            let extra_regs = if flags & FLAG_EXTRA_REGS != 0 {
                let mut len_bytes = [0u8; 4];
                let n = read_fully(&mut self.source, &mut len_bytes)?;
                if n < 4 {
                    return Err(corrupt(start, "truncated extended-register length"));
                }
                let len = u32::from_le_bytes(len_bytes) as usize;
                if len > MAX_EXTRA_REGISTERS_LEN {
                    return Err(corrupt(start, "implausible extended-register length"));
                }
                let mut data = vec![0u8; len];
                let n = read_fully(&mut self.source, &mut data)?;
                if n < len {
                    return Err(corrupt(start, "truncated extended-register block"));
                }
                consumed += 4 + len as u64;
                Some(
                    ExtraRegisters::new(data)
                        .map_err(|_| corrupt(start, "implausible extended-register length"))?,
                )
            } else {
                None
            };

            frame
                .attach_exec_state(
                    Registers::from_bytes(&reg_bytes),
                    PerfExtra::from_bytes(&perf_bytes),
                    extra_regs,
                )
                .map_err(|_| corrupt(start, "inconsistent execution-state block"))?;
        }

        if self.frames_scanned % self.index_interval == 0 {
            self.index.record(time, start);
        }
        self.frames_scanned += 1;
        self.offset = start + consumed;
        self.last_time = Some(time);
        Ok(Some(frame))
    }
}

/// Iterator over the remaining frames of a reader.
#[derive(Debug)]
pub struct Frames<'a, R: Read + Seek> {
    reader: &'a mut TraceReader<R>,
}

impl<R: Read + Seek> Iterator for Frames<'_, R> {
    type Item = Result<TraceFrame, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_frame().transpose()
    }
}
