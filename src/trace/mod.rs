//! Append-only trace stream serialization.
//!
//! A trace stream is the ordered, persisted sequence of frames produced by
//! one recording session. It is written exactly once, sequentially, by a
//! single [`TraceWriter`]; it is read any number of times, by one or more
//! [`TraceReader`]s, without mutation.
//!
//! # Stream layout
//!
//! All integers are little-endian.
//!
//! - Header: magic `b"RTRC"`, format version `u32`, event-encoding version
//!   `u32`.
//! - Per frame: logical time `u32`, thread id `i32`, encoded event (8
//!   bytes), tick count `u64`, one flags byte, then the optional blocks the
//!   flags announce: the fixed register/perf block, and a `u32`
//!   length-prefixed extended-register block. A frame with neither presence
//!   flag set occupies exactly the fixed prefix.
//!
//! # Submodules
//!
//! - [`writer`]: append-only serializer with strict logical-time ordering
//! - [`reader`]: lazy forward deserializer with seek support
//! - [`index`]: side index of logical-time/offset checkpoints for seeking

pub mod index;
pub mod reader;
pub mod writer;

pub use index::TraceIndex;
pub use reader::{Frames, TraceReader};
pub use writer::{TraceSummary, TraceWriter, WriterConfig, DEFAULT_INDEX_INTERVAL};

use crate::frame::{PerfExtra, Registers};

/// Magic bytes opening every trace stream.
pub const TRACE_MAGIC: [u8; 4] = *b"RTRC";

/// Version of the stream framing itself.
pub const TRACE_FORMAT_VERSION: u32 = 1;

/// Size of the stream header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Size of the fixed per-frame prefix in bytes.
pub(crate) const FRAME_PREFIX_SIZE: usize = 4 + 4 + 8 + 8 + 1;

/// Size of the fixed execution-state block in bytes.
pub(crate) const EXEC_BLOCK_SIZE: usize = Registers::SERIALIZED_SIZE + PerfExtra::SERIALIZED_SIZE;

/// Presence flag: the frame carries the fixed register/perf block.
pub(crate) const FLAG_EXEC_STATE: u8 = 0b0000_0001;

/// Presence flag: the frame carries an extended-register block.
pub(crate) const FLAG_EXTRA_REGS: u8 = 0b0000_0010;

/// All defined flag bits; anything else in a stream is corruption.
pub(crate) const FLAG_MASK: u8 = FLAG_EXEC_STATE | FLAG_EXTRA_REGS;
