//! Significant-event model and its compact encoding.
//!
//! Every trace frame carries one significant event: the reason the recorder
//! stopped to take a frame at all. The set of event kinds is closed and
//! versioned; decoding a discriminant outside the set is a hard error, never
//! silently skipped, since an unknown event in a trace means the trace is
//! corrupt or from an incompatible recorder.
//!
//! The in-memory form is [`Event`], a tagged sum over the event kinds. The
//! on-stream form is [`EncodedEvent`], a fixed eight-byte tagged value. The
//! two are bijective: `encode` validates payload ranges up front and
//! `decode` is its exact inverse, so `decode(encode(e)) == e` for every
//! representable event.

use core::fmt;
use thiserror::Error;

/// Version of the event encoding scheme.
///
/// Bumped whenever a discriminant is added, removed, or its payload layout
/// changes. Stored in the trace stream header so readers can refuse traces
/// they cannot interpret.
pub const EVENT_ENCODING_VERSION: u32 = 1;

/// Highest signal number accepted by the encoder.
pub const MAX_SIGNAL: u8 = 64;

/// Highest syscall number accepted by the encoder.
pub const MAX_SYSCALL: u32 = u16::MAX as u32;

/// Event discriminants. Closed set; see [`EVENT_ENCODING_VERSION`].
mod discriminant {
    pub const SCHED: u8 = 1;
    pub const YIELD: u8 = 2;
    pub const SYSCALL: u8 = 3;
    pub const SIGNAL: u8 = 4;
    pub const THREAD_EXIT: u8 = 5;
    pub const TRACE: u8 = 6;
}

/// Flag bit in the encoded phase byte marking a syscall exit.
const FLAG_SYSCALL_EXIT: u8 = 0b0000_0001;

/// Errors from event encoding and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EventError {
    /// An event payload was outside the representable range at encode time.
    /// Rejected before any I/O; no silently-truncated bits are ever written.
    #[error("invalid {kind} event: {reason}")]
    InvalidEvent {
        /// Name of the event kind that failed validation.
        kind: &'static str,
        /// What was out of range.
        reason: &'static str,
    },

    /// A decoded discriminant is outside the closed kind set.
    #[error("unknown event discriminant {discriminant:#04x}")]
    UnknownEncoding {
        /// The unrecognized discriminant byte.
        discriminant: u8,
    },

    /// The discriminant is known but the phase or payload bits do not form
    /// a value the encoder could have produced.
    #[error("malformed payload for event discriminant {discriminant:#04x}")]
    MalformedPayload {
        /// The discriminant whose payload failed validation.
        discriminant: u8,
    },
}

/// Which side of a syscall the event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyscallPhase {
    /// Observed on entry, before the kernel runs the call.
    Entry,
    /// Observed on exit, after the kernel produced a result.
    Exit,
}

/// A significant execution event, in its rich in-memory form.
///
/// Consumption sites (encode, dump, replay effect application) match
/// exhaustively, so adding a kind is a compile-checked exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A scheduling-relevant context switch away from the thread.
    Sched,
    /// A deterministic-yield point the thread reached voluntarily.
    Yield,
    /// Syscall entry or exit.
    Syscall {
        /// Syscall number, validated against [`MAX_SYSCALL`].
        number: u32,
        /// Entry or exit side.
        phase: SyscallPhase,
    },
    /// Delivery of a signal to the thread.
    Signal {
        /// Signal number, validated against `1..=`[`MAX_SIGNAL`].
        signum: u8,
    },
    /// The thread exited.
    ThreadExit {
        /// Exit status as observed by the recorder.
        status: i32,
    },
    /// A deterministic user trace point with an opaque marker.
    Trace {
        /// Marker value chosen by the traced program.
        marker: u32,
    },
}

impl Event {
    /// Returns the stable name of this event's kind.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Sched => "SCHED",
            Self::Yield => "YIELD",
            Self::Syscall { .. } => "SYSCALL",
            Self::Signal { .. } => "SIGNAL",
            Self::ThreadExit { .. } => "THREAD_EXIT",
            Self::Trace { .. } => "TRACE",
        }
    }

    /// Encodes this event into its fixed-width on-stream form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidEvent`] if a payload field is outside its
    /// representable range.
    pub fn encode(&self) -> Result<EncodedEvent, EventError> {
        match *self {
            Self::Sched => Ok(EncodedEvent::raw(discriminant::SCHED, 0, 0)),
            Self::Yield => Ok(EncodedEvent::raw(discriminant::YIELD, 0, 0)),
            Self::Syscall { number, phase } => {
                if number > MAX_SYSCALL {
                    return Err(EventError::InvalidEvent {
                        kind: "SYSCALL",
                        reason: "syscall number out of range",
                    });
                }
                let flags = match phase {
                    SyscallPhase::Entry => 0,
                    SyscallPhase::Exit => FLAG_SYSCALL_EXIT,
                };
                Ok(EncodedEvent::raw(discriminant::SYSCALL, flags, number))
            }
            Self::Signal { signum } => {
                if signum == 0 || signum > MAX_SIGNAL {
                    return Err(EventError::InvalidEvent {
                        kind: "SIGNAL",
                        reason: "signal number out of range",
                    });
                }
                Ok(EncodedEvent::raw(
                    discriminant::SIGNAL,
                    0,
                    u32::from(signum),
                ))
            }
            Self::ThreadExit { status } => Ok(EncodedEvent::raw(
                discriminant::THREAD_EXIT,
                0,
                status as u32,
            )),
            Self::Trace { marker } => Ok(EncodedEvent::raw(discriminant::TRACE, 0, marker)),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Sched | Self::Yield => write!(f, "{}", self.kind_name()),
            Self::Syscall { number, phase } => {
                let side = match phase {
                    SyscallPhase::Entry => "entry",
                    SyscallPhase::Exit => "exit",
                };
                write!(f, "SYSCALL({number}) {side}")
            }
            Self::Signal { signum } => write!(f, "SIGNAL({signum})"),
            Self::ThreadExit { status } => write!(f, "THREAD_EXIT(status={status})"),
            Self::Trace { marker } => write!(f, "TRACE({marker})"),
        }
    }
}

/// The fixed-width on-stream form of an event.
///
/// Layout: one discriminant byte, one phase/flag byte, two reserved bytes
/// that must be zero, and a four-byte little-endian payload. Eight bytes in
/// every frame regardless of kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedEvent {
    discriminant: u8,
    flags: u8,
    payload: u32,
}

impl EncodedEvent {
    /// Serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = 8;

    const fn raw(discriminant: u8, flags: u8, payload: u32) -> Self {
        Self {
            discriminant,
            flags,
            payload,
        }
    }

    /// Returns the discriminant byte.
    #[must_use]
    pub const fn discriminant(self) -> u8 {
        self.discriminant
    }

    /// Returns the phase/flag byte.
    #[must_use]
    pub const fn flags(self) -> u8 {
        self.flags
    }

    /// Returns the payload word.
    #[must_use]
    pub const fn payload(self) -> u32 {
        self.payload
    }

    /// Serializes to the eight-byte on-stream form.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        bytes[0] = self.discriminant;
        bytes[1] = self.flags;
        // bytes[2..4] reserved, zero
        bytes[4..8].copy_from_slice(&self.payload.to_le_bytes());
        bytes
    }

    /// Parses the eight-byte on-stream form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEncoding`] for a discriminant outside the
    /// closed set, and [`EventError::MalformedPayload`] if the reserved bytes
    /// are non-zero.
    pub fn from_bytes(bytes: [u8; Self::SERIALIZED_SIZE]) -> Result<Self, EventError> {
        let discriminant = bytes[0];
        match discriminant {
            discriminant::SCHED
            | discriminant::YIELD
            | discriminant::SYSCALL
            | discriminant::SIGNAL
            | discriminant::THREAD_EXIT
            | discriminant::TRACE => {}
            other => return Err(EventError::UnknownEncoding {
                discriminant: other,
            }),
        }
        if bytes[2] != 0 || bytes[3] != 0 {
            return Err(EventError::MalformedPayload { discriminant });
        }
        let payload = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self::raw(discriminant, bytes[1], payload))
    }

    /// Decodes back into the rich in-memory form.
    ///
    /// Exact inverse of [`Event::encode`]. Any bit pattern the encoder could
    /// not have produced is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownEncoding`] for an unrecognized
    /// discriminant and [`EventError::MalformedPayload`] for phase or payload
    /// bits outside the encoder's range.
    pub fn decode(self) -> Result<Event, EventError> {
        let malformed = EventError::MalformedPayload {
            discriminant: self.discriminant,
        };
        match self.discriminant {
            discriminant::SCHED => {
                if self.flags != 0 || self.payload != 0 {
                    return Err(malformed);
                }
                Ok(Event::Sched)
            }
            discriminant::YIELD => {
                if self.flags != 0 || self.payload != 0 {
                    return Err(malformed);
                }
                Ok(Event::Yield)
            }
            discriminant::SYSCALL => {
                if self.flags & !FLAG_SYSCALL_EXIT != 0 || self.payload > MAX_SYSCALL {
                    return Err(malformed);
                }
                let phase = if self.flags & FLAG_SYSCALL_EXIT != 0 {
                    SyscallPhase::Exit
                } else {
                    SyscallPhase::Entry
                };
                Ok(Event::Syscall {
                    number: self.payload,
                    phase,
                })
            }
            discriminant::SIGNAL => {
                if self.flags != 0 || self.payload == 0 || self.payload > u32::from(MAX_SIGNAL) {
                    return Err(malformed);
                }
                Ok(Event::Signal {
                    signum: self.payload as u8,
                })
            }
            discriminant::THREAD_EXIT => {
                if self.flags != 0 {
                    return Err(malformed);
                }
                Ok(Event::ThreadExit {
                    status: self.payload as i32,
                })
            }
            discriminant::TRACE => {
                if self.flags != 0 {
                    return Err(malformed);
                }
                Ok(Event::Trace {
                    marker: self.payload,
                })
            }
            other => Err(EventError::UnknownEncoding {
                discriminant: other,
            }),
        }
    }
}
