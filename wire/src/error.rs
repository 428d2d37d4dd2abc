//! Error types for wire format operations.

use std::fmt;

use bitstream::BitError;

/// Result type for wire format operations.
pub type WireResult<T> = Result<T, DecodeError>;

/// High-level decode errors for wire framing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Message is too small to contain the required header.
    MessageTooSmall { actual: usize, required: usize },

    /// Invalid magic number in message header.
    InvalidMagic { found: u32 },

    /// Unsupported wire version.
    UnsupportedVersion { found: u16 },

    /// Unknown message kind.
    UnknownMessageKind { kind: u16 },

    /// Payload length mismatch.
    PayloadLengthMismatch { header_len: u32, actual_len: usize },

    /// A message kind that carries no payload had one.
    UnexpectedPayload { kind: u16, len: usize },

    /// Limits exceeded.
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },

    /// Section framing error.
    SectionFraming(SectionFramingError),

    /// Object block header could not be read.
    Block(BitError),

    /// Object block uses the reserved marker value.
    ReservedBlockMarker { handle: u32 },

    /// Padding at the end of a section body has set bits.
    TrailingBits { bits: usize },
}

/// Specific wire limits that can be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    MessageBytes,
    SectionCount,
    SectionLength,
}

/// Errors that can occur while framing sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionFramingError {
    InvalidVarint,
    Truncated { needed: usize, available: usize },
}

/// Errors that can occur during encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    BufferTooSmall { needed: usize, available: usize },
    LengthOverflow { length: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageTooSmall { actual, required } => {
                write!(
                    f,
                    "message too small: {actual} bytes, need at least {required}"
                )
            }
            Self::InvalidMagic { found } => {
                write!(f, "invalid magic number: 0x{found:08X}")
            }
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported wire version: {found}")
            }
            Self::UnknownMessageKind { kind } => {
                write!(f, "unknown message kind: {kind}")
            }
            Self::PayloadLengthMismatch {
                header_len,
                actual_len,
            } => {
                write!(
                    f,
                    "payload length mismatch: header {header_len} bytes but {actual_len} available"
                )
            }
            Self::UnexpectedPayload { kind, len } => {
                write!(f, "message kind {kind} must be empty, has {len} payload bytes")
            }
            Self::LimitsExceeded {
                kind,
                limit,
                actual,
            } => {
                write!(f, "{kind} limit exceeded: {actual} > {limit}")
            }
            Self::SectionFraming(err) => write!(f, "section framing error: {err}"),
            Self::Block(err) => write!(f, "object block error: {err}"),
            Self::ReservedBlockMarker { handle } => {
                write!(f, "object block for handle {handle} uses reserved marker")
            }
            Self::TrailingBits { bits } => {
                write!(f, "{bits} trailing bits are not zero padding")
            }
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MessageBytes => "message bytes",
            Self::SectionCount => "section count",
            Self::SectionLength => "section length",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for SectionFramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVarint => write!(f, "invalid varint"),
            Self::Truncated { needed, available } => {
                write!(
                    f,
                    "truncated section: need {needed} bytes, have {available}"
                )
            }
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed}, have {available}")
            }
            Self::LengthOverflow { length } => {
                write!(f, "length overflow: {length}")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Block(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<BitError> for DecodeError {
    fn from(err: BitError) -> Self {
        Self::Block(err)
    }
}
