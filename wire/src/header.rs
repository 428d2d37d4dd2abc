//! Message header types and constants.

use crate::error::DecodeError;

/// Magic number identifying netobj messages.
///
/// This value is fixed and must never change across versions.
pub const MAGIC: u32 = 0x4E4F_424A; // "NOBJ" in ASCII

/// Current wire format version.
pub const VERSION: u16 = 1;

/// Header size in bytes (24 total).
pub const HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 4 + 4;

/// What a message carries.
///
/// An unknown kind means the peers disagree on the protocol and is fatal for
/// the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// Registry description sent once on connect.
    Registry = 1,
    /// Object list sections for one tick.
    Frame = 2,
    /// Receiver acknowledgement of a frame sequence (no payload).
    Ack = 3,
}

impl MessageKind {
    /// Parses a message kind from its raw value.
    pub const fn parse(raw: u16) -> Result<Self, DecodeError> {
        match raw {
            1 => Ok(Self::Registry),
            2 => Ok(Self::Frame),
            3 => Ok(Self::Ack),
            _ => Err(DecodeError::UnknownMessageKind { kind: raw }),
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self as u16
    }
}

/// Message header.
///
/// This struct represents the header fields *after* the magic number.
/// The magic number is validated separately during decoding and is not
/// stored in this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Wire format version.
    pub version: u16,
    /// Message kind.
    pub kind: MessageKind,
    /// Registry hash for compatibility checking.
    pub registry_hash: u64,
    /// Frame sequence (for acks, the acknowledged frame).
    pub sequence: u32,
    /// Payload length in bytes.
    pub payload_len: u32,
}

impl MessageHeader {
    /// Creates a header for a registry description message.
    #[must_use]
    pub const fn registry(registry_hash: u64, payload_len: u32) -> Self {
        Self {
            version: VERSION,
            kind: MessageKind::Registry,
            registry_hash,
            sequence: 0,
            payload_len,
        }
    }

    /// Creates a header for a frame message.
    #[must_use]
    pub const fn frame(registry_hash: u64, sequence: u32, payload_len: u32) -> Self {
        Self {
            version: VERSION,
            kind: MessageKind::Frame,
            registry_hash,
            sequence,
            payload_len,
        }
    }

    /// Creates a header acknowledging frame `sequence`.
    #[must_use]
    pub const fn ack(registry_hash: u64, sequence: u32) -> Self {
        Self {
            version: VERSION,
            kind: MessageKind::Ack,
            registry_hash,
            sequence,
            payload_len: 0,
        }
    }
}
