//! Object block headers inside a list section body.
//!
//! A section body is a bit-packed run of blocks, each starting with the object
//! handle and a 2-bit marker:
//!
//! | marker | meaning | extra                 |
//! |--------|---------|-----------------------|
//! | 0      | reserved| decode error          |
//! | 1      | create  | `varu32` type id      |
//! | 2      | destroy | none                  |
//! | 3      | update  | none                  |
//!
//! Create and update blocks are followed by field payloads the codec writes.

use bitstream::{BitReader, BitWriter};

use crate::error::{DecodeError, WireResult};

const MARKER_BITS: u8 = 2;
const MARKER_CREATE: u64 = 1;
const MARKER_DESTROY: u64 = 2;
const MARKER_UPDATE: u64 = 3;

/// What a block does to the object it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Object appears; its full state follows.
    Create { type_id: u32 },
    /// Object is gone.
    Destroy,
    /// Changed fields follow as a delta.
    Update,
}

/// Block header: handle plus kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub handle: u32,
    pub kind: BlockKind,
}

impl BlockHeader {
    #[must_use]
    pub const fn create(handle: u32, type_id: u32) -> Self {
        Self {
            handle,
            kind: BlockKind::Create { type_id },
        }
    }

    #[must_use]
    pub const fn destroy(handle: u32) -> Self {
        Self {
            handle,
            kind: BlockKind::Destroy,
        }
    }

    #[must_use]
    pub const fn update(handle: u32) -> Self {
        Self {
            handle,
            kind: BlockKind::Update,
        }
    }

    /// Writes the header at the writer's current bit position.
    pub fn write(&self, writer: &mut BitWriter) {
        writer.write_varu32(self.handle);
        let marker = match self.kind {
            BlockKind::Create { .. } => MARKER_CREATE,
            BlockKind::Destroy => MARKER_DESTROY,
            BlockKind::Update => MARKER_UPDATE,
        };
        for shift in (0..MARKER_BITS).rev() {
            writer.write_bool((marker >> shift) & 1 == 1);
        }
        if let BlockKind::Create { type_id } = self.kind {
            writer.write_varu32(type_id);
        }
    }

    /// Reads a header at the reader's current bit position.
    pub fn read(reader: &mut BitReader<'_>) -> WireResult<Self> {
        let handle = reader.read_varu32()?;
        let kind = match reader.read_bits(MARKER_BITS)? {
            MARKER_CREATE => BlockKind::Create {
                type_id: reader.read_varu32()?,
            },
            MARKER_DESTROY => BlockKind::Destroy,
            MARKER_UPDATE => BlockKind::Update,
            _ => return Err(DecodeError::ReservedBlockMarker { handle }),
        };
        Ok(Self { handle, kind })
    }
}

/// Returns whether another block follows in a section body.
///
/// Fewer than eight remaining bits are byte padding and must be zero.
pub fn body_has_more(reader: &mut BitReader<'_>) -> WireResult<bool> {
    let remaining = reader.bits_remaining();
    if remaining >= 8 {
        return Ok(true);
    }
    if remaining > 0 {
        let bits = u8::try_from(remaining).unwrap_or(u8::MAX);
        if reader.read_bits(bits)? != 0 {
            return Err(DecodeError::TrailingBits { bits: remaining });
        }
    }
    Ok(false)
}
