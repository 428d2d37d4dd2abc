//! Message framing and object block headers for netobj.
//!
//! This crate handles the binary message format: the fixed header, list
//! section framing, per-object block headers, and limit enforcement. It does
//! not know about converters or object state, only the structure of messages.
//!
//! # Design Principles
//!
//! - **Stable wire format** - The format is versioned and the magic never changes.
//! - **Bounded decoding** - All length fields are validated against limits before iteration.
//! - **No domain knowledge** - This crate handles framing, not field payloads.

mod block;
mod error;
mod header;
mod limits;
mod message;

pub use block::{body_has_more, BlockHeader, BlockKind};
pub use error::{DecodeError, EncodeError, LimitKind, SectionFramingError, WireResult};
pub use header::{MessageHeader, MessageKind, HEADER_SIZE, MAGIC, VERSION};
pub use limits::Limits;
pub use message::{
    decode_message, decode_sections, encode_header, encode_message, encode_section, section_len,
    ListSection, WireMessage,
};
