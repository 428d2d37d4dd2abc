//! Error types for codec operations.

use std::fmt;

use schema::{ConvertError, SchemaError};
use wire::{DecodeError, EncodeError, MessageKind};

use crate::types::{ClientId, ListId, ObjectHandle};

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while transmitting or receiving object lists.
///
/// On the receiving side every error aborts the whole message: fields are
/// addressed by position, so nothing after a failure can be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// Wire format error.
    Wire(DecodeError),

    /// Message could not be assembled.
    Encode(EncodeError),

    /// Registry or registry description error.
    Schema(SchemaError),

    /// A field value could not be converted, written, or read.
    Field {
        type_name: String,
        field: String,
        source: ConvertError,
    },

    /// Message was built against a different registry.
    RegistryMismatch { expected: u64, found: u64 },

    /// Message kind is not valid at this point.
    UnexpectedMessage {
        expected: MessageKind,
        found: MessageKind,
    },

    /// A frame arrived before the registry description.
    RegistryMissing,

    /// Section or call names a list that does not exist.
    UnknownList { list: u32 },

    /// Handle does not name a live object.
    UnknownObject { list: ListId, handle: ObjectHandle },

    /// Type id is not registered.
    UnknownType { type_id: u32 },

    /// Transmitted type has no local counterpart.
    UnmappedType { type_name: String },

    /// Object is already scheduled for destruction.
    ObjectDestroyed { handle: ObjectHandle },

    /// Field name does not exist on the type.
    UnknownField { type_name: String, field: String },

    /// Wrong number of values for the type's fields.
    FieldCountMismatch {
        type_name: String,
        expected: usize,
        actual: usize,
    },

    /// Client is not connected.
    UnknownClient { client: ClientId },

    /// Client is already connected.
    DuplicateClient { client: ClientId },

    /// A list with this name already exists.
    DuplicateList { name: String },

    /// The list ran out of handles.
    HandlesExhausted { list: ListId },

    /// The client's frame sequence ran out.
    SequenceExhausted { client: ClientId },

    /// Ack names a frame that was never sent.
    AckOutOfRange { client: ClientId, sequence: u32 },

    /// Limits exceeded.
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },
}

/// Specific limit that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Lists,
    ObjectsPerList,
    BlocksPerSection,
    UnackedFrames,
    /// Blocks that cannot be deferred do not fit one frame.
    FrameBytes,
    FrameSections,
}

impl CodecError {
    pub(crate) fn field(type_name: &str, field: &str, source: ConvertError) -> Self {
        Self::Field {
            type_name: type_name.to_string(),
            field: field.to_string(),
            source,
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(e) => write!(f, "wire error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Schema(e) => write!(f, "schema error: {e}"),
            Self::Field {
                type_name,
                field,
                source,
            } => write!(f, "field {type_name}.{field}: {source}"),
            Self::RegistryMismatch { expected, found } => {
                write!(
                    f,
                    "registry hash mismatch: expected 0x{expected:016X}, found 0x{found:016X}"
                )
            }
            Self::UnexpectedMessage { expected, found } => {
                write!(f, "unexpected message: expected {expected:?}, found {found:?}")
            }
            Self::RegistryMissing => write!(f, "frame received before registry description"),
            Self::UnknownList { list } => write!(f, "unknown object list {list}"),
            Self::UnknownObject { list, handle } => {
                write!(f, "no object {handle} in list {}", list.raw())
            }
            Self::UnknownType { type_id } => write!(f, "unknown type id {type_id}"),
            Self::UnmappedType { type_name } => {
                write!(f, "transmitted type {type_name} has no local type")
            }
            Self::ObjectDestroyed { handle } => {
                write!(f, "object {handle} is already destroyed")
            }
            Self::UnknownField { type_name, field } => {
                write!(f, "type {type_name} has no field {field}")
            }
            Self::FieldCountMismatch {
                type_name,
                expected,
                actual,
            } => {
                write!(f, "type {type_name} has {expected} fields, got {actual} values")
            }
            Self::UnknownClient { client } => write!(f, "{client} is not connected"),
            Self::DuplicateClient { client } => write!(f, "{client} is already connected"),
            Self::DuplicateList { name } => write!(f, "object list {name} already exists"),
            Self::HandlesExhausted { list } => {
                write!(f, "object list {} ran out of handles", list.raw())
            }
            Self::SequenceExhausted { client } => {
                write!(f, "frame sequence exhausted for {client}")
            }
            Self::AckOutOfRange { client, sequence } => {
                write!(f, "{client} acknowledged unsent frame {sequence}")
            }
            Self::LimitsExceeded {
                kind,
                limit,
                actual,
            } => {
                write!(f, "{kind} limit exceeded: {actual} > {limit}")
            }
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lists => "object lists",
            Self::ObjectsPerList => "objects per list",
            Self::BlocksPerSection => "blocks per section",
            Self::UnackedFrames => "unacknowledged frames",
            Self::FrameBytes => "frame bytes",
            Self::FrameSections => "sections per frame",
        };
        write!(f, "{name}")
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Wire(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Schema(e) => Some(e),
            Self::Field { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DecodeError> for CodecError {
    fn from(err: DecodeError) -> Self {
        Self::Wire(err)
    }
}

impl From<EncodeError> for CodecError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl From<SchemaError> for CodecError {
    fn from(err: SchemaError) -> Self {
        Self::Schema(err)
    }
}

impl From<bitstream::BitError> for CodecError {
    fn from(err: bitstream::BitError) -> Self {
        Self::Wire(DecodeError::from(err))
    }
}
