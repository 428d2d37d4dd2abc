//! Schema and conversion errors.

use std::fmt;

use bitstream::BitError;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for value conversion and field encoding.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Errors raised while registering types or matching registries.
///
/// These are startup errors: they surface before any object is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    /// A converter is already registered for this field type.
    DuplicateConverter { field_type: String },

    /// The array converter factory was registered twice.
    DuplicateArrayConverter,

    /// No converter is registered for this field type.
    UnregisteredType { field_type: String },

    /// An array field was declared but no array converter factory exists.
    MissingArrayConverter { field_type: String },

    /// An object type with this name is already registered.
    DuplicateObjectType { name: String },

    /// Two fields of one object type share a name.
    DuplicateField { type_name: String, field: String },

    /// A field's declared type has no converter.
    UnregisteredFieldType {
        type_name: String,
        field: String,
        field_type: String,
    },

    /// Quantization options are invalid or applied to a non-float field.
    InvalidQuantization {
        type_name: String,
        field: String,
        reason: &'static str,
    },

    /// An object type has an empty name.
    EmptyTypeName,

    /// An alias refers to a type that is not registered.
    UnknownBaseType { alias: String, base: String },

    /// A transmitted type id is not part of the registry.
    UnknownTypeId { id: u32 },

    /// A transmitted type does not match the local type it maps to.
    DescriptionMismatch {
        type_name: String,
        reason: String,
    },

    /// A registry description could not be decoded.
    MalformedDescription { reason: String },
}

/// Errors raised while converting, writing, or reading a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConvertError {
    /// The value variant does not match the converter.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A live resource has no index in the resolver.
    UnresolvedResource { name: String },

    /// A resolver mapped a live resource to the reserved absent index.
    ReservedResourceIndex { name: String },

    /// A fixed-length array value has the wrong length.
    FixedLengthMismatch { expected: usize, actual: usize },

    /// A length prefix exceeds what the stream can hold.
    LengthOverflow { length: usize },

    /// A decoded string is not valid UTF-8.
    InvalidUtf8,

    /// An element delta arrived for an array the receiver does not hold.
    MissingPrevious,

    /// Underlying bitstream failure.
    Bits(BitError),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateConverter { field_type } => {
                write!(f, "converter for type {field_type} already registered")
            }
            Self::DuplicateArrayConverter => write!(f, "array converter already registered"),
            Self::UnregisteredType { field_type } => {
                write!(f, "no converter registered for type {field_type}")
            }
            Self::MissingArrayConverter { field_type } => {
                write!(f, "no array converter registered for {field_type}")
            }
            Self::DuplicateObjectType { name } => {
                write!(f, "object type {name} already registered")
            }
            Self::DuplicateField { type_name, field } => {
                write!(f, "duplicate field {type_name}.{field}")
            }
            Self::UnregisteredFieldType {
                type_name,
                field,
                field_type,
            } => {
                write!(
                    f,
                    "field {type_name}.{field} has unregistered type {field_type}"
                )
            }
            Self::InvalidQuantization {
                type_name,
                field,
                reason,
            } => {
                write!(f, "invalid quantization on {type_name}.{field}: {reason}")
            }
            Self::EmptyTypeName => write!(f, "object type name must not be empty"),
            Self::UnknownBaseType { alias, base } => {
                write!(f, "alias {alias} refers to unknown base type {base}")
            }
            Self::UnknownTypeId { id } => write!(f, "unknown type id {id}"),
            Self::DescriptionMismatch { type_name, reason } => {
                write!(f, "type {type_name} does not match transmitter: {reason}")
            }
            Self::MalformedDescription { reason } => {
                write!(f, "malformed registry description: {reason}")
            }
        }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            Self::UnresolvedResource { name } => {
                write!(f, "resource {name} has no network index")
            }
            Self::ReservedResourceIndex { name } => {
                write!(f, "resource {name} maps to the reserved no-resource index")
            }
            Self::FixedLengthMismatch { expected, actual } => {
                write!(
                    f,
                    "fixed-length array mismatch: expected {expected} elements, found {actual}"
                )
            }
            Self::LengthOverflow { length } => write!(f, "length overflow: {length}"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::MissingPrevious => write!(f, "array delta without a previous value"),
            Self::Bits(err) => write!(f, "bitstream error: {err}"),
        }
    }
}

impl std::error::Error for SchemaError {}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bits(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BitError> for ConvertError {
    fn from(err: BitError) -> Self {
        Self::Bits(err)
    }
}
