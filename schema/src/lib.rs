//! Type registry and field converters for networked object lists.
//!
//! This crate defines how replicated object state is described and encoded:
//! - Field types and values, including resource references
//! - Converters for primitives, quantized floats, arrays, and resources
//! - A registry builder that resolves converters per declared field
//! - Registry descriptions exchanged on connect, and their hash
//!
//! # Design Principles
//!
//! - **Explicit registration** - Types list their fields in code; nothing is discovered at runtime.
//! - **Fail at startup** - Unknown or duplicate types are rejected while building the registry.
//! - **Positional fields** - Declaration order is wire order on both ends.
//! - **Deterministic hashing** - The registry hash is stable given the same registrations.

mod converter;
mod describe;
mod error;
mod hash;
mod quantize;
mod registry;
mod value;

pub use converter::{
    ArrayConverter, CompositeConverter, Converter, FloatPrecision, PrimitiveKind, Quantizer,
    ResourceResolver, NO_RESOURCE_INDEX,
};
pub use describe::{
    ConverterDesc, FieldDescription, RegistryDescription, TypeDescription, TypeMap,
};
pub use error::{ConvertError, ConvertResult, SchemaError, SchemaResult};
pub use hash::registry_hash;
pub use quantize::{QuantizeOptions, MAX_QUANTIZED_BITS, MULTIPLIER_EPSILON};
pub use registry::{
    ArrayFactory, FieldDef, FieldDescriptor, FieldOptions, ObjectDef, TypeId, TypeMetadata,
    TypeRegistry, TypeRegistryBuilder,
};
pub use value::{FieldType, FieldValue, ResourceRef};

impl TypeRegistry {
    /// Hash of this registry's description.
    #[must_use]
    pub fn hash(&self) -> u64 {
        registry_hash(&self.describe())
    }
}
