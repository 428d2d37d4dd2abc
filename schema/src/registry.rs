//! Type registry, object definitions, and per-type metadata.

use std::collections::HashMap;
use std::sync::Arc;

use crate::converter::{Converter, PrimitiveKind};
use crate::error::{SchemaError, SchemaResult};
use crate::quantize::QuantizeOptions;
use crate::value::FieldType;

/// Builds an array converter from its element converter and optional fixed length.
pub type ArrayFactory = fn(Converter, Option<u32>) -> Converter;

/// Identifier of a registered object type (registration order, from 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeId(u32);

impl TypeId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for TypeId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// How a declared field picks its converter.
#[derive(Debug, Clone)]
pub enum FieldOptions {
    /// Converter registered for the declared type.
    Registered,
    /// Quantizing converter with these options (float fields only).
    Quantized(QuantizeOptions),
    /// Explicit converter, bypassing the registry.
    Custom(Converter),
}

/// A declared networked field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub options: FieldOptions,
}

/// Declaration of a networked object type, listing fields in wire order.
#[derive(Debug, Clone)]
pub struct ObjectDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Name of the transmitter-side type this type mirrors, if it differs.
    pub maps_from: Option<String>,
}

impl ObjectDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            maps_from: None,
        }
    }

    /// Adds a field using the converter registered for its type.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            options: FieldOptions::Registered,
        });
        self
    }

    /// Adds a quantized float field.
    #[must_use]
    pub fn quantized(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        options: QuantizeOptions,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            options: FieldOptions::Quantized(options),
        });
        self
    }

    /// Adds a field with an explicit converter.
    #[must_use]
    pub fn custom(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        converter: Converter,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            options: FieldOptions::Custom(converter),
        });
        self
    }

    /// Declares that this type mirrors a differently named transmitter type.
    #[must_use]
    pub fn maps_from(mut self, transmitter_type: impl Into<String>) -> Self {
        self.maps_from = Some(transmitter_type.into());
        self
    }
}

/// A resolved field: name, declared type, and its converter instance.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub converter: Converter,
}

/// Immutable metadata for one registered object type.
#[derive(Debug)]
pub struct TypeMetadata {
    id: TypeId,
    name: String,
    fields: Arc<[FieldDescriptor]>,
    maps_from: Option<String>,
    base: Option<TypeId>,
}

impl TypeMetadata {
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in wire order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Position of a field by name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    #[must_use]
    pub fn maps_from(&self) -> Option<&str> {
        self.maps_from.as_deref()
    }

    /// The type whose fields this alias shares.
    #[must_use]
    pub const fn base(&self) -> Option<TypeId> {
        self.base
    }
}

/// Collects converters and object types, then freezes them into a [`TypeRegistry`].
///
/// All schema errors surface here, before any object is encoded.
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    converters: HashMap<FieldType, Converter>,
    array_factory: Option<ArrayFactory>,
    types: Vec<Arc<TypeMetadata>>,
    by_name: HashMap<String, TypeId>,
}

impl TypeRegistryBuilder {
    /// Creates an empty builder with no converters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with the array factory and every primitive converter.
    #[must_use]
    pub fn with_primitives() -> Self {
        let mut builder = Self::new();
        builder.array_factory = Some(Converter::array);
        for kind in PrimitiveKind::ALL {
            builder
                .converters
                .insert(kind.field_type(), Converter::Primitive(kind));
        }
        builder
    }

    /// Registers the converter for a field type.
    pub fn register_type(&mut self, field_type: FieldType, converter: Converter) -> SchemaResult<()> {
        if self.converters.contains_key(&field_type) {
            return Err(SchemaError::DuplicateConverter {
                field_type: field_type.to_string(),
            });
        }
        self.converters.insert(field_type, converter);
        Ok(())
    }

    /// Registers the factory used for every array field type.
    pub fn register_array_converter(&mut self, factory: ArrayFactory) -> SchemaResult<()> {
        if self.array_factory.is_some() {
            return Err(SchemaError::DuplicateArrayConverter);
        }
        self.array_factory = Some(factory);
        Ok(())
    }

    /// Returns the converter for a field type.
    pub fn lookup(&self, field_type: &FieldType) -> SchemaResult<Converter> {
        lookup(&self.converters, self.array_factory, field_type)
    }

    /// Registers an object type and returns its id.
    pub fn register_object(&mut self, def: ObjectDef) -> SchemaResult<TypeId> {
        if def.name.is_empty() {
            return Err(SchemaError::EmptyTypeName);
        }
        if self.by_name.contains_key(&def.name) {
            return Err(SchemaError::DuplicateObjectType { name: def.name });
        }

        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(def.fields.len());
        for field in def.fields {
            if fields.iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField {
                    type_name: def.name,
                    field: field.name,
                });
            }
            let converter = self.resolve_field(&def.name, &field)?;
            fields.push(FieldDescriptor {
                name: field.name,
                field_type: field.field_type,
                converter,
            });
        }

        Ok(self.push(def.name, fields.into(), def.maps_from, None))
    }

    /// Registers `alias` as a type sharing `base`'s fields.
    pub fn register_alias(
        &mut self,
        alias: impl Into<String>,
        base: &str,
    ) -> SchemaResult<TypeId> {
        let alias = alias.into();
        if alias.is_empty() {
            return Err(SchemaError::EmptyTypeName);
        }
        if self.by_name.contains_key(&alias) {
            return Err(SchemaError::DuplicateObjectType { name: alias });
        }
        let Some(&base_id) = self.by_name.get(base) else {
            return Err(SchemaError::UnknownBaseType {
                alias,
                base: base.to_string(),
            });
        };
        let base_meta = &self.types[base_id.raw() as usize];
        let fields = Arc::clone(&base_meta.fields);
        let root = base_meta.base.unwrap_or(base_id);
        Ok(self.push(alias, fields, None, Some(root)))
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            converters: self.converters,
            array_factory: self.array_factory,
            types: self.types,
            by_name: self.by_name,
        }
    }

    fn resolve_field(&self, type_name: &str, field: &FieldDef) -> SchemaResult<Converter> {
        match &field.options {
            FieldOptions::Custom(converter) => Ok(converter.clone()),
            FieldOptions::Quantized(options) => {
                let invalid = |reason| SchemaError::InvalidQuantization {
                    type_name: type_name.to_string(),
                    field: field.name.clone(),
                    reason,
                };
                options.validate().map_err(invalid)?;
                match field.field_type {
                    FieldType::F32 => Ok(Converter::quantized_f32(*options)),
                    FieldType::F64 => Ok(Converter::quantized_f64(*options)),
                    _ => Err(invalid("only f32 and f64 fields can be quantized")),
                }
            }
            FieldOptions::Registered => self.lookup(&field.field_type).map_err(|_| {
                SchemaError::UnregisteredFieldType {
                    type_name: type_name.to_string(),
                    field: field.name.clone(),
                    field_type: field.field_type.to_string(),
                }
            }),
        }
    }

    fn push(
        &mut self,
        name: String,
        fields: Arc<[FieldDescriptor]>,
        maps_from: Option<String>,
        base: Option<TypeId>,
    ) -> TypeId {
        let id = TypeId::new(self.types.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.types.push(Arc::new(TypeMetadata {
            id,
            name,
            fields,
            maps_from,
            base,
        }));
        id
    }
}

/// Frozen set of converters and object types.
///
/// Both ends of a connection must register types in the same order with the
/// same fields; the registry description exchanged on connect checks this.
#[derive(Debug)]
pub struct TypeRegistry {
    converters: HashMap<FieldType, Converter>,
    array_factory: Option<ArrayFactory>,
    types: Vec<Arc<TypeMetadata>>,
    by_name: HashMap<String, TypeId>,
}

impl TypeRegistry {
    /// Returns the converter for a field type.
    pub fn lookup(&self, field_type: &FieldType) -> SchemaResult<Converter> {
        lookup(&self.converters, self.array_factory, field_type)
    }

    #[must_use]
    pub fn get(&self, id: TypeId) -> Option<&Arc<TypeMetadata>> {
        self.types.get(id.raw() as usize)
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Arc<TypeMetadata>> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// Types in registration order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeMetadata>> {
        self.types.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub(crate) fn from_parts(types: Vec<Arc<TypeMetadata>>) -> Self {
        let by_name = types.iter().map(|t| (t.name.clone(), t.id)).collect();
        Self {
            converters: HashMap::new(),
            array_factory: None,
            types,
            by_name,
        }
    }
}

impl TypeMetadata {
    pub(crate) fn from_description(id: TypeId, name: String, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            id,
            name,
            fields: fields.into(),
            maps_from: None,
            base: None,
        }
    }
}

fn lookup(
    converters: &HashMap<FieldType, Converter>,
    array_factory: Option<ArrayFactory>,
    field_type: &FieldType,
) -> SchemaResult<Converter> {
    if let Some(converter) = converters.get(field_type) {
        return Ok(converter.clone());
    }
    let (element, fixed_len) = match field_type {
        FieldType::Array(element) => (element, None),
        FieldType::FixedArray(element, len) => (element, Some(*len)),
        _ => {
            return Err(SchemaError::UnregisteredType {
                field_type: field_type.to_string(),
            })
        }
    };
    let Some(factory) = array_factory else {
        return Err(SchemaError::MissingArrayConverter {
            field_type: field_type.to_string(),
        });
    };
    let element = lookup(converters, array_factory, element)?;
    Ok(factory(element, fixed_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;

    fn frame_type() -> ObjectDef {
        ObjectDef::new("Frame")
            .field("sequence", FieldType::U32)
            .quantized(
                "frame",
                FieldType::F32,
                QuantizeOptions::new(10).multiplier(4.0).signed(),
            )
    }

    #[test]
    fn ids_follow_registration_order() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let a = builder.register_object(frame_type()).unwrap();
        let b = builder
            .register_object(ObjectDef::new("Other").field("x", FieldType::I32))
            .unwrap();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);

        let registry = builder.build();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_name("Other").unwrap().id(), b);
        let frame = registry.get(a).unwrap();
        assert_eq!(frame.field_index("frame"), Some(1));
        assert!(matches!(
            frame.fields()[1].converter,
            Converter::Quantized(_)
        ));
    }

    #[test]
    fn duplicate_object_type_fails() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        builder.register_object(frame_type()).unwrap();
        let err = builder.register_object(frame_type()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateObjectType {
                name: "Frame".to_string()
            }
        );
    }

    #[test]
    fn duplicate_converter_fails() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let err = builder
            .register_type(FieldType::U8, Converter::Primitive(PrimitiveKind::U8))
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateConverter { .. }));
    }

    #[test]
    fn duplicate_array_factory_fails() {
        let mut builder = TypeRegistryBuilder::new();
        builder.register_array_converter(Converter::array).unwrap();
        assert_eq!(
            builder.register_array_converter(Converter::array),
            Err(SchemaError::DuplicateArrayConverter)
        );
    }

    #[test]
    fn unregistered_field_type_names_type_and_field() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let err = builder
            .register_object(ObjectDef::new("Entity").field("model", FieldType::named("Model")))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnregisteredFieldType {
                type_name: "Entity".to_string(),
                field: "model".to_string(),
                field_type: "Model".to_string(),
            }
        );
    }

    #[test]
    fn array_lookup_uses_factory() {
        let builder = TypeRegistryBuilder::with_primitives();
        let converter = builder
            .lookup(&FieldType::array(FieldType::array(FieldType::U16)))
            .unwrap();
        let Converter::Array(outer) = converter else {
            panic!("expected array converter");
        };
        assert!(matches!(*outer.element, Converter::Array(_)));
    }

    #[test]
    fn array_without_factory_fails() {
        let mut builder = TypeRegistryBuilder::new();
        builder
            .register_type(FieldType::U8, Converter::Primitive(PrimitiveKind::U8))
            .unwrap();
        let err = builder.lookup(&FieldType::array(FieldType::U8)).unwrap_err();
        assert!(matches!(err, SchemaError::MissingArrayConverter { .. }));
    }

    #[test]
    fn quantizing_non_float_fails() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let err = builder
            .register_object(ObjectDef::new("Bad").quantized(
                "count",
                FieldType::U32,
                QuantizeOptions::new(8),
            ))
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidQuantization { .. }));
    }

    #[test]
    fn invalid_quantize_options_fail() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let err = builder
            .register_object(ObjectDef::new("Bad").quantized(
                "frame",
                FieldType::F32,
                QuantizeOptions::new(0),
            ))
            .unwrap_err();
        assert!(err.to_string().contains("Bad.frame"));
    }

    #[test]
    fn duplicate_field_fails() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let err = builder
            .register_object(
                ObjectDef::new("Dup")
                    .field("a", FieldType::U8)
                    .field("a", FieldType::U16),
            )
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn alias_shares_base_fields() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let base = builder.register_object(frame_type()).unwrap();
        let alias = builder.register_alias("AnimatedFrame", "Frame").unwrap();
        let nested = builder.register_alias("Nested", "AnimatedFrame").unwrap();
        let registry = builder.build();

        let alias_meta = registry.get(alias).unwrap();
        assert_eq!(alias_meta.base(), Some(base));
        assert_eq!(alias_meta.field_count(), 2);
        assert_eq!(registry.get(nested).unwrap().base(), Some(base));
    }

    #[test]
    fn alias_of_unknown_base_fails() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        let err = builder.register_alias("Child", "Missing").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownBaseType { .. }));
    }

    #[test]
    fn custom_converter_bypasses_registry() {
        let mut builder = TypeRegistryBuilder::new();
        let id = builder
            .register_object(ObjectDef::new("Raw").custom(
                "flags",
                FieldType::named("Flags"),
                Converter::Primitive(PrimitiveKind::U16),
            ))
            .unwrap();
        let registry = builder.build();
        let field = &registry.get(id).unwrap().fields()[0];
        assert_eq!(field.converter.default_value(), FieldValue::U16(0));
    }
}
