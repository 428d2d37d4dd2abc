//! Registry descriptions exchanged between transmitter and receiver.
//!
//! On connect the transmitter sends a [`RegistryDescription`]. The receiver
//! builds a [`TypeMap`] from it, matching each transmitted type to a local
//! type by `maps_from` or by name and checking that the converters agree.

use std::sync::Arc;

use bitstream::{BitReader, BitWriter};

use crate::converter::{
    ArrayConverter, Converter, FloatPrecision, PrimitiveKind, Quantizer, ResourceResolver,
};
use crate::error::{ConvertError, SchemaError, SchemaResult};
use crate::quantize::QuantizeOptions;
use crate::registry::{FieldDescriptor, TypeId, TypeMetadata, TypeRegistry};
use crate::value::{FieldType, ResourceRef};

/// Deepest array nesting accepted when decoding a description.
const MAX_CONVERTER_DEPTH: u8 = 8;

const TAG_PRIMITIVE: u64 = 0;
const TAG_QUANTIZED: u64 = 1;
const TAG_ARRAY: u64 = 2;
const TAG_COMPOSITE: u64 = 3;

/// Wire-relevant shape of a converter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConverterDesc {
    Primitive(PrimitiveKind),
    Quantized {
        precision: FloatPrecision,
        options: QuantizeOptions,
    },
    Array {
        element: Box<ConverterDesc>,
        fixed_len: Option<u32>,
    },
    Composite {
        type_name: String,
    },
}

impl From<&Converter> for ConverterDesc {
    fn from(converter: &Converter) -> Self {
        match converter {
            Converter::Primitive(kind) => Self::Primitive(*kind),
            Converter::Quantized(q) => Self::Quantized {
                precision: q.precision,
                options: q.options,
            },
            Converter::Array(array) => Self::Array {
                element: Box::new(Self::from(array.element.as_ref())),
                fixed_len: array.fixed_len,
            },
            Converter::Composite(composite) => Self::Composite {
                type_name: composite.type_name().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDescription {
    pub name: String,
    pub converter: ConverterDesc,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeDescription {
    pub id: u32,
    pub name: String,
    pub fields: Vec<FieldDescription>,
}

/// Every registered type with the wire shape of each field.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistryDescription {
    pub types: Vec<TypeDescription>,
}

impl RegistryDescription {
    /// Encodes the description into a standalone byte buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_varu32(self.types.len() as u32);
        for ty in &self.types {
            w.write_varu32(ty.id);
            write_name(&ty.name, &mut w);
            w.write_varu32(ty.fields.len() as u32);
            for field in &ty.fields {
                write_name(&field.name, &mut w);
                write_converter(&field.converter, &mut w);
            }
        }
        w.finish()
    }

    /// Decodes a buffer produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> SchemaResult<Self> {
        let mut r = BitReader::new(bytes);
        let type_count = read_count(&mut r)?;
        let mut types = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            let id = r.read_varu32().map_err(malformed)?;
            let name = read_name(&mut r)?;
            let field_count = read_count(&mut r)?;
            let mut fields = Vec::with_capacity(field_count);
            for _ in 0..field_count {
                let name = read_name(&mut r)?;
                let converter = read_converter(&mut r, 0)?;
                fields.push(FieldDescription { name, converter });
            }
            types.push(TypeDescription { id, name, fields });
        }
        if r.bits_remaining() >= 8 {
            return Err(SchemaError::MalformedDescription {
                reason: format!("{} trailing bits", r.bits_remaining()),
            });
        }
        Ok(Self { types })
    }
}

impl TypeRegistry {
    /// Describes every registered type in registration order.
    #[must_use]
    pub fn describe(&self) -> RegistryDescription {
        let types = self
            .types()
            .map(|ty| TypeDescription {
                id: ty.id().raw(),
                name: ty.name().to_string(),
                fields: ty
                    .fields()
                    .iter()
                    .map(|f| FieldDescription {
                        name: f.name.clone(),
                        converter: ConverterDesc::from(&f.converter),
                    })
                    .collect(),
            })
            .collect();
        RegistryDescription { types }
    }

    /// Rebuilds a registry from a description alone.
    ///
    /// Resource fields resolve every index to a placeholder named `#<index>`,
    /// which is enough for offline inspection of captured traffic.
    pub fn from_description(desc: &RegistryDescription) -> SchemaResult<Self> {
        let resolver: Arc<dyn ResourceResolver> = Arc::new(PlaceholderResolver);
        let mut types = Vec::with_capacity(desc.types.len());
        for (position, ty) in desc.types.iter().enumerate() {
            if ty.id as usize != position {
                return Err(SchemaError::MalformedDescription {
                    reason: format!("type {} has id {} at position {position}", ty.name, ty.id),
                });
            }
            let fields = ty
                .fields
                .iter()
                .map(|f| FieldDescriptor {
                    name: f.name.clone(),
                    field_type: desc_field_type(&f.converter),
                    converter: desc_converter(&f.converter, &resolver),
                })
                .collect();
            types.push(Arc::new(TypeMetadata::from_description(
                TypeId::new(ty.id),
                ty.name.clone(),
                fields,
            )));
        }
        Ok(Self::from_parts(types))
    }
}

/// Maps transmitter type ids onto local type metadata.
#[derive(Debug, Clone)]
pub struct TypeMap {
    remote: Vec<Option<Arc<TypeMetadata>>>,
    remote_names: Vec<String>,
}

impl TypeMap {
    /// Matches each transmitted type to a local type.
    ///
    /// A local type whose `maps_from` names the transmitted type wins over a
    /// local type with the same name. Transmitted types with no local match
    /// stay unmapped; receiving one of them is a stream error.
    pub fn new(local: &TypeRegistry, remote: &RegistryDescription) -> SchemaResult<Self> {
        let mut mapped = Vec::with_capacity(remote.types.len());
        let mut remote_names = Vec::with_capacity(remote.types.len());
        for (position, ty) in remote.types.iter().enumerate() {
            if ty.id as usize != position {
                return Err(SchemaError::MalformedDescription {
                    reason: format!("type {} has id {} at position {position}", ty.name, ty.id),
                });
            }
            let candidate = local
                .types()
                .find(|t| t.maps_from() == Some(ty.name.as_str()))
                .or_else(|| local.by_name(&ty.name));
            match candidate {
                Some(meta) => {
                    check_fields(meta, ty)?;
                    mapped.push(Some(Arc::clone(meta)));
                }
                None => {
                    log::debug!("transmitter type {} has no local counterpart", ty.name);
                    mapped.push(None);
                }
            }
            remote_names.push(ty.name.clone());
        }
        Ok(Self {
            remote: mapped,
            remote_names,
        })
    }

    /// Local metadata for a transmitted type id.
    #[must_use]
    pub fn local(&self, remote: TypeId) -> Option<&Arc<TypeMetadata>> {
        self.remote.get(remote.raw() as usize).and_then(Option::as_ref)
    }

    /// Name the transmitter registered for a type id.
    #[must_use]
    pub fn remote_name(&self, remote: TypeId) -> Option<&str> {
        self.remote_names.get(remote.raw() as usize).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.remote.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }
}

fn check_fields(local: &TypeMetadata, remote: &TypeDescription) -> SchemaResult<()> {
    if local.field_count() != remote.fields.len() {
        return Err(SchemaError::DescriptionMismatch {
            type_name: local.name().to_string(),
            reason: format!(
                "{} local fields, {} transmitted",
                local.field_count(),
                remote.fields.len()
            ),
        });
    }
    for (field, remote_field) in local.fields().iter().zip(&remote.fields) {
        if ConverterDesc::from(&field.converter) != remote_field.converter {
            return Err(SchemaError::DescriptionMismatch {
                type_name: local.name().to_string(),
                reason: format!(
                    "field {} converter differs from transmitted field {}",
                    field.name, remote_field.name
                ),
            });
        }
    }
    Ok(())
}

#[derive(Debug)]
struct PlaceholderResolver;

impl ResourceResolver for PlaceholderResolver {
    fn index_of(&self, resource: &ResourceRef) -> Option<i32> {
        resource.name().strip_prefix('#')?.parse().ok()
    }

    fn resolve(&self, index: i32) -> Option<ResourceRef> {
        Some(ResourceRef::new(format!("#{index}")))
    }
}

fn desc_converter(desc: &ConverterDesc, resolver: &Arc<dyn ResourceResolver>) -> Converter {
    match desc {
        ConverterDesc::Primitive(kind) => Converter::Primitive(*kind),
        ConverterDesc::Quantized { precision, options } => Converter::Quantized(Quantizer {
            precision: *precision,
            options: *options,
        }),
        ConverterDesc::Array { element, fixed_len } => Converter::Array(ArrayConverter {
            element: Box::new(desc_converter(element, resolver)),
            fixed_len: *fixed_len,
        }),
        ConverterDesc::Composite { type_name } => {
            Converter::composite(type_name.clone(), Arc::clone(resolver))
        }
    }
}

fn desc_field_type(desc: &ConverterDesc) -> FieldType {
    match desc {
        ConverterDesc::Primitive(kind) => kind.field_type(),
        ConverterDesc::Quantized {
            precision: FloatPrecision::Single,
            ..
        } => FieldType::F32,
        ConverterDesc::Quantized {
            precision: FloatPrecision::Double,
            ..
        } => FieldType::F64,
        ConverterDesc::Array {
            element,
            fixed_len: None,
        } => FieldType::array(desc_field_type(element)),
        ConverterDesc::Array {
            element,
            fixed_len: Some(len),
        } => FieldType::fixed_array(desc_field_type(element), *len),
        ConverterDesc::Composite { type_name } => FieldType::named(type_name.clone()),
    }
}

fn write_name(name: &str, w: &mut BitWriter) {
    w.write_varu32(name.len() as u32);
    w.write_bytes(name.as_bytes());
}

fn write_converter(desc: &ConverterDesc, w: &mut BitWriter) {
    match desc {
        ConverterDesc::Primitive(kind) => {
            write_tag(w, TAG_PRIMITIVE);
            write_tag(w, u64::from(kind.tag()));
        }
        ConverterDesc::Quantized { precision, options } => {
            write_tag(w, TAG_QUANTIZED);
            w.write_bool(*precision == FloatPrecision::Double);
            write_tag(w, u64::from(options.bits));
            w.write_f64(options.multiplier);
            w.write_f64(options.post_multiplier);
            w.write_bool(options.signed);
        }
        ConverterDesc::Array { element, fixed_len } => {
            write_tag(w, TAG_ARRAY);
            w.write_bool(fixed_len.is_some());
            if let Some(len) = fixed_len {
                w.write_varu32(*len);
            }
            write_converter(element, w);
        }
        ConverterDesc::Composite { type_name } => {
            write_tag(w, TAG_COMPOSITE);
            write_name(type_name, w);
        }
    }
}

fn write_tag(w: &mut BitWriter, tag: u64) {
    w.write_bytes(&[tag as u8]);
}

fn read_converter(r: &mut BitReader<'_>, depth: u8) -> SchemaResult<ConverterDesc> {
    if depth > MAX_CONVERTER_DEPTH {
        return Err(SchemaError::MalformedDescription {
            reason: "array nesting too deep".to_string(),
        });
    }
    let tag = r.read_bits(8).map_err(malformed)?;
    match tag {
        TAG_PRIMITIVE => {
            let kind_tag = r.read_bits(8).map_err(malformed)? as u8;
            PrimitiveKind::from_tag(kind_tag)
                .map(ConverterDesc::Primitive)
                .ok_or_else(|| SchemaError::MalformedDescription {
                    reason: format!("unknown primitive kind {kind_tag}"),
                })
        }
        TAG_QUANTIZED => {
            let precision = if r.read_bool().map_err(malformed)? {
                FloatPrecision::Double
            } else {
                FloatPrecision::Single
            };
            let options = QuantizeOptions {
                bits: r.read_bits(8).map_err(malformed)? as u8,
                multiplier: r.read_f64().map_err(malformed)?,
                post_multiplier: r.read_f64().map_err(malformed)?,
                signed: r.read_bool().map_err(malformed)?,
            };
            options
                .validate()
                .map_err(|reason| SchemaError::MalformedDescription {
                    reason: reason.to_string(),
                })?;
            Ok(ConverterDesc::Quantized { precision, options })
        }
        TAG_ARRAY => {
            let fixed_len = if r.read_bool().map_err(malformed)? {
                Some(r.read_varu32().map_err(malformed)?)
            } else {
                None
            };
            let element = read_converter(r, depth + 1)?;
            Ok(ConverterDesc::Array {
                element: Box::new(element),
                fixed_len,
            })
        }
        TAG_COMPOSITE => Ok(ConverterDesc::Composite {
            type_name: read_name(r)?,
        }),
        other => Err(SchemaError::MalformedDescription {
            reason: format!("unknown converter tag {other}"),
        }),
    }
}

fn read_count(r: &mut BitReader<'_>) -> SchemaResult<usize> {
    let count = r.read_varu32().map_err(malformed)? as usize;
    // Every entry costs at least one byte.
    if count > r.bits_remaining() / 8 {
        return Err(SchemaError::MalformedDescription {
            reason: format!("count {count} exceeds remaining input"),
        });
    }
    Ok(count)
}

fn read_name(r: &mut BitReader<'_>) -> SchemaResult<String> {
    let len = r.read_varu32().map_err(malformed)? as usize;
    let bytes = r.read_bytes(len).map_err(malformed)?;
    String::from_utf8(bytes).map_err(|_| malformed(ConvertError::InvalidUtf8))
}

fn malformed(err: impl std::fmt::Display) -> SchemaError {
    SchemaError::MalformedDescription {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObjectDef, TypeRegistryBuilder};

    fn registry() -> TypeRegistry {
        let mut builder = TypeRegistryBuilder::with_primitives();
        builder
            .register_object(
                ObjectDef::new("Frame")
                    .field("sequence", FieldType::U32)
                    .quantized(
                        "frame",
                        FieldType::F32,
                        QuantizeOptions::new(10).multiplier(4.0).signed(),
                    )
                    .field("tags", FieldType::array(FieldType::String))
                    .field("origin", FieldType::fixed_array(FieldType::F32, 3)),
            )
            .unwrap();
        builder.register_alias("Frame2", "Frame").unwrap();
        builder.build()
    }

    #[test]
    fn description_roundtrip() {
        let desc = registry().describe();
        assert_eq!(desc.types.len(), 2);
        assert_eq!(desc.types[1].fields.len(), 4);
        let decoded = RegistryDescription::decode(&desc.encode()).unwrap();
        assert_eq!(decoded, desc);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let bytes = registry().describe().encode();
        let err = RegistryDescription::decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedDescription { .. }));
    }

    #[test]
    fn decode_rejects_huge_counts() {
        let mut w = BitWriter::new();
        w.write_varu32(u32::MAX);
        let err = RegistryDescription::decode(&w.finish()).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedDescription { .. }));
    }

    #[test]
    fn type_map_matches_by_name() {
        let local = registry();
        let map = TypeMap::new(&local, &local.describe()).unwrap();
        assert_eq!(map.local(TypeId::new(0)).unwrap().name(), "Frame");
        assert_eq!(map.remote_name(TypeId::new(1)), Some("Frame2"));
        assert!(map.local(TypeId::new(5)).is_none());
    }

    #[test]
    fn type_map_prefers_maps_from() {
        let server = registry();
        let mut builder = TypeRegistryBuilder::with_primitives();
        builder
            .register_object(
                ObjectDef::new("ClientFrame")
                    .field("sequence", FieldType::U32)
                    .quantized(
                        "frame",
                        FieldType::F32,
                        QuantizeOptions::new(10).multiplier(4.0).signed(),
                    )
                    .field("tags", FieldType::array(FieldType::String))
                    .field("origin", FieldType::fixed_array(FieldType::F32, 3))
                    .maps_from("Frame"),
            )
            .unwrap();
        let client = builder.build();

        let map = TypeMap::new(&client, &server.describe()).unwrap();
        assert_eq!(map.local(TypeId::new(0)).unwrap().name(), "ClientFrame");
        assert!(map.local(TypeId::new(1)).is_none());
    }

    #[test]
    fn type_map_rejects_converter_mismatch() {
        let server = registry();
        let mut builder = TypeRegistryBuilder::with_primitives();
        builder
            .register_object(
                ObjectDef::new("Frame")
                    .field("sequence", FieldType::U32)
                    .field("frame", FieldType::F32)
                    .field("tags", FieldType::array(FieldType::String))
                    .field("origin", FieldType::fixed_array(FieldType::F32, 3)),
            )
            .unwrap();
        let err = TypeMap::new(&builder.build(), &server.describe()).unwrap_err();
        assert!(matches!(err, SchemaError::DescriptionMismatch { .. }));
    }

    #[test]
    fn from_description_rebuilds_converters() {
        let desc = registry().describe();
        let rebuilt = TypeRegistry::from_description(&desc).unwrap();
        assert_eq!(rebuilt.describe(), desc);
        let frame = rebuilt.by_name("Frame").unwrap();
        assert_eq!(frame.fields()[3].field_type, FieldType::fixed_array(FieldType::F32, 3));
    }
}
