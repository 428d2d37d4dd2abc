//! Field converters.
//!
//! A [`Converter`] knows how to default, copy, diff, write, and read one kind
//! of field value. Converters are immutable and cheap to clone; metadata holds
//! one per field.
//!
//! Every field encoded with [`Converter::encode_and_write`] starts with a
//! one-bit marker: `0` means unchanged (no payload follows), `1` means the
//! payload follows.

use std::fmt;
use std::sync::Arc;

use bitstream::{BitReader, BitWriter};

use crate::error::{ConvertError, ConvertResult};
use crate::quantize::QuantizeOptions;
use crate::value::{FieldType, FieldValue, ResourceRef};

/// Index carried for an absent resource.
pub const NO_RESOURCE_INDEX: i32 = 0;

/// Maps live resources to stable network indices and back.
///
/// Index [`NO_RESOURCE_INDEX`] is reserved for "no resource" and is never
/// passed to [`resolve`](Self::resolve).
pub trait ResourceResolver: Send + Sync {
    /// Returns the network index of a live resource.
    fn index_of(&self, resource: &ResourceRef) -> Option<i32>;

    /// Returns the resource for a network index, if it is loaded.
    fn resolve(&self, index: i32) -> Option<ResourceRef>;
}

/// Built-in value kinds with a direct wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrimitiveKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Vector2,
    Vector3,
}

impl PrimitiveKind {
    /// All primitive kinds, in registration order.
    pub const ALL: [Self; 14] = [
        Self::Bool,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::String,
        Self::Vector2,
        Self::Vector3,
    ];

    /// The declared field type this kind converts.
    #[must_use]
    pub const fn field_type(self) -> FieldType {
        match self {
            Self::Bool => FieldType::Bool,
            Self::I8 => FieldType::I8,
            Self::I16 => FieldType::I16,
            Self::I32 => FieldType::I32,
            Self::I64 => FieldType::I64,
            Self::U8 => FieldType::U8,
            Self::U16 => FieldType::U16,
            Self::U32 => FieldType::U32,
            Self::U64 => FieldType::U64,
            Self::F32 => FieldType::F32,
            Self::F64 => FieldType::F64,
            Self::String => FieldType::String,
            Self::Vector2 => FieldType::Vector2,
            Self::Vector3 => FieldType::Vector3,
        }
    }

    /// Stable numeric tag used by registry descriptions.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parses a tag produced by [`tag`](Self::tag).
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::String => "string",
            Self::Vector2 => "vec2",
            Self::Vector3 => "vec3",
        }
    }

    fn default_value(self) -> FieldValue {
        match self {
            Self::Bool => FieldValue::Bool(false),
            Self::I8 => FieldValue::I8(0),
            Self::I16 => FieldValue::I16(0),
            Self::I32 => FieldValue::I32(0),
            Self::I64 => FieldValue::I64(0),
            Self::U8 => FieldValue::U8(0),
            Self::U16 => FieldValue::U16(0),
            Self::U32 => FieldValue::U32(0),
            Self::U64 => FieldValue::U64(0),
            Self::F32 => FieldValue::F32(0.0),
            Self::F64 => FieldValue::F64(0.0),
            Self::String => FieldValue::Str(None),
            Self::Vector2 => FieldValue::Vec2([0.0; 2]),
            Self::Vector3 => FieldValue::Vec3([0.0; 3]),
        }
    }

    const fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Bool, FieldValue::Bool(_))
                | (Self::I8, FieldValue::I8(_))
                | (Self::I16, FieldValue::I16(_))
                | (Self::I32, FieldValue::I32(_))
                | (Self::I64, FieldValue::I64(_))
                | (Self::U8, FieldValue::U8(_))
                | (Self::U16, FieldValue::U16(_))
                | (Self::U32, FieldValue::U32(_))
                | (Self::U64, FieldValue::U64(_))
                | (Self::F32, FieldValue::F32(_))
                | (Self::F64, FieldValue::F64(_))
                | (Self::String, FieldValue::Str(_))
                | (Self::Vector2, FieldValue::Vec2(_))
                | (Self::Vector3, FieldValue::Vec3(_))
        )
    }

    fn write(self, value: &FieldValue, w: &mut BitWriter) -> ConvertResult<()> {
        match (self, value) {
            (Self::Bool, FieldValue::Bool(v)) => w.write_bool(*v),
            (Self::I8, FieldValue::I8(v)) => w.write_bits(u64::from(*v as u8), 8)?,
            (Self::I16, FieldValue::I16(v)) => w.write_bits(u64::from(*v as u16), 16)?,
            (Self::I32, FieldValue::I32(v)) => w.write_vars32(*v),
            (Self::I64, FieldValue::I64(v)) => w.write_vars64(*v),
            (Self::U8, FieldValue::U8(v)) => w.write_bits(u64::from(*v), 8)?,
            (Self::U16, FieldValue::U16(v)) => w.write_bits(u64::from(*v), 16)?,
            (Self::U32, FieldValue::U32(v)) => w.write_varu32(*v),
            (Self::U64, FieldValue::U64(v)) => w.write_varu64(*v),
            (Self::F32, FieldValue::F32(v)) => w.write_f32(*v),
            (Self::F64, FieldValue::F64(v)) => w.write_f64(*v),
            (Self::String, FieldValue::Str(v)) => write_string(v.as_deref(), w)?,
            (Self::Vector2, FieldValue::Vec2(v)) => v.iter().for_each(|c| w.write_f32(*c)),
            (Self::Vector3, FieldValue::Vec3(v)) => v.iter().for_each(|c| w.write_f32(*c)),
            _ => return Err(mismatch(self.name(), value)),
        }
        Ok(())
    }

    fn read(self, r: &mut BitReader<'_>) -> ConvertResult<FieldValue> {
        let value = match self {
            Self::Bool => FieldValue::Bool(r.read_bool()?),
            Self::I8 => FieldValue::I8(r.read_bits(8)? as u8 as i8),
            Self::I16 => FieldValue::I16(r.read_bits(16)? as u16 as i16),
            Self::I32 => FieldValue::I32(r.read_vars32()?),
            Self::I64 => FieldValue::I64(r.read_vars64()?),
            Self::U8 => FieldValue::U8(r.read_bits(8)? as u8),
            Self::U16 => FieldValue::U16(r.read_bits(16)? as u16),
            Self::U32 => FieldValue::U32(r.read_varu32()?),
            Self::U64 => FieldValue::U64(r.read_varu64()?),
            Self::F32 => FieldValue::F32(r.read_f32()?),
            Self::F64 => FieldValue::F64(r.read_f64()?),
            Self::String => FieldValue::Str(read_string(r)?),
            Self::Vector2 => FieldValue::Vec2([r.read_f32()?, r.read_f32()?]),
            Self::Vector3 => FieldValue::Vec3([r.read_f32()?, r.read_f32()?, r.read_f32()?]),
        };
        Ok(value)
    }
}

/// Float width of a quantized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FloatPrecision {
    Single,
    Double,
}

/// Float-to-fixed-point converter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    pub precision: FloatPrecision,
    pub options: QuantizeOptions,
}

impl Quantizer {
    fn name(&self) -> &'static str {
        match self.precision {
            FloatPrecision::Single => "f32",
            FloatPrecision::Double => "f64",
        }
    }

    fn float(&self, value: &FieldValue) -> ConvertResult<f64> {
        match (self.precision, value) {
            (FloatPrecision::Single, FieldValue::F32(v)) => Ok(f64::from(*v)),
            (FloatPrecision::Double, FieldValue::F64(v)) => Ok(*v),
            _ => Err(mismatch(self.name(), value)),
        }
    }

    fn write(&self, value: &FieldValue, w: &mut BitWriter) -> ConvertResult<()> {
        let (negative, magnitude) = self.options.quantize(self.float(value)?);
        if self.options.signed {
            w.write_bool(negative);
        }
        w.write_bits(magnitude, self.options.bits)?;
        Ok(())
    }

    fn read(&self, r: &mut BitReader<'_>) -> ConvertResult<FieldValue> {
        let negative = self.options.signed && r.read_bool()?;
        let magnitude = r.read_bits(self.options.bits)?;
        let value = self.options.dequantize(negative, magnitude);
        Ok(match self.precision {
            FloatPrecision::Single => FieldValue::F32(value as f32),
            FloatPrecision::Double => FieldValue::F64(value),
        })
    }
}

/// Converter for arrays of another converter's values.
#[derive(Debug, Clone)]
pub struct ArrayConverter {
    pub element: Box<Converter>,
    /// `Some(n)` for fixed-length arrays, which are never null.
    pub fixed_len: Option<u32>,
}

impl ArrayConverter {
    fn items<'v>(&self, value: &'v FieldValue) -> ConvertResult<Option<&'v [FieldValue]>> {
        let FieldValue::Array(items) = value else {
            return Err(mismatch("array", value));
        };
        match (self.fixed_len, items) {
            (Some(expected), Some(items)) if items.len() != expected as usize => {
                Err(ConvertError::FixedLengthMismatch {
                    expected: expected as usize,
                    actual: items.len(),
                })
            }
            (Some(_), None) => Err(mismatch("fixed array", value)),
            (_, items) => Ok(items.as_deref()),
        }
    }

    fn map(
        &self,
        value: &FieldValue,
        f: impl Fn(&Converter, &FieldValue) -> ConvertResult<FieldValue>,
    ) -> ConvertResult<FieldValue> {
        let Some(items) = self.items(value)? else {
            return Ok(FieldValue::Array(None));
        };
        let mapped = items
            .iter()
            .map(|item| f(&self.element, item))
            .collect::<ConvertResult<Vec<_>>>()?;
        Ok(FieldValue::Array(Some(mapped)))
    }

    fn write(&self, value: &FieldValue, w: &mut BitWriter) -> ConvertResult<()> {
        let items = self.items(value)?;
        if self.fixed_len.is_none() {
            w.write_bool(items.is_some());
        }
        let Some(items) = items else {
            return Ok(());
        };
        if self.fixed_len.is_none() {
            w.write_varu32(length_prefix(items.len())?);
        }
        for item in items {
            self.element.write(item, w)?;
        }
        Ok(())
    }

    fn read(&self, r: &mut BitReader<'_>) -> ConvertResult<FieldValue> {
        let len = match self.fixed_len {
            Some(len) => len as usize,
            None => {
                if !r.read_bool()? {
                    return Ok(FieldValue::Array(None));
                }
                r.read_varu32()? as usize
            }
        };
        self.read_elements(r, len)
    }

    fn read_elements(&self, r: &mut BitReader<'_>, len: usize) -> ConvertResult<FieldValue> {
        // Every element costs at least one bit.
        if len > r.bits_remaining() {
            return Err(ConvertError::LengthOverflow { length: len });
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.element.read(r)?);
        }
        Ok(FieldValue::Array(Some(items)))
    }

    /// Writes the payload of a changed array.
    ///
    /// Variable arrays carry a presence bit, then a resend bit. The whole
    /// array is resent when there is no previous array or the length changed;
    /// otherwise each element is diffed against its previous element.
    fn write_delta(
        &self,
        current: &FieldValue,
        previous: &FieldValue,
        w: &mut BitWriter,
    ) -> ConvertResult<()> {
        let current_items = self.items(current)?;
        let previous_items = self.items(previous).ok().flatten();

        if self.fixed_len.is_none() {
            w.write_bool(current_items.is_some());
        }
        let Some(current_items) = current_items else {
            return Ok(());
        };

        match previous_items {
            Some(previous_items) if previous_items.len() == current_items.len() => {
                if self.fixed_len.is_none() {
                    w.write_bool(false);
                }
                for (cur, prev) in current_items.iter().zip(previous_items) {
                    self.element.encode_and_write(cur, prev, w)?;
                }
                Ok(())
            }
            _ if self.fixed_len.is_some() => Err(ConvertError::MissingPrevious),
            _ => {
                w.write_bool(true);
                w.write_varu32(length_prefix(current_items.len())?);
                for item in current_items {
                    self.element.write(item, w)?;
                }
                Ok(())
            }
        }
    }

    /// Writes a changed array so that it decodes without the previous value.
    fn write_forced(&self, current: &FieldValue, w: &mut BitWriter) -> ConvertResult<()> {
        let items = self.items(current)?;
        if self.fixed_len.is_some() {
            for item in items.unwrap_or_default() {
                self.element.write_forced(item, w)?;
            }
            return Ok(());
        }
        w.write_bool(items.is_some());
        let Some(items) = items else {
            return Ok(());
        };
        w.write_bool(true);
        w.write_varu32(length_prefix(items.len())?);
        for item in items {
            self.element.write(item, w)?;
        }
        Ok(())
    }

    fn read_delta(
        &self,
        r: &mut BitReader<'_>,
        previous: &FieldValue,
    ) -> ConvertResult<FieldValue> {
        if self.fixed_len.is_none() {
            if !r.read_bool()? {
                return Ok(FieldValue::Array(None));
            }
            if r.read_bool()? {
                let len = r.read_varu32()? as usize;
                return self.read_elements(r, len);
            }
        }

        let Ok(Some(previous_items)) = self.items(previous) else {
            return Err(ConvertError::MissingPrevious);
        };
        let mut items = Vec::with_capacity(previous_items.len());
        for prev in previous_items {
            let item = self
                .element
                .read_and_decode(r, prev)?
                .unwrap_or_else(|| prev.clone());
            items.push(item);
        }
        Ok(FieldValue::Array(Some(items)))
    }
}

/// Converter for resource references carried as a 32-bit index.
#[derive(Clone)]
pub struct CompositeConverter {
    type_name: String,
    resolver: Arc<dyn ResourceResolver>,
}

impl CompositeConverter {
    /// Name of the registered type this converter serves.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    fn index(value: &FieldValue) -> ConvertResult<i32> {
        match value {
            FieldValue::Index(index) => Ok(*index),
            other => Err(mismatch("index", other)),
        }
    }
}

impl fmt::Debug for CompositeConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeConverter")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A field converter.
#[derive(Debug, Clone)]
pub enum Converter {
    /// Direct encoding of a built-in kind.
    Primitive(PrimitiveKind),
    /// Lossy float encoding with a fixed bit width.
    Quantized(Quantizer),
    /// Array of another converter's values.
    Array(ArrayConverter),
    /// Resource reference mapped to an index through a resolver.
    Composite(CompositeConverter),
}

impl Converter {
    /// Quantizing converter for `f32` fields.
    #[must_use]
    pub const fn quantized_f32(options: QuantizeOptions) -> Self {
        Self::Quantized(Quantizer {
            precision: FloatPrecision::Single,
            options,
        })
    }

    /// Quantizing converter for `f64` fields.
    #[must_use]
    pub const fn quantized_f64(options: QuantizeOptions) -> Self {
        Self::Quantized(Quantizer {
            precision: FloatPrecision::Double,
            options,
        })
    }

    /// Variable-length array converter. This is the default array factory.
    #[must_use]
    pub fn array(element: Self, fixed_len: Option<u32>) -> Self {
        Self::Array(ArrayConverter {
            element: Box::new(element),
            fixed_len,
        })
    }

    /// Resource converter backed by `resolver`.
    #[must_use]
    pub fn composite(type_name: impl Into<String>, resolver: Arc<dyn ResourceResolver>) -> Self {
        Self::Composite(CompositeConverter {
            type_name: type_name.into(),
            resolver,
        })
    }

    /// Number of primitive wire slots one value occupies.
    #[must_use]
    pub const fn member_count(&self) -> usize {
        match self {
            Self::Primitive(PrimitiveKind::Vector2) => 2,
            Self::Primitive(PrimitiveKind::Vector3) => 3,
            _ => 1,
        }
    }

    /// Snapshot value seeding a slot nobody has written yet.
    #[must_use]
    pub fn default_value(&self) -> FieldValue {
        match self {
            Self::Primitive(kind) => kind.default_value(),
            Self::Quantized(q) => match q.precision {
                FloatPrecision::Single => FieldValue::F32(0.0),
                FloatPrecision::Double => FieldValue::F64(0.0),
            },
            Self::Array(array) => match array.fixed_len {
                Some(len) => FieldValue::Array(Some(vec![
                    array.element.default_value();
                    len as usize
                ])),
                None => FieldValue::Array(None),
            },
            Self::Composite(_) => FieldValue::Index(NO_RESOURCE_INDEX),
        }
    }

    /// Checks that a live value can be held by a field with this converter.
    pub fn accepts(&self, live: &FieldValue) -> ConvertResult<()> {
        match self {
            Self::Primitive(kind) if kind.accepts(live) => Ok(()),
            Self::Primitive(kind) => Err(mismatch(kind.name(), live)),
            Self::Quantized(q) => q.float(live).map(|_| ()),
            Self::Array(array) => {
                if let Some(items) = array.items(live)? {
                    for item in items {
                        array.element.accepts(item)?;
                    }
                }
                Ok(())
            }
            Self::Composite(_) => match live {
                FieldValue::Resource(_) => Ok(()),
                other => Err(mismatch("resource", other)),
            },
        }
    }

    /// Converts a live value into its snapshot form.
    ///
    /// Arrays are deep-copied so snapshots never alias live state. Resources
    /// map to their index; a resource the resolver does not know, or maps to
    /// [`NO_RESOURCE_INDEX`], is an error.
    pub fn copy(&self, live: &FieldValue) -> ConvertResult<FieldValue> {
        match self {
            Self::Array(array) => array.map(live, Self::copy),
            Self::Composite(composite) => match live {
                FieldValue::Resource(None) => Ok(FieldValue::Index(NO_RESOURCE_INDEX)),
                FieldValue::Resource(Some(resource)) => match composite.resolver.index_of(resource) {
                    Some(NO_RESOURCE_INDEX) => Err(ConvertError::ReservedResourceIndex {
                        name: resource.name().to_string(),
                    }),
                    Some(index) => Ok(FieldValue::Index(index)),
                    None => Err(ConvertError::UnresolvedResource {
                        name: resource.name().to_string(),
                    }),
                },
                other => Err(mismatch("resource", other)),
            },
            _ => {
                self.accepts(live)?;
                Ok(live.clone())
            }
        }
    }

    /// Converts a snapshot value into its live form.
    ///
    /// An index the resolver cannot map yields an absent resource.
    pub fn create_instance(&self, snapshot: &FieldValue) -> ConvertResult<FieldValue> {
        match self {
            Self::Array(array) => array.map(snapshot, Self::create_instance),
            Self::Composite(composite) => {
                let index = CompositeConverter::index(snapshot)?;
                if index == NO_RESOURCE_INDEX {
                    return Ok(FieldValue::Resource(None));
                }
                let resource = composite.resolver.resolve(index);
                if resource.is_none() {
                    log::warn!(
                        "{} index {index} does not resolve, using no resource",
                        composite.type_name
                    );
                }
                Ok(FieldValue::Resource(resource))
            }
            _ => {
                self.accepts(snapshot)?;
                Ok(snapshot.clone())
            }
        }
    }

    /// Writes a snapshot value without a change marker.
    pub fn write(&self, value: &FieldValue, w: &mut BitWriter) -> ConvertResult<()> {
        match self {
            Self::Primitive(kind) => kind.write(value, w),
            Self::Quantized(q) => q.write(value, w),
            Self::Array(array) => array.write(value, w),
            Self::Composite(_) => {
                w.write_vars32(CompositeConverter::index(value)?);
                Ok(())
            }
        }
    }

    /// Reads a snapshot value written by [`write`](Self::write).
    pub fn read(&self, r: &mut BitReader<'_>) -> ConvertResult<FieldValue> {
        match self {
            Self::Primitive(kind) => kind.read(r),
            Self::Quantized(q) => q.read(r),
            Self::Array(array) => array.read(r),
            Self::Composite(_) => Ok(FieldValue::Index(r.read_vars32()?)),
        }
    }

    /// Writes a change marker and, when `current` differs from `previous`,
    /// the encoded value. Returns whether the value changed.
    pub fn encode_and_write(
        &self,
        current: &FieldValue,
        previous: &FieldValue,
        w: &mut BitWriter,
    ) -> ConvertResult<bool> {
        if current.same_as(previous) {
            w.write_bool(false);
            return Ok(false);
        }
        w.write_bool(true);
        match self {
            Self::Array(array) => array.write_delta(current, previous, w)?,
            _ => self.write(current, w)?,
        }
        Ok(true)
    }

    /// Writes a changed marker and a payload that decodes to `current`
    /// whatever previous value the reader holds.
    ///
    /// Used when the reader's copy of a field is uncertain, such as while an
    /// earlier send of it is unacknowledged.
    pub fn write_forced(&self, current: &FieldValue, w: &mut BitWriter) -> ConvertResult<()> {
        w.write_bool(true);
        match self {
            Self::Array(array) => array.write_forced(current, w),
            _ => self.write(current, w),
        }
    }

    /// Reads what [`encode_and_write`](Self::encode_and_write) wrote.
    ///
    /// Returns `None` when the marker says unchanged, in which case
    /// `previous` stands.
    pub fn read_and_decode(
        &self,
        r: &mut BitReader<'_>,
        previous: &FieldValue,
    ) -> ConvertResult<Option<FieldValue>> {
        if !r.read_bool()? {
            return Ok(None);
        }
        let value = match self {
            Self::Array(array) => array.read_delta(r, previous)?,
            _ => self.read(r)?,
        };
        Ok(Some(value))
    }
}

fn write_string(value: Option<&str>, w: &mut BitWriter) -> ConvertResult<()> {
    w.write_bool(value.is_some());
    if let Some(value) = value {
        w.write_varu32(length_prefix(value.len())?);
        w.write_bytes(value.as_bytes());
    }
    Ok(())
}

fn read_string(r: &mut BitReader<'_>) -> ConvertResult<Option<String>> {
    if !r.read_bool()? {
        return Ok(None);
    }
    let len = r.read_varu32()? as usize;
    let bytes = r.read_bytes(len)?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| ConvertError::InvalidUtf8)
}

fn length_prefix(len: usize) -> ConvertResult<u32> {
    u32::try_from(len).map_err(|_| ConvertError::LengthOverflow { length: len })
}

fn mismatch(expected: &'static str, found: &FieldValue) -> ConvertError {
    ConvertError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}
