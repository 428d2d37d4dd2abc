//! Field types and field values.

use std::fmt;
use std::sync::Arc;

/// Declared type of a networked field.
///
/// `Named` covers types registered by the application, such as a model
/// reference resolved through a [`ResourceResolver`](crate::ResourceResolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldType {
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
    /// Variable-length, nullable array.
    Array(Box<FieldType>),
    /// Array with a length fixed by the type.
    FixedArray(Box<FieldType>, u32),
    /// Application-registered type.
    Named(String),
}

impl FieldType {
    /// Creates a variable-length array type.
    #[must_use]
    pub fn array(element: Self) -> Self {
        Self::Array(Box::new(element))
    }

    /// Creates a fixed-length array type.
    #[must_use]
    pub fn fixed_array(element: Self, len: u32) -> Self {
        Self::FixedArray(Box::new(element), len)
    }

    /// Creates an application-registered type.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Returns `true` for `F32` and `F64`.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::I8 => write!(f, "i8"),
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::U32 => write!(f, "u32"),
            Self::U64 => write!(f, "u64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
            Self::String => write!(f, "string"),
            Self::Vector2 => write!(f, "vec2"),
            Self::Vector3 => write!(f, "vec3"),
            Self::Array(element) => write!(f, "[{element}]"),
            Self::FixedArray(element, len) => write!(f, "[{element}; {len}]"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// A shared reference to an engine resource (model, sound, sprite).
///
/// Resources are identified by name in-process; on the wire they travel as a
/// resolver-assigned index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(into = "String", from = "String")
)]
pub struct ResourceRef(Arc<str>);

impl ResourceRef {
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<String> for ResourceRef {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<ResourceRef> for String {
    fn from(resource: ResourceRef) -> Self {
        resource.0.to_string()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single field value.
///
/// Live values held by game code and snapshot values held for diffing share
/// this type. They only differ for resource fields: live state carries a
/// [`FieldValue::Resource`], snapshots carry the [`FieldValue::Index`] it maps to.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(Option<String>),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Array(Option<Vec<FieldValue>>),
    Resource(Option<ResourceRef>),
    Index(i32),
}

impl FieldValue {
    /// Short variant name used in diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Str(_) => "string",
            Self::Vec2(_) => "vec2",
            Self::Vec3(_) => "vec3",
            Self::Array(_) => "array",
            Self::Resource(_) => "resource",
            Self::Index(_) => "index",
        }
    }

    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Str(Some(value.into()))
    }

    #[must_use]
    pub fn resource(name: impl AsRef<str>) -> Self {
        Self::Resource(Some(ResourceRef::new(name)))
    }

    #[must_use]
    pub const fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_vec3(&self) -> Option<[f32; 3]> {
        match self {
            Self::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_resource(&self) -> Option<&ResourceRef> {
        match self {
            Self::Resource(r) => r.as_ref(),
            _ => None,
        }
    }

    /// Equality used for change detection.
    ///
    /// Floats compare by bit pattern, so a NaN equals an identical NaN and
    /// `0.0` differs from `-0.0`.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::Vec2(a), Self::Vec2(b)) => same_floats(a, b),
            (Self::Vec3(a), Self::Vec3(b)) => same_floats(a, b),
            (Self::Array(Some(a)), Self::Array(Some(b))) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            _ => self == other,
        }
    }
}

fn same_floats(a: &[f32], b: &[f32]) -> bool {
    a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Str(Some(s)) => write!(f, "{s:?}"),
            Self::Str(None) | Self::Array(None) | Self::Resource(None) => write!(f, "null"),
            Self::Vec2([x, y]) => write!(f, "({x}, {y})"),
            Self::Vec3([x, y, z]) => write!(f, "({x}, {y}, {z})"),
            Self::Array(Some(items)) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Resource(Some(r)) => write!(f, "{r}"),
            Self::Index(i) => write!(f, "#{i}"),
        }
    }
}
