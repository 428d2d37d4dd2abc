//! Deterministic registry hashing.

use blake3::Hasher;

use crate::converter::FloatPrecision;
use crate::describe::{ConverterDesc, RegistryDescription};

/// Computes a deterministic hash of a registry description.
///
/// Every message header carries this hash so a receiver can reject frames
/// encoded against a different registry.
#[must_use]
pub fn registry_hash(desc: &RegistryDescription) -> u64 {
    let mut hasher = Hasher::new();
    write_u32(&mut hasher, desc.types.len() as u32);

    for ty in &desc.types {
        write_u32(&mut hasher, ty.id);
        write_str(&mut hasher, &ty.name);
        write_u32(&mut hasher, ty.fields.len() as u32);

        for field in &ty.fields {
            write_str(&mut hasher, &field.name);
            write_converter(&mut hasher, &field.converter);
        }
    }

    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

fn write_converter(hasher: &mut Hasher, desc: &ConverterDesc) {
    match desc {
        ConverterDesc::Primitive(kind) => {
            write_u8(hasher, 0);
            write_u8(hasher, kind.tag());
        }
        ConverterDesc::Quantized { precision, options } => {
            write_u8(hasher, 1);
            write_u8(hasher, u8::from(*precision == FloatPrecision::Double));
            write_u8(hasher, options.bits);
            write_f64(hasher, options.multiplier);
            write_f64(hasher, options.post_multiplier);
            write_u8(hasher, u8::from(options.signed));
        }
        ConverterDesc::Array { element, fixed_len } => {
            write_u8(hasher, 2);
            match fixed_len {
                Some(len) => {
                    write_u8(hasher, 1);
                    write_u32(hasher, *len);
                }
                None => write_u8(hasher, 0),
            }
            write_converter(hasher, element);
        }
        ConverterDesc::Composite { type_name } => {
            write_u8(hasher, 3);
            write_str(hasher, type_name);
        }
    }
}

fn write_u8(hasher: &mut Hasher, value: u8) {
    hasher.update(&[value]);
}

fn write_u32(hasher: &mut Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

fn write_f64(hasher: &mut Hasher, value: f64) {
    hasher.update(&value.to_bits().to_le_bytes());
}

fn write_str(hasher: &mut Hasher, value: &str) {
    write_u32(hasher, value.len() as u32);
    hasher.update(value.as_bytes());
}
