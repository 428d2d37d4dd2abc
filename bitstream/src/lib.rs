//! Low-level bit packing primitives for the netobj replication stack.
//!
//! This crate provides [`BitWriter`] and [`BitReader`] for bit-level encoding and decoding.
//! It is designed for bounded, panic-free operation with explicit error handling.
//!
//! # Design Principles
//!
//! - **No unsafe code** - Safety is paramount.
//! - **Bounded operations** - All reads are bounds-checked.
//! - **No domain knowledge** - This crate knows nothing about objects, converters, or lists.
//! - **Explicit errors** - All failures return structured errors, never panic.
//!
//! Varints are written as 8-bit groups (seven value bits plus a continuation
//! bit) at the current bit position, so they never force byte alignment.
//!
//! # Example
//!
//! ```
//! use bitstream::{BitWriter, BitReader};
//!
//! let mut writer = BitWriter::new();
//! writer.write_bool(true);
//! writer.write_bits(42, 7).unwrap();
//! writer.write_varu32(300);
//!
//! let bytes = writer.finish();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_bool().unwrap(), true);
//! assert_eq!(reader.read_bits(7).unwrap(), 42);
//! assert_eq!(reader.read_varu32().unwrap(), 300);
//! ```

mod error;
mod reader;
mod writer;

pub use error::{BitError, BitResult};
pub use reader::BitReader;
pub use writer::BitWriter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roundtrip() {
        let writer = BitWriter::new();
        let bytes = writer.finish();
        assert!(bytes.is_empty());

        let reader = BitReader::new(&bytes);
        assert!(reader.is_empty());
    }

    #[test]
    fn bits_roundtrip_various_sizes() {
        let test_cases = [
            (0b1010u64, 4),
            (0xFFu64, 8),
            (0xABCDu64, 16),
            (0x1234_5678u64, 32),
            (u64::MAX, 64),
        ];

        for (value, bits) in test_cases {
            let mut writer = BitWriter::new();
            writer.write_bits(value, bits).unwrap();
            let bytes = writer.finish();

            let mut reader = BitReader::new(&bytes);
            let read_value = reader.read_bits(bits).unwrap();
            assert_eq!(
                read_value, value,
                "roundtrip failed for {bits}-bit value {value}"
            );
        }
    }

    #[test]
    fn mixed_roundtrip() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.write_bits(0b1010, 4).unwrap();
        writer.write_vars64(-70_000);
        writer.write_f64(-2.5);
        writer.write_bool(false);
        writer.write_bytes(b"abc");
        writer.write_varu64(u64::MAX);
        writer.write_f32(12.25);
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_bits(4).unwrap(), 0b1010);
        assert_eq!(reader.read_vars64().unwrap(), -70_000);
        assert_eq!(reader.read_f64().unwrap(), -2.5);
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.read_bytes(3).unwrap(), b"abc".to_vec());
        assert_eq!(reader.read_varu64().unwrap(), u64::MAX);
        assert_eq!(reader.read_f32().unwrap(), 12.25);
        assert!(reader.bits_remaining() < 8);
    }
}
