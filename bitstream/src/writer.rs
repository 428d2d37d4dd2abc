//! Bit-level writer for encoding packed binary data.

use crate::error::{BitError, BitResult};

/// A bit-level writer for encoding packed binary data.
///
/// Bits are packed MSB-first. Writes are accumulated in an internal buffer;
/// call [`finish`](Self::finish) to get the final byte buffer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    /// The accumulated bytes.
    bytes: Vec<u8>,
    /// Current byte being written (not yet pushed to bytes).
    current_byte: u8,
    /// Number of bits written to `current_byte` (0-7).
    bit_count: u8,
}

impl BitWriter {
    /// Creates a new empty `BitWriter`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `BitWriter` with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            current_byte: 0,
            bit_count: 0,
        }
    }

    /// Returns the number of bits written so far.
    #[must_use]
    pub fn bits_written(&self) -> usize {
        self.bytes.len() * 8 + self.bit_count as usize
    }

    /// Writes a single bit.
    pub fn write_bool(&mut self, value: bool) {
        self.current_byte = (self.current_byte << 1) | u8::from(value);
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.bytes.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// Writes the low `bits` bits of `value`, most significant first.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 64`.
    /// Returns [`BitError::ValueOutOfRange`] if `value` doesn't fit in `bits`.
    pub fn write_bits(&mut self, value: u64, bits: u8) -> BitResult<()> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        if bits == 0 {
            return Ok(());
        }
        if bits < 64 && value >= (1u64 << bits) {
            return Err(BitError::ValueOutOfRange { value, bits });
        }

        if self.bit_count == 0 && bits % 8 == 0 {
            for shift in (0..bits / 8).rev() {
                self.bytes.push((value >> (u32::from(shift) * 8)) as u8);
            }
            return Ok(());
        }

        for i in (0..bits).rev() {
            self.write_bool((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Writes a varint `u32` as 8-bit groups (7 value bits + continuation bit).
    pub fn write_varu32(&mut self, value: u32) {
        self.write_varu64(u64::from(value));
    }

    /// Writes a varint `u64` as 8-bit groups (7 value bits + continuation bit).
    pub fn write_varu64(&mut self, mut value: u64) {
        loop {
            let mut group = value & 0x7F;
            value >>= 7;
            if value != 0 {
                group |= 0x80;
            }
            self.push_byte(group as u8);
            if value == 0 {
                break;
            }
        }
    }

    /// Writes a zigzag varint `i32`.
    pub fn write_vars32(&mut self, value: i32) {
        let zigzag = ((value << 1) ^ (value >> 31)) as u32;
        self.write_varu32(zigzag);
    }

    /// Writes a zigzag varint `i64`.
    pub fn write_vars64(&mut self, value: i64) {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        self.write_varu64(zigzag);
    }

    /// Writes the IEEE-754 bits of an `f32`.
    pub fn write_f32(&mut self, value: f32) {
        for byte in value.to_bits().to_be_bytes() {
            self.push_byte(byte);
        }
    }

    /// Writes the IEEE-754 bits of an `f64`.
    pub fn write_f64(&mut self, value: f64) {
        for byte in value.to_bits().to_be_bytes() {
            self.push_byte(byte);
        }
    }

    /// Writes raw bytes at the current bit position.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.bit_count == 0 {
            self.bytes.extend_from_slice(bytes);
            return;
        }
        for &byte in bytes {
            self.push_byte(byte);
        }
    }

    /// Appends every bit written to `other`, unpadded.
    pub fn append(&mut self, other: &Self) {
        self.write_bytes(&other.bytes);
        for i in (0..other.bit_count).rev() {
            self.write_bool((other.current_byte >> i) & 1 == 1);
        }
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        while self.bit_count != 0 {
            self.write_bool(false);
        }
    }

    /// Finishes writing and returns the byte buffer.
    ///
    /// If the last byte is incomplete, it is padded with zeros on the right.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.bytes
    }

    /// Finishes writing and appends to the provided buffer.
    ///
    /// If the last byte is incomplete, it is padded with zeros on the right.
    pub fn finish_into(mut self, buf: &mut Vec<u8>) {
        self.align_to_byte();
        buf.append(&mut self.bytes);
    }

    fn push_byte(&mut self, byte: u8) {
        if self.bit_count == 0 {
            self.bytes.push(byte);
            return;
        }
        for i in (0..8).rev() {
            self.write_bool((byte >> i) & 1 == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_bit_position() {
        let mut block = BitWriter::new();
        block.write_bits(0b101, 3).unwrap();
        block.write_bytes(&[0xAB]);

        let mut w = BitWriter::new();
        w.write_bool(true);
        w.append(&block);
        w.append(&BitWriter::new());
        assert_eq!(w.bits_written(), 12);
        // 1 101 1010 1011, padded.
        assert_eq!(w.finish(), vec![0b1101_1010, 0b1011_0000]);
    }

    #[test]
    fn empty_writer() {
        let writer = BitWriter::new();
        assert_eq!(writer.bits_written(), 0);
        let bytes = writer.finish();
        assert!(bytes.is_empty());
    }

    #[test]
    fn write_single_bit_true() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        assert_eq!(writer.bits_written(), 1);
        // Single bit 1, padded with 7 zeros.
        assert_eq!(writer.finish(), vec![0b1000_0000]);
    }

    #[test]
    fn write_partial_byte_with_padding() {
        let mut writer = BitWriter::new();
        for bit in [true, true, false, true, false] {
            writer.write_bool(bit);
        }
        assert_eq!(writer.finish(), vec![0b1101_0000]);
    }

    #[test]
    fn write_bits_zero() {
        let mut writer = BitWriter::new();
        writer.write_bits(0xFF, 0).unwrap();
        assert_eq!(writer.bits_written(), 0);
    }

    #[test]
    fn write_bits_multiple_bytes() {
        let mut writer = BitWriter::new();
        writer.write_bits(0xABCD, 16).unwrap();
        assert_eq!(writer.finish(), vec![0xAB, 0xCD]);
    }

    #[test]
    fn write_bits_across_byte_boundary() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1111, 4).unwrap();
        writer.write_bits(0b1010_1010, 8).unwrap();
        // 1111 + 10101010 = 1111_1010 1010_0000
        assert_eq!(writer.finish(), vec![0b1111_1010, 0b1010_0000]);
    }

    #[test]
    fn write_bits_invalid_count() {
        let mut writer = BitWriter::new();
        let result = writer.write_bits(0, 65);
        assert!(matches!(
            result,
            Err(BitError::InvalidBitCount {
                bits: 65,
                max_bits: 64
            })
        ));
    }

    #[test]
    fn write_bits_value_out_of_range() {
        let mut writer = BitWriter::new();
        let result = writer.write_bits(256, 8);
        assert!(matches!(
            result,
            Err(BitError::ValueOutOfRange {
                value: 256,
                bits: 8
            })
        ));
    }

    #[test]
    fn write_bits_64_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(u64::MAX, 64).unwrap();
        assert_eq!(writer.finish(), vec![0xFF; 8]);
    }

    #[test]
    fn varu32_matches_leb128_when_aligned() {
        let mut writer = BitWriter::new();
        writer.write_varu32(300);
        assert_eq!(writer.finish(), vec![0xAC, 0x02]);
    }

    #[test]
    fn varu32_unaligned_shifts_groups() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.write_varu32(1);
        // 1 + 0000_0001 = 1000_0000 1000_0000
        assert_eq!(writer.finish(), vec![0b1000_0000, 0b1000_0000]);
    }

    #[test]
    fn vars32_zigzag() {
        let mut writer = BitWriter::new();
        writer.write_vars32(-1);
        writer.write_vars32(1);
        writer.write_vars32(-2);
        assert_eq!(writer.finish(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn f32_is_big_endian_bits() {
        let mut writer = BitWriter::new();
        writer.write_f32(1.0);
        assert_eq!(writer.finish(), vec![0x3F, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn align_to_byte_pads_zeroes() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.align_to_byte();
        assert_eq!(writer.bits_written(), 8);
        writer.align_to_byte();
        assert_eq!(writer.bits_written(), 8);
    }

    #[test]
    fn write_bytes_unaligned() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1010, 4).unwrap();
        writer.write_bytes(&[0xFF]);
        assert_eq!(writer.finish(), vec![0b1010_1111, 0b1111_0000]);
    }

    #[test]
    fn finish_into_with_padding() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);

        let mut buf = vec![0x11];
        writer.finish_into(&mut buf);
        assert_eq!(buf, vec![0x11, 0b1000_0000]);
    }
}
