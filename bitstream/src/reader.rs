//! Bit-level reader with bounded operations.

use crate::error::{BitError, BitResult};

/// A bit-level reader for decoding packed binary data.
///
/// All read operations are bounds-checked and return errors on failure.
/// The reader never panics on malformed input.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` from a byte slice.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Returns the number of bits remaining to read.
    #[must_use]
    pub const fn bits_remaining(&self) -> usize {
        self.data
            .len()
            .saturating_mul(8)
            .saturating_sub(self.bit_pos)
    }

    /// Returns `true` if there are no more bits to read.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }

    /// Returns the current bit position.
    #[must_use]
    pub const fn bit_position(&self) -> usize {
        self.bit_pos
    }

    /// Reads a single bit as a boolean.
    pub fn read_bool(&mut self) -> BitResult<bool> {
        self.ensure_bits(1)?;
        let byte_idx = self.bit_pos / 8;
        let bit_idx = self.bit_pos % 8;
        let bit = (self.data[byte_idx] >> (7 - bit_idx)) & 1;
        self.bit_pos += 1;
        Ok(bit == 1)
    }

    /// Reads up to 64 bits as an unsigned integer.
    pub fn read_bits(&mut self, bits: u8) -> BitResult<u64> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        if bits == 0 {
            return Ok(0);
        }
        self.ensure_bits(bits as usize)?;

        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.read_bool()?);
        }
        Ok(value)
    }

    /// Reads a varint `u32` written by [`BitWriter::write_varu32`](crate::BitWriter::write_varu32).
    pub fn read_varu32(&mut self) -> BitResult<u32> {
        let value = self.read_varint(5)?;
        u32::try_from(value).map_err(|_| BitError::InvalidVarint { max_groups: 5 })
    }

    /// Reads a varint `u64` written by [`BitWriter::write_varu64`](crate::BitWriter::write_varu64).
    pub fn read_varu64(&mut self) -> BitResult<u64> {
        self.read_varint(10)
    }

    /// Reads a zigzag varint `i32`.
    pub fn read_vars32(&mut self) -> BitResult<i32> {
        let value = self.read_varu32()?;
        Ok(((value >> 1) as i32) ^ -((value & 1) as i32))
    }

    /// Reads a zigzag varint `i64`.
    pub fn read_vars64(&mut self) -> BitResult<i64> {
        let value = self.read_varu64()?;
        Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
    }

    /// Reads an `f32` from its IEEE-754 bits.
    pub fn read_f32(&mut self) -> BitResult<f32> {
        let bits = self.read_bits(32)?;
        Ok(f32::from_bits(bits as u32))
    }

    /// Reads an `f64` from its IEEE-754 bits.
    pub fn read_f64(&mut self) -> BitResult<f64> {
        let bits = self.read_bits(64)?;
        Ok(f64::from_bits(bits))
    }

    /// Reads `len` raw bytes at the current bit position.
    pub fn read_bytes(&mut self, len: usize) -> BitResult<Vec<u8>> {
        self.ensure_bits(len.saturating_mul(8))?;
        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            self.bit_pos += len * 8;
            return Ok(self.data[start..start + len].to_vec());
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    /// Aligns to the next byte boundary.
    pub fn align_to_byte(&mut self) -> BitResult<()> {
        let rem = self.bit_pos % 8;
        if rem == 0 {
            return Ok(());
        }
        let skip = 8 - rem;
        self.ensure_bits(skip)?;
        self.bit_pos += skip;
        Ok(())
    }

    fn read_varint(&mut self, max_groups: u8) -> BitResult<u64> {
        let mut result = 0u64;
        for group in 0..max_groups {
            let byte = self.read_bits(8)?;
            let shift = u32::from(group) * 7;
            let payload = byte & 0x7F;
            if shift == 63 && payload > 1 {
                return Err(BitError::InvalidVarint { max_groups });
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(BitError::InvalidVarint { max_groups })
    }

    fn ensure_bits(&self, bits: usize) -> BitResult<()> {
        let available = self.bits_remaining();
        if bits > available {
            return Err(BitError::UnexpectedEof {
                requested: bits,
                available,
            });
        }
        Ok(())
    }
}
