//! Message decoding and list section framing.

use crate::error::{DecodeError, EncodeError, LimitKind, SectionFramingError, WireResult};
use crate::header::{MessageHeader, MessageKind, HEADER_SIZE, MAGIC, VERSION};
use crate::limits::Limits;

/// One object list's slice of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSection<'a> {
    pub list_id: u32,
    pub body: &'a [u8],
}

/// A decoded message: validated header plus the raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireMessage<'a> {
    pub header: MessageHeader,
    pub payload: &'a [u8],
}

/// Decodes a message header and borrows its payload.
///
/// Frame payloads are split further with [`decode_sections`].
pub fn decode_message<'a>(buf: &'a [u8], limits: &Limits) -> WireResult<WireMessage<'a>> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::MessageTooSmall {
            actual: buf.len(),
            required: HEADER_SIZE,
        });
    }
    if buf.len() > limits.max_message_bytes {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::MessageBytes,
            limit: limits.max_message_bytes,
            actual: buf.len(),
        });
    }

    let magic = le_u32(buf, 0);
    if magic != MAGIC {
        return Err(DecodeError::InvalidMagic { found: magic });
    }

    let version = le_u16(buf, 4);
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion { found: version });
    }

    let kind = MessageKind::parse(le_u16(buf, 6))?;
    let registry_hash = le_u64(buf, 8);
    let sequence = le_u32(buf, 16);
    let payload_len = le_u32(buf, 20);

    let payload = &buf[HEADER_SIZE..];
    if payload_len as usize != payload.len() {
        return Err(DecodeError::PayloadLengthMismatch {
            header_len: payload_len,
            actual_len: payload.len(),
        });
    }
    if kind == MessageKind::Ack && !payload.is_empty() {
        return Err(DecodeError::UnexpectedPayload {
            kind: kind.raw(),
            len: payload.len(),
        });
    }

    Ok(WireMessage {
        header: MessageHeader {
            version,
            kind,
            registry_hash,
            sequence,
            payload_len,
        },
        payload,
    })
}

/// Decodes list sections from a frame payload (no message header).
pub fn decode_sections<'a>(payload: &'a [u8], limits: &Limits) -> WireResult<Vec<ListSection<'a>>> {
    let mut offset = 0usize;
    let mut sections = Vec::new();

    while offset < payload.len() {
        if sections.len() >= limits.max_sections {
            return Err(DecodeError::LimitsExceeded {
                kind: LimitKind::SectionCount,
                limit: limits.max_sections,
                actual: sections.len() + 1,
            });
        }

        let (list_id, next) = read_varu32(payload, offset)?;
        let (len, next) = read_varu32(payload, next)?;
        offset = next;
        let len = len as usize;

        if len > limits.max_section_len {
            return Err(DecodeError::LimitsExceeded {
                kind: LimitKind::SectionLength,
                limit: limits.max_section_len,
                actual: len,
            });
        }
        let end = offset.saturating_add(len);
        if end > payload.len() {
            return Err(DecodeError::SectionFraming(
                SectionFramingError::Truncated {
                    needed: end,
                    available: payload.len(),
                },
            ));
        }

        sections.push(ListSection {
            list_id,
            body: &payload[offset..end],
        });
        offset = end;
    }

    Ok(sections)
}

/// Encodes a message header into the provided output buffer.
pub fn encode_header(header: &MessageHeader, out: &mut [u8]) -> Result<usize, EncodeError> {
    if out.len() < HEADER_SIZE {
        return Err(EncodeError::BufferTooSmall {
            needed: HEADER_SIZE,
            available: out.len(),
        });
    }

    out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    out[4..6].copy_from_slice(&header.version.to_le_bytes());
    out[6..8].copy_from_slice(&header.kind.raw().to_le_bytes());
    out[8..16].copy_from_slice(&header.registry_hash.to_le_bytes());
    out[16..20].copy_from_slice(&header.sequence.to_le_bytes());
    out[20..24].copy_from_slice(&header.payload_len.to_le_bytes());

    Ok(HEADER_SIZE)
}

/// Appends one list section to `out`, returning the bytes written.
pub fn encode_section(list_id: u32, body: &[u8], out: &mut Vec<u8>) -> Result<usize, EncodeError> {
    let len = u32::try_from(body.len())
        .map_err(|_| EncodeError::LengthOverflow { length: body.len() })?;
    let start = out.len();
    write_varu32(list_id, out);
    write_varu32(len, out);
    out.extend_from_slice(body);
    Ok(out.len() - start)
}

/// Bytes [`encode_section`] writes for a body of `body_len` bytes.
#[must_use]
pub const fn section_len(list_id: u32, body_len: usize) -> usize {
    varu32_len(list_id) + varu64_len(body_len as u64) + body_len
}

/// Builds a complete message, filling in the header's payload length.
pub fn encode_message(header: MessageHeader, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| EncodeError::LengthOverflow {
        length: payload.len(),
    })?;
    let header = MessageHeader {
        payload_len,
        ..header
    };
    let mut out = vec![0u8; HEADER_SIZE + payload.len()];
    encode_header(&header, &mut out)?;
    out[HEADER_SIZE..].copy_from_slice(payload);
    Ok(out)
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_varu32(buf: &[u8], mut offset: usize) -> Result<(u32, usize), DecodeError> {
    let mut value = 0u32;
    let mut shift = 0u32;
    for _ in 0..5 {
        let Some(&byte) = buf.get(offset) else {
            return Err(DecodeError::SectionFraming(
                SectionFramingError::Truncated {
                    needed: offset + 1,
                    available: buf.len(),
                },
            ));
        };
        offset += 1;
        if shift == 28 && byte & 0x70 != 0 {
            return Err(DecodeError::SectionFraming(
                SectionFramingError::InvalidVarint,
            ));
        }
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, offset));
        }
        shift += 7;
    }
    Err(DecodeError::SectionFraming(
        SectionFramingError::InvalidVarint,
    ))
}

const fn varu32_len(value: u32) -> usize {
    varu64_len(value as u64)
}

const fn varu64_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn write_varu32(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}
