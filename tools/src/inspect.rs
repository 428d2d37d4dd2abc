//! Structural inspection of single messages.

use schema::{registry_hash, RegistryDescription};
use serde::Serialize;
use wire::{decode_message, decode_sections, MessageKind, WireResult};

/// Header fields of an inspected message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderReport {
    pub version: u16,
    pub kind: String,
    pub registry_hash: String,
    pub sequence: u32,
    pub payload_len: u32,
}

/// One list section of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionReport {
    pub list_id: u32,
    pub byte_len: usize,
}

/// Summary of a registry description payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryReport {
    pub types: Vec<String>,
    /// Whether the payload hashes to the header's registry hash.
    pub hash_matches: bool,
}

/// Everything that can be learned from one message without other context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectReport {
    pub total_bytes: usize,
    pub header: HeaderReport,
    pub sections: Vec<SectionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryReport>,
}

/// Decodes framing and, for registry messages, the description.
///
/// A registry payload that fails to decode is reported as a wire-level
/// success with no registry summary.
pub fn inspect_message(bytes: &[u8], limits: &wire::Limits) -> WireResult<InspectReport> {
    let message = decode_message(bytes, limits)?;
    let header = message.header;
    let mut report = InspectReport {
        total_bytes: bytes.len(),
        header: HeaderReport {
            version: header.version,
            kind: format!("{:?}", header.kind),
            registry_hash: format!("0x{:016x}", header.registry_hash),
            sequence: header.sequence,
            payload_len: header.payload_len,
        },
        sections: Vec::new(),
        registry: None,
    };
    match header.kind {
        MessageKind::Frame => {
            report.sections = decode_sections(message.payload, limits)?
                .into_iter()
                .map(|section| SectionReport {
                    list_id: section.list_id,
                    byte_len: section.body.len(),
                })
                .collect();
        }
        MessageKind::Registry => {
            report.registry = RegistryDescription::decode(message.payload)
                .ok()
                .map(|desc| RegistryReport {
                    types: desc.types.iter().map(|ty| ty.name.clone()).collect(),
                    hash_matches: registry_hash(&desc) == header.registry_hash,
                });
        }
        MessageKind::Ack => {}
    }
    Ok(report)
}

/// Human-readable rendering of an [`InspectReport`].
pub fn format_inspect_pretty(report: &InspectReport) -> String {
    let header = &report.header;
    let mut out = format!(
        "{} message, version {}, registry {}\nsequence: {} payload: {} bytes (total {})\n",
        header.kind,
        header.version,
        header.registry_hash,
        header.sequence,
        header.payload_len,
        report.total_bytes
    );
    if !report.sections.is_empty() {
        out.push_str("sections:\n");
        for section in &report.sections {
            out.push_str(&format!(
                "  list {}: {} bytes\n",
                section.list_id, section.byte_len
            ));
        }
    }
    if let Some(registry) = &report.registry {
        out.push_str(&format!(
            "types ({}): {}\n",
            registry.types.len(),
            registry.types.join(", ")
        ));
        if !registry.hash_matches {
            out.push_str("warning: description does not match header hash\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{FieldType, ObjectDef, TypeRegistryBuilder};
    use wire::{encode_message, encode_section, MessageHeader};

    #[test]
    fn inspect_frame_lists_sections() {
        let mut payload = Vec::new();
        encode_section(0, &[1, 2, 3], &mut payload).unwrap();
        encode_section(2, &[4], &mut payload).unwrap();
        let bytes = encode_message(MessageHeader::frame(0xAB, 7, 0), &payload).unwrap();

        let report = inspect_message(&bytes, &wire::Limits::default()).unwrap();
        assert_eq!(report.header.kind, "Frame");
        assert_eq!(report.header.sequence, 7);
        assert_eq!(
            report.sections,
            vec![
                SectionReport {
                    list_id: 0,
                    byte_len: 3
                },
                SectionReport {
                    list_id: 2,
                    byte_len: 1
                },
            ]
        );
        assert!(format_inspect_pretty(&report).contains("list 2: 1 bytes"));
    }

    #[test]
    fn inspect_registry_checks_hash() {
        let mut builder = TypeRegistryBuilder::with_primitives();
        builder
            .register_object(ObjectDef::new("Crate").field("Hp", FieldType::U8))
            .unwrap();
        let desc = builder.build().describe();
        let good = encode_message(MessageHeader::registry(registry_hash(&desc), 0), &desc.encode())
            .unwrap();
        let report = inspect_message(&good, &wire::Limits::default()).unwrap();
        let registry = report.registry.unwrap();
        assert_eq!(registry.types, vec!["Crate".to_string()]);
        assert!(registry.hash_matches);

        let bad = encode_message(MessageHeader::registry(1, 0), &desc.encode()).unwrap();
        let report = inspect_message(&bad, &wire::Limits::default()).unwrap();
        assert!(!report.registry.unwrap().hash_matches);
    }

    #[test]
    fn inspect_rejects_bad_magic() {
        assert!(inspect_message(&[0u8; 24], &wire::Limits::default()).is_err());
    }
}
