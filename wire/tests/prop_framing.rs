use bitstream::{BitReader, BitWriter};
use proptest::prelude::*;
use wire::{
    body_has_more, decode_message, decode_sections, encode_message, encode_section, BlockHeader,
    Limits, MessageHeader, MessageKind,
};

fn block_strategy() -> impl Strategy<Value = BlockHeader> {
    prop_oneof![
        (any::<u32>(), any::<u32>()).prop_map(|(h, t)| BlockHeader::create(h, t)),
        any::<u32>().prop_map(BlockHeader::destroy),
        any::<u32>().prop_map(BlockHeader::update),
    ]
}

proptest! {
    #[test]
    fn prop_frame_sections_roundtrip(
        sections in prop::collection::vec((0u32..1000, prop::collection::vec(any::<u8>(), 0..40)), 0..6),
        hash in any::<u64>(),
        sequence in any::<u32>(),
    ) {
        let mut payload = Vec::new();
        for (list_id, body) in &sections {
            encode_section(*list_id, body, &mut payload).unwrap();
        }
        let buf = encode_message(MessageHeader::frame(hash, sequence, 0), &payload).unwrap();

        let limits = Limits::default();
        let message = decode_message(&buf, &limits).unwrap();
        prop_assert_eq!(message.header.kind, MessageKind::Frame);
        prop_assert_eq!(message.header.registry_hash, hash);
        prop_assert_eq!(message.header.sequence, sequence);

        let decoded = decode_sections(message.payload, &limits).unwrap();
        prop_assert_eq!(decoded.len(), sections.len());
        for (section, (list_id, body)) in decoded.iter().zip(&sections) {
            prop_assert_eq!(section.list_id, *list_id);
            prop_assert_eq!(section.body, body.as_slice());
        }
    }

    #[test]
    fn prop_block_headers_roundtrip(blocks in prop::collection::vec(block_strategy(), 0..10)) {
        let mut w = BitWriter::new();
        for block in &blocks {
            block.write(&mut w);
        }
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        let mut decoded = Vec::new();
        while body_has_more(&mut r).unwrap() {
            decoded.push(BlockHeader::read(&mut r).unwrap());
        }
        prop_assert_eq!(decoded, blocks);
    }

    #[test]
    fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let limits = Limits::for_testing();
        if let Ok(message) = decode_message(&data, &limits) {
            let _ = decode_sections(message.payload, &limits);
        }
        let _ = decode_sections(&data, &limits);

        let mut r = BitReader::new(&data);
        while let Ok(true) = body_has_more(&mut r) {
            if BlockHeader::read(&mut r).is_err() {
                break;
            }
        }
    }
}
