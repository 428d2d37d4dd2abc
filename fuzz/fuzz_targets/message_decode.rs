#![no_main]

use std::sync::Arc;

use codec::{CodecLimits, Receiver, Transmitter};
use libfuzzer_sys::fuzz_target;
use schema::{FieldType, ObjectDef, QuantizeOptions, TypeRegistry, TypeRegistryBuilder};

fn registry() -> Arc<TypeRegistry> {
    let mut builder = TypeRegistryBuilder::with_primitives();
    let _ = builder.register_object(
        ObjectDef::new("Probe")
            .field("Flag", FieldType::Bool)
            .field("Count", FieldType::I32)
            .quantized("Angle", FieldType::F32, QuantizeOptions::new(10).multiplier(4.0).signed())
            .field("Label", FieldType::String)
            .field("Path", FieldType::array(FieldType::U16)),
    );
    Arc::new(builder.build())
}

fuzz_target!(|data: &[u8]| {
    let registry = registry();
    let wire_limits = wire::Limits::for_testing();
    let Ok(registry_message) = Transmitter::new(Arc::clone(&registry)).encode_registry_message()
    else {
        return;
    };

    let mut receiver = Receiver::with_limits(registry, CodecLimits::for_testing(), wire_limits.clone());
    let _ = receiver.create_list("probes");
    let _ = receiver.create_list("spare");
    let _ = receiver.apply_message(&registry_message);

    let mut idx = 0usize;
    while idx < data.len() && idx < 4096 {
        let len = (data[idx] as usize % 120).saturating_add(1);
        idx += 1;
        let end = (idx + len).min(data.len());
        let chunk = &data[idx..end];
        idx = end;

        if let Ok(message) = wire::decode_message(chunk, &wire_limits) {
            let _ = wire::decode_sections(message.payload, &wire_limits);
        }
        let _ = receiver.apply_message(chunk);
    }
});
