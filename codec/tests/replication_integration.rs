use std::sync::Arc;

use codec::{
    AppliedFrame, ClientId, CodecError, ListId, ObjectHandle, ReceiveEvent, Receiver, Transmitter,
};
use schema::{
    FieldType, FieldValue, ObjectDef, QuantizeOptions, TypeId, TypeRegistry, TypeRegistryBuilder,
};

fn anim_registry() -> Arc<TypeRegistry> {
    let mut builder = TypeRegistryBuilder::with_primitives();
    builder
        .register_object(
            ObjectDef::new("Anim")
                .field("Sequence", FieldType::U32)
                .quantized(
                    "Frame",
                    FieldType::F32,
                    QuantizeOptions::new(10).multiplier(4.0).signed(),
                ),
        )
        .unwrap();
    Arc::new(builder.build())
}

struct Peer {
    id: ClientId,
    receiver: Receiver,
}

fn join(tx: &mut Transmitter, id: u32, registry: Arc<TypeRegistry>) -> Peer {
    let id = ClientId::new(id);
    tx.add_client(id).unwrap();
    let mut receiver = Receiver::new(registry);
    for list in tx.lists() {
        receiver.create_list(list.name()).unwrap();
    }
    receiver
        .apply_registry_message(&tx.encode_registry_message().unwrap())
        .unwrap();
    Peer { id, receiver }
}

fn deliver(tx: &mut Transmitter, peer: &mut Peer) -> AppliedFrame {
    let frame = tx.encode_for_client(peer.id).unwrap();
    let applied = peer
        .receiver
        .apply_frame_message(&frame.bytes)
        .unwrap()
        .unwrap();
    tx.acknowledge(peer.id, frame.sequence).unwrap();
    applied
}

fn anim_setup() -> (Transmitter, Arc<TypeRegistry>, ListId, TypeId) {
    let registry = anim_registry();
    let type_id = registry.by_name("Anim").unwrap().id();
    let mut tx = Transmitter::new(Arc::clone(&registry));
    let list = tx.create_list("anims").unwrap();
    (tx, registry, list, type_id)
}

#[test]
fn frame_scenario_bytes_and_values() {
    let (mut tx, registry, list, type_id) = anim_setup();
    let handle = tx.create_object(list, type_id).unwrap();
    let mut peer = join(&mut tx, 1, registry);

    let applied = deliver(&mut tx, &mut peer);
    assert_eq!(applied.events, vec![ReceiveEvent::Created { list, handle }]);

    tx.set_field(list, handle, "Frame", FieldValue::F32(12.25))
        .unwrap();
    let frame = tx.encode_for_client(peer.id).unwrap();
    assert_eq!(frame.stats.updates, 1);
    assert_eq!(frame.stats.changed_fields, 1);
    // section: list 0, 3 body bytes; body: handle 1, update, unchanged,
    // changed, sign 0, magnitude 49 in 10 bits, padding
    assert_eq!(&frame.bytes[wire::HEADER_SIZE..], &[0x00, 0x03, 0x01, 0xD0, 0x62]);

    peer.receiver.apply_frame_message(&frame.bytes).unwrap();
    let mirror = peer.receiver.object(list, handle).unwrap();
    assert_eq!(mirror.get("Sequence"), Some(&FieldValue::U32(0)));
    assert_eq!(mirror.get("Frame"), Some(&FieldValue::F32(12.25)));
}

#[test]
fn clients_diff_independently() {
    let (mut tx, registry, list, type_id) = anim_setup();
    let handle = tx.create_object(list, type_id).unwrap();
    let mut a = join(&mut tx, 1, Arc::clone(&registry));
    let mut b = join(&mut tx, 2, registry);
    deliver(&mut tx, &mut a);
    deliver(&mut tx, &mut b);

    tx.set_field(list, handle, "Sequence", FieldValue::U32(9))
        .unwrap();
    deliver(&mut tx, &mut a);
    // b's frame is lost: not applied, not acknowledged
    let lost = tx.encode_for_client(b.id).unwrap();
    assert_eq!(lost.stats.updates, 1);

    let next_a = tx.encode_for_client(a.id).unwrap();
    assert_eq!(next_a.stats.blocks(), 0);

    let applied = deliver(&mut tx, &mut b);
    assert_eq!(
        applied.events,
        vec![ReceiveEvent::Updated {
            list,
            handle,
            changed: 1
        }]
    );
    assert_eq!(
        b.receiver.object(list, handle).unwrap().get("Sequence"),
        Some(&FieldValue::U32(9))
    );
}

#[test]
fn late_joiner_gets_create_with_current_values() {
    let (mut tx, registry, list, type_id) = anim_setup();
    let handle = tx.create_object(list, type_id).unwrap();
    let mut early = join(&mut tx, 1, Arc::clone(&registry));
    for sequence in 1..4 {
        tx.set_field(list, handle, "Sequence", FieldValue::U32(sequence))
            .unwrap();
        deliver(&mut tx, &mut early);
    }

    let mut late = join(&mut tx, 2, registry);
    let frame = tx.encode_for_client(late.id).unwrap();
    assert_eq!((frame.stats.creates, frame.stats.updates), (1, 0));
    let applied = late
        .receiver
        .apply_frame_message(&frame.bytes)
        .unwrap()
        .unwrap();
    assert_eq!(applied.events, vec![ReceiveEvent::Created { list, handle }]);
    assert_eq!(
        late.receiver.object(list, handle).unwrap().get("Sequence"),
        Some(&FieldValue::U32(3))
    );
}

#[test]
fn destroy_reaches_each_observer_once() {
    let (mut tx, registry, list, type_id) = anim_setup();
    let handle = tx.create_object(list, type_id).unwrap();
    let mut a = join(&mut tx, 1, Arc::clone(&registry));
    let mut b = join(&mut tx, 2, Arc::clone(&registry));
    deliver(&mut tx, &mut a);
    deliver(&mut tx, &mut b);

    tx.destroy_object(list, handle).unwrap();
    let mut late = join(&mut tx, 3, registry);

    let mut destroyed = 0;
    for _ in 0..3 {
        for peer in [&mut a, &mut b] {
            let applied = deliver(&mut tx, peer);
            destroyed += applied
                .events
                .iter()
                .filter(|e| matches!(e, ReceiveEvent::Destroyed { .. }))
                .count();
        }
        assert!(deliver(&mut tx, &mut late).events.is_empty());
    }
    assert_eq!(destroyed, 2);
    assert!(tx.object(list, handle).is_none());
    assert!(a.receiver.object(list, handle).is_none());
}

#[test]
fn receiver_maps_renamed_and_alias_types() {
    let mut server = TypeRegistryBuilder::with_primitives();
    server
        .register_object(ObjectDef::new("Soldier").field("Health", FieldType::U16))
        .unwrap();
    let medic = server.register_alias("Medic", "Soldier").unwrap();
    let server = Arc::new(server.build());

    let mut client = TypeRegistryBuilder::with_primitives();
    client
        .register_object(
            ObjectDef::new("ClientSoldier")
                .maps_from("Soldier")
                .field("Health", FieldType::U16),
        )
        .unwrap();
    client.register_alias("Medic", "ClientSoldier").unwrap();
    let client = Arc::new(client.build());

    let mut tx = Transmitter::new(server);
    let list = tx.create_list("units").unwrap();
    let soldier = tx
        .create_object_with(list, TypeId::new(0), [("Health", FieldValue::U16(80))])
        .unwrap();
    let healer = tx.create_object(list, medic).unwrap();
    let mut peer = join(&mut tx, 1, client);
    deliver(&mut tx, &mut peer);

    let mirror = peer.receiver.object(list, soldier).unwrap();
    assert_eq!(mirror.metadata().name(), "ClientSoldier");
    assert_eq!(mirror.get("Health"), Some(&FieldValue::U16(80)));
    assert_eq!(
        peer.receiver.object(list, healer).unwrap().metadata().name(),
        "Medic"
    );
}

#[test]
fn unmapped_type_is_a_stream_error() {
    let mut server = TypeRegistryBuilder::with_primitives();
    server
        .register_object(ObjectDef::new("Secret").field("Code", FieldType::U32))
        .unwrap();
    let server = Arc::new(server.build());
    let client = Arc::new(TypeRegistryBuilder::with_primitives().build());

    let mut tx = Transmitter::new(server);
    let list = tx.create_list("hidden").unwrap();
    tx.create_object(list, TypeId::new(0)).unwrap();
    let mut peer = join(&mut tx, 1, client);

    let frame = tx.encode_for_client(peer.id).unwrap();
    assert_eq!(
        peer.receiver.apply_frame_message(&frame.bytes),
        Err(CodecError::UnmappedType {
            type_name: "Secret".into()
        })
    );
    assert!(peer.receiver.list(list).unwrap().is_empty());
}

#[test]
fn objects_in_several_lists_stay_apart() {
    let (mut tx, registry, anims, type_id) = anim_setup();
    let props = tx.create_list("props").unwrap();
    let a = tx.create_object(anims, type_id).unwrap();
    let b = tx
        .create_object_with(props, type_id, [("Sequence", FieldValue::U32(7))])
        .unwrap();
    assert_eq!((a, b), (ObjectHandle::new(1), ObjectHandle::new(1)));

    let mut peer = join(&mut tx, 1, registry);
    let applied = deliver(&mut tx, &mut peer);
    assert_eq!(applied.events.len(), 2);
    assert_eq!(
        peer.receiver.object(props, b).unwrap().get("Sequence"),
        Some(&FieldValue::U32(7))
    );
    assert_eq!(
        peer.receiver.object(anims, a).unwrap().get("Sequence"),
        Some(&FieldValue::U32(0))
    );
}

#[test]
fn crowded_list_is_created_across_frames_within_wire_limits() {
    let mut builder = TypeRegistryBuilder::with_primitives();
    let sign = builder
        .register_object(ObjectDef::new("Sign").field("Text", FieldType::String))
        .unwrap();
    let registry = Arc::new(builder.build());
    let mut tx = Transmitter::new(Arc::clone(&registry));
    let list = tx.create_list("signs").unwrap();
    let text = FieldValue::Str(Some("x".repeat(60)));
    for _ in 0..1000 {
        tx.create_object_with(list, sign, [("Text", text.clone())])
            .unwrap();
    }
    let mut peer = join(&mut tx, 1, registry);
    let limits = wire::Limits::default();

    // The first frame is lost; its creates repeat ahead of the rest.
    let lost = tx.encode_for_client(peer.id).unwrap();
    assert!(lost.bytes.len() <= limits.max_message_bytes);
    assert!(lost.stats.creates < 1000);

    for _ in 0..3 {
        let frame = tx.encode_for_client(peer.id).unwrap();
        assert!(frame.bytes.len() <= limits.max_message_bytes);
        peer.receiver
            .apply_frame_message(&frame.bytes)
            .unwrap()
            .unwrap();
        tx.acknowledge(peer.id, frame.sequence).unwrap();
    }

    let mirror = peer.receiver.list(list).unwrap();
    assert_eq!(mirror.len(), 1000);
    assert!(mirror.iter().all(|object| object.get("Text") == Some(&text)));
    assert_eq!(tx.encode_for_client(peer.id).unwrap().stats.blocks(), 0);
}
