//! Transmitter: owns object lists and runs the per-client encode pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bitstream::BitWriter;
use schema::{FieldValue, TypeId, TypeMetadata, TypeRegistry};
use wire::{encode_message, encode_section, section_len, MessageHeader, MessageKind, HEADER_SIZE};

use crate::client::{BlockWritten, ClientState, FrameEdits, ObjectView, Staged, ViewEdit};
use crate::config::{SnapshotPolicy, TransmitConfig};
use crate::error::{CodecError, CodecResult, LimitKind};
use crate::limits::CodecLimits;
use crate::object::{NetworkObject, ObjectList};
use crate::types::{ClientId, ListId, ObjectHandle, Sequence};

/// Counts of what one frame carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub creates: usize,
    pub updates: usize,
    pub destroys: usize,
    /// Fields written with a changed marker inside update blocks.
    pub changed_fields: usize,
}

impl FrameStats {
    fn record(&mut self, written: BlockWritten) {
        match written {
            BlockWritten::Nothing => {}
            BlockWritten::Create => self.creates += 1,
            BlockWritten::Update { changed } => {
                self.updates += 1;
                self.changed_fields += changed;
            }
            BlockWritten::Destroy => self.destroys += 1,
        }
    }

    /// Total object blocks.
    #[must_use]
    pub const fn blocks(&self) -> usize {
        self.creates + self.updates + self.destroys
    }
}

/// A frame message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub client: ClientId,
    pub sequence: Sequence,
    pub bytes: Vec<u8>,
    pub stats: FrameStats,
}

/// Frames from one pass over every client.
///
/// A client whose frame fails keeps its state untouched and is listed in
/// `failed`; the other clients' frames are still produced.
#[derive(Debug, Default)]
pub struct EncodedPass {
    pub frames: Vec<EncodedFrame>,
    pub failed: Vec<(ClientId, CodecError)>,
}

/// Snapshot values of every live object, taken once per pass.
type PassSnapshot = Vec<HashMap<ObjectHandle, Vec<FieldValue>>>;

/// Authoritative side of object list replication.
///
/// Game code creates, mutates, and destroys objects between passes; each
/// pass encodes one frame per client against that client's own view.
#[derive(Debug)]
pub struct Transmitter {
    registry: Arc<TypeRegistry>,
    registry_hash: u64,
    config: TransmitConfig,
    limits: CodecLimits,
    wire_limits: wire::Limits,
    lists: Vec<ObjectList>,
    clients: BTreeMap<ClientId, ClientState>,
}

impl Transmitter {
    /// Creates a transmitter with the default configuration.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, TransmitConfig::default(), CodecLimits::default())
    }

    #[must_use]
    pub fn with_config(
        registry: Arc<TypeRegistry>,
        config: TransmitConfig,
        limits: CodecLimits,
    ) -> Self {
        let registry_hash = registry.hash();
        Self {
            registry,
            registry_hash,
            config,
            limits,
            wire_limits: wire::Limits::default(),
            lists: Vec::new(),
            clients: BTreeMap::new(),
        }
    }

    /// Replaces the wire limits. Frames are built to fit them and incoming
    /// acks are decoded with them.
    #[must_use]
    pub fn with_wire_limits(mut self, wire_limits: wire::Limits) -> Self {
        self.wire_limits = wire_limits;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn registry_hash(&self) -> u64 {
        self.registry_hash
    }

    #[must_use]
    pub const fn config(&self) -> &TransmitConfig {
        &self.config
    }

    /// Creates a named list. Ids follow creation order.
    pub fn create_list(&mut self, name: impl Into<String>) -> CodecResult<ListId> {
        let name = name.into();
        if self.lists.iter().any(|list| list.name() == name) {
            return Err(CodecError::DuplicateList { name });
        }
        let too_many = CodecError::LimitsExceeded {
            kind: LimitKind::Lists,
            limit: self.limits.max_lists,
            actual: self.lists.len() + 1,
        };
        if self.lists.len() >= self.limits.max_lists {
            return Err(too_many);
        }
        let id = ListId::new(u32::try_from(self.lists.len()).map_err(|_| too_many)?);
        self.lists
            .push(ObjectList::new(id, name, self.limits.max_objects_per_list));
        for client in self.clients.values_mut() {
            client.add_list();
        }
        Ok(id)
    }

    #[must_use]
    pub fn list(&self, id: ListId) -> Option<&ObjectList> {
        self.lists.get(id.raw() as usize)
    }

    #[must_use]
    pub fn list_by_name(&self, name: &str) -> Option<&ObjectList> {
        self.lists.iter().find(|list| list.name() == name)
    }

    pub fn lists(&self) -> impl Iterator<Item = &ObjectList> {
        self.lists.iter()
    }

    fn list_mut(&mut self, id: ListId) -> CodecResult<&mut ObjectList> {
        self.lists
            .get_mut(id.raw() as usize)
            .ok_or(CodecError::UnknownList { list: id.raw() })
    }

    fn metadata(&self, type_id: TypeId) -> CodecResult<Arc<TypeMetadata>> {
        self.registry
            .get(type_id)
            .cloned()
            .ok_or(CodecError::UnknownType {
                type_id: type_id.raw(),
            })
    }

    /// Creates an object with every field at its default.
    pub fn create_object(&mut self, list: ListId, type_id: TypeId) -> CodecResult<ObjectHandle> {
        self.create_object_with(list, type_id, std::iter::empty())
    }

    /// Creates an object, overriding the named fields.
    pub fn create_object_with<'a>(
        &mut self,
        list: ListId,
        type_id: TypeId,
        values: impl IntoIterator<Item = (&'a str, FieldValue)>,
    ) -> CodecResult<ObjectHandle> {
        let metadata = self.metadata(type_id)?;
        let mut live = metadata
            .fields()
            .iter()
            .map(|field| {
                field
                    .converter
                    .create_instance(&field.converter.default_value())
                    .map_err(|e| CodecError::field(metadata.name(), &field.name, e))
            })
            .collect::<CodecResult<Vec<_>>>()?;
        for (name, value) in values {
            let index = metadata
                .field_index(name)
                .ok_or_else(|| CodecError::UnknownField {
                    type_name: metadata.name().to_string(),
                    field: name.to_string(),
                })?;
            live[index] = value;
        }
        self.list_mut(list)?.create_object(metadata, live)
    }

    /// Sets a live field value by name.
    pub fn set_field(
        &mut self,
        list: ListId,
        handle: ObjectHandle,
        field: &str,
        value: FieldValue,
    ) -> CodecResult<()> {
        let object = self.list_mut(list)?.live_mut(handle)?;
        let index = object
            .metadata()
            .field_index(field)
            .ok_or_else(|| CodecError::UnknownField {
                type_name: object.metadata().name().to_string(),
                field: field.to_string(),
            })?;
        object.set(index, value)
    }

    #[must_use]
    pub fn object(&self, list: ListId, handle: ObjectHandle) -> Option<&NetworkObject> {
        self.list(list).and_then(|l| l.get(handle))
    }

    /// Schedules a destroy for every client that has seen the object.
    pub fn destroy_object(&mut self, list: ListId, handle: ObjectHandle) -> CodecResult<()> {
        self.list_mut(list)?.destroy_object(handle)?;
        self.finalize_destroyed();
        Ok(())
    }

    /// Starts tracking a client. Every live object will be created for it.
    pub fn add_client(&mut self, client: ClientId) -> CodecResult<()> {
        if self.clients.contains_key(&client) {
            return Err(CodecError::DuplicateClient { client });
        }
        self.clients
            .insert(client, ClientState::new(client, self.lists.len()));
        log::info!("{client} added to transmitter");
        Ok(())
    }

    /// Drops a client and everything pending for it.
    pub fn remove_client(&mut self, client: ClientId) -> bool {
        let removed = self.clients.remove(&client).is_some();
        if removed {
            log::info!("{client} removed from transmitter");
            self.finalize_destroyed();
        }
        removed
    }

    #[must_use]
    pub fn has_client(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    pub fn client_ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.keys().copied()
    }

    /// Newest frame the client has acknowledged.
    #[must_use]
    pub fn last_acked(&self, client: ClientId) -> Option<Sequence> {
        self.clients.get(&client).map(ClientState::last_acked)
    }

    /// Builds the registry description message sent on connect.
    pub fn encode_registry_message(&self) -> CodecResult<Vec<u8>> {
        let payload = self.registry.describe().encode();
        Ok(encode_message(
            MessageHeader::registry(self.registry_hash, 0),
            &payload,
        )?)
    }

    /// Encodes the next frame for one client.
    pub fn encode_for_client(&mut self, client: ClientId) -> CodecResult<EncodedFrame> {
        self.encode_for_client_filtered(client, &|_, _| true)
    }

    /// Encodes the next frame for one client, skipping objects the filter
    /// deems irrelevant this pass.
    ///
    /// Destroys, unacknowledged creates, and unacknowledged field changes are
    /// repeated regardless of the filter.
    pub fn encode_for_client_filtered(
        &mut self,
        client: ClientId,
        filter: &dyn Fn(ClientId, &NetworkObject) -> bool,
    ) -> CodecResult<EncodedFrame> {
        let snapshot = self.snapshot()?;
        let frame = self.encode_pass(client, &snapshot, filter)?;
        self.finalize_destroyed();
        Ok(frame)
    }

    /// Encodes the next frame for every client.
    pub fn encode_all(&mut self) -> CodecResult<EncodedPass> {
        self.encode_all_filtered(&|_, _| true)
    }

    /// Encodes the next frame for every client. Only a failed snapshot of the
    /// live objects is an error; per-client failures land in the pass.
    pub fn encode_all_filtered(
        &mut self,
        filter: &dyn Fn(ClientId, &NetworkObject) -> bool,
    ) -> CodecResult<EncodedPass> {
        let snapshot = self.snapshot()?;
        let clients: Vec<ClientId> = self.clients.keys().copied().collect();
        let mut pass = EncodedPass::default();
        for client in clients {
            match self.encode_pass(client, &snapshot, filter) {
                Ok(frame) => pass.frames.push(frame),
                Err(e) => {
                    log::warn!("no frame for {client}: {e}");
                    pass.failed.push((client, e));
                }
            }
        }
        self.finalize_destroyed();
        Ok(pass)
    }

    /// Records that `client` applied frame `sequence`.
    pub fn acknowledge(&mut self, client: ClientId, sequence: Sequence) -> CodecResult<()> {
        self.clients
            .get_mut(&client)
            .ok_or(CodecError::UnknownClient { client })?
            .acknowledge(sequence)?;
        self.finalize_destroyed();
        Ok(())
    }

    /// Decodes an ack message from `client` and applies it.
    pub fn handle_ack_message(&mut self, client: ClientId, bytes: &[u8]) -> CodecResult<Sequence> {
        let message = wire::decode_message(bytes, &self.wire_limits)?;
        if message.header.kind != MessageKind::Ack {
            return Err(CodecError::UnexpectedMessage {
                expected: MessageKind::Ack,
                found: message.header.kind,
            });
        }
        if message.header.registry_hash != self.registry_hash {
            return Err(CodecError::RegistryMismatch {
                expected: self.registry_hash,
                found: message.header.registry_hash,
            });
        }
        let sequence = Sequence::new(message.header.sequence);
        self.acknowledge(client, sequence)?;
        Ok(sequence)
    }

    fn snapshot(&self) -> CodecResult<PassSnapshot> {
        self.lists
            .iter()
            .map(|list| {
                list.iter()
                    .filter(|object| !object.is_destroyed())
                    .map(|object| Ok((object.handle(), object.snapshot()?)))
                    .collect()
            })
            .collect()
    }

    /// Builds one client's frame and commits its view changes.
    ///
    /// Pending blocks (destroys, unacknowledged creates and field sends) are
    /// written first and must fit. New creates and updates of settled views
    /// fill the rest of the frame and are deferred to a later pass when they
    /// do not fit. Nothing about the client changes unless the frame is built.
    fn encode_pass(
        &mut self,
        client_id: ClientId,
        snapshot: &PassSnapshot,
        filter: &dyn Fn(ClientId, &NetworkObject) -> bool,
    ) -> CodecResult<EncodedFrame> {
        let client = self
            .clients
            .get(&client_id)
            .ok_or(CodecError::UnknownClient { client: client_id })?;
        let unacked = client.unacked_frames() as usize;
        if unacked >= self.limits.max_unacked_frames {
            return Err(CodecError::LimitsExceeded {
                kind: LimitKind::UnackedFrames,
                limit: self.limits.max_unacked_frames,
                actual: unacked + 1,
            });
        }
        let sequence = client.pending_sequence()?;
        let emit_unchanged = self.config.emit_unchanged_objects;

        let mut frame = FrameBudget::new(&self.lists, &self.limits, &self.wire_limits);
        let mut edits = FrameEdits::new();
        let mut stats = FrameStats::default();
        let mut deferred = 0usize;
        for pending_pass in [true, false] {
            for (index, (list, live)) in self.lists.iter().zip(snapshot).enumerate() {
                let views = client
                    .views(index)
                    .ok_or(CodecError::UnknownList { list: list.id().raw() })?;
                for object in list.iter() {
                    let handle = object.handle();
                    let view = views.get(&handle);
                    let pending = view.is_some_and(|v| object.is_destroyed() || !v.is_settled());
                    if pending != pending_pass {
                        continue;
                    }
                    let mut block = BitWriter::new();
                    let staged = if object.is_destroyed() {
                        if view.is_none() {
                            continue;
                        }
                        ObjectView::write_destroy(handle, &mut block)
                    } else {
                        let Some(values) = live.get(&handle) else {
                            continue;
                        };
                        if !pending && !filter(client_id, object) {
                            continue;
                        }
                        match view {
                            Some(view) => view.write_live(
                                handle,
                                object.metadata(),
                                values,
                                emit_unchanged,
                                &mut block,
                            )?,
                            None => {
                                let view = ObjectView::start(
                                    handle,
                                    object.metadata(),
                                    values,
                                    sequence,
                                    &mut block,
                                )?;
                                Staged {
                                    written: BlockWritten::Create,
                                    edit: Some(ViewEdit::Start(view)),
                                }
                            }
                        }
                    };
                    if staged.written == BlockWritten::Nothing {
                        continue;
                    }
                    if let Err(e) = frame.push(index, &block) {
                        if pending {
                            return Err(e);
                        }
                        deferred += 1;
                        continue;
                    }
                    stats.record(staged.written);
                    if let Some(edit) = staged.edit {
                        edits.push((index, handle, edit));
                    }
                }
            }
        }

        let payload = frame.finish()?;
        let bytes = encode_message(
            MessageHeader::frame(self.registry_hash, sequence.raw(), 0),
            &payload,
        )?;
        log::debug!(
            "frame {} for {client_id}: {} creates, {} updates, {} destroys, {} deferred, {} bytes",
            sequence.raw(),
            stats.creates,
            stats.updates,
            stats.destroys,
            deferred,
            bytes.len()
        );

        let client = self
            .clients
            .get_mut(&client_id)
            .ok_or(CodecError::UnknownClient { client: client_id })?;
        client.commit(sequence, edits);
        if self.config.snapshot_policy == SnapshotPolicy::AdvanceOnSend {
            client.acknowledge(sequence)?;
        }
        Ok(EncodedFrame {
            client: client_id,
            sequence,
            bytes,
            stats,
        })
    }

    fn finalize_destroyed(&mut self) {
        let clients = &self.clients;
        for (index, list) in self.lists.iter_mut().enumerate() {
            list.finalize_destroyed(|handle| {
                clients
                    .values()
                    .any(|client| client.observes(index, handle))
            });
        }
    }
}

/// One list's section body while a frame is being built.
struct SectionBody {
    list_id: u32,
    body: BitWriter,
    blocks: usize,
}

impl SectionBody {
    fn body_len(&self) -> usize {
        self.body.bits_written().div_ceil(8)
    }
}

/// Section bodies of one frame, kept within the codec and wire limits.
struct FrameBudget<'a> {
    limits: &'a CodecLimits,
    wire_limits: &'a wire::Limits,
    sections: Vec<SectionBody>,
    open_sections: usize,
    payload_len: usize,
}

impl<'a> FrameBudget<'a> {
    fn new(lists: &[ObjectList], limits: &'a CodecLimits, wire_limits: &'a wire::Limits) -> Self {
        Self {
            limits,
            wire_limits,
            sections: lists
                .iter()
                .map(|list| SectionBody {
                    list_id: list.id().raw(),
                    body: BitWriter::new(),
                    blocks: 0,
                })
                .collect(),
            open_sections: 0,
            payload_len: 0,
        }
    }

    /// Appends `block` to list `index`, or leaves the frame unchanged when
    /// the block does not fit.
    fn push(&mut self, index: usize, block: &BitWriter) -> CodecResult<()> {
        let Some(section) = self.sections.get_mut(index) else {
            return Err(CodecError::UnknownList {
                list: u32::try_from(index).unwrap_or(u32::MAX),
            });
        };
        let blocks = section.blocks + 1;
        if blocks > self.limits.max_blocks_per_section {
            return Err(CodecError::LimitsExceeded {
                kind: LimitKind::BlocksPerSection,
                limit: self.limits.max_blocks_per_section,
                actual: blocks,
            });
        }
        let body_len = (section.body.bits_written() + block.bits_written()).div_ceil(8);
        if body_len > self.wire_limits.max_section_len {
            return Err(too_large(self.wire_limits.max_section_len, body_len));
        }
        let opening = section.blocks == 0;
        if opening && self.open_sections >= self.wire_limits.max_sections {
            return Err(CodecError::LimitsExceeded {
                kind: LimitKind::FrameSections,
                limit: self.wire_limits.max_sections,
                actual: self.open_sections + 1,
            });
        }
        let previous = if opening {
            0
        } else {
            section_len(section.list_id, section.body_len())
        };
        let payload_len = self.payload_len - previous + section_len(section.list_id, body_len);
        let max_payload = self.wire_limits.max_message_bytes.saturating_sub(HEADER_SIZE);
        if payload_len > max_payload {
            return Err(too_large(max_payload, payload_len));
        }

        section.body.append(block);
        section.blocks = blocks;
        self.payload_len = payload_len;
        if opening {
            self.open_sections += 1;
        }
        Ok(())
    }

    /// Encodes every non-empty section in list order.
    fn finish(self) -> CodecResult<Vec<u8>> {
        let mut payload = Vec::with_capacity(self.payload_len);
        for section in self.sections {
            if section.blocks > 0 {
                encode_section(section.list_id, &section.body.finish(), &mut payload)?;
            }
        }
        Ok(payload)
    }
}

fn too_large(limit: usize, actual: usize) -> CodecError {
    CodecError::LimitsExceeded {
        kind: LimitKind::FrameBytes,
        limit,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{FieldType, ObjectDef, TypeRegistryBuilder};

    fn registry() -> Arc<TypeRegistry> {
        let mut builder = TypeRegistryBuilder::with_primitives();
        builder
            .register_object(
                ObjectDef::new("Pickup")
                    .field("Kind", FieldType::U8)
                    .field("Origin", FieldType::Vector3),
            )
            .unwrap();
        Arc::new(builder.build())
    }

    fn setup() -> (Transmitter, ListId, TypeId) {
        let registry = registry();
        let type_id = registry.by_name("Pickup").unwrap().id();
        let mut tx = Transmitter::new(registry);
        let list = tx.create_list("pickups").unwrap();
        (tx, list, type_id)
    }

    #[test]
    fn lists_get_sequential_ids_and_unique_names() {
        let (mut tx, list, _) = setup();
        assert_eq!(list, ListId::new(0));
        assert_eq!(tx.create_list("effects").unwrap(), ListId::new(1));
        assert_eq!(
            tx.create_list("pickups"),
            Err(CodecError::DuplicateList {
                name: "pickups".into()
            })
        );
        assert_eq!(tx.list_by_name("effects").unwrap().id(), ListId::new(1));
    }

    #[test]
    fn create_with_overrides_and_unknown_field() {
        let (mut tx, list, type_id) = setup();
        let handle = tx
            .create_object_with(list, type_id, [("Kind", FieldValue::U8(3))])
            .unwrap();
        let object = tx.object(list, handle).unwrap();
        assert_eq!(object.get("Kind"), Some(&FieldValue::U8(3)));
        assert_eq!(object.get("Origin"), Some(&FieldValue::Vec3([0.0; 3])));

        let err = tx
            .create_object_with(list, type_id, [("Nope", FieldValue::U8(3))])
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownField { .. }));
    }

    #[test]
    fn unknown_type_and_list_are_errors() {
        let (mut tx, list, _) = setup();
        assert_eq!(
            tx.create_object(list, TypeId::new(9)),
            Err(CodecError::UnknownType { type_id: 9 })
        );
        assert_eq!(
            tx.create_object(ListId::new(5), TypeId::new(0)),
            Err(CodecError::UnknownList { list: 5 })
        );
    }

    #[test]
    fn first_frame_creates_then_quiet() {
        let (mut tx, list, type_id) = setup();
        tx.create_object(list, type_id).unwrap();
        tx.add_client(ClientId::new(1)).unwrap();

        let frame = tx.encode_for_client(ClientId::new(1)).unwrap();
        assert_eq!(frame.sequence, Sequence::new(1));
        assert_eq!(frame.stats.creates, 1);

        tx.acknowledge(ClientId::new(1), frame.sequence).unwrap();
        let frame = tx.encode_for_client(ClientId::new(1)).unwrap();
        assert_eq!(frame.stats.blocks(), 0);
        assert_eq!(frame.bytes.len(), wire::HEADER_SIZE);
    }

    #[test]
    fn destroy_without_observers_finalizes_immediately() {
        let (mut tx, list, type_id) = setup();
        let handle = tx.create_object(list, type_id).unwrap();
        tx.destroy_object(list, handle).unwrap();
        assert!(tx.object(list, handle).is_none());
    }

    #[test]
    fn silent_client_hits_unacked_limit() {
        let registry = registry();
        let mut tx = Transmitter::with_config(
            registry,
            TransmitConfig::default(),
            CodecLimits {
                max_unacked_frames: 2,
                ..CodecLimits::for_testing()
            },
        );
        tx.add_client(ClientId::new(1)).unwrap();
        tx.encode_for_client(ClientId::new(1)).unwrap();
        tx.encode_for_client(ClientId::new(1)).unwrap();
        let err = tx.encode_for_client(ClientId::new(1)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::LimitsExceeded {
                kind: LimitKind::UnackedFrames,
                ..
            }
        ));
    }

    #[test]
    fn advance_on_send_never_accumulates_unacked() {
        let mut tx = Transmitter::with_config(
            registry(),
            TransmitConfig::advance_on_send(),
            CodecLimits {
                max_unacked_frames: 1,
                ..CodecLimits::for_testing()
            },
        );
        tx.add_client(ClientId::new(1)).unwrap();
        for _ in 0..5 {
            tx.encode_for_client(ClientId::new(1)).unwrap();
        }
        assert_eq!(tx.last_acked(ClientId::new(1)), Some(Sequence::new(5)));
    }

    #[test]
    fn ack_message_must_match_registry() {
        let (mut tx, _, _) = setup();
        tx.add_client(ClientId::new(1)).unwrap();
        let frame = tx.encode_for_client(ClientId::new(1)).unwrap();

        let good = encode_message(
            MessageHeader::ack(tx.registry_hash(), frame.sequence.raw()),
            &[],
        )
        .unwrap();
        assert_eq!(
            tx.handle_ack_message(ClientId::new(1), &good),
            Ok(Sequence::new(1))
        );

        let bad = encode_message(MessageHeader::ack(!tx.registry_hash(), 1), &[]).unwrap();
        assert!(matches!(
            tx.handle_ack_message(ClientId::new(1), &bad),
            Err(CodecError::RegistryMismatch { .. })
        ));

        let frame_msg = encode_message(MessageHeader::frame(tx.registry_hash(), 1, 0), &[]).unwrap();
        assert!(matches!(
            tx.handle_ack_message(ClientId::new(1), &frame_msg),
            Err(CodecError::UnexpectedMessage { .. })
        ));
    }

    #[test]
    fn filter_skips_irrelevant_objects() {
        let (mut tx, list, type_id) = setup();
        let near = tx
            .create_object_with(list, type_id, [("Kind", FieldValue::U8(1))])
            .unwrap();
        tx.create_object_with(list, type_id, [("Kind", FieldValue::U8(2))])
            .unwrap();
        tx.add_client(ClientId::new(1)).unwrap();

        let only_kind_one =
            |_: ClientId, object: &NetworkObject| object.get("Kind") == Some(&FieldValue::U8(1));
        let frame = tx
            .encode_for_client_filtered(ClientId::new(1), &only_kind_one)
            .unwrap();
        assert_eq!(frame.stats.creates, 1);
        assert!(tx.object(list, near).is_some());
    }

    fn sign_registry() -> Arc<TypeRegistry> {
        let mut builder = TypeRegistryBuilder::with_primitives();
        builder
            .register_object(ObjectDef::new("Sign").field("Text", FieldType::String))
            .unwrap();
        Arc::new(builder.build())
    }

    fn text(len: usize) -> FieldValue {
        FieldValue::Str(Some("x".repeat(len)))
    }

    #[test]
    fn oversized_creates_are_spread_over_frames() {
        let registry = sign_registry();
        let type_id = registry.by_name("Sign").unwrap().id();
        let mut tx = Transmitter::new(Arc::clone(&registry));
        let list = tx.create_list("signs").unwrap();
        for _ in 0..1000 {
            tx.create_object_with(list, type_id, [("Text", text(60))])
                .unwrap();
        }
        tx.add_client(ClientId::new(1)).unwrap();

        let limits = wire::Limits::default();
        let mut created = 0;
        let mut frames = 0;
        while created < 1000 {
            let frame = tx.encode_for_client(ClientId::new(1)).unwrap();
            assert!(frame.bytes.len() <= limits.max_message_bytes);
            let message = wire::decode_message(&frame.bytes, &limits).unwrap();
            let sections = wire::decode_sections(message.payload, &limits).unwrap();
            assert!(sections.iter().all(|s| s.body.len() <= limits.max_section_len));
            assert!(frame.stats.creates > 0);
            created += frame.stats.creates;
            frames += 1;
            tx.acknowledge(ClientId::new(1), frame.sequence).unwrap();
        }
        assert_eq!(created, 1000);
        assert!(frames > 1);

        let quiet = tx.encode_for_client(ClientId::new(1)).unwrap();
        assert_eq!(quiet.stats.blocks(), 0);
    }

    #[test]
    fn unacked_creates_repeat_before_deferred_ones() {
        let registry = sign_registry();
        let type_id = registry.by_name("Sign").unwrap().id();
        let mut tx = Transmitter::new(Arc::clone(&registry)).with_wire_limits(wire::Limits {
            max_message_bytes: 400,
            ..wire::Limits::for_testing()
        });
        let list = tx.create_list("signs").unwrap();
        for _ in 0..10 {
            tx.create_object_with(list, type_id, [("Text", text(60))])
                .unwrap();
        }
        tx.add_client(ClientId::new(1)).unwrap();

        let first = tx.encode_for_client(ClientId::new(1)).unwrap();
        assert!(first.stats.creates > 0 && first.stats.creates < 10);
        // Nothing acknowledged: the same creates fill the frame again.
        let second = tx.encode_for_client(ClientId::new(1)).unwrap();
        assert_eq!(second.stats.creates, first.stats.creates);
        assert_eq!(second.sequence, Sequence::new(2));
    }

    #[test]
    fn failed_encode_leaves_client_untouched() {
        let registry = sign_registry();
        let type_id = registry.by_name("Sign").unwrap().id();
        let mut tx = Transmitter::new(Arc::clone(&registry)).with_wire_limits(wire::Limits {
            max_message_bytes: 128,
            ..wire::Limits::for_testing()
        });
        let list = tx.create_list("signs").unwrap();
        let handle = tx
            .create_object_with(list, type_id, [("Text", text(4))])
            .unwrap();
        tx.add_client(ClientId::new(1)).unwrap();
        let first = tx.encode_for_client(ClientId::new(1)).unwrap();
        assert_eq!(first.stats.creates, 1);

        // The unacknowledged create must repeat and no longer fits.
        tx.set_field(list, handle, "Text", text(200)).unwrap();
        let err = tx.encode_for_client(ClientId::new(1)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::LimitsExceeded {
                kind: LimitKind::FrameBytes,
                ..
            }
        ));
        assert_eq!(
            tx.acknowledge(ClientId::new(1), Sequence::new(2)),
            Err(CodecError::AckOutOfRange {
                client: ClientId::new(1),
                sequence: 2
            })
        );

        tx.set_field(list, handle, "Text", text(8)).unwrap();
        let retry = tx.encode_for_client(ClientId::new(1)).unwrap();
        assert_eq!(retry.sequence, Sequence::new(2));
        assert_eq!(retry.stats.creates, 1);
    }

    #[test]
    fn stalled_client_does_not_cost_others_their_frames() {
        let (tx, list, type_id) = setup();
        let mut tx = Transmitter::with_config(
            Arc::clone(tx.registry()),
            TransmitConfig::default(),
            CodecLimits {
                max_unacked_frames: 2,
                ..CodecLimits::for_testing()
            },
        );
        assert_eq!(tx.create_list("pickups").unwrap(), list);
        let handle = tx.create_object(list, type_id).unwrap();
        let silent = ClientId::new(1);
        let healthy = ClientId::new(2);
        tx.add_client(silent).unwrap();
        tx.add_client(healthy).unwrap();

        for pass_number in 1..=4u32 {
            tx.set_field(list, handle, "Kind", FieldValue::U8(pass_number as u8))
                .unwrap();
            let pass = tx.encode_all().unwrap();
            let frame = pass
                .frames
                .iter()
                .find(|frame| frame.client == healthy)
                .unwrap();
            assert_eq!(frame.sequence, Sequence::new(pass_number));
            tx.acknowledge(healthy, frame.sequence).unwrap();

            if pass_number > 2 {
                assert_eq!(pass.frames.len(), 1);
                assert!(matches!(
                    pass.failed.as_slice(),
                    [(
                        client,
                        CodecError::LimitsExceeded {
                            kind: LimitKind::UnackedFrames,
                            ..
                        }
                    )] if *client == silent
                ));
            } else {
                assert!(pass.failed.is_empty());
            }
        }
    }
}
