//! Per-client transmit state: what each client is known to hold.
//!
//! Every client owns an independent view per object. A view records the
//! snapshot values the client has acknowledged and, per field, the newest
//! send the client has not acknowledged yet. Fields with an outstanding send
//! are repeated every frame, written so they decode without a previous value,
//! until an ack covers them.

use std::collections::HashMap;

use bitstream::BitWriter;
use schema::{FieldValue, TypeMetadata};
use wire::BlockHeader;

use crate::error::{CodecError, CodecResult};
use crate::types::{ClientId, ObjectHandle, Sequence};

/// Lifecycle of an object as seen by one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Create blocks sent since `first`, none acknowledged.
    Creating { first: Sequence },
    /// Client holds the object.
    Live,
    /// Destroy blocks sent since `first`, none acknowledged.
    Destroying { first: Sequence },
}

#[derive(Debug, Clone)]
struct InFlight {
    sequence: Sequence,
    value: FieldValue,
}

/// One client's view of one object.
#[derive(Debug, Clone)]
pub(crate) struct ObjectView {
    phase: Phase,
    acked: Vec<FieldValue>,
    in_flight: Vec<Option<InFlight>>,
}

/// What an encode step wrote for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockWritten {
    Nothing,
    Create,
    Update { changed: usize },
    Destroy,
}

/// View change made by one block, applied once its frame is committed.
#[derive(Debug, Clone)]
pub(crate) enum ViewEdit {
    /// First create block for an object the client has no view of.
    Start(ObjectView),
    /// Field values carried by a create or update block.
    Sent(Vec<(usize, FieldValue)>),
    Destroy,
}

/// A block written to a scratch writer, with the view change it implies.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub(crate) written: BlockWritten,
    pub(crate) edit: Option<ViewEdit>,
}

impl Staged {
    const NOTHING: Self = Self {
        written: BlockWritten::Nothing,
        edit: None,
    };
}

/// Edits staged by one encode pass, keyed by list index and handle.
pub(crate) type FrameEdits = Vec<(usize, ObjectHandle, ViewEdit)>;

impl ObjectView {
    /// Writes a create block with full values and returns the view it
    /// starts once `sequence` is committed.
    pub(crate) fn start(
        handle: ObjectHandle,
        metadata: &TypeMetadata,
        snapshot: &[FieldValue],
        sequence: Sequence,
        w: &mut BitWriter,
    ) -> CodecResult<Self> {
        write_create(handle, metadata, snapshot, w)?;
        Ok(Self {
            phase: Phase::Creating { first: sequence },
            acked: metadata
                .fields()
                .iter()
                .map(|f| f.converter.default_value())
                .collect(),
            in_flight: snapshot
                .iter()
                .map(|value| {
                    Some(InFlight {
                        sequence,
                        value: value.clone(),
                    })
                })
                .collect(),
        })
    }

    /// Whether an update for `snapshot` would carry anything.
    fn has_changes(&self, snapshot: &[FieldValue]) -> bool {
        self.in_flight.iter().any(Option::is_some)
            || self
                .acked
                .iter()
                .zip(snapshot)
                .any(|(a, s)| !a.same_as(s))
    }

    /// Writes whatever this client needs to hear about a live object.
    ///
    /// The view itself is left alone; the returned edit describes the change.
    pub(crate) fn write_live(
        &self,
        handle: ObjectHandle,
        metadata: &TypeMetadata,
        snapshot: &[FieldValue],
        emit_unchanged: bool,
        w: &mut BitWriter,
    ) -> CodecResult<Staged> {
        match self.phase {
            Phase::Creating { .. } => {
                write_create(handle, metadata, snapshot, w)?;
                Ok(Staged {
                    written: BlockWritten::Create,
                    edit: Some(ViewEdit::Sent(
                        snapshot.iter().cloned().enumerate().collect(),
                    )),
                })
            }
            Phase::Destroying { .. } => Ok(Staged::NOTHING),
            Phase::Live => {
                if !emit_unchanged && !self.has_changes(snapshot) {
                    return Ok(Staged::NOTHING);
                }
                BlockHeader::update(handle.raw()).write(w);
                let mut sent = Vec::new();
                for (index, (field, value)) in metadata.fields().iter().zip(snapshot).enumerate() {
                    let converter = &field.converter;
                    let written = if self.in_flight[index].is_some() {
                        converter.write_forced(value, w).map(|()| true)
                    } else {
                        converter.encode_and_write(value, &self.acked[index], w)
                    };
                    if written.map_err(|e| CodecError::field(metadata.name(), &field.name, e))? {
                        sent.push((index, value.clone()));
                    }
                }
                Ok(Staged {
                    written: BlockWritten::Update {
                        changed: sent.len(),
                    },
                    edit: Some(ViewEdit::Sent(sent)),
                })
            }
        }
    }

    /// Writes a destroy block; the view ends once it is acknowledged.
    pub(crate) fn write_destroy(handle: ObjectHandle, w: &mut BitWriter) -> Staged {
        BlockHeader::destroy(handle.raw()).write(w);
        Staged {
            written: BlockWritten::Destroy,
            edit: Some(ViewEdit::Destroy),
        }
    }

    /// Records a block sent in frame `sequence`.
    fn apply(&mut self, edit: ViewEdit, sequence: Sequence) {
        match edit {
            ViewEdit::Start(view) => *self = view,
            ViewEdit::Sent(values) => {
                for (index, value) in values {
                    if let Some(slot) = self.in_flight.get_mut(index) {
                        *slot = Some(InFlight { sequence, value });
                    }
                }
            }
            ViewEdit::Destroy => {
                if !matches!(self.phase, Phase::Destroying { .. }) {
                    self.phase = Phase::Destroying { first: sequence };
                }
            }
        }
    }

    /// Live with every sent value acknowledged.
    ///
    /// Only settled views may be skipped in a frame; anything pending has to
    /// be repeated so a later ack can cover it.
    pub(crate) fn is_settled(&self) -> bool {
        self.phase == Phase::Live && self.in_flight.iter().all(Option::is_none)
    }

    /// Applies an ack. Returns `false` once the view has ended.
    fn acknowledge(&mut self, sequence: Sequence) -> bool {
        match self.phase {
            Phase::Destroying { first } if first <= sequence => return false,
            Phase::Creating { first } if first <= sequence => self.phase = Phase::Live,
            _ => {}
        }
        for (slot, acked) in self.in_flight.iter_mut().zip(&mut self.acked) {
            if slot.as_ref().is_some_and(|sent| sent.sequence <= sequence) {
                if let Some(sent) = slot.take() {
                    *acked = sent.value;
                }
            }
        }
        true
    }
}

fn write_create(
    handle: ObjectHandle,
    metadata: &TypeMetadata,
    snapshot: &[FieldValue],
    w: &mut BitWriter,
) -> CodecResult<()> {
    BlockHeader::create(handle.raw(), metadata.id().raw()).write(w);
    for (field, value) in metadata.fields().iter().zip(snapshot) {
        field
            .converter
            .write(value, w)
            .map_err(|e| CodecError::field(metadata.name(), &field.name, e))?;
    }
    Ok(())
}

/// Transmit state for one connected client.
#[derive(Debug)]
pub(crate) struct ClientState {
    id: ClientId,
    last_sent: Sequence,
    last_acked: Sequence,
    views: Vec<HashMap<ObjectHandle, ObjectView>>,
}

impl ClientState {
    pub(crate) fn new(id: ClientId, lists: usize) -> Self {
        Self {
            id,
            last_sent: Sequence::default(),
            last_acked: Sequence::default(),
            views: (0..lists).map(|_| HashMap::new()).collect(),
        }
    }

    pub(crate) const fn id(&self) -> ClientId {
        self.id
    }

    pub(crate) const fn last_acked(&self) -> Sequence {
        self.last_acked
    }

    /// Frames sent but not yet covered by an ack.
    pub(crate) const fn unacked_frames(&self) -> u32 {
        self.last_sent.raw() - self.last_acked.raw()
    }

    pub(crate) fn add_list(&mut self) {
        self.views.push(HashMap::new());
    }

    pub(crate) fn views(&self, list: usize) -> Option<&HashMap<ObjectHandle, ObjectView>> {
        self.views.get(list)
    }

    /// Whether this client still has to be told about `handle`.
    pub(crate) fn observes(&self, list: usize, handle: ObjectHandle) -> bool {
        self.views
            .get(list)
            .is_some_and(|views| views.contains_key(&handle))
    }

    /// Sequence the next committed frame will carry.
    pub(crate) fn pending_sequence(&self) -> CodecResult<Sequence> {
        self.last_sent
            .next()
            .ok_or(CodecError::SequenceExhausted { client: self.id })
    }

    /// Marks frame `sequence` as sent and applies the view edits it carried.
    pub(crate) fn commit(&mut self, sequence: Sequence, edits: FrameEdits) {
        self.last_sent = sequence;
        for (list, handle, edit) in edits {
            let Some(views) = self.views.get_mut(list) else {
                continue;
            };
            match edit {
                ViewEdit::Start(view) => {
                    views.insert(handle, view);
                }
                edit => {
                    if let Some(view) = views.get_mut(&handle) {
                        view.apply(edit, sequence);
                    }
                }
            }
        }
    }

    /// Applies an acknowledgement of frame `sequence`.
    ///
    /// Acks arriving late or twice are harmless.
    pub(crate) fn acknowledge(&mut self, sequence: Sequence) -> CodecResult<()> {
        if sequence > self.last_sent {
            return Err(CodecError::AckOutOfRange {
                client: self.id,
                sequence: sequence.raw(),
            });
        }
        if sequence <= self.last_acked {
            return Ok(());
        }
        self.last_acked = sequence;
        for views in &mut self.views {
            views.retain(|_, view| view.acknowledge(sequence));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream::BitReader;
    use schema::{FieldType, ObjectDef, QuantizeOptions, TypeRegistry, TypeRegistryBuilder};
    use std::sync::Arc;
    use wire::{body_has_more, BlockKind};

    fn registry() -> TypeRegistry {
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
        builder.build()
    }

    fn meta(registry: &TypeRegistry) -> Arc<TypeMetadata> {
        Arc::clone(registry.by_name("Anim").unwrap())
    }

    fn snap(sequence: u32, frame: f32) -> Vec<FieldValue> {
        vec![FieldValue::U32(sequence), FieldValue::F32(frame)]
    }

    const HANDLE: ObjectHandle = ObjectHandle::new(1);

    fn started(metadata: &TypeMetadata, snapshot: &[FieldValue], sequence: u32) -> ObjectView {
        let mut w = BitWriter::new();
        ObjectView::start(HANDLE, metadata, snapshot, Sequence::new(sequence), &mut w).unwrap()
    }

    fn live_view(metadata: &TypeMetadata, snapshot: &[FieldValue]) -> ObjectView {
        let mut view = started(metadata, snapshot, 1);
        assert!(view.acknowledge(Sequence::new(1)));
        assert_eq!(view.phase, Phase::Live);
        view
    }

    /// Writes a live block and records it as sent in frame `sequence`.
    fn send(
        view: &mut ObjectView,
        metadata: &TypeMetadata,
        snapshot: &[FieldValue],
        sequence: u32,
        emit_unchanged: bool,
    ) -> BlockWritten {
        let mut w = BitWriter::new();
        let staged = view
            .write_live(HANDLE, metadata, snapshot, emit_unchanged, &mut w)
            .unwrap();
        if let Some(edit) = staged.edit {
            view.apply(edit, Sequence::new(sequence));
        }
        staged.written
    }

    #[test]
    fn create_block_carries_full_values() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut w = BitWriter::new();
        ObjectView::start(HANDLE, &metadata, &snap(5, 1.0), Sequence::new(1), &mut w).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        let header = BlockHeader::read(&mut r).unwrap();
        assert_eq!(header.kind, BlockKind::Create { type_id: 0 });
        assert_eq!(r.read_varu32().unwrap(), 5);
    }

    #[test]
    fn unchanged_live_object_writes_nothing() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut view = live_view(&metadata, &snap(0, 0.0));
        let mut w = BitWriter::new();
        let staged = view
            .write_live(HANDLE, &metadata, &snap(0, 0.0), false, &mut w)
            .unwrap();
        assert_eq!(staged.written, BlockWritten::Nothing);
        assert!(staged.edit.is_none());
        assert_eq!(w.bits_written(), 0);

        let written = send(&mut view, &metadata, &snap(0, 0.0), 2, true);
        assert_eq!(written, BlockWritten::Update { changed: 0 });
        assert!(view.is_settled());
    }

    #[test]
    fn unchanged_nan_is_not_a_change() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut view = live_view(&metadata, &snap(0, f32::NAN));
        assert_eq!(
            send(&mut view, &metadata, &snap(0, f32::NAN), 2, false),
            BlockWritten::Nothing
        );
    }

    #[test]
    fn update_block_matches_frame_scenario() {
        let registry = registry();
        let metadata = meta(&registry);
        let view = live_view(&metadata, &snap(0, 0.0));

        let mut w = BitWriter::new();
        let staged = view
            .write_live(HANDLE, &metadata, &snap(0, 12.25), false, &mut w)
            .unwrap();
        assert_eq!(staged.written, BlockWritten::Update { changed: 1 });
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        assert_eq!(BlockHeader::read(&mut r).unwrap(), BlockHeader::update(1));
        assert!(!r.read_bool().unwrap(), "Sequence unchanged");
        assert!(r.read_bool().unwrap(), "Frame changed");
        assert!(!r.read_bool().unwrap(), "Frame sign");
        assert_eq!(r.read_bits(10).unwrap(), 49);
        assert!(!body_has_more(&mut r).unwrap());
    }

    #[test]
    fn written_block_leaves_view_until_applied() {
        let registry = registry();
        let metadata = meta(&registry);
        let view = live_view(&metadata, &snap(0, 0.0));

        let mut w = BitWriter::new();
        view.write_live(HANDLE, &metadata, &snap(4, 0.0), false, &mut w)
            .unwrap();
        assert!(view.is_settled());

        let mut w = BitWriter::new();
        ObjectView::write_destroy(HANDLE, &mut w);
        assert_eq!(view.phase, Phase::Live);
    }

    #[test]
    fn unacked_field_is_resent_until_acked() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut view = live_view(&metadata, &snap(0, 0.0));

        for sequence in 2..=3 {
            let written = send(&mut view, &metadata, &snap(7, 0.0), sequence, false);
            assert_eq!(written, BlockWritten::Update { changed: 1 });
        }

        // Ack of the first send does not cover the newest one.
        assert!(view.acknowledge(Sequence::new(2)));
        let written = send(&mut view, &metadata, &snap(7, 0.0), 4, false);
        assert_eq!(written, BlockWritten::Update { changed: 1 });

        assert!(view.acknowledge(Sequence::new(4)));
        let written = send(&mut view, &metadata, &snap(7, 0.0), 5, false);
        assert_eq!(written, BlockWritten::Nothing);
    }

    #[test]
    fn reverted_field_is_still_resent_while_unacked() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut view = live_view(&metadata, &snap(0, 0.0));

        send(&mut view, &metadata, &snap(9, 0.0), 2, false);
        // Back to the acknowledged value, but the client may hold 9.
        let written = send(&mut view, &metadata, &snap(0, 0.0), 3, false);
        assert_eq!(written, BlockWritten::Update { changed: 1 });
    }

    #[test]
    fn create_repeats_until_acked() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut view = started(&metadata, &snap(1, 0.0), 1);
        let written = send(&mut view, &metadata, &snap(1, 0.0), 2, false);
        assert_eq!(written, BlockWritten::Create);
        assert_eq!(view.phase, Phase::Creating { first: Sequence::new(1) });

        assert!(view.acknowledge(Sequence::new(1)));
        assert_eq!(view.phase, Phase::Live);
        // The repeat in frame 2 is still outstanding.
        assert!(!view.is_settled());
        assert!(view.acknowledge(Sequence::new(2)));
        assert!(view.is_settled());
    }

    #[test]
    fn destroy_ends_view_on_ack() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut view = live_view(&metadata, &snap(0, 0.0));
        let mut w = BitWriter::new();
        for sequence in 2..=3 {
            let staged = ObjectView::write_destroy(HANDLE, &mut w);
            assert_eq!(staged.written, BlockWritten::Destroy);
            view.apply(staged.edit.unwrap(), Sequence::new(sequence));
        }
        assert_eq!(view.phase, Phase::Destroying { first: Sequence::new(2) });
        assert!(view.acknowledge(Sequence::new(1)));
        assert!(!view.acknowledge(Sequence::new(2)));
    }

    #[test]
    fn commit_claims_sequence_and_starts_views() {
        let registry = registry();
        let metadata = meta(&registry);
        let mut client = ClientState::new(ClientId::new(1), 1);
        let sequence = client.pending_sequence().unwrap();
        assert_eq!(sequence, Sequence::new(1));
        // Peeking claims nothing.
        assert_eq!(client.pending_sequence().unwrap(), sequence);
        assert!(!client.observes(0, HANDLE));

        let view = started(&metadata, &snap(0, 0.0), sequence.raw());
        client.commit(sequence, vec![(0, HANDLE, ViewEdit::Start(view))]);
        assert!(client.observes(0, HANDLE));
        assert_eq!(client.unacked_frames(), 1);
        assert_eq!(client.pending_sequence().unwrap(), Sequence::new(2));

        client.acknowledge(sequence).unwrap();
        assert!(client.views(0).unwrap()[&HANDLE].is_settled());
    }

    #[test]
    fn client_rejects_ack_of_unsent_frame() {
        let mut client = ClientState::new(ClientId::new(1), 1);
        client.commit(Sequence::new(1), Vec::new());
        assert!(client.acknowledge(Sequence::new(1)).is_ok());
        assert_eq!(
            client.acknowledge(Sequence::new(5)),
            Err(CodecError::AckOutOfRange {
                client: ClientId::new(1),
                sequence: 5
            })
        );
        assert_eq!(client.unacked_frames(), 0);
    }
}
