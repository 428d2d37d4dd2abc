//! Receiver: mirrors the transmitter's object lists from frame messages.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitstream::BitReader;
use schema::{registry_hash, FieldValue, RegistryDescription, TypeId, TypeMap, TypeMetadata, TypeRegistry};
use wire::{body_has_more, decode_sections, encode_message, BlockHeader, BlockKind, MessageHeader, MessageKind};

use crate::error::{CodecError, CodecResult, LimitKind};
use crate::limits::CodecLimits;
use crate::types::{ListId, ObjectHandle, Sequence};

/// A mirrored object.
///
/// Keeps the last received snapshot values for decoding the next update and
/// the live values derived from them for game code.
#[derive(Debug, Clone)]
pub struct MirrorObject {
    handle: ObjectHandle,
    metadata: Arc<TypeMetadata>,
    snapshot: Vec<FieldValue>,
    live: Vec<FieldValue>,
}

impl MirrorObject {
    #[must_use]
    pub const fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Local type the transmitted type mapped to.
    #[must_use]
    pub fn metadata(&self) -> &Arc<TypeMetadata> {
        &self.metadata
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.metadata.id()
    }

    /// Last received values, as they travel on the wire.
    #[must_use]
    pub fn snapshot(&self) -> &[FieldValue] {
        &self.snapshot
    }

    /// Live values in declaration order.
    #[must_use]
    pub fn values(&self) -> &[FieldValue] {
        &self.live
    }

    /// Live value of a field by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.metadata
            .field_index(field)
            .and_then(|index| self.live.get(index))
    }
}

/// Receiver-side copy of one object list.
#[derive(Debug)]
pub struct MirrorList {
    id: ListId,
    name: String,
    objects: BTreeMap<ObjectHandle, MirrorObject>,
}

impl MirrorList {
    #[must_use]
    pub const fn id(&self) -> ListId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[must_use]
    pub fn get(&self, handle: ObjectHandle) -> Option<&MirrorObject> {
        self.objects.get(&handle)
    }

    /// Objects in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &MirrorObject> {
        self.objects.values()
    }
}

/// A change applied to a mirror list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveEvent {
    Created {
        list: ListId,
        handle: ObjectHandle,
    },
    /// At least one field value changed.
    Updated {
        list: ListId,
        handle: ObjectHandle,
        changed: usize,
    },
    Destroyed {
        list: ListId,
        handle: ObjectHandle,
    },
}

/// Result of applying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFrame {
    pub sequence: Sequence,
    pub events: Vec<ReceiveEvent>,
}

/// Result of applying any message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A registry description was accepted.
    Registry { types: usize },
    /// A frame was applied.
    Frame(AppliedFrame),
    /// A frame no newer than the last applied one was dropped.
    Stale { sequence: Sequence },
}

#[derive(Debug)]
struct RemoteRegistry {
    hash: u64,
    types: TypeMap,
}

/// Objects touched while decoding a frame, keyed by list index and handle.
///
/// `None` marks an object destroyed by this frame.
type Staged = BTreeMap<(usize, ObjectHandle), Option<MirrorObject>>;

/// Applies messages from one transmitter to local mirror lists.
///
/// Frames are all-or-nothing: any error leaves every mirror as it was before
/// the message.
#[derive(Debug)]
pub struct Receiver {
    registry: Arc<TypeRegistry>,
    limits: CodecLimits,
    wire_limits: wire::Limits,
    remote: Option<RemoteRegistry>,
    lists: Vec<MirrorList>,
    last_applied: Sequence,
}

impl Receiver {
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_limits(registry, CodecLimits::default(), wire::Limits::default())
    }

    #[must_use]
    pub fn with_limits(
        registry: Arc<TypeRegistry>,
        limits: CodecLimits,
        wire_limits: wire::Limits,
    ) -> Self {
        Self {
            registry,
            limits,
            wire_limits,
            remote: None,
            lists: Vec::new(),
            last_applied: Sequence::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Hash of the accepted transmitter registry, if any.
    #[must_use]
    pub fn remote_hash(&self) -> Option<u64> {
        self.remote.as_ref().map(|remote| remote.hash)
    }

    /// Newest frame applied since the registry was accepted.
    #[must_use]
    pub const fn last_applied(&self) -> Sequence {
        self.last_applied
    }

    /// Creates a named mirror list. Lists must be created in the same order
    /// as on the transmitter.
    pub fn create_list(&mut self, name: impl Into<String>) -> CodecResult<ListId> {
        let name = name.into();
        if self.lists.iter().any(|list| list.name == name) {
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
        self.lists.push(MirrorList {
            id,
            name,
            objects: BTreeMap::new(),
        });
        Ok(id)
    }

    #[must_use]
    pub fn list(&self, id: ListId) -> Option<&MirrorList> {
        self.lists.get(id.raw() as usize)
    }

    #[must_use]
    pub fn list_by_name(&self, name: &str) -> Option<&MirrorList> {
        self.lists.iter().find(|list| list.name == name)
    }

    pub fn lists(&self) -> impl Iterator<Item = &MirrorList> {
        self.lists.iter()
    }

    /// Mirrored object by list and handle.
    #[must_use]
    pub fn object(&self, list: ListId, handle: ObjectHandle) -> Option<&MirrorObject> {
        self.list(list).and_then(|l| l.get(handle))
    }

    /// Applies any message from the transmitter.
    pub fn apply_message(&mut self, bytes: &[u8]) -> CodecResult<Received> {
        let message = wire::decode_message(bytes, &self.wire_limits)?;
        match message.header.kind {
            MessageKind::Registry => {
                let types = self.accept_registry(message.header, message.payload)?;
                Ok(Received::Registry { types })
            }
            MessageKind::Frame => {
                let sequence = Sequence::new(message.header.sequence);
                Ok(self
                    .apply_frame(message.header, message.payload)?
                    .map_or(Received::Stale { sequence }, Received::Frame))
            }
            MessageKind::Ack => Err(CodecError::UnexpectedMessage {
                expected: MessageKind::Frame,
                found: MessageKind::Ack,
            }),
        }
    }

    /// Accepts the transmitter's registry description.
    ///
    /// Mirrors are cleared and the frame sequence restarts. Returns the
    /// number of described types.
    pub fn apply_registry_message(&mut self, bytes: &[u8]) -> CodecResult<usize> {
        let message = wire::decode_message(bytes, &self.wire_limits)?;
        if message.header.kind != MessageKind::Registry {
            return Err(CodecError::UnexpectedMessage {
                expected: MessageKind::Registry,
                found: message.header.kind,
            });
        }
        self.accept_registry(message.header, message.payload)
    }

    /// Applies a frame message.
    ///
    /// Returns `None` when the frame is no newer than the last applied one.
    pub fn apply_frame_message(&mut self, bytes: &[u8]) -> CodecResult<Option<AppliedFrame>> {
        let message = wire::decode_message(bytes, &self.wire_limits)?;
        if message.header.kind != MessageKind::Frame {
            return Err(CodecError::UnexpectedMessage {
                expected: MessageKind::Frame,
                found: message.header.kind,
            });
        }
        self.apply_frame(message.header, message.payload)
    }

    /// Builds the ack message for an applied frame.
    pub fn encode_ack(&self, sequence: Sequence) -> CodecResult<Vec<u8>> {
        let remote = self.remote.as_ref().ok_or(CodecError::RegistryMissing)?;
        Ok(encode_message(
            MessageHeader::ack(remote.hash, sequence.raw()),
            &[],
        )?)
    }

    fn accept_registry(&mut self, header: MessageHeader, payload: &[u8]) -> CodecResult<usize> {
        let desc = RegistryDescription::decode(payload)?;
        let computed = registry_hash(&desc);
        if computed != header.registry_hash {
            return Err(CodecError::RegistryMismatch {
                expected: header.registry_hash,
                found: computed,
            });
        }
        let types = TypeMap::new(&self.registry, &desc)?;
        let count = types.len();
        self.remote = Some(RemoteRegistry {
            hash: computed,
            types,
        });
        for list in &mut self.lists {
            list.objects.clear();
        }
        self.last_applied = Sequence::default();
        log::info!("accepted registry 0x{computed:016X} with {count} types");
        Ok(count)
    }

    fn apply_frame(
        &mut self,
        header: MessageHeader,
        payload: &[u8],
    ) -> CodecResult<Option<AppliedFrame>> {
        let remote = self.remote.as_ref().ok_or(CodecError::RegistryMissing)?;
        if header.registry_hash != remote.hash {
            return Err(CodecError::RegistryMismatch {
                expected: remote.hash,
                found: header.registry_hash,
            });
        }
        let sequence = Sequence::new(header.sequence);
        if sequence <= self.last_applied {
            log::warn!(
                "dropping stale frame {} (last applied {})",
                sequence.raw(),
                self.last_applied.raw()
            );
            return Ok(None);
        }

        let mut staged = Staged::new();
        let mut events = Vec::new();
        for section in decode_sections(payload, &self.wire_limits)? {
            let index = section.list_id as usize;
            if index >= self.lists.len() {
                return Err(CodecError::UnknownList {
                    list: section.list_id,
                });
            }
            self.decode_section(remote, index, section.body, &mut staged, &mut events)?;
        }

        for ((index, handle), object) in staged {
            let objects = &mut self.lists[index].objects;
            match object {
                Some(object) => {
                    objects.insert(handle, object);
                }
                None => {
                    objects.remove(&handle);
                }
            }
        }
        self.last_applied = sequence;
        log::trace!("applied frame {} with {} events", sequence.raw(), events.len());
        Ok(Some(AppliedFrame { sequence, events }))
    }

    fn decode_section(
        &self,
        remote: &RemoteRegistry,
        index: usize,
        body: &[u8],
        staged: &mut Staged,
        events: &mut Vec<ReceiveEvent>,
    ) -> CodecResult<()> {
        let list = &self.lists[index];
        let mut r = BitReader::new(body);
        let mut blocks = 0usize;
        while body_has_more(&mut r)? {
            blocks += 1;
            if blocks > self.limits.max_blocks_per_section {
                return Err(CodecError::LimitsExceeded {
                    kind: LimitKind::BlocksPerSection,
                    limit: self.limits.max_blocks_per_section,
                    actual: blocks,
                });
            }

            let block = BlockHeader::read(&mut r)?;
            let handle = ObjectHandle::new(block.handle);
            let key = (index, handle);
            let current = match staged.get(&key) {
                Some(object) => object.as_ref(),
                None => list.objects.get(&handle),
            };

            match block.kind {
                BlockKind::Create { type_id } => {
                    let metadata = local_type(remote, TypeId::new(type_id))?;
                    let snapshot = read_full(&metadata, &mut r)?;
                    let live = instantiate(&metadata, &snapshot)?;
                    let event = match current {
                        Some(existing) if existing.type_id() == metadata.id() => {
                            let changed = count_changed(&existing.snapshot, &snapshot);
                            (changed > 0).then_some(ReceiveEvent::Updated {
                                list: list.id,
                                handle,
                                changed,
                            })
                        }
                        _ => Some(ReceiveEvent::Created {
                            list: list.id,
                            handle,
                        }),
                    };
                    events.extend(event);
                    staged.insert(
                        key,
                        Some(MirrorObject {
                            handle,
                            metadata,
                            snapshot,
                            live,
                        }),
                    );
                }
                BlockKind::Destroy => {
                    if current.is_none() {
                        log::debug!("ignoring destroy of unknown object {handle}");
                        continue;
                    }
                    staged.insert(key, None);
                    events.push(ReceiveEvent::Destroyed {
                        list: list.id,
                        handle,
                    });
                }
                BlockKind::Update => {
                    let mut object = current
                        .cloned()
                        .ok_or(CodecError::UnknownObject {
                            list: list.id,
                            handle,
                        })?;
                    let changed = read_update(&mut object, &mut r)?;
                    if changed > 0 {
                        events.push(ReceiveEvent::Updated {
                            list: list.id,
                            handle,
                            changed,
                        });
                    }
                    staged.insert(key, Some(object));
                }
            }
        }
        Ok(())
    }
}

fn local_type(remote: &RemoteRegistry, type_id: TypeId) -> CodecResult<Arc<TypeMetadata>> {
    if let Some(metadata) = remote.types.local(type_id) {
        return Ok(Arc::clone(metadata));
    }
    match remote.types.remote_name(type_id) {
        Some(name) => Err(CodecError::UnmappedType {
            type_name: name.to_string(),
        }),
        None => Err(CodecError::UnknownType {
            type_id: type_id.raw(),
        }),
    }
}

fn read_full(metadata: &TypeMetadata, r: &mut BitReader<'_>) -> CodecResult<Vec<FieldValue>> {
    metadata
        .fields()
        .iter()
        .map(|field| {
            field
                .converter
                .read(r)
                .map_err(|e| CodecError::field(metadata.name(), &field.name, e))
        })
        .collect()
}

fn instantiate(metadata: &TypeMetadata, snapshot: &[FieldValue]) -> CodecResult<Vec<FieldValue>> {
    metadata
        .fields()
        .iter()
        .zip(snapshot)
        .map(|(field, value)| {
            field
                .converter
                .create_instance(value)
                .map_err(|e| CodecError::field(metadata.name(), &field.name, e))
        })
        .collect()
}

/// Reads an update block body into `object`. Returns how many values changed.
fn read_update(object: &mut MirrorObject, r: &mut BitReader<'_>) -> CodecResult<usize> {
    let metadata = Arc::clone(&object.metadata);
    let mut changed = 0;
    for (index, field) in metadata.fields().iter().enumerate() {
        let to_field = |e| CodecError::field(metadata.name(), &field.name, e);
        let Some(value) = field
            .converter
            .read_and_decode(r, &object.snapshot[index])
            .map_err(to_field)?
        else {
            continue;
        };
        if value == object.snapshot[index] {
            continue;
        }
        object.live[index] = field.converter.create_instance(&value).map_err(to_field)?;
        object.snapshot[index] = value;
        changed += 1;
    }
    Ok(changed)
}

fn count_changed(previous: &[FieldValue], current: &[FieldValue]) -> usize {
    previous
        .iter()
        .zip(current)
        .filter(|(a, b)| a != b)
        .count()
}
