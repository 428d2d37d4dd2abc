//! Transmitter-side networked objects and the lists that own them.

use std::collections::BTreeMap;
use std::sync::Arc;

use schema::{FieldValue, TypeId, TypeMetadata};

use crate::error::{CodecError, CodecResult, LimitKind};
use crate::types::{ListId, ObjectHandle};

/// A tracked instance on the transmitter.
///
/// Holds live field values in declaration order. Per-client snapshots live
/// in the client state, never here.
#[derive(Debug, Clone)]
pub struct NetworkObject {
    handle: ObjectHandle,
    metadata: Arc<TypeMetadata>,
    values: Vec<FieldValue>,
    destroyed: bool,
}

impl NetworkObject {
    #[must_use]
    pub const fn handle(&self) -> ObjectHandle {
        self.handle
    }

    #[must_use]
    pub fn metadata(&self) -> &Arc<TypeMetadata> {
        &self.metadata
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.metadata.id()
    }

    /// Live values in declaration order.
    #[must_use]
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Live value of a field by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.metadata
            .field_index(field)
            .and_then(|index| self.values.get(index))
    }

    /// Whether a destroy is pending for this object.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn set(&mut self, index: usize, value: FieldValue) -> CodecResult<()> {
        let field = self.metadata.fields().get(index).ok_or_else(|| {
            CodecError::UnknownField {
                type_name: self.metadata.name().to_string(),
                field: format!("#{index}"),
            }
        })?;
        field
            .converter
            .accepts(&value)
            .map_err(|e| CodecError::field(self.metadata.name(), &field.name, e))?;
        self.values[index] = value;
        Ok(())
    }

    /// Converts live values into their snapshot form.
    ///
    /// Fails when a resource cannot be resolved; on the transmitter every
    /// referenced resource must be known.
    pub(crate) fn snapshot(&self) -> CodecResult<Vec<FieldValue>> {
        self.metadata
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(field, value)| {
                field
                    .converter
                    .copy(value)
                    .map_err(|e| CodecError::field(self.metadata.name(), &field.name, e))
            })
            .collect()
    }
}

/// Owns every object of one category on the transmitter.
///
/// The list is the only place objects are created or destroyed. Handles come
/// from a monotonic counter starting at 1 and are never reused.
#[derive(Debug)]
pub struct ObjectList {
    id: ListId,
    name: String,
    capacity: usize,
    /// `None` once `u32::MAX` has been issued.
    next_handle: Option<u32>,
    objects: BTreeMap<ObjectHandle, NetworkObject>,
}

impl ObjectList {
    pub(crate) fn new(id: ListId, name: String, capacity: usize) -> Self {
        Self {
            id,
            name,
            capacity,
            next_handle: Some(1),
            objects: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ListId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tracked objects, including those with a pending destroy.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[must_use]
    pub fn get(&self, handle: ObjectHandle) -> Option<&NetworkObject> {
        self.objects.get(&handle)
    }

    /// Objects in handle order, which is creation order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkObject> {
        self.objects.values()
    }

    /// Creates an object from live values in declaration order.
    ///
    /// Every value is checked through its converter's copy, so a value of the
    /// wrong kind or an unknown resource fails here rather than at encode time.
    pub fn create_object(
        &mut self,
        metadata: Arc<TypeMetadata>,
        values: Vec<FieldValue>,
    ) -> CodecResult<ObjectHandle> {
        if self.objects.len() >= self.capacity {
            return Err(CodecError::LimitsExceeded {
                kind: LimitKind::ObjectsPerList,
                limit: self.capacity,
                actual: self.objects.len() + 1,
            });
        }
        if values.len() != metadata.field_count() {
            return Err(CodecError::FieldCountMismatch {
                type_name: metadata.name().to_string(),
                expected: metadata.field_count(),
                actual: values.len(),
            });
        }
        for (field, value) in metadata.fields().iter().zip(&values) {
            field
                .converter
                .copy(value)
                .map_err(|e| CodecError::field(metadata.name(), &field.name, e))?;
        }

        let raw = self
            .next_handle
            .ok_or(CodecError::HandlesExhausted { list: self.id })?;
        let handle = ObjectHandle::new(raw);
        self.next_handle = raw.checked_add(1);
        self.objects.insert(
            handle,
            NetworkObject {
                handle,
                metadata,
                values,
                destroyed: false,
            },
        );
        Ok(handle)
    }

    /// Schedules a destroy notice for every client that observed the object.
    ///
    /// The object stays in the list until every such client has been told.
    pub fn destroy_object(&mut self, handle: ObjectHandle) -> CodecResult<()> {
        let object = self.live_mut(handle)?;
        object.destroyed = true;
        Ok(())
    }

    pub(crate) fn live_mut(&mut self, handle: ObjectHandle) -> CodecResult<&mut NetworkObject> {
        let list = self.id;
        let object = self
            .objects
            .get_mut(&handle)
            .ok_or(CodecError::UnknownObject { list, handle })?;
        if object.destroyed {
            return Err(CodecError::ObjectDestroyed { handle });
        }
        Ok(object)
    }

    /// Drops destroyed objects that no client still needs to hear about.
    pub(crate) fn finalize_destroyed(&mut self, still_observed: impl Fn(ObjectHandle) -> bool) {
        self.objects
            .retain(|handle, object| !object.destroyed || still_observed(*handle));
    }
}
