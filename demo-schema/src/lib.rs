//! Reference game types for the demo simulation.
//!
//! The server registers `Entity`; clients register `ClientEntity`, which
//! mirrors it. `Gib` is an alias sharing the entity fields. Models travel as
//! indices into a [`ModelTable`].

use std::sync::Arc;

use schema::{
    Converter, FieldType, FieldValue, ObjectDef, QuantizeOptions, ResourceRef, ResourceResolver,
    SchemaResult, TypeId, TypeRegistry, TypeRegistryBuilder,
};

pub const ENTITY: &str = "Entity";
pub const CLIENT_ENTITY: &str = "ClientEntity";
pub const GIB: &str = "Gib";
pub const MODEL: &str = "Model";

/// Models every demo peer knows about, in index order.
pub const MODELS: [&str; 5] = [
    "models/player.mdl",
    "models/crate.mdl",
    "models/barrel.mdl",
    "models/rocket.mdl",
    "models/gib.mdl",
];

pub const FLAG_VISIBLE: u8 = 0b001;
pub const FLAG_FIRING: u8 = 0b010;

/// Resolves models to and from their network index.
///
/// A table may have loaded fewer models than the server knows; indices past
/// the loaded ones do not resolve.
#[derive(Debug)]
pub struct ModelTable {
    models: Vec<ResourceRef>,
    loaded: usize,
}

impl ModelTable {
    /// Table with every demo model loaded.
    #[must_use]
    pub fn standard() -> Self {
        Self::partial(MODELS.len())
    }

    /// Table with only the first `loaded` models available.
    #[must_use]
    pub fn partial(loaded: usize) -> Self {
        Self {
            models: MODELS.iter().map(ResourceRef::new).collect(),
            loaded: loaded.min(MODELS.len()),
        }
    }

    #[must_use]
    pub fn model(&self, index: usize) -> Option<&ResourceRef> {
        self.models.get(index)
    }
}

/// Network indices start at 1; 0 means no model.
impl ResourceResolver for ModelTable {
    fn index_of(&self, resource: &ResourceRef) -> Option<i32> {
        self.models[..self.loaded]
            .iter()
            .position(|model| model == resource)
            .and_then(|index| i32::try_from(index + 1).ok())
    }

    fn resolve(&self, index: i32) -> Option<ResourceRef> {
        let slot = usize::try_from(index).ok()?.checked_sub(1)?;
        self.models[..self.loaded].get(slot).cloned()
    }
}

fn entity_fields(def: ObjectDef) -> ObjectDef {
    def.field("Model", FieldType::named(MODEL))
        .field("Origin", FieldType::Vector3)
        .quantized("Yaw", FieldType::F32, QuantizeOptions::new(9).multiplier(512.0 / 360.0))
        .quantized(
            "Frame",
            FieldType::F32,
            QuantizeOptions::new(10).multiplier(4.0).signed(),
        )
        .field("Sequence", FieldType::U32)
        .field("Flags", FieldType::U8)
        .field("Name", FieldType::String)
        .field("Colors", FieldType::fixed_array(FieldType::U8, 3))
}

fn builder(models: Arc<ModelTable>) -> SchemaResult<TypeRegistryBuilder> {
    let mut builder = TypeRegistryBuilder::with_primitives();
    builder.register_type(FieldType::named(MODEL), Converter::composite(MODEL, models))?;
    Ok(builder)
}

/// Registry used by the demo server.
pub fn server_registry(models: Arc<ModelTable>) -> SchemaResult<TypeRegistry> {
    let mut builder = builder(models)?;
    builder.register_object(entity_fields(ObjectDef::new(ENTITY)))?;
    builder.register_alias(GIB, ENTITY)?;
    Ok(builder.build())
}

/// Registry used by demo clients.
pub fn client_registry(models: Arc<ModelTable>) -> SchemaResult<TypeRegistry> {
    let mut builder = builder(models)?;
    builder.register_object(entity_fields(ObjectDef::new(CLIENT_ENTITY).maps_from(ENTITY)))?;
    builder.register_alias(GIB, CLIENT_ENTITY)?;
    Ok(builder.build())
}

/// Simulation-side state of one demo entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub gib: bool,
    pub model: usize,
    pub origin: [f32; 3],
    pub yaw: f32,
    pub frame: f32,
    pub sequence: u32,
    pub flags: u8,
    pub name: Option<String>,
    pub colors: [u8; 3],
}

impl EntityState {
    /// Registry type for this entity.
    #[must_use]
    pub fn type_id(&self, registry: &TypeRegistry) -> Option<TypeId> {
        let name = if self.gib { GIB } else { ENTITY };
        registry.by_name(name).map(|meta| meta.id())
    }

    /// Live field values keyed by field name.
    #[must_use]
    pub fn field_values(&self, models: &ModelTable) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("Model", FieldValue::Resource(models.model(self.model).cloned())),
            ("Origin", FieldValue::Vec3(self.origin)),
            ("Yaw", FieldValue::F32(self.yaw)),
            ("Frame", FieldValue::F32(self.frame)),
            ("Sequence", FieldValue::U32(self.sequence)),
            ("Flags", FieldValue::U8(self.flags)),
            ("Name", FieldValue::Str(self.name.clone())),
            (
                "Colors",
                FieldValue::Array(Some(
                    self.colors.iter().copied().map(FieldValue::U8).collect(),
                )),
            ),
        ]
    }
}
