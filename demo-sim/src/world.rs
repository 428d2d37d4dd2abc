//! Deterministic game world driving the server's object lists.

use anyhow::{Context, Result};
use codec::{ListId, ObjectHandle, Transmitter};
use demo_schema::{EntityState, ModelTable, FLAG_FIRING, FLAG_VISIBLE, MODELS};

use crate::link::Rng;

pub const ENTITIES: &str = "entities";
pub const EFFECTS: &str = "effects";

const ARENA: f32 = 1000.0;
const GIB_MODEL: usize = MODELS.len() - 1;
const GIB_LIFETIME: u32 = 20;
const GIBS_PER_BURST: usize = 3;
const FRAMES_PER_LOOP: f32 = 16.0;

#[derive(Debug)]
struct Body {
    handle: ObjectHandle,
    state: EntityState,
    velocity: [f32; 3],
    expires: Option<u32>,
}

/// Actors in the `entities` list and short-lived gibs in `effects`.
#[derive(Debug)]
pub struct World {
    entities: ListId,
    effects: ListId,
    actors: Vec<Body>,
    gibs: Vec<Body>,
    spawned: u32,
    respawns: u32,
}

impl World {
    /// Creates both lists and spawns `players` actors.
    pub fn spawn(
        transmitter: &mut Transmitter,
        models: &ModelTable,
        players: u32,
        rng: &mut Rng,
    ) -> Result<Self> {
        let entities = transmitter.create_list(ENTITIES).context("create entities list")?;
        let effects = transmitter.create_list(EFFECTS).context("create effects list")?;
        let mut world = Self {
            entities,
            effects,
            actors: Vec::with_capacity(players as usize),
            gibs: Vec::new(),
            spawned: 0,
            respawns: 0,
        };
        for _ in 0..players {
            let actor = world.new_actor(transmitter, models, rng)?;
            world.actors.push(actor);
        }
        Ok(world)
    }

    pub const fn entities(&self) -> ListId {
        self.entities
    }

    pub const fn effects(&self) -> ListId {
        self.effects
    }

    pub const fn respawns(&self) -> u32 {
        self.respawns
    }

    /// Advances one tick and pushes the new state into `transmitter`.
    pub fn step(
        &mut self,
        transmitter: &mut Transmitter,
        models: &ModelTable,
        rng: &mut Rng,
        tick: u32,
        burst_every: Option<u32>,
    ) -> Result<()> {
        for actor in &mut self.actors {
            advance(actor, rng);
            if rng.chance(5) {
                actor.state.flags ^= FLAG_FIRING;
            }
        }

        if let Some(victim) = (0..self.actors.len()).find(|_| rng.next_u32() % 400 == 0) {
            let mut dead = self.new_actor(transmitter, models, rng)?;
            std::mem::swap(&mut self.actors[victim], &mut dead);
            transmitter
                .destroy_object(self.entities, dead.handle)
                .with_context(|| format!("destroy actor {}", dead.handle))?;
            self.respawns += 1;
            log::debug!("tick {tick}: actor {} respawned", dead.handle);
        }

        let burst = burst_every.is_some_and(|every| every > 0 && tick % every == 0);
        if burst && !self.actors.is_empty() {
            let source = rng.next_u32() as usize % self.actors.len();
            let origin = self.actors[source].state.origin;
            for _ in 0..GIBS_PER_BURST {
                let gib = self.new_gib(transmitter, models, rng, origin, tick)?;
                self.gibs.push(gib);
            }
        }

        let mut expired = Vec::new();
        self.gibs.retain(|gib| {
            let keep = gib.expires.is_some_and(|at| at > tick);
            if !keep {
                expired.push(gib.handle);
            }
            keep
        });
        for handle in expired {
            transmitter
                .destroy_object(self.effects, handle)
                .with_context(|| format!("destroy gib {handle}"))?;
        }
        for gib in &mut self.gibs {
            advance(gib, rng);
        }

        for actor in &self.actors {
            sync(transmitter, self.entities, actor, models)?;
        }
        for gib in &self.gibs {
            sync(transmitter, self.effects, gib, models)?;
        }
        Ok(())
    }

    fn new_actor(
        &mut self,
        transmitter: &mut Transmitter,
        models: &ModelTable,
        rng: &mut Rng,
    ) -> Result<Body> {
        self.spawned += 1;
        let state = EntityState {
            gib: false,
            model: rng.next_u32() as usize % (MODELS.len() - 1),
            origin: [
                rng.range_f32(-ARENA, ARENA),
                rng.range_f32(-ARENA, ARENA),
                0.0,
            ],
            yaw: rng.range_f32(0.0, 359.0),
            frame: 0.0,
            sequence: 0,
            flags: FLAG_VISIBLE,
            name: Some(format!("player-{}", self.spawned)),
            colors: [
                (rng.next_u32() & 0xFF) as u8,
                (rng.next_u32() & 0xFF) as u8,
                (rng.next_u32() & 0xFF) as u8,
            ],
        };
        let velocity = [rng.range_f32(-8.0, 8.0), rng.range_f32(-8.0, 8.0), 0.0];
        create(transmitter, self.entities, state, velocity, None, models)
    }

    fn new_gib(
        &mut self,
        transmitter: &mut Transmitter,
        models: &ModelTable,
        rng: &mut Rng,
        origin: [f32; 3],
        tick: u32,
    ) -> Result<Body> {
        let state = EntityState {
            gib: true,
            model: GIB_MODEL,
            origin,
            yaw: rng.range_f32(0.0, 359.0),
            frame: 0.0,
            sequence: 0,
            flags: FLAG_VISIBLE,
            name: None,
            colors: [128, 0, 0],
        };
        let velocity = [
            rng.range_f32(-20.0, 20.0),
            rng.range_f32(-20.0, 20.0),
            rng.range_f32(5.0, 30.0),
        ];
        create(
            transmitter,
            self.effects,
            state,
            velocity,
            Some(tick + GIB_LIFETIME),
            models,
        )
    }
}

fn create(
    transmitter: &mut Transmitter,
    list: ListId,
    state: EntityState,
    velocity: [f32; 3],
    expires: Option<u32>,
    models: &ModelTable,
) -> Result<Body> {
    let type_id = state
        .type_id(transmitter.registry())
        .context("demo type is not registered")?;
    let handle = transmitter
        .create_object_with(list, type_id, state.field_values(models))
        .context("create object")?;
    Ok(Body {
        handle,
        state,
        velocity,
        expires,
    })
}

fn sync(transmitter: &mut Transmitter, list: ListId, body: &Body, models: &ModelTable) -> Result<()> {
    for (field, value) in body.state.field_values(models) {
        transmitter
            .set_field(list, body.handle, field, value)
            .with_context(|| format!("set {field} on {}", body.handle))?;
    }
    Ok(())
}

fn advance(body: &mut Body, rng: &mut Rng) {
    for axis in 0..3 {
        let next = body.state.origin[axis] + body.velocity[axis];
        if next.abs() > ARENA {
            body.velocity[axis] = -body.velocity[axis];
        } else {
            body.state.origin[axis] = next;
        }
    }
    body.state.yaw = (body.state.yaw + rng.range_f32(0.0, 6.0)) % 359.0;
    body.state.frame += 0.25;
    if body.state.frame >= FRAMES_PER_LOOP {
        body.state.frame = 0.0;
        body.state.sequence = body.state.sequence.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use demo_schema::server_registry;
    use std::sync::Arc;

    fn transmitter(models: &Arc<ModelTable>) -> Transmitter {
        Transmitter::new(Arc::new(server_registry(Arc::clone(models)).unwrap()))
    }

    #[test]
    fn spawn_creates_one_object_per_player() {
        let models = Arc::new(ModelTable::standard());
        let mut transmitter = transmitter(&models);
        let world = World::spawn(&mut transmitter, &models, 4, &mut Rng::new(3)).unwrap();
        assert_eq!(transmitter.list(world.entities()).unwrap().len(), 4);
        assert!(transmitter.list(world.effects()).unwrap().is_empty());
    }

    #[test]
    fn bursts_spawn_gibs_that_expire() {
        let models = Arc::new(ModelTable::standard());
        let mut transmitter = transmitter(&models);
        let mut rng = Rng::new(5);
        let mut world = World::spawn(&mut transmitter, &models, 2, &mut rng).unwrap();

        world
            .step(&mut transmitter, &models, &mut rng, 10, Some(10))
            .unwrap();
        assert_eq!(
            transmitter.list(world.effects()).unwrap().len(),
            GIBS_PER_BURST
        );

        for tick in 11..=10 + GIB_LIFETIME {
            world
                .step(&mut transmitter, &models, &mut rng, tick, None)
                .unwrap();
        }
        // No client observes the gibs, so destroys finalize at once.
        assert!(transmitter.list(world.effects()).unwrap().is_empty());
    }

    #[test]
    fn animation_loops_bump_sequence() {
        let mut rng = Rng::new(9);
        let mut body = Body {
            handle: ObjectHandle::new(1),
            state: EntityState {
                gib: false,
                model: 0,
                origin: [ARENA - 1.0, 0.0, 0.0],
                yaw: 0.0,
                frame: 0.0,
                sequence: 0,
                flags: FLAG_VISIBLE,
                name: None,
                colors: [0; 3],
            },
            velocity: [4.0, 0.0, 0.0],
            expires: None,
        };
        for _ in 0..64 {
            advance(&mut body, &mut rng);
        }
        assert_eq!(body.state.sequence, 1);
        assert!(body.state.frame.abs() < f32::EPSILON);
        assert!(body.state.origin[0].abs() <= ARENA);
        assert!(body.velocity[0] < 0.0);
        assert!((0.0..359.0).contains(&body.state.yaw));
    }
}
