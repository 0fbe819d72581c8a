//! Frame driver.
//!
//! A [`Stage`] owns a [`World`], the [`Actor`]s living in it and a
//! [`SystemManager`]. Each call to [`Stage::tick`]:
//!
//! 1. Clamps the frame delta to `[0, max_delta]`.
//! 2. Starts actors that have not started yet.
//! 3. Runs actor update hooks, actors in entity order.
//! 4. Runs every system phase.
//!
//! Nothing runs while the world is not ready (paused or disposed).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use strata_ecs::component::ComponentRegistry;
use strata_ecs::entity::Entity;
use strata_ecs::world::{World, WorldConfig};
use strata_ecs::EcsError;

use crate::actor::{Actor, ActorConfig};
use crate::system::{FrameDiagnostics, SystemManager};
use crate::ActorError;

// ---------------------------------------------------------------------------
// StageConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Stage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub world: WorldConfig,
    /// Largest frame delta in seconds passed to actors and systems.
    pub max_delta: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            max_delta: 0.25,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Owns a world, its actors and its systems, and advances them together.
#[derive(Debug)]
pub struct Stage {
    world: World,
    actors: BTreeMap<Entity, Actor>,
    systems: SystemManager,
    max_delta: f64,
    frames: u64,
    elapsed: f64,
}

impl Stage {
    /// # Errors
    ///
    /// Whatever [`World::new`] rejects, e.g. an empty registry.
    pub fn new(registry: ComponentRegistry, config: StageConfig) -> Result<Self, EcsError> {
        let max_delta = if config.max_delta.is_finite() && config.max_delta > 0.0 {
            config.max_delta
        } else {
            StageConfig::default().max_delta
        };
        Ok(Self {
            world: World::new(registry, config.world)?,
            actors: BTreeMap::new(),
            systems: SystemManager::new(),
            max_delta,
            frames: 0,
            elapsed: 0.0,
        })
    }

    // -- accessors ------------------------------------------------------------

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world, for setup and tests. Systems should
    /// prefer their command buffer.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn systems(&self) -> &SystemManager {
        &self.systems
    }

    pub fn systems_mut(&mut self) -> &mut SystemManager {
        &mut self.systems
    }

    pub fn actor(&self, entity: Entity) -> Option<&Actor> {
        self.actors.get(&entity)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Entities of the live actors, ascending.
    pub fn actor_entities(&self) -> Vec<Entity> {
        self.actors.keys().copied().collect()
    }

    /// Frames advanced so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Sum of the clamped deltas of every frame so far, in seconds.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn max_delta(&self) -> f64 {
        self.max_delta
    }

    // -- actors ---------------------------------------------------------------

    /// Create an actor. It starts at the beginning of the next frame.
    ///
    /// # Errors
    ///
    /// As [`Actor::new`].
    pub fn spawn_actor(&mut self, config: ActorConfig) -> Result<Entity, ActorError> {
        let actor = Actor::new(&mut self.world, config)?;
        let entity = actor.entity();
        self.actors.insert(entity, actor);
        Ok(entity)
    }

    /// Destroy an actor and its entity. Returns `false` if no actor is
    /// bound to `entity`.
    pub fn despawn_actor(&mut self, entity: Entity) -> bool {
        match self.actors.remove(&entity) {
            Some(mut actor) => {
                actor.destroy(&mut self.world);
                true
            }
            None => false,
        }
    }

    /// Run `f` with the actor bound to `entity` and the world.
    pub fn with_actor<R>(
        &mut self,
        entity: Entity,
        f: impl FnOnce(&mut Actor, &mut World) -> R,
    ) -> Option<R> {
        let actor = self.actors.get_mut(&entity)?;
        Some(f(actor, &mut self.world))
    }

    // -- frames ---------------------------------------------------------------

    fn clamp_delta(&self, delta: f64) -> f64 {
        if delta.is_nan() || delta <= 0.0 {
            0.0
        } else {
            delta.min(self.max_delta)
        }
    }

    /// Advance one frame. Returns the system diagnostics, or `None` if the
    /// world is not ready and nothing ran.
    pub fn tick(&mut self, delta: f64) -> Option<&FrameDiagnostics> {
        if !self.world.is_ready() {
            debug!(state = %self.world.state(), "stage tick skipped");
            return None;
        }
        let delta = self.clamp_delta(delta);

        // Actors destroyed directly through their own handle are dropped.
        self.actors.retain(|_, actor| !actor.is_destroyed());

        for actor in self.actors.values_mut() {
            if !actor.is_started() {
                if let Err(e) = actor.start(&mut self.world) {
                    error!(
                        entity = %actor.entity(),
                        actor = actor.name(),
                        error = %e,
                        "actor failed to start"
                    );
                }
            }
        }
        for actor in self.actors.values_mut() {
            actor.update(&mut self.world, delta);
        }

        self.frames += 1;
        self.elapsed += delta;
        Some(self.systems.execute_all(&mut self.world, delta))
    }

    /// Advance `count` frames with the same delta. Returns how many ran.
    pub fn run_frames(&mut self, count: u64, delta: f64) -> u64 {
        let mut ran = 0;
        for _ in 0..count {
            if self.tick(delta).is_some() {
                ran += 1;
            }
        }
        ran
    }

    /// Destroy every actor, then dispose the world.
    pub fn shutdown(&mut self) {
        let actors = std::mem::take(&mut self.actors);
        for (_, mut actor) in actors.into_iter().rev() {
            actor.destroy(&mut self.world);
        }
        self.world.dispose();
    }
}
