//! The [`World`] is the top-level container for the ECS. It owns entity
//! allocation, the archetype set and its bitmask index, and routes every
//! component add/remove through archetype migration.
//!
//! All queries and structural mutations require the world to be
//! [`WorldState::Ready`]. Every structural mutation invalidates the query
//! cache before it returns and then emits a [`WorldEvent`].

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::archetype::{signature_key, Archetype, ArchetypeId};
use crate::bitmask::ComponentMask;
use crate::component::{
    BoxedComponent, Component, ComponentData, ComponentInfo, ComponentRegistry, ComponentTypeId,
};
use crate::entity::{Entity, EntityAllocator};
use crate::event::{EventBus, EventKind, EventStream, SubscriptionId, WorldEvent};
use crate::pool::PoolConfig;
use crate::query::{QueryCache, QueryRow, QueryRowMut};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction options for a [`World`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Ceiling on live entities.
    pub max_entities: usize,
    /// Maintain [`WorldMetrics`] counters.
    pub enable_metrics: bool,
    /// Type-check caller-supplied component instances and verify archetype
    /// invariants after each migration.
    pub validate: bool,
    /// Settings for every per-archetype component pool.
    pub pool: PoolConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_entities: 100_000,
            enable_metrics: true,
            validate: true,
            pool: PoolConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

/// Lifecycle of a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldState {
    Initializing,
    Ready,
    Paused,
    Disposing,
    Disposed,
}

impl fmt::Display for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorldState::Initializing => "initializing",
            WorldState::Ready => "ready",
            WorldState::Paused => "paused",
            WorldState::Disposing => "disposing",
            WorldState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters collected while `enable_metrics` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMetrics {
    pub entities_created: u64,
    pub entities_destroyed: u64,
    pub components_added: u64,
    pub components_removed: u64,
    pub migrations: u64,
    pub archetypes_created: u64,
    pub queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The ECS world: entities, archetypes, queries and structural events.
#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    state: WorldState,
    registry: ComponentRegistry,
    allocator: EntityAllocator,
    /// Indexed by `ArchetypeId`. Never shrinks.
    archetypes: Vec<Archetype>,
    /// Canonical key -> archetype.
    archetype_index: HashMap<String, ArchetypeId>,
    /// Entity -> the archetype currently holding it.
    entity_archetype: HashMap<Entity, ArchetypeId>,
    query_cache: RefCell<QueryCache>,
    /// Entities with a bound actor.
    actors: HashSet<Entity>,
    events: EventBus,
    metrics: WorldMetrics,
    queries: Cell<u64>,
}

impl World {
    /// Create a world accepting the components in `registry`.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidRegistry`] if the registry is empty.
    pub fn new(registry: ComponentRegistry, config: WorldConfig) -> Result<Self, EcsError> {
        if registry.is_empty() {
            return Err(EcsError::InvalidRegistry(
                "a world needs at least one registered component".to_owned(),
            ));
        }
        let empty = Archetype::new(ArchetypeId::EMPTY, &[], &config.pool);
        let mut archetype_index = HashMap::new();
        archetype_index.insert(empty.key().to_owned(), ArchetypeId::EMPTY);

        let mut world = Self {
            config,
            state: WorldState::Initializing,
            registry,
            allocator: EntityAllocator::new(),
            archetypes: vec![empty],
            archetype_index,
            entity_archetype: HashMap::new(),
            query_cache: RefCell::new(QueryCache::new()),
            actors: HashSet::new(),
            events: EventBus::new(),
            metrics: WorldMetrics::default(),
            queries: Cell::new(0),
        };
        world.transition(WorldState::Ready);
        tracing::debug!(components = world.registry.len(), "world ready");
        Ok(world)
    }

    /// Create a world with the default configuration.
    pub fn with_registry(registry: ComponentRegistry) -> Result<Self, EcsError> {
        Self::new(registry, WorldConfig::default())
    }

    // -- state ----------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> WorldState {
        self.state
    }

    /// Whether queries and mutations are accepted.
    pub fn is_ready(&self) -> bool {
        self.state == WorldState::Ready
    }

    /// Fail with [`EcsError::NotReady`] naming `operation` unless the world
    /// is ready.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotReady`].
    pub fn ensure_ready(&self, operation: &'static str) -> Result<(), EcsError> {
        if self.state == WorldState::Ready {
            Ok(())
        } else {
            Err(EcsError::NotReady {
                state: self.state,
                operation,
            })
        }
    }

    fn transition(&mut self, to: WorldState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::debug!(%from, %to, "world state changed");
        self.events.emit(WorldEvent::StateChanged { from, to });
    }

    /// Suspend queries and mutations.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotReady`] unless the world is ready.
    pub fn pause(&mut self) -> Result<(), EcsError> {
        self.ensure_ready("pause")?;
        self.transition(WorldState::Paused);
        Ok(())
    }

    /// Leave the paused state.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotReady`] unless the world is paused.
    pub fn resume(&mut self) -> Result<(), EcsError> {
        if self.state != WorldState::Paused {
            return Err(EcsError::NotReady {
                state: self.state,
                operation: "resume",
            });
        }
        self.transition(WorldState::Ready);
        Ok(())
    }

    /// Tear the world down: every entity is dropped, pools are emptied and
    /// listeners detached. Repeated calls are no-ops.
    pub fn dispose(&mut self) {
        if matches!(self.state, WorldState::Disposing | WorldState::Disposed) {
            return;
        }
        self.transition(WorldState::Disposing);

        let live: Vec<Entity> = self.entity_archetype.keys().copied().collect();
        for entity in live {
            if let Some(arch) = self.entity_archetype.remove(&entity) {
                self.archetypes[arch.index()].remove_entity(entity);
            }
            self.allocator.free(entity);
        }
        for archetype in &mut self.archetypes {
            archetype.clear_pools();
        }
        self.actors.clear();
        self.query_cache.borrow_mut().invalidate();

        self.transition(WorldState::Disposed);
        self.events.clear();
        tracing::debug!("world disposed");
    }

    // -- accessors ------------------------------------------------------------

    /// The configuration the world was built with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entity_archetype.len()
    }

    /// Number of archetypes created so far (including the empty one).
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// All archetypes, indexed by id.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Archetype by id.
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    /// Archetype id for a canonical key, if it exists.
    pub fn archetype_by_key(&self, key: &str) -> Option<ArchetypeId> {
        self.archetype_index.get(key).copied()
    }

    /// The archetype currently holding `entity`.
    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeId> {
        self.entity_archetype.get(&entity).copied()
    }

    /// Whether `entity` is live.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entity_archetype.contains_key(&entity)
    }

    /// Live entities, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entity_archetype.keys().copied()
    }

    /// Sorted names of the components attached to `entity`.
    pub fn component_names(&self, entity: Entity) -> Option<Vec<&str>> {
        let arch = self.archetype_of(entity)?;
        Some(self.archetypes[arch.index()].names().collect())
    }

    /// Snapshot of the metric counters. All zero while `enable_metrics` is
    /// off.
    pub fn metrics(&self) -> WorldMetrics {
        if !self.config.enable_metrics {
            return self.metrics;
        }
        let cache = self.query_cache.borrow();
        WorldMetrics {
            queries: self.queries.get(),
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            ..self.metrics
        }
    }

    /// Generation of the query cache; bumped by every structural change.
    pub fn query_generation(&self) -> u64 {
        self.query_cache.borrow().generation()
    }

    fn record(&mut self, update: impl FnOnce(&mut WorldMetrics)) {
        if self.config.enable_metrics {
            update(&mut self.metrics);
        }
    }

    fn invalidate_queries(&self) {
        self.query_cache.borrow_mut().invalidate();
    }

    // -- archetype management -------------------------------------------------

    /// Find or create the archetype for a set of component ids (any order).
    fn archetype_for(&mut self, ids: &[ComponentTypeId]) -> Result<ArchetypeId, EcsError> {
        let infos: Vec<&ComponentInfo> = ids
            .iter()
            .map(|id| {
                self.registry.get_info(*id).ok_or_else(|| {
                    EcsError::InvalidRegistry(format!("{id:?} is not in the registry"))
                })
            })
            .collect::<Result<_, _>>()?;
        let mut names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        names.sort_unstable();
        let key = signature_key(&names);
        if let Some(&id) = self.archetype_index.get(&key) {
            return Ok(id);
        }

        let id = ArchetypeId(self.archetypes.len() as u32);
        let archetype = Archetype::new(id, &infos, &self.config.pool);
        tracing::debug!(archetype = %key, id = id.0, "created archetype");
        self.archetypes.push(archetype);
        self.archetype_index.insert(key, id);
        // A new archetype may match queries that are already cached.
        self.invalidate_queries();
        self.record(|m| m.archetypes_created += 1);
        Ok(id)
    }

    fn lookup_name(&self, name: &str) -> Result<ComponentTypeId, EcsError> {
        self.registry
            .lookup_by_name(name)
            .ok_or_else(|| self.registry.unknown(name))
    }

    fn name_for<T: Component>(&self) -> Result<String, EcsError> {
        self.registry
            .name_of::<T>()
            .map(str::to_owned)
            .ok_or_else(|| self.registry.unknown(std::any::type_name::<T>()))
    }

    fn check_consistency(&self, id: ArchetypeId) {
        if self.config.validate && !self.archetypes[id.index()].is_consistent() {
            tracing::error!(
                archetype = %self.archetypes[id.index()].key(),
                "archetype storage lost row alignment"
            );
        }
    }

    // -- entity lifecycle -----------------------------------------------------

    /// Allocate an entity in the empty archetype.
    ///
    /// # Errors
    ///
    /// [`EcsError::CapacityExceeded`] once `max_entities` are live, or
    /// [`EcsError::NotReady`].
    pub fn create_entity(&mut self) -> Result<Entity, EcsError> {
        self.ensure_ready("create_entity")?;
        if self.entity_archetype.len() >= self.config.max_entities {
            return Err(EcsError::CapacityExceeded {
                limit: self.config.max_entities,
            });
        }
        let entity = self.allocator.allocate();
        if let Err(e) =
            self.archetypes[ArchetypeId::EMPTY.index()].add_entity(entity, &mut Vec::new())
        {
            self.allocator.free(entity);
            return Err(e);
        }
        self.entity_archetype.insert(entity, ArchetypeId::EMPTY);
        self.invalidate_queries();
        self.record(|m| m.entities_created += 1);
        self.events.emit(WorldEvent::EntityCreated { entity });
        Ok(entity)
    }

    /// Remove `entity` and every component attached to it, returning the
    /// instances to their pools and the id to the free list.
    ///
    /// Emits [`WorldEvent::EntityDestroyed`], then
    /// [`WorldEvent::ActorDestroyed`] if an actor was bound to the entity.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] or [`EcsError::NotReady`].
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.ensure_ready("destroy_entity")?;
        let arch = self
            .entity_archetype
            .remove(&entity)
            .ok_or(EcsError::EntityNotFound(entity))?;
        self.archetypes[arch.index()].remove_entity(entity);
        self.allocator.free(entity);
        self.invalidate_queries();
        self.check_consistency(arch);
        self.record(|m| m.entities_destroyed += 1);

        let had_actor = self.actors.remove(&entity);
        self.events.emit(WorldEvent::EntityDestroyed { entity });
        if had_actor {
            self.events.emit(WorldEvent::ActorDestroyed { entity });
        }
        Ok(())
    }

    // -- actor binding --------------------------------------------------------

    /// Mark `entity` as owned by an actor.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] if the entity is not live.
    pub fn register_actor(&mut self, entity: Entity) -> Result<(), EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        self.actors.insert(entity);
        Ok(())
    }

    /// Clear the actor mark. Returns whether it was set.
    pub fn unregister_actor(&mut self, entity: Entity) -> bool {
        self.actors.remove(&entity)
    }

    /// Whether an actor is bound to `entity`.
    pub fn is_actor(&self, entity: Entity) -> bool {
        self.actors.contains(&entity)
    }

    /// Entities with a bound actor.
    pub fn actor_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.actors.iter().copied()
    }

    // -- components by name ---------------------------------------------------

    /// Attach component `name` to `entity`, migrating it to the archetype
    /// that includes `name`.
    ///
    /// If `component` is `None` a pooled default instance is used. If the
    /// entity already has `name`, the existing instance is returned unchanged
    /// and a supplied instance is released to the pool.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownComponent`] if `name` is not registered.
    /// - [`EcsError::EntityNotFound`] if the entity is not live.
    /// - [`EcsError::ComponentTypeMismatch`] if validation is on and the
    ///   supplied instance is not the registered type.
    /// - [`EcsError::Migration`] if the move to the target archetype failed;
    ///   the entity is left where it was.
    pub fn add_component(
        &mut self,
        entity: Entity,
        name: &str,
        component: Option<BoxedComponent>,
    ) -> Result<&mut (dyn ComponentData + 'static), EcsError> {
        self.ensure_ready("add_component")?;
        let type_id = self.lookup_name(name)?;
        let current = self
            .archetype_of(entity)
            .ok_or(EcsError::EntityNotFound(entity))?;

        if self.config.validate {
            if let (Some(instance), Some(info)) = (&component, self.registry.get_info(type_id)) {
                if instance.as_any().type_id() != info.type_id {
                    return Err(EcsError::ComponentTypeMismatch {
                        name: name.to_owned(),
                        expected: info.type_name,
                        found: instance.type_name(),
                    });
                }
            }
        }

        if self.archetypes[current.index()].has_component(name) {
            if let Some(instance) = component {
                self.archetypes[current.index()].release(type_id, instance);
            }
            return self.archetypes[current.index()]
                .get_component_mut(entity, name)
                .ok_or(EcsError::EntityNotFound(entity));
        }

        let wrap = |source: EcsError| EcsError::Migration {
            entity,
            component: name.to_owned(),
            source: Box::new(source),
        };

        let mut ids: Vec<ComponentTypeId> = self.archetypes[current.index()]
            .columns()
            .iter()
            .map(|c| c.type_id())
            .collect();
        ids.push(type_id);
        let target = self.archetype_for(&ids).map_err(wrap)?;

        // Take the new instance first so a pool failure leaves the entity put.
        let instance = match component {
            Some(instance) => instance,
            None => self.archetypes[target.index()].acquire(type_id).map_err(wrap)?,
        };

        let Some(mut moved) = self.archetypes[current.index()].take_entity(entity) else {
            self.archetypes[target.index()].release(type_id, instance);
            return Err(EcsError::EntityNotFound(entity));
        };
        moved.push((type_id, instance));

        if let Err(e) = self.archetypes[target.index()].add_entity(entity, &mut moved) {
            if let Some(pos) = moved.iter().position(|(t, _)| *t == type_id) {
                let (_, instance) = moved.swap_remove(pos);
                self.archetypes[target.index()].release(type_id, instance);
            }
            self.restore(entity, current, moved);
            return Err(wrap(e));
        }

        self.entity_archetype.insert(entity, target);
        self.invalidate_queries();
        self.check_consistency(current);
        self.check_consistency(target);
        self.record(|m| {
            m.migrations += 1;
            m.components_added += 1;
        });
        tracing::debug!(
            %entity,
            component = name,
            archetype = %self.archetypes[target.index()].key(),
            "component added"
        );
        self.events.emit(WorldEvent::ComponentAdded {
            entity,
            component: name.to_owned(),
        });

        self.archetypes[target.index()]
            .get_component_mut(entity, name)
            .ok_or(EcsError::EntityNotFound(entity))
    }

    /// Put an entity back where it came from after a failed migration.
    fn restore(
        &mut self,
        entity: Entity,
        archetype: ArchetypeId,
        mut instances: Vec<(ComponentTypeId, BoxedComponent)>,
    ) {
        if let Err(e) = self.archetypes[archetype.index()].add_entity(entity, &mut instances) {
            // Every instance is supplied, so only a duplicate row can land here.
            tracing::error!(%entity, error = %e, "failed to restore entity after migration error");
        }
    }

    /// Detach component `name` from `entity`, migrating it to the archetype
    /// without `name` and releasing the instance to its pool. A no-op if the
    /// entity lacks the component.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponent`], [`EcsError::EntityNotFound`],
    /// [`EcsError::NotReady`] or [`EcsError::Migration`].
    pub fn remove_component(&mut self, entity: Entity, name: &str) -> Result<(), EcsError> {
        self.ensure_ready("remove_component")?;
        let type_id = self.lookup_name(name)?;
        let current = self
            .archetype_of(entity)
            .ok_or(EcsError::EntityNotFound(entity))?;
        if !self.archetypes[current.index()].has_component(name) {
            return Ok(());
        }

        let wrap = |source: EcsError| EcsError::Migration {
            entity,
            component: name.to_owned(),
            source: Box::new(source),
        };

        let ids: Vec<ComponentTypeId> = self.archetypes[current.index()]
            .columns()
            .iter()
            .map(|c| c.type_id())
            .filter(|t| *t != type_id)
            .collect();
        let target = self.archetype_for(&ids).map_err(wrap)?;

        let mut moved = self.archetypes[current.index()]
            .take_entity(entity)
            .ok_or(EcsError::EntityNotFound(entity))?;
        let removed = moved
            .iter()
            .position(|(t, _)| *t == type_id)
            .map(|pos| moved.swap_remove(pos));

        if let Err(e) = self.archetypes[target.index()].add_entity(entity, &mut moved) {
            moved.extend(removed);
            self.restore(entity, current, moved);
            return Err(wrap(e));
        }
        if let Some((_, instance)) = removed {
            self.archetypes[current.index()].release(type_id, instance);
        }

        self.entity_archetype.insert(entity, target);
        self.invalidate_queries();
        self.check_consistency(current);
        self.check_consistency(target);
        self.record(|m| {
            m.migrations += 1;
            m.components_removed += 1;
        });
        tracing::debug!(%entity, component = name, "component removed");
        self.events.emit(WorldEvent::ComponentRemoved {
            entity,
            component: name.to_owned(),
        });
        Ok(())
    }

    /// Component `name` of `entity`.
    pub fn get_component(
        &self,
        entity: Entity,
        name: &str,
    ) -> Option<&(dyn ComponentData + 'static)> {
        let arch = self.archetype_of(entity)?;
        self.archetypes[arch.index()].get_component(entity, name)
    }

    /// Mutable component `name` of `entity`.
    pub fn get_component_mut(
        &mut self,
        entity: Entity,
        name: &str,
    ) -> Option<&mut (dyn ComponentData + 'static)> {
        let arch = self.archetype_of(entity)?;
        self.archetypes[arch.index()].get_component_mut(entity, name)
    }

    /// Whether `entity` has component `name`.
    pub fn has_component(&self, entity: Entity, name: &str) -> bool {
        self.archetype_of(entity)
            .is_some_and(|arch| self.archetypes[arch.index()].has_component(name))
    }

    // -- components by type ---------------------------------------------------

    /// Attach `value` under `T`'s registered name. Like
    /// [`add_component`](Self::add_component), an existing `T` is kept and
    /// returned unchanged.
    pub fn add<T: Component>(&mut self, entity: Entity, value: T) -> Result<&mut T, EcsError> {
        let name = self.name_for::<T>()?;
        self.add_component(entity, &name, Some(Box::new(value)))?
            .downcast_mut::<T>()
            .ok_or_else(|| EcsError::ComponentTypeMismatch {
                name,
                expected: std::any::type_name::<T>(),
                found: "unknown",
            })
    }

    /// Attach a pooled default `T`.
    pub fn add_default<T: Component>(&mut self, entity: Entity) -> Result<&mut T, EcsError> {
        let name = self.name_for::<T>()?;
        self.add_component(entity, &name, None)?
            .downcast_mut::<T>()
            .ok_or_else(|| EcsError::ComponentTypeMismatch {
                name,
                expected: std::any::type_name::<T>(),
                found: "unknown",
            })
    }

    /// The `T` attached to `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let name = self.registry.name_of::<T>()?;
        self.get_component(entity, name)?.downcast_ref::<T>()
    }

    /// Mutable `T` attached to `entity`.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let name = self.registry.name_of::<T>()?.to_owned();
        self.get_component_mut(entity, &name)?.downcast_mut::<T>()
    }

    /// Whether `entity` has a `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.registry
            .name_of::<T>()
            .is_some_and(|name| self.has_component(entity, name))
    }

    /// Detach `T` from `entity`.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<(), EcsError> {
        let name = self.name_for::<T>()?;
        self.remove_component(entity, &name)
    }

    // -- queries --------------------------------------------------------------

    /// Dedup `names` (first occurrence wins), resolve them, and find the
    /// matching archetypes through the cache.
    fn resolve_query<'n>(
        &self,
        names: &[&'n str],
    ) -> Result<(Vec<&'n str>, Vec<ArchetypeId>), EcsError> {
        if names.is_empty() {
            return Err(EcsError::EmptyQuery);
        }
        let mut requested: Vec<&str> = Vec::with_capacity(names.len());
        for &name in names {
            if !requested.contains(&name) {
                requested.push(name);
            }
        }
        let ids = requested
            .iter()
            .map(|n| self.lookup_name(n))
            .collect::<Result<Vec<_>, _>>()?;

        if self.config.enable_metrics {
            self.queries.set(self.queries.get() + 1);
        }
        let key = QueryCache::key_for(&requested);
        if let Some(hit) = self.query_cache.borrow_mut().get(&key) {
            return Ok((requested, hit));
        }
        let mask = ComponentMask::from_ids(ids);
        let matched = self.scan(&mask);
        self.query_cache.borrow_mut().insert(key, matched.clone());
        Ok((requested, matched))
    }

    fn scan(&self, mask: &ComponentMask) -> Vec<ArchetypeId> {
        self.archetypes
            .iter()
            .filter(|a| a.mask().contains_all(mask))
            .map(|a| a.id())
            .collect()
    }

    /// Archetypes whose signature is a superset of `mask`, through the
    /// bitmask-keyed cache.
    ///
    /// # Errors
    ///
    /// [`EcsError::NotReady`].
    pub fn matching_archetypes(&self, mask: &ComponentMask) -> Result<Vec<ArchetypeId>, EcsError> {
        self.ensure_ready("matching_archetypes")?;
        if let Some(hit) = self.query_cache.borrow_mut().get_mask(mask) {
            return Ok(hit);
        }
        let matched = self.scan(mask);
        self.query_cache
            .borrow_mut()
            .insert_mask(mask.clone(), matched.clone());
        Ok(matched)
    }

    /// Every entity that has all of `names`, with those components in the
    /// requested order. Repeated names are collapsed.
    ///
    /// # Errors
    ///
    /// [`EcsError::EmptyQuery`], [`EcsError::UnknownComponent`] or
    /// [`EcsError::NotReady`].
    pub fn query(&self, names: &[&str]) -> Result<Vec<QueryRow<'_>>, EcsError> {
        self.ensure_ready("query")?;
        let (requested, matched) = self.resolve_query(names)?;
        let mut rows = Vec::new();
        for id in matched {
            let archetype = &self.archetypes[id.index()];
            let cols: Option<Vec<usize>> =
                requested.iter().map(|n| archetype.column_index(n)).collect();
            if let Some(cols) = cols {
                rows.extend(archetype.rows(&cols));
            }
        }
        Ok(rows)
    }

    /// Mutable counterpart of [`query`](Self::query).
    pub fn query_mut(&mut self, names: &[&str]) -> Result<Vec<QueryRowMut<'_>>, EcsError> {
        self.ensure_ready("query")?;
        let (requested, matched) = self.resolve_query(names)?;
        let mut rows = Vec::new();
        for archetype in self.archetypes.iter_mut() {
            if !matched.contains(&archetype.id()) {
                continue;
            }
            let cols: Option<Vec<usize>> =
                requested.iter().map(|n| archetype.column_index(n)).collect();
            if let Some(cols) = cols {
                rows.extend(archetype.rows_mut(&cols));
            }
        }
        Ok(rows)
    }

    /// Entities matching `names`, without component access.
    pub fn query_entities(&self, names: &[&str]) -> Result<Vec<Entity>, EcsError> {
        self.ensure_ready("query")?;
        let (_, matched) = self.resolve_query(names)?;
        Ok(matched
            .into_iter()
            .flat_map(|id| self.archetypes[id.index()].entities().iter().copied())
            .collect())
    }

    // -- pools ----------------------------------------------------------------

    /// Expire idle pooled instances past their time-to-live. Returns the
    /// number dropped.
    pub fn prune_pools(&mut self) -> usize {
        let now = Instant::now();
        self.archetypes.iter_mut().map(|a| a.prune_pools(now)).sum()
    }

    // -- events ---------------------------------------------------------------

    /// Subscribe to events of `kind`.
    pub fn on(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&WorldEvent) + 'static,
    ) -> SubscriptionId {
        self.events.on(kind, listener)
    }

    /// Subscribe to every event.
    pub fn on_any(&mut self, listener: impl FnMut(&WorldEvent) + 'static) -> SubscriptionId {
        self.events.on_any(listener)
    }

    /// Subscribe to the next event of `kind`.
    pub fn once(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&WorldEvent) + 'static,
    ) -> SubscriptionId {
        self.events.once(kind, listener)
    }

    /// Remove a subscription.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    /// Deliver an event to subscribers.
    pub fn emit(&mut self, event: WorldEvent) {
        self.events.emit(event);
    }

    /// Open a buffered stream of every subsequent event.
    pub fn stream(&mut self) -> EventStream {
        self.events.stream()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    impl Component for Velocity {}

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Health(u32);
    impl Component for Health {}

    fn setup_world() -> World {
        let registry = ComponentRegistry::new()
            .with::<Position>("Position")
            .unwrap()
            .with::<Velocity>("Velocity")
            .unwrap()
            .with::<Health>("Health")
            .unwrap();
        World::with_registry(registry).unwrap()
    }

    #[test]
    fn empty_registry_rejected() {
        let err = World::with_registry(ComponentRegistry::new()).unwrap_err();
        assert!(matches!(err, EcsError::InvalidRegistry(_)));
    }

    #[test]
    fn new_entity_lives_in_empty_archetype() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        assert_eq!(world.archetype_of(e), Some(ArchetypeId::EMPTY));
        assert_eq!(world.archetype(ArchetypeId::EMPTY).unwrap().key(), "empty");
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn add_component_is_idempotent() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.add(e, Position { x: 1.0, y: 2.0 }).unwrap();
        let archetypes = world.archetype_count();
        let migrations = world.metrics().migrations;

        let existing = world.add(e, Position { x: 9.0, y: 9.0 }).unwrap();
        assert_eq!(*existing, Position { x: 1.0, y: 2.0 });
        assert_eq!(world.archetype_count(), archetypes);
        assert_eq!(world.metrics().migrations, migrations);
    }

    #[test]
    fn migration_preserves_other_components() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.add(e, Position { x: 1.0, y: 2.0 }).unwrap();
        world.add(e, Health(7)).unwrap();
        world.add(e, Velocity { dx: 3.0, dy: 4.0 }).unwrap();
        world.remove::<Health>(e).unwrap();

        assert_eq!(world.get::<Position>(e), Some(&Position { x: 1.0, y: 2.0 }));
        assert_eq!(world.get::<Velocity>(e), Some(&Velocity { dx: 3.0, dy: 4.0 }));
        assert!(!world.has::<Health>(e));
        assert_eq!(world.component_names(e).unwrap(), vec!["Position", "Velocity"]);
    }

    #[test]
    fn same_signature_shares_archetype_regardless_of_order() {
        let mut world = setup_world();
        let a = world.create_entity().unwrap();
        let b = world.create_entity().unwrap();
        world.add_default::<Position>(a).unwrap();
        world.add_default::<Velocity>(a).unwrap();
        world.add_default::<Velocity>(b).unwrap();
        world.add_default::<Position>(b).unwrap();
        assert_eq!(world.archetype_of(a), world.archetype_of(b));
        assert_eq!(
            world.archetype_by_key("Position,Velocity"),
            world.archetype_of(a)
        );
    }

    #[test]
    fn remove_missing_component_is_noop() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.remove_component(e, "Velocity").unwrap();
        assert_eq!(world.archetype_of(e), Some(ArchetypeId::EMPTY));
    }

    #[test]
    fn unknown_names_and_entities_error() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        assert!(matches!(
            world.add_component(e, "Mass", None),
            Err(EcsError::UnknownComponent { .. })
        ));
        let ghost = Entity::from_raw(99);
        assert!(matches!(
            world.add_component(ghost, "Position", None),
            Err(EcsError::EntityNotFound(_))
        ));
        assert!(matches!(world.query(&[]), Err(EcsError::EmptyQuery)));
    }

    #[test]
    fn supplied_instance_type_is_checked() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        let err = world
            .add_component(e, "Position", Some(Box::new(Health(1))))
            .unwrap_err();
        assert!(matches!(err, EcsError::ComponentTypeMismatch { .. }));
        assert!(!world.has::<Position>(e));
    }

    #[test]
    fn capacity_exceeded_leaves_count_unchanged() {
        let registry = ComponentRegistry::new().with::<Health>("Health").unwrap();
        let config = WorldConfig {
            max_entities: 2,
            ..WorldConfig::default()
        };
        let mut world = World::new(registry, config).unwrap();
        world.create_entity().unwrap();
        world.create_entity().unwrap();
        let err = world.create_entity().unwrap_err();
        assert!(matches!(err, EcsError::CapacityExceeded { limit: 2 }));
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    fn pool_exhaustion_is_wrapped_and_entity_stays_put() {
        let registry = ComponentRegistry::new().with::<Health>("Health").unwrap();
        let config = WorldConfig {
            pool: PoolConfig {
                initial_capacity: 1,
                max_capacity: 1,
                ..PoolConfig::default()
            },
            ..WorldConfig::default()
        };
        let mut world = World::new(registry, config).unwrap();
        let a = world.create_entity().unwrap();
        let b = world.create_entity().unwrap();
        world.add_default::<Health>(a).unwrap();

        let err = world.add_component(b, "Health", None).unwrap_err();
        match err {
            EcsError::Migration { entity, source, .. } => {
                assert_eq!(entity, b);
                assert!(matches!(*source, EcsError::PoolExhausted { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(world.archetype_of(b), Some(ArchetypeId::EMPTY));
        assert!(world.archetypes().iter().all(|a| a.is_consistent()));
    }

    #[test]
    fn destroy_recycles_id_and_releases_components() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.add(e, Health(3)).unwrap();
        let arch = world.archetype_of(e).unwrap();
        world.destroy_entity(e).unwrap();

        assert!(!world.is_alive(e));
        assert_eq!(world.get::<Health>(e), None);
        assert_eq!(world.archetype(arch).unwrap().columns()[0].pool().idle(), 1);
        assert!(matches!(
            world.destroy_entity(e),
            Err(EcsError::EntityNotFound(_))
        ));

        let reused = world.create_entity().unwrap();
        assert_eq!(reused, e);
        assert!(!world.has::<Health>(reused));
    }

    #[test]
    fn query_returns_components_in_requested_order() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.add(e, Position { x: 1.0, y: 0.0 }).unwrap();
        world.add(e, Velocity { dx: 2.0, dy: 0.0 }).unwrap();

        let rows = world.query(&["Velocity", "Position", "Velocity"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].components.len(), 2);
        assert!(rows[0].components[0].is::<Velocity>());
        assert_eq!(rows[0].get::<Position>().map(|p| p.x), Some(1.0));
    }

    #[test]
    fn query_mut_writes_through() {
        let mut world = setup_world();
        for i in 0..3 {
            let e = world.create_entity().unwrap();
            world.add(e, Position { x: i as f32, y: 0.0 }).unwrap();
            world.add(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        }
        let lone = world.create_entity().unwrap();
        world.add(lone, Position::default()).unwrap();

        for mut row in world.query_mut(&["Position", "Velocity"]).unwrap() {
            let (pos, vel) = row.split_mut::<Position, Velocity>().unwrap();
            pos.x += vel.dx;
            pos.y += vel.dy;
        }
        let mut xs: Vec<f32> = world
            .query(&["Position", "Velocity"])
            .unwrap()
            .iter()
            .filter_map(|r| r.get::<Position>().map(|p| p.x))
            .collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(world.get::<Position>(lone), Some(&Position::default()));
    }

    #[test]
    fn cache_hits_until_structural_change() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.add_default::<Position>(e).unwrap();

        world.query(&["Position"]).unwrap();
        world.query(&["Position"]).unwrap();
        assert_eq!(world.metrics().cache_hits, 1);

        let f = world.create_entity().unwrap();
        world.add_default::<Position>(f).unwrap();
        assert_eq!(world.query(&["Position"]).unwrap().len(), 2);
        assert_eq!(world.metrics().cache_hits, 1);
    }

    #[test]
    fn mask_cache_is_invalidated_with_string_cache() {
        let mut world = setup_world();
        let pos = world.registry().lookup::<Position>().unwrap();
        let mask = ComponentMask::from_ids([pos]);
        assert!(world.matching_archetypes(&mask).unwrap().is_empty());

        let e = world.create_entity().unwrap();
        world.add_default::<Position>(e).unwrap();
        assert_eq!(
            world.matching_archetypes(&mask).unwrap(),
            vec![world.archetype_of(e).unwrap()]
        );
    }

    #[test]
    fn mask_lookup_requires_ready_world() {
        let mut world = setup_world();
        let pos = world.registry().lookup::<Position>().unwrap();
        let mask = ComponentMask::from_ids([pos]);

        world.pause().unwrap();
        assert!(matches!(
            world.matching_archetypes(&mask),
            Err(EcsError::NotReady { .. })
        ));
        world.resume().unwrap();
        assert!(world.matching_archetypes(&mask).is_ok());

        world.dispose();
        assert!(matches!(
            world.matching_archetypes(&mask),
            Err(EcsError::NotReady { .. })
        ));
    }

    #[test]
    fn events_fire_after_mutation() {
        let mut world = setup_world();
        let stream = world.stream();
        let e = world.create_entity().unwrap();
        world.register_actor(e).unwrap();
        world.add_default::<Health>(e).unwrap();
        world.remove::<Health>(e).unwrap();
        world.destroy_entity(e).unwrap();

        let kinds: Vec<EventKind> = stream.drain().iter().map(WorldEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::EntityCreated,
                EventKind::ComponentAdded,
                EventKind::ComponentRemoved,
                EventKind::EntityDestroyed,
                EventKind::ActorDestroyed,
            ]
        );
        assert!(!world.is_actor(e));
    }

    #[test]
    fn listener_sees_state_after_mutation() {
        let mut world = setup_world();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        world.on(EventKind::ComponentAdded, move |event| {
            if let WorldEvent::ComponentAdded { component, .. } = event {
                sink.borrow_mut().push(component.clone());
            }
        });
        let e = world.create_entity().unwrap();
        world.add_default::<Velocity>(e).unwrap();
        assert_eq!(*seen.borrow(), vec!["Velocity".to_owned()]);
    }

    #[test]
    fn paused_and_disposed_worlds_reject_operations() {
        let mut world = setup_world();
        let e = world.create_entity().unwrap();
        world.add_default::<Position>(e).unwrap();

        world.pause().unwrap();
        assert!(matches!(
            world.create_entity(),
            Err(EcsError::NotReady { state: WorldState::Paused, .. })
        ));
        assert!(world.query(&["Position"]).is_err());
        world.resume().unwrap();
        assert_eq!(world.query(&["Position"]).unwrap().len(), 1);

        world.dispose();
        world.dispose();
        assert_eq!(world.state(), WorldState::Disposed);
        assert_eq!(world.entity_count(), 0);
        assert!(world.create_entity().is_err());
        assert!(world.resume().is_err());
    }

    #[test]
    fn metrics_can_be_disabled() {
        let registry = ComponentRegistry::new().with::<Health>("Health").unwrap();
        let config = WorldConfig {
            enable_metrics: false,
            ..WorldConfig::default()
        };
        let mut world = World::new(registry, config).unwrap();
        let e = world.create_entity().unwrap();
        world.add_default::<Health>(e).unwrap();
        world.query(&["Health"]).unwrap();
        world.query(&["Health"]).unwrap();

        let m = world.metrics();
        assert_eq!(m.entities_created, 0);
        assert_eq!(m.migrations, 0);
        assert_eq!(m.queries, 0);
        assert_eq!(m.cache_hits, 0);
        assert_eq!(m.cache_misses, 0);
    }

    #[test]
    fn config_loads_from_partial_json() {
        let json = r#"{ "max_entities": 10, "pool": { "eviction": "none" } }"#;
        let config: WorldConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_entities, 10);
        assert!(config.validate);
        assert_eq!(config.pool.eviction, crate::pool::EvictionPolicy::None);
        assert_eq!(config.pool.initial_capacity, 16);
    }
}
