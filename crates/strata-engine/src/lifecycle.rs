//! Per-component lifecycle state machine.
//!
//! Every behavior attached to an actor lives in a [`ComponentSlot`] that moves
//! through
//!
//! ```text
//! uninitialized -> awake -> started -> enabled <-> disabled -> destroyed
//! ```
//!
//! A failing hook rolls the slot back to the state it held before the
//! transition and surfaces a [`LifecycleError`]. `destroy` is terminal and
//! idempotent. `update` only runs while enabled and its failures are logged
//! rather than returned.
//!
//! Hooks see the world through a [`HookContext`], which also memoizes
//! sibling and actor lookups in a short-lived [`LookupCache`].

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::error;

use strata_ecs::component::Component;
use strata_ecs::entity::Entity;
use strata_ecs::world::World;

use crate::behavior::{BehaviorDescriptor, Dependency, Hook};
use crate::LifecycleError;

/// Default lifetime of a memoized lookup.
pub const DEFAULT_LOOKUP_TTL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// States and phases
// ---------------------------------------------------------------------------

/// Where a component is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Awake,
    Started,
    Enabled,
    Disabled,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Awake => "awake",
            LifecycleState::Started => "started",
            LifecycleState::Enabled => "enabled",
            LifecycleState::Disabled => "disabled",
            LifecycleState::Destroyed => "destroyed",
        })
    }
}

/// The hook being run when a lifecycle error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Awake,
    Start,
    Enable,
    Disable,
    Destroy,
    Update,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecyclePhase::Awake => "awake",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Enable => "enable",
            LifecyclePhase::Disable => "disable",
            LifecyclePhase::Destroy => "destroy",
            LifecyclePhase::Update => "update",
        })
    }
}

// ---------------------------------------------------------------------------
// LookupCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LookupKey {
    Sibling(TypeId),
    ActorsWith(TypeId),
}

#[derive(Debug)]
struct CachedLookup {
    component: String,
    entities: Vec<Entity>,
    at: Instant,
}

/// Memoized lookups with a time-to-live.
///
/// Entries hold entity handles, never references. An entry is served only if
/// it is younger than the TTL and every entity in it still carries the looked
/// up component; otherwise it is dropped and the lookup runs again.
#[derive(Debug)]
pub struct LookupCache {
    ttl: Duration,
    entries: HashMap<LookupKey, CachedLookup>,
    hits: u64,
    misses: u64,
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_TTL)
    }
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn resolve(
        &mut self,
        key: LookupKey,
        world: &World,
        now: Instant,
        fetch: impl FnOnce(&World) -> Option<(String, Vec<Entity>)>,
    ) -> Vec<Entity> {
        if let Some(cached) = self.entries.get(&key) {
            let fresh = now.saturating_duration_since(cached.at) < self.ttl;
            if fresh
                && cached
                    .entities
                    .iter()
                    .all(|&e| world.has_component(e, &cached.component))
            {
                self.hits += 1;
                return cached.entities.clone();
            }
            self.entries.remove(&key);
        }
        self.misses += 1;
        match fetch(world) {
            Some((component, entities)) => {
                self.entries.insert(
                    key,
                    CachedLookup {
                        component,
                        entities: entities.clone(),
                        at: now,
                    },
                );
                entities
            }
            None => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// HookContext
// ---------------------------------------------------------------------------

/// What a lifecycle hook can see: the world, the owning entity, and the
/// component's lookup cache.
pub struct HookContext<'a> {
    world: &'a mut World,
    entity: Entity,
    component: &'a str,
    cache: &'a mut LookupCache,
}

impl<'a> HookContext<'a> {
    pub fn new(
        world: &'a mut World,
        entity: Entity,
        component: &'a str,
        cache: &'a mut LookupCache,
    ) -> Self {
        Self {
            world,
            entity,
            component,
            cache,
        }
    }

    /// The entity owning the component.
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Registered name of the component whose hook is running.
    pub fn component_name(&self) -> &str {
        self.component
    }

    pub fn world(&self) -> &World {
        &*self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut *self.world
    }

    /// The component's own data.
    pub fn this<T: Component>(&mut self) -> Option<&mut T> {
        self.world.get_mut::<T>(self.entity)
    }

    /// A sibling component on the same entity, through the lookup cache.
    pub fn sibling<T: Component>(&mut self) -> Option<&mut T> {
        let entity = self.entity;
        let found = self.cache.resolve(
            LookupKey::Sibling(TypeId::of::<T>()),
            &*self.world,
            Instant::now(),
            |world| {
                let name = world.registry().name_of::<T>()?.to_owned();
                world.has_component(entity, &name).then(|| (name, vec![entity]))
            },
        );
        if found.is_empty() {
            return None;
        }
        self.world.get_mut::<T>(entity)
    }

    /// Entities with a bound actor that carry `T`, through the lookup cache.
    pub fn find_actors_with<T: Component>(&mut self) -> Vec<Entity> {
        self.cache.resolve(
            LookupKey::ActorsWith(TypeId::of::<T>()),
            &*self.world,
            Instant::now(),
            |world| {
                let name = world.registry().name_of::<T>()?.to_owned();
                let mut entities: Vec<Entity> = world
                    .query_entities(&[name.as_str()])
                    .ok()?
                    .into_iter()
                    .filter(|&e| world.is_actor(e))
                    .collect();
                entities.sort();
                Some((name, entities))
            },
        )
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("entity", &self.entity)
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ComponentSlot
// ---------------------------------------------------------------------------

/// Run `hook` if present, mapping its failure to a lifecycle error.
fn run_hook(
    hook: &mut Option<Hook>,
    phase: LifecyclePhase,
    name: &str,
    cache: &mut LookupCache,
    world: &mut World,
    entity: Entity,
) -> Result<(), LifecycleError> {
    let Some(hook) = hook.as_mut() else {
        return Ok(());
    };
    let mut ctx = HookContext::new(world, entity, name, cache);
    hook(&mut ctx).map_err(|source| LifecycleError::HookFailed {
        component: name.to_owned(),
        phase,
        source,
    })
}

/// One behavior attached to an actor, with its lifecycle state.
///
/// `enabled` is the behavior's own flag. The slot is in the `Enabled` state
/// only when that flag is set and the owning actor is active.
#[derive(Debug)]
pub struct ComponentSlot {
    name: String,
    descriptor: BehaviorDescriptor,
    state: LifecycleState,
    enabled: bool,
    cache: LookupCache,
}

impl ComponentSlot {
    pub fn new(
        name: impl Into<String>,
        descriptor: BehaviorDescriptor,
        lookup_ttl: Duration,
    ) -> Self {
        let enabled = descriptor.starts_enabled();
        Self {
            name: name.into(),
            descriptor,
            state: LifecycleState::Uninitialized,
            enabled,
            cache: LookupCache::new(lookup_ttl),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.descriptor.type_id()
    }

    pub fn priority(&self) -> i32 {
        self.descriptor.priority_value()
    }

    pub fn is_singleton(&self) -> bool {
        self.descriptor.is_singleton()
    }

    pub fn dependencies(&self) -> &[Dependency] {
        self.descriptor.dependencies()
    }

    pub fn depends_on(&self, type_id: TypeId) -> bool {
        self.descriptor.depends_on_type(type_id)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == LifecycleState::Destroyed
    }

    /// Whether `start` has completed.
    pub fn is_started(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Started | LifecycleState::Enabled | LifecycleState::Disabled
        )
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    fn invalid(&self, action: &'static str) -> LifecycleError {
        LifecycleError::InvalidTransition {
            component: self.name.clone(),
            from: self.state,
            action,
        }
    }

    /// `uninitialized -> awake`.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] from any other state, or
    /// [`LifecycleError::HookFailed`], in which case the slot is back in
    /// `uninitialized`.
    pub fn awake(&mut self, world: &mut World, entity: Entity) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Uninitialized {
            return Err(self.invalid("awake"));
        }
        self.state = LifecycleState::Awake;
        let result = run_hook(
            &mut self.descriptor.hooks.awake,
            LifecyclePhase::Awake,
            &self.name,
            &mut self.cache,
            world,
            entity,
        );
        if result.is_err() {
            self.state = LifecycleState::Uninitialized;
        }
        result
    }

    /// `awake -> started`, then straight on to `enabled` (running the enable
    /// hook) if the slot is enabled and `active` is set, or to `disabled`.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] unless awake. A failing start or
    /// enable hook leaves the slot awake.
    pub fn start(
        &mut self,
        world: &mut World,
        entity: Entity,
        active: bool,
    ) -> Result<(), LifecycleError> {
        if self.state != LifecycleState::Awake {
            return Err(self.invalid("start"));
        }
        self.state = LifecycleState::Started;
        if let Err(e) = run_hook(
            &mut self.descriptor.hooks.start,
            LifecyclePhase::Start,
            &self.name,
            &mut self.cache,
            world,
            entity,
        ) {
            self.state = LifecycleState::Awake;
            return Err(e);
        }

        if self.enabled && active {
            self.state = LifecycleState::Enabled;
            if let Err(e) = run_hook(
                &mut self.descriptor.hooks.on_enable,
                LifecyclePhase::Enable,
                &self.name,
                &mut self.cache,
                world,
                entity,
            ) {
                self.state = LifecycleState::Awake;
                return Err(e);
            }
        } else {
            self.state = LifecycleState::Disabled;
        }
        Ok(())
    }

    /// `disabled -> enabled`, running the enable hook. A no-op when already
    /// enabled.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] before start or after destroy.
    /// A failing hook leaves the slot disabled.
    pub fn activate(&mut self, world: &mut World, entity: Entity) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Enabled => Ok(()),
            LifecycleState::Disabled => {
                self.state = LifecycleState::Enabled;
                let result = run_hook(
                    &mut self.descriptor.hooks.on_enable,
                    LifecyclePhase::Enable,
                    &self.name,
                    &mut self.cache,
                    world,
                    entity,
                );
                if result.is_err() {
                    self.state = LifecycleState::Disabled;
                }
                result
            }
            _ => Err(self.invalid("enable")),
        }
    }

    /// `enabled -> disabled`, running the disable hook. A no-op when already
    /// disabled.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] before start or after destroy.
    /// A failing hook leaves the slot enabled.
    pub fn deactivate(&mut self, world: &mut World, entity: Entity) -> Result<(), LifecycleError> {
        match self.state {
            LifecycleState::Disabled => Ok(()),
            LifecycleState::Enabled => {
                self.state = LifecycleState::Disabled;
                let result = run_hook(
                    &mut self.descriptor.hooks.on_disable,
                    LifecyclePhase::Disable,
                    &self.name,
                    &mut self.cache,
                    world,
                    entity,
                );
                if result.is_err() {
                    self.state = LifecycleState::Enabled;
                }
                result
            }
            _ => Err(self.invalid("disable")),
        }
    }

    /// Set the behavior's own enabled flag. Once started, the slot follows
    /// the flag (gated by `active`) and runs the matching hook. On failure
    /// the flag is reverted.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidTransition`] after destroy, or the hook
    /// failure.
    pub fn set_enabled(
        &mut self,
        world: &mut World,
        entity: Entity,
        enabled: bool,
        active: bool,
    ) -> Result<(), LifecycleError> {
        if self.is_destroyed() {
            return Err(self.invalid(if enabled { "enable" } else { "disable" }));
        }
        let previous = self.enabled;
        self.enabled = enabled;
        if !self.is_started() {
            return Ok(());
        }
        let result = if enabled && active {
            self.activate(world, entity)
        } else {
            self.deactivate(world, entity)
        };
        if result.is_err() {
            self.enabled = previous;
        }
        result
    }

    /// Tear the slot down: disable if enabled, run the destroy hook, drop
    /// cached lookups. Terminal and idempotent.
    ///
    /// The slot always ends up destroyed. The first hook failure, if any, is
    /// returned for the caller to report.
    pub fn destroy(&mut self, world: &mut World, entity: Entity) -> Result<(), LifecycleError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let mut first_error = None;
        if self.state == LifecycleState::Enabled {
            if let Err(e) = run_hook(
                &mut self.descriptor.hooks.on_disable,
                LifecyclePhase::Disable,
                &self.name,
                &mut self.cache,
                world,
                entity,
            ) {
                first_error = Some(e);
            }
            self.state = LifecycleState::Disabled;
        }
        if let Err(e) = run_hook(
            &mut self.descriptor.hooks.on_destroy,
            LifecyclePhase::Destroy,
            &self.name,
            &mut self.cache,
            world,
            entity,
        ) {
            first_error.get_or_insert(e);
        }
        self.state = LifecycleState::Destroyed;
        self.enabled = false;
        self.cache.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Run the update hook if the slot is enabled. Failures are logged and
    /// swallowed. Returns whether the hook ran and succeeded.
    pub fn update(&mut self, world: &mut World, entity: Entity, delta: f64) -> bool {
        if self.state != LifecycleState::Enabled {
            return false;
        }
        let Some(hook) = self.descriptor.hooks.update.as_mut() else {
            return false;
        };
        let mut ctx = HookContext::new(world, entity, &self.name, &mut self.cache);
        match hook(&mut ctx, delta) {
            Ok(()) => true,
            Err(source) => {
                error!(
                    %entity,
                    component = %self.name,
                    error = %source,
                    "component update failed"
                );
                false
            }
        }
    }
}
