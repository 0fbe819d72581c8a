//! Actors: one entity plus the behaviors attached to it.
//!
//! An [`Actor`] does not own component data; that stays in the
//! [`World`]'s archetype storage. The actor owns one [`ComponentSlot`] per
//! attached behavior, tracking its lifecycle state, priority and declared
//! dependencies. Slots reference each other by type, never by pointer.
//!
//! Bulk operations (`start`, `update`, toggling `active`) walk the slots in
//! descending priority. `destroy` walks them in ascending priority so the
//! highest priority behavior is torn down last.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use strata_ecs::component::BoxedComponent;
use strata_ecs::entity::Entity;
use strata_ecs::world::World;
use strata_ecs::EcsError;

use crate::behavior::{Behavior, BehaviorDescriptor};
use crate::lifecycle::{ComponentSlot, LifecycleState};
use crate::ActorError;

// ---------------------------------------------------------------------------
// ActorConfig
// ---------------------------------------------------------------------------

/// Construction options for an [`Actor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Display name. Must not be blank.
    pub name: String,
    /// Render/collision layer. Must not be negative.
    pub layer: i32,
    /// Free-form tag. Must not be blank.
    pub tag: String,
    /// Whether attached behaviors are enabled once started.
    pub active: bool,
    /// Maximum number of attached behaviors.
    pub max_components: usize,
    /// Lifetime of memoized sibling and actor lookups, in milliseconds.
    pub lookup_ttl_ms: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            name: "Actor".to_owned(),
            layer: 0,
            tag: "untagged".to_owned(),
            active: true,
            max_components: 64,
            lookup_ttl_ms: 250,
        }
    }
}

impl ActorConfig {
    /// Default options with the given name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }
}

fn check_name(property: &'static str, value: &str) -> Result<(), ActorError> {
    if value.trim().is_empty() {
        return Err(ActorError::InvalidProperty {
            property,
            reason: "must not be blank".to_owned(),
        });
    }
    Ok(())
}

fn check_layer(layer: i32) -> Result<(), ActorError> {
    if layer < 0 {
        return Err(ActorError::InvalidProperty {
            property: "layer",
            reason: format!("must not be negative, got {layer}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

type Cleanup = Box<dyn FnOnce(&mut World)>;

/// Orchestrates the behaviors attached to one entity.
pub struct Actor {
    entity: Entity,
    name: String,
    layer: i32,
    tag: String,
    active: bool,
    max_components: usize,
    lookup_ttl: Duration,
    /// Attached behaviors in attachment order.
    slots: Vec<ComponentSlot>,
    /// Behavior type to slot index.
    index: HashMap<TypeId, usize>,
    started: bool,
    destroyed: bool,
    cleanups: Vec<Cleanup>,
}

impl Actor {
    /// Create an actor with a fresh entity in `world`.
    ///
    /// # Errors
    ///
    /// [`ActorError::InvalidInput`] for a blank name or tag, a negative layer
    /// or a zero component limit; [`ActorError::Ecs`] if the entity could not
    /// be created.
    pub fn new(world: &mut World, config: ActorConfig) -> Result<Self, ActorError> {
        if config.name.trim().is_empty() {
            return Err(ActorError::InvalidInput("name must not be blank".to_owned()));
        }
        if config.tag.trim().is_empty() {
            return Err(ActorError::InvalidInput("tag must not be blank".to_owned()));
        }
        if config.layer < 0 {
            return Err(ActorError::InvalidInput(format!(
                "layer must not be negative, got {}",
                config.layer
            )));
        }
        if config.max_components == 0 {
            return Err(ActorError::InvalidInput(
                "max_components must be at least 1".to_owned(),
            ));
        }

        let entity = world.create_entity()?;
        world.register_actor(entity)?;
        debug!(%entity, name = %config.name, "actor created");
        Ok(Self {
            entity,
            name: config.name,
            layer: config.layer,
            tag: config.tag,
            active: config.active,
            max_components: config.max_components,
            lookup_ttl: Duration::from_millis(config.lookup_ttl_ms),
            slots: Vec::new(),
            index: HashMap::new(),
            started: false,
            destroyed: false,
            cleanups: Vec::new(),
        })
    }

    // -- accessors ------------------------------------------------------------

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer(&self) -> i32 {
        self.layer
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Overall state: `destroyed`, `started` or `awake`.
    pub fn state(&self) -> LifecycleState {
        if self.destroyed {
            LifecycleState::Destroyed
        } else if self.started {
            LifecycleState::Started
        } else {
            LifecycleState::Awake
        }
    }

    pub fn component_count(&self) -> usize {
        self.slots.len()
    }

    pub fn max_components(&self) -> usize {
        self.max_components
    }

    /// Registered names of the attached behaviors, in descending priority.
    pub fn component_names(&self) -> Vec<&str> {
        self.priority_order()
            .into_iter()
            .map(|i| self.slots[i].name())
            .collect()
    }

    pub fn has_component<T: Behavior>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<T>())
    }

    /// Lifecycle state of the attached `T`.
    pub fn component_state<T: Behavior>(&self) -> Option<LifecycleState> {
        self.slot::<T>().map(ComponentSlot::state)
    }

    pub fn slot<T: Behavior>(&self) -> Option<&ComponentSlot> {
        self.index.get(&TypeId::of::<T>()).map(|&i| &self.slots[i])
    }

    /// The data of the attached `T`.
    pub fn get_component<'w, T: Behavior>(&self, world: &'w World) -> Option<&'w T> {
        if !self.has_component::<T>() {
            return None;
        }
        world.get::<T>(self.entity)
    }

    pub fn get_component_mut<'w, T: Behavior>(&self, world: &'w mut World) -> Option<&'w mut T> {
        if !self.has_component::<T>() {
            return None;
        }
        world.get_mut::<T>(self.entity)
    }

    /// Like [`get_component`](Self::get_component), failing when `T` is not
    /// attached.
    ///
    /// # Errors
    ///
    /// [`ActorError::MissingComponent`].
    pub fn require_component<'w, T: Behavior>(
        &self,
        world: &'w World,
    ) -> Result<&'w T, ActorError> {
        self.get_component::<T>(world)
            .ok_or_else(|| ActorError::MissingComponent {
                component: type_name::<T>().to_owned(),
            })
    }

    /// Slot indices sorted by descending priority; ties keep attachment
    /// order.
    fn priority_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.slots[i].priority()));
        order
    }

    fn ensure_alive(&self, operation: &'static str) -> Result<(), ActorError> {
        if self.destroyed {
            return Err(ActorError::Destroyed {
                actor: self.name.clone(),
                operation,
            });
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.type_id(), i))
            .collect();
    }

    // -- attaching ------------------------------------------------------------

    /// Attach `value` as behavior `T`, attaching its missing dependencies
    /// first.
    ///
    /// The behavior is stored in the world, its awake hook runs, then its
    /// start hook if this actor has started, then its enable hook if this
    /// actor is active. If anything fails, every behavior attached by this
    /// call is detached again.
    ///
    /// # Errors
    ///
    /// - [`ActorError::Destroyed`] after [`destroy`](Self::destroy).
    /// - [`ActorError::UnregisteredComponent`] if `T` or a dependency is not
    ///   in the world's registry.
    /// - [`ActorError::DuplicateComponent`] if `T` is attached and not a
    ///   singleton. An attached singleton is returned unchanged instead.
    /// - [`ActorError::ComponentLimit`] at the component ceiling.
    /// - [`ActorError::CircularDependency`] if the dependency graph loops.
    /// - [`ActorError::Lifecycle`] if a hook fails.
    pub fn add_component<'w, T: Behavior>(
        &mut self,
        world: &'w mut World,
        value: T,
    ) -> Result<&'w mut T, ActorError> {
        self.attach_root(world, T::describe(), Some(Box::new(value)))?;
        self.fetch::<T>(world)
    }

    /// Attach a pooled default instance of behavior `T`.
    ///
    /// # Errors
    ///
    /// As [`add_component`](Self::add_component).
    pub fn add_default<'w, T: Behavior>(
        &mut self,
        world: &'w mut World,
    ) -> Result<&'w mut T, ActorError> {
        self.attach_root(world, T::describe(), None)?;
        self.fetch::<T>(world)
    }

    fn fetch<'w, T: Behavior>(&self, world: &'w mut World) -> Result<&'w mut T, ActorError> {
        world
            .get_mut::<T>(self.entity)
            .ok_or_else(|| ActorError::MissingComponent {
                component: type_name::<T>().to_owned(),
            })
    }

    fn attach_root(
        &mut self,
        world: &mut World,
        descriptor: BehaviorDescriptor,
        value: Option<BoxedComponent>,
    ) -> Result<(), ActorError> {
        self.ensure_alive("add_component")?;
        let before = self.slots.len();
        let result = self.attach(world, descriptor, value, &mut Vec::new());
        if result.is_err() {
            self.rollback(world, before);
        }
        result
    }

    /// Attach one behavior, resolving its dependencies depth first.
    /// `resolving` holds the names currently being resolved, outermost first.
    fn attach(
        &mut self,
        world: &mut World,
        descriptor: BehaviorDescriptor,
        value: Option<BoxedComponent>,
        resolving: &mut Vec<String>,
    ) -> Result<(), ActorError> {
        let type_id = descriptor.type_id();
        let name = world
            .registry()
            .name_of_type_id(type_id)
            .ok_or(ActorError::UnregisteredComponent {
                component: descriptor.type_name(),
            })?
            .to_owned();

        if let Some(&existing) = self.index.get(&type_id) {
            if self.slots[existing].is_singleton() {
                return Ok(());
            }
            return Err(ActorError::DuplicateComponent { component: name });
        }
        if resolving.contains(&name) {
            let mut chain = resolving.clone();
            chain.push(name);
            return Err(ActorError::CircularDependency { chain });
        }

        resolving.push(name.clone());
        for dep in descriptor.dependencies().to_vec() {
            if self.index.contains_key(&dep.type_id()) {
                continue;
            }
            self.attach(world, dep.describe(), None, resolving)?;
        }
        resolving.pop();

        if self.slots.len() >= self.max_components {
            return Err(ActorError::ComponentLimit {
                limit: self.max_components,
            });
        }

        world.add_component(self.entity, &name, value)?;
        let mut slot = ComponentSlot::new(name, descriptor, self.lookup_ttl);
        if let Err(e) = slot.awake(world, self.entity) {
            self.detach_storage(world, slot.name());
            return Err(e.into());
        }
        if self.started {
            if let Err(e) = slot.start(world, self.entity, self.active) {
                self.detach_storage(world, slot.name());
                return Err(e.into());
            }
        }

        debug!(entity = %self.entity, component = slot.name(), "component attached");
        self.index.insert(type_id, self.slots.len());
        self.slots.push(slot);
        Ok(())
    }

    /// Detach every slot past `len`, newest first.
    fn rollback(&mut self, world: &mut World, len: usize) {
        while self.slots.len() > len {
            let Some(mut slot) = self.slots.pop() else {
                break;
            };
            if let Err(e) = slot.destroy(world, self.entity) {
                error!(
                    entity = %self.entity,
                    component = slot.name(),
                    error = %e,
                    "rollback teardown failed"
                );
            }
            self.detach_storage(world, slot.name());
        }
        self.rebuild_index();
    }

    fn detach_storage(&self, world: &mut World, name: &str) {
        if let Err(e) = world.remove_component(self.entity, name) {
            warn!(
                entity = %self.entity,
                component = name,
                error = %e,
                "failed to detach component storage"
            );
        }
    }

    // -- detaching ------------------------------------------------------------

    /// Disable, destroy and detach behavior `T`. Returns `false` if it was
    /// not attached.
    ///
    /// Hook failures during teardown are logged; the behavior is detached
    /// regardless.
    ///
    /// # Errors
    ///
    /// - [`ActorError::Destroyed`] after [`destroy`](Self::destroy).
    /// - [`ActorError::DependencyViolation`] if another attached behavior
    ///   depends on `T`. Nothing is changed.
    /// - [`ActorError::Ecs`] if the world is not ready or rejected the
    ///   removal. A world that is not ready is detected before any hook runs,
    ///   so the behavior stays attached.
    pub fn remove_component<T: Behavior>(&mut self, world: &mut World) -> Result<bool, ActorError> {
        self.ensure_alive("remove_component")?;
        let type_id = TypeId::of::<T>();
        let Some(&i) = self.index.get(&type_id) else {
            return Ok(false);
        };
        if let Some(dependent) = self.slots.iter().find(|s| s.depends_on(type_id)) {
            return Err(ActorError::DependencyViolation {
                component: self.slots[i].name().to_owned(),
                dependent: dependent.name().to_owned(),
            });
        }
        // Teardown is irreversible; refuse before it starts.
        world.ensure_ready("remove_component")?;

        let mut slot = self.slots.remove(i);
        self.rebuild_index();
        if let Err(e) = slot.destroy(world, self.entity) {
            error!(
                entity = %self.entity,
                component = slot.name(),
                error = %e,
                "component teardown failed"
            );
        }
        world.remove_component(self.entity, slot.name())?;
        debug!(entity = %self.entity, component = slot.name(), "component detached");
        Ok(true)
    }

    // -- lifecycle ------------------------------------------------------------

    /// Start every attached behavior that has not started yet, in descending
    /// priority. Behaviors attached later start as they attach.
    ///
    /// # Errors
    ///
    /// [`ActorError::Destroyed`], or the first hook failure. Behaviors that
    /// started before the failure stay started; calling `start` again retries
    /// the rest.
    pub fn start(&mut self, world: &mut World) -> Result<(), ActorError> {
        self.ensure_alive("start")?;
        for i in self.priority_order() {
            if self.slots[i].state() == LifecycleState::Awake {
                self.slots[i].start(world, self.entity, self.active)?;
            }
        }
        self.started = true;
        Ok(())
    }

    /// Run update hooks in descending priority. Does nothing unless the
    /// actor is started, active and not destroyed. Hook failures are logged.
    pub fn update(&mut self, world: &mut World, delta: f64) {
        if self.destroyed || !self.started || !self.active {
            return;
        }
        for i in self.priority_order() {
            self.slots[i].update(world, self.entity, delta);
        }
    }

    /// Tear the actor down: destroy behaviors in ascending priority, run
    /// cleanup callbacks, then destroy the entity. Idempotent.
    ///
    /// Hook failures are logged and do not stop the teardown.
    pub fn destroy(&mut self, world: &mut World) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let mut order = self.priority_order();
        order.reverse();
        for i in order {
            let slot = &mut self.slots[i];
            if let Err(e) = slot.destroy(world, self.entity) {
                error!(
                    entity = %self.entity,
                    component = slot.name(),
                    error = %e,
                    "component teardown failed"
                );
            }
        }
        self.slots.clear();
        self.index.clear();

        for cleanup in self.cleanups.drain(..) {
            cleanup(world);
        }

        match world.destroy_entity(self.entity) {
            Ok(()) | Err(EcsError::EntityNotFound(_)) => {}
            Err(e) => warn!(entity = %self.entity, error = %e, "failed to destroy actor entity"),
        }
        debug!(entity = %self.entity, name = %self.name, "actor destroyed");
    }

    /// Register a callback to run during [`destroy`](Self::destroy), after
    /// the behaviors are torn down and before the entity is destroyed.
    pub fn on_cleanup(&mut self, cleanup: impl FnOnce(&mut World) + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    // -- properties -----------------------------------------------------------

    /// # Errors
    ///
    /// [`ActorError::Destroyed`] or [`ActorError::InvalidProperty`] for a
    /// blank name.
    pub fn set_name(&mut self, name: &str) -> Result<(), ActorError> {
        self.ensure_alive("rename")?;
        check_name("name", name)?;
        self.name = name.to_owned();
        Ok(())
    }

    /// # Errors
    ///
    /// [`ActorError::Destroyed`] or [`ActorError::InvalidProperty`] for a
    /// negative layer.
    pub fn set_layer(&mut self, layer: i32) -> Result<(), ActorError> {
        self.ensure_alive("set layer of")?;
        check_layer(layer)?;
        self.layer = layer;
        Ok(())
    }

    /// # Errors
    ///
    /// [`ActorError::Destroyed`] or [`ActorError::InvalidProperty`] for a
    /// blank tag.
    pub fn set_tag(&mut self, tag: &str) -> Result<(), ActorError> {
        self.ensure_alive("tag")?;
        check_name("tag", tag)?;
        self.tag = tag.to_owned();
        Ok(())
    }

    /// Activate or deactivate the actor. Once started, this runs the enable
    /// or disable hook of every enabled behavior in descending priority. If
    /// one fails, the behaviors already toggled are toggled back and the
    /// actor keeps its previous state.
    ///
    /// # Errors
    ///
    /// [`ActorError::Destroyed`] or the hook failure.
    pub fn set_active(&mut self, world: &mut World, active: bool) -> Result<(), ActorError> {
        self.ensure_alive("toggle")?;
        if self.active == active {
            return Ok(());
        }
        if !self.started {
            self.active = active;
            return Ok(());
        }

        let mut toggled = Vec::new();
        for i in self.priority_order() {
            let slot = &mut self.slots[i];
            if !slot.is_enabled() {
                continue;
            }
            let result = if active {
                slot.activate(world, self.entity)
            } else {
                slot.deactivate(world, self.entity)
            };
            if let Err(e) = result {
                for &j in toggled.iter().rev() {
                    let slot: &mut ComponentSlot = &mut self.slots[j];
                    let undo = if active {
                        slot.deactivate(world, self.entity)
                    } else {
                        slot.activate(world, self.entity)
                    };
                    if let Err(undo_err) = undo {
                        error!(
                            entity = %self.entity,
                            component = slot.name(),
                            error = %undo_err,
                            "failed to revert toggle"
                        );
                    }
                }
                return Err(e.into());
            }
            toggled.push(i);
        }
        self.active = active;
        Ok(())
    }

    /// Enable or disable behavior `T` alone.
    ///
    /// # Errors
    ///
    /// [`ActorError::Destroyed`], [`ActorError::MissingComponent`] or the
    /// hook failure (the behavior keeps its previous state).
    pub fn set_component_enabled<T: Behavior>(
        &mut self,
        world: &mut World,
        enabled: bool,
    ) -> Result<(), ActorError> {
        self.ensure_alive("toggle component of")?;
        let &i = self
            .index
            .get(&TypeId::of::<T>())
            .ok_or_else(|| ActorError::MissingComponent {
                component: type_name::<T>().to_owned(),
            })?;
        self.slots[i].set_enabled(world, self.entity, enabled, self.active)?;
        Ok(())
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("entity", &self.entity)
            .field("name", &self.name)
            .field("layer", &self.layer)
            .field("tag", &self.tag)
            .field("active", &self.active)
            .field("state", &self.state())
            .field("components", &self.component_names())
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use strata_ecs::component::{Component, ComponentRegistry};

    use super::*;
    use crate::LifecycleError;

    thread_local! {
        static LOG: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    fn log(entry: impl Into<String>) {
        LOG.with(|l| l.borrow_mut().push(entry.into()));
    }

    fn take_log() -> Vec<String> {
        LOG.with(|l| std::mem::take(&mut *l.borrow_mut()))
    }

    /// Descriptor whose hooks append `"<tag>:<hook>"` to the log.
    fn traced<T: Component>(tag: &'static str, priority: i32) -> BehaviorDescriptor {
        BehaviorDescriptor::of::<T>()
            .priority(priority)
            .on_awake(move |_| {
                log(format!("{tag}:awake"));
                Ok(())
            })
            .on_start(move |_| {
                log(format!("{tag}:start"));
                Ok(())
            })
            .on_enable(move |_| {
                log(format!("{tag}:enable"));
                Ok(())
            })
            .on_disable(move |_| {
                log(format!("{tag}:disable"));
                Ok(())
            })
            .on_destroy(move |_| {
                log(format!("{tag}:destroy"));
                Ok(())
            })
            .on_update(move |_, _| {
                log(format!("{tag}:update"));
                Ok(())
            })
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Base(u32);
    impl Component for Base {}
    impl Behavior for Base {
        fn describe() -> BehaviorDescriptor {
            traced::<Self>("base", 10)
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Dependent(u32);
    impl Component for Dependent {}
    impl Behavior for Dependent {
        fn describe() -> BehaviorDescriptor {
            traced::<Self>("dependent", 50).depends_on::<Base>()
        }
    }

    #[derive(Debug, Default)]
    struct Top;
    impl Component for Top {}
    impl Behavior for Top {
        fn describe() -> BehaviorDescriptor {
            traced::<Self>("top", 100)
        }
    }

    #[derive(Debug, Default)]
    struct Single;
    impl Component for Single {}
    impl Behavior for Single {
        fn describe() -> BehaviorDescriptor {
            BehaviorDescriptor::of::<Self>().singleton()
        }
    }

    #[derive(Debug, Default)]
    struct CycleA;
    impl Component for CycleA {}
    impl Behavior for CycleA {
        fn describe() -> BehaviorDescriptor {
            BehaviorDescriptor::of::<Self>().depends_on::<CycleB>()
        }
    }

    #[derive(Debug, Default)]
    struct CycleB;
    impl Component for CycleB {}
    impl Behavior for CycleB {
        fn describe() -> BehaviorDescriptor {
            BehaviorDescriptor::of::<Self>().depends_on::<CycleA>()
        }
    }

    #[derive(Debug, Default)]
    struct Faulty;
    impl Component for Faulty {}
    impl Behavior for Faulty {
        fn describe() -> BehaviorDescriptor {
            BehaviorDescriptor::of::<Self>()
                .depends_on::<Base>()
                .on_awake(|_| Err("refusing to wake".into()))
        }
    }

    #[derive(Debug, Default)]
    struct Unregistered;
    impl Component for Unregistered {}
    impl Behavior for Unregistered {}

    fn setup() -> World {
        let registry = ComponentRegistry::new()
            .with::<Base>("Base")
            .unwrap()
            .with::<Dependent>("Dependent")
            .unwrap()
            .with::<Top>("Top")
            .unwrap()
            .with::<Single>("Single")
            .unwrap()
            .with::<CycleA>("CycleA")
            .unwrap()
            .with::<CycleB>("CycleB")
            .unwrap()
            .with::<Faulty>("Faulty")
            .unwrap();
        take_log();
        World::with_registry(registry).unwrap()
    }

    // -- construction and properties -------------------------------------------

    #[test]
    fn construction_validates_config() {
        let mut world = setup();
        for bad in [
            ActorConfig::named(" "),
            ActorConfig {
                layer: -1,
                ..ActorConfig::default()
            },
            ActorConfig {
                max_components: 0,
                ..ActorConfig::default()
            },
        ] {
            assert!(matches!(Actor::new(&mut world, bad), Err(ActorError::InvalidInput(_))));
        }
        assert_eq!(world.entity_count(), 0);

        let actor = Actor::new(&mut world, ActorConfig::named("hero")).unwrap();
        assert!(world.is_actor(actor.entity()));
        assert_eq!(actor.name(), "hero");
        assert_eq!(actor.state(), LifecycleState::Awake);
    }

    #[test]
    fn setters_validate_and_fail_after_destroy() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.set_name("renamed").unwrap();
        actor.set_layer(3).unwrap();
        actor.set_tag("enemy").unwrap();
        assert_eq!((actor.name(), actor.layer(), actor.tag()), ("renamed", 3, "enemy"));

        assert!(matches!(
            actor.set_layer(-2),
            Err(ActorError::InvalidProperty { property: "layer", .. })
        ));
        assert!(matches!(
            actor.set_name(""),
            Err(ActorError::InvalidProperty { property: "name", .. })
        ));

        actor.destroy(&mut world);
        assert!(matches!(actor.set_tag("x"), Err(ActorError::Destroyed { .. })));
        assert!(matches!(
            actor.add_default::<Base>(&mut world),
            Err(ActorError::Destroyed { .. })
        ));
    }

    // -- attaching --------------------------------------------------------------

    #[test]
    fn dependency_is_attached_first() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();

        actor.add_component(&mut world, Dependent(7)).unwrap();

        assert!(actor.has_component::<Base>());
        assert!(actor.has_component::<Dependent>());
        assert_eq!(actor.get_component::<Dependent>(&world), Some(&Dependent(7)));
        assert_eq!(take_log(), vec!["base:awake", "dependent:awake"]);
    }

    #[test]
    fn duplicate_and_singleton() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_component(&mut world, Base(1)).unwrap();
        assert!(matches!(
            actor.add_component(&mut world, Base(2)),
            Err(ActorError::DuplicateComponent { .. })
        ));
        assert_eq!(actor.get_component::<Base>(&world), Some(&Base(1)));

        actor.add_default::<Single>(&mut world).unwrap();
        actor.add_default::<Single>(&mut world).unwrap();
        assert_eq!(actor.component_count(), 2);
    }

    #[test]
    fn circular_dependency_is_reported() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        let err = actor.add_default::<CycleA>(&mut world).unwrap_err();
        match err {
            ActorError::CircularDependency { chain } => {
                assert_eq!(chain, vec!["CycleA", "CycleB", "CycleA"]);
            }
            other => panic!("expected a circular dependency, got {other}"),
        }
        assert_eq!(actor.component_count(), 0);
        assert_eq!(world.component_names(actor.entity()), Some(Vec::new()));
    }

    #[test]
    fn unregistered_type_is_rejected() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        assert!(matches!(
            actor.add_default::<Unregistered>(&mut world),
            Err(ActorError::UnregisteredComponent { .. })
        ));
    }

    #[test]
    fn component_limit_leaves_counts_unchanged() {
        let mut world = setup();
        let config = ActorConfig {
            max_components: 1,
            ..ActorConfig::default()
        };
        let mut actor = Actor::new(&mut world, config).unwrap();

        // The dependency fits, the dependent does not: both are rolled back.
        let err = actor.add_default::<Dependent>(&mut world).unwrap_err();
        assert!(matches!(err, ActorError::ComponentLimit { limit: 1 }));
        assert_eq!(actor.component_count(), 0);
        assert!(!world.has::<Base>(actor.entity()));

        actor.add_default::<Top>(&mut world).unwrap();
        assert!(matches!(
            actor.add_default::<Base>(&mut world),
            Err(ActorError::ComponentLimit { .. })
        ));
        assert_eq!(actor.component_count(), 1);
    }

    #[test]
    fn failed_awake_rolls_back_the_whole_call() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        let err = actor.add_default::<Faulty>(&mut world).unwrap_err();
        assert!(matches!(err, ActorError::Lifecycle(LifecycleError::HookFailed { .. })));
        assert_eq!(actor.component_count(), 0);
        assert!(!world.has::<Base>(actor.entity()));
        assert!(!world.has::<Faulty>(actor.entity()));
    }

    #[test]
    fn late_attach_starts_immediately() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.start(&mut world).unwrap();
        take_log();

        actor.add_default::<Base>(&mut world).unwrap();
        assert_eq!(take_log(), vec!["base:awake", "base:start", "base:enable"]);
        assert_eq!(actor.component_state::<Base>(), Some(LifecycleState::Enabled));
    }

    // -- removing ---------------------------------------------------------------

    #[test]
    fn removal_blocked_by_dependent() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_default::<Dependent>(&mut world).unwrap();

        let err = actor.remove_component::<Base>(&mut world).unwrap_err();
        assert!(matches!(err, ActorError::DependencyViolation { .. }));
        assert_eq!(err.to_string(), "cannot remove 'Base': 'Dependent' depends on it");
        assert!(actor.has_component::<Base>());
        assert!(actor.has_component::<Dependent>());

        assert!(actor.remove_component::<Dependent>(&mut world).unwrap());
        assert!(actor.remove_component::<Base>(&mut world).unwrap());
        assert!(!actor.remove_component::<Base>(&mut world).unwrap());
        assert_eq!(world.component_names(actor.entity()), Some(Vec::new()));
    }

    #[test]
    fn removal_disables_then_destroys() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_default::<Top>(&mut world).unwrap();
        actor.start(&mut world).unwrap();
        take_log();

        actor.remove_component::<Top>(&mut world).unwrap();
        assert_eq!(take_log(), vec!["top:disable", "top:destroy"]);
        assert!(!world.has::<Top>(actor.entity()));
    }

    #[test]
    fn removal_refused_by_paused_world_keeps_both_sides() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_component(&mut world, Base(1)).unwrap();
        actor.start(&mut world).unwrap();
        take_log();

        world.pause().unwrap();
        let err = actor.remove_component::<Base>(&mut world).unwrap_err();
        assert!(matches!(err, ActorError::Ecs(EcsError::NotReady { .. })));
        world.resume().unwrap();

        assert!(take_log().is_empty());
        assert!(actor.has_component::<Base>());
        assert_eq!(actor.component_state::<Base>(), Some(LifecycleState::Enabled));
        assert_eq!(actor.get_component::<Base>(&world), Some(&Base(1)));

        assert!(actor.remove_component::<Base>(&mut world).unwrap());
        assert!(!world.has::<Base>(actor.entity()));
    }

    // -- ordering ---------------------------------------------------------------

    #[test]
    fn bulk_operations_follow_priority() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_default::<Base>(&mut world).unwrap(); // 10
        actor.add_default::<Top>(&mut world).unwrap(); // 100
        actor.add_default::<Dependent>(&mut world).unwrap(); // 50
        take_log();

        actor.start(&mut world).unwrap();
        assert_eq!(
            take_log(),
            vec![
                "top:start",
                "top:enable",
                "dependent:start",
                "dependent:enable",
                "base:start",
                "base:enable"
            ]
        );

        actor.update(&mut world, 0.016);
        assert_eq!(take_log(), vec!["top:update", "dependent:update", "base:update"]);
        assert_eq!(actor.component_names(), vec!["Top", "Dependent", "Base"]);

        actor.destroy(&mut world);
        assert_eq!(
            take_log(),
            vec![
                "base:disable",
                "base:destroy",
                "dependent:disable",
                "dependent:destroy",
                "top:disable",
                "top:destroy"
            ]
        );
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_default::<Dependent>(&mut world).unwrap();
        let cleaned = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&cleaned);
        actor.on_cleanup(move |_| *counter.borrow_mut() += 1);

        actor.destroy(&mut world);
        actor.destroy(&mut world);

        assert_eq!(actor.component_count(), 0);
        assert_eq!(actor.state(), LifecycleState::Destroyed);
        assert_eq!(*cleaned.borrow(), 1);
        assert!(!world.is_alive(actor.entity()));
    }

    // -- toggling ---------------------------------------------------------------

    #[test]
    fn inactive_actor_skips_enable_and_update() {
        let mut world = setup();
        let config = ActorConfig {
            active: false,
            ..ActorConfig::default()
        };
        let mut actor = Actor::new(&mut world, config).unwrap();
        actor.add_default::<Top>(&mut world).unwrap();
        actor.start(&mut world).unwrap();
        actor.update(&mut world, 0.1);
        assert_eq!(take_log(), vec!["top:awake", "top:start"]);

        actor.set_active(&mut world, true).unwrap();
        assert_eq!(take_log(), vec!["top:enable"]);
        assert_eq!(actor.component_state::<Top>(), Some(LifecycleState::Enabled));
    }

    #[test]
    fn failed_toggle_reverts_already_toggled() {
        #[derive(Debug, Default)]
        struct Stubborn;
        impl Component for Stubborn {}
        impl Behavior for Stubborn {
            fn describe() -> BehaviorDescriptor {
                BehaviorDescriptor::of::<Self>().on_disable(|_| Err("no".into()))
            }
        }

        let registry = ComponentRegistry::new()
            .with::<Top>("Top")
            .unwrap()
            .with::<Stubborn>("Stubborn")
            .unwrap();
        let mut world = World::with_registry(registry).unwrap();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_default::<Top>(&mut world).unwrap();
        actor.add_default::<Stubborn>(&mut world).unwrap();
        actor.start(&mut world).unwrap();
        take_log();

        assert!(actor.set_active(&mut world, false).is_err());
        assert!(actor.is_active());
        assert_eq!(take_log(), vec!["top:disable", "top:enable"]);
        assert_eq!(actor.component_state::<Top>(), Some(LifecycleState::Enabled));
        assert_eq!(actor.component_state::<Stubborn>(), Some(LifecycleState::Enabled));
    }

    #[test]
    fn single_component_toggle() {
        let mut world = setup();
        let mut actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        actor.add_default::<Base>(&mut world).unwrap();
        actor.start(&mut world).unwrap();
        take_log();

        actor.set_component_enabled::<Base>(&mut world, false).unwrap();
        actor.update(&mut world, 0.1);
        assert_eq!(take_log(), vec!["base:disable"]);
        assert!(matches!(
            actor.set_component_enabled::<Top>(&mut world, true),
            Err(ActorError::MissingComponent { .. })
        ));
    }

    #[test]
    fn require_component_reports_missing() {
        let mut world = setup();
        let actor = Actor::new(&mut world, ActorConfig::default()).unwrap();
        assert!(matches!(
            actor.require_component::<Base>(&world),
            Err(ActorError::MissingComponent { .. })
        ));
    }
}
