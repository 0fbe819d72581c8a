//! Behavior declarations: lifecycle hooks, priority and dependencies.
//!
//! A [`Behavior`] is a [`Component`] that an [`Actor`](crate::actor::Actor)
//! can manage. Its [`BehaviorDescriptor`] lists the optional lifecycle hooks
//! it wants called, its dispatch priority, and the behaviors it depends on.
//! Hooks are plain optional closures; the lifecycle dispatcher calls the ones
//! that are present and skips the rest.
//!
//! # Example
//!
//! ```
//! use strata_engine::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Transform { x: f32 }
//! impl Component for Transform {}
//! impl Behavior for Transform {}
//!
//! #[derive(Debug, Default)]
//! struct Health(u32);
//! impl Component for Health {}
//! impl Behavior for Health {
//!     fn describe() -> BehaviorDescriptor {
//!         BehaviorDescriptor::of::<Self>()
//!             .priority(10)
//!             .depends_on::<Transform>()
//!             .on_awake(|ctx| {
//!                 if let Some(hp) = ctx.this::<Health>() {
//!                     hp.0 = 100;
//!                 }
//!                 Ok(())
//!             })
//!     }
//! }
//!
//! let descriptor = Health::describe();
//! assert_eq!(descriptor.priority_value(), 10);
//! assert_eq!(descriptor.dependencies().len(), 1);
//! assert!(descriptor.hooks().has_awake());
//! ```

use std::any::{type_name, TypeId};
use std::fmt;

use strata_ecs::component::Component;

use crate::lifecycle::HookContext;
use crate::BoxError;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// A lifecycle hook.
pub type Hook = Box<dyn FnMut(&mut HookContext<'_>) -> Result<(), BoxError>>;

/// A per-frame update hook, given the frame delta in seconds.
pub type UpdateHook = Box<dyn FnMut(&mut HookContext<'_>, f64) -> Result<(), BoxError>>;

/// The optional hooks of one behavior.
#[derive(Default)]
pub struct LifecycleHooks {
    pub awake: Option<Hook>,
    pub start: Option<Hook>,
    pub on_enable: Option<Hook>,
    pub on_disable: Option<Hook>,
    pub on_destroy: Option<Hook>,
    pub update: Option<UpdateHook>,
}

impl LifecycleHooks {
    pub fn has_awake(&self) -> bool {
        self.awake.is_some()
    }

    pub fn has_start(&self) -> bool {
        self.start.is_some()
    }

    pub fn has_update(&self) -> bool {
        self.update.is_some()
    }

    /// Names of the hooks that are present.
    pub fn present(&self) -> Vec<&'static str> {
        [
            ("awake", self.awake.is_some()),
            ("start", self.start.is_some()),
            ("on_enable", self.on_enable.is_some()),
            ("on_disable", self.on_disable.is_some()),
            ("on_destroy", self.on_destroy.is_some()),
            ("update", self.update.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.present()).finish()
    }
}

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// A declared dependency on another behavior type.
#[derive(Clone, Copy)]
pub struct Dependency {
    type_id: TypeId,
    type_name: &'static str,
    describe: fn() -> BehaviorDescriptor,
}

impl Dependency {
    pub fn of<T: Behavior>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            describe: T::describe,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// A fresh descriptor for the dependency, used to attach it.
    pub fn describe(&self) -> BehaviorDescriptor {
        (self.describe)()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

// ---------------------------------------------------------------------------
// BehaviorDescriptor
// ---------------------------------------------------------------------------

/// Everything an actor needs to know to attach and drive a behavior.
///
/// Built with [`BehaviorDescriptor::of`] and the builder methods. Defaults:
/// priority 0, not a singleton, enabled, no dependencies, no hooks.
#[derive(Debug)]
pub struct BehaviorDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    priority: i32,
    singleton: bool,
    enabled: bool,
    dependencies: Vec<Dependency>,
    pub(crate) hooks: LifecycleHooks,
}

impl BehaviorDescriptor {
    /// Start a descriptor for `T`.
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            priority: 0,
            singleton: false,
            enabled: true,
            dependencies: Vec::new(),
            hooks: LifecycleHooks::default(),
        }
    }

    /// Dispatch priority. Higher runs first in `start` and `update`, and is
    /// torn down last.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attaching the behavior again returns the existing instance instead of
    /// failing.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Start in the disabled state. The enable hook does not run until the
    /// behavior is enabled explicitly.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Require `T` to be attached first. Missing dependencies are attached
    /// automatically.
    pub fn depends_on<T: Behavior>(mut self) -> Self {
        let dep = Dependency::of::<T>();
        if !self.dependencies.iter().any(|d| d.type_id == dep.type_id) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Run once when the behavior is attached.
    pub fn on_awake(
        mut self,
        hook: impl FnMut(&mut HookContext<'_>) -> Result<(), BoxError> + 'static,
    ) -> Self {
        self.hooks.awake = Some(Box::new(hook));
        self
    }

    /// Run once when the owning actor starts, or on attach if it already has.
    pub fn on_start(
        mut self,
        hook: impl FnMut(&mut HookContext<'_>) -> Result<(), BoxError> + 'static,
    ) -> Self {
        self.hooks.start = Some(Box::new(hook));
        self
    }

    /// Run each time the behavior becomes enabled.
    pub fn on_enable(
        mut self,
        hook: impl FnMut(&mut HookContext<'_>) -> Result<(), BoxError> + 'static,
    ) -> Self {
        self.hooks.on_enable = Some(Box::new(hook));
        self
    }

    /// Run each time the behavior stops being enabled, including before destroy.
    pub fn on_disable(
        mut self,
        hook: impl FnMut(&mut HookContext<'_>) -> Result<(), BoxError> + 'static,
    ) -> Self {
        self.hooks.on_disable = Some(Box::new(hook));
        self
    }

    /// Run once when the behavior is detached or its actor is destroyed.
    pub fn on_destroy(
        mut self,
        hook: impl FnMut(&mut HookContext<'_>) -> Result<(), BoxError> + 'static,
    ) -> Self {
        self.hooks.on_destroy = Some(Box::new(hook));
        self
    }

    /// Run every frame while the behavior is enabled and its actor active.
    pub fn on_update(
        mut self,
        hook: impl FnMut(&mut HookContext<'_>, f64) -> Result<(), BoxError> + 'static,
    ) -> Self {
        self.hooks.update = Some(Box::new(hook));
        self
    }

    // -- accessors ------------------------------------------------------------

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn priority_value(&self) -> i32 {
        self.priority
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn starts_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn depends_on_type(&self, type_id: TypeId) -> bool {
        self.dependencies.iter().any(|d| d.type_id == type_id)
    }

    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// A component an actor can manage.
///
/// The default descriptor has no hooks and no dependencies.
pub trait Behavior: Component {
    fn describe() -> BehaviorDescriptor {
        BehaviorDescriptor::of::<Self>()
    }
}
