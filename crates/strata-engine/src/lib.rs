//! Strata Engine -- actors, component lifecycle and a phased system scheduler
//! on top of [`strata_ecs`].
//!
//! An [`Actor`](actor::Actor) owns one entity and orchestrates the behaviors
//! attached to it: dependencies are resolved before a behavior is attached,
//! and lifecycle hooks run in priority order. The
//! [`SystemManager`](system::SystemManager) runs query-driven systems in four
//! fixed phases. A [`Stage`](stage::Stage) owns the world, its actors and the
//! system manager and drives them one frame at a time.
//!
//! # Quick Start
//!
//! ```
//! use strata_engine::prelude::*;
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Position { x: f64 }
//! impl Component for Position {}
//! impl Behavior for Position {}
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Velocity { dx: f64 }
//! impl Component for Velocity {}
//! impl Behavior for Velocity {
//!     fn describe() -> BehaviorDescriptor {
//!         BehaviorDescriptor::of::<Self>().depends_on::<Position>()
//!     }
//! }
//!
//! let registry = ComponentRegistry::new()
//!     .with::<Position>("Position").unwrap()
//!     .with::<Velocity>("Velocity").unwrap();
//! let mut stage = Stage::new(registry, StageConfig::default()).unwrap();
//!
//! let ball = stage.spawn_actor(ActorConfig::named("ball")).unwrap();
//! stage
//!     .with_actor(ball, |actor, world| {
//!         actor.add_component(world, Velocity { dx: 2.0 }).map(|_| ())
//!     })
//!     .unwrap()
//!     .unwrap();
//!
//! stage
//!     .systems_mut()
//!     .register(System::new("integrate", &["Position", "Velocity"], |rows, dt, _cmds| {
//!         for row in rows.iter_mut() {
//!             if let Some((pos, vel)) = row.split_mut::<Position, Velocity>() {
//!                 pos.x += vel.dx * dt;
//!             }
//!         }
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! stage.run_frames(10, 0.1);
//! assert!((stage.world().get::<Position>(ball).unwrap().x - 2.0).abs() < 1e-9);
//! ```

#![deny(unsafe_code)]

pub mod actor;
pub mod behavior;
pub mod diagnostics;
pub mod lifecycle;
pub mod stage;
pub mod system;

use lifecycle::{LifecyclePhase, LifecycleState};
use strata_ecs::EcsError;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use strata_ecs;

/// Error type returned by user hooks and system callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// A lifecycle hook failed or a transition was not allowed from the current
/// state.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A user hook returned an error. The component was rolled back to the
    /// state it held before the transition.
    #[error("{phase} hook of component '{component}' failed")]
    HookFailed {
        component: String,
        phase: LifecyclePhase,
        #[source]
        source: BoxError,
    },

    /// The requested transition is not valid from `from`.
    #[error("component '{component}' cannot {action} while {from}")]
    InvalidTransition {
        component: String,
        from: LifecycleState,
        action: &'static str,
    },
}

/// Errors raised by [`Actor`](actor::Actor) operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// Construction input was rejected.
    #[error("invalid actor input: {0}")]
    InvalidInput(String),

    /// The actor has been destroyed.
    #[error("cannot {operation} actor '{actor}': it has been destroyed")]
    Destroyed {
        actor: String,
        operation: &'static str,
    },

    /// A property setter was given an invalid value.
    #[error("invalid value for actor property '{property}': {reason}")]
    InvalidProperty {
        property: &'static str,
        reason: String,
    },

    /// The behavior type is not in the world's component registry.
    #[error("component type {component} is not registered with the world")]
    UnregisteredComponent { component: &'static str },

    /// The component is already attached and is not a singleton.
    #[error("component '{component}' is already attached")]
    DuplicateComponent { component: String },

    /// The actor has reached its component ceiling.
    #[error("actor component limit reached (limit {limit})")]
    ComponentLimit { limit: usize },

    /// Dependency resolution revisited a component that was still being
    /// resolved.
    #[error("circular dependency: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    /// A required component is not attached.
    #[error("required component {component} is not attached")]
    MissingComponent { component: String },

    /// The component cannot be removed while another one depends on it.
    #[error("cannot remove '{component}': '{dependent}' depends on it")]
    DependencyViolation { component: String, dependent: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Ecs(#[from] EcsError),
}

/// Errors raised when registering a system.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("system id must not be empty")]
    EmptyId,

    #[error("system '{id}' must query at least one component")]
    EmptyQuery { id: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    // Re-export everything from the ECS prelude.
    pub use strata_ecs::prelude::*;

    pub use crate::actor::{Actor, ActorConfig};
    pub use crate::behavior::{Behavior, BehaviorDescriptor, Dependency, LifecycleHooks};
    pub use crate::lifecycle::{
        ComponentSlot, HookContext, LifecyclePhase, LifecycleState, LookupCache,
    };
    pub use crate::stage::{Stage, StageConfig};
    pub use crate::system::{FrameDiagnostics, System, SystemManager, SystemPhase};
    pub use crate::{ActorError, BoxError, LifecycleError, SystemError};
}
