//! Strata ECS -- archetype-based entity component storage with pooled
//! components and cached queries.
//!
//! Entities are grouped into archetypes, one per distinct set of component
//! names, and each archetype stores its components column-wise. Component
//! instances are recycled through per-archetype pools. Queries match
//! archetypes by bitmask and the matches are cached until the next
//! structural change.
//!
//! # Quick Start
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! let registry = ComponentRegistry::new()
//!     .with::<Position>("Position").unwrap()
//!     .with::<Velocity>("Velocity").unwrap();
//! let mut world = World::with_registry(registry).unwrap();
//!
//! let e = world.create_entity().unwrap();
//! world.add(e, Position { x: 0.0, y: 0.0 }).unwrap();
//! world.add(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();
//!
//! let rows = world.query(&["Position", "Velocity"]).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].entity, e);
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod bitmask;
pub mod command;
pub mod component;
pub mod entity;
pub mod event;
pub mod pool;
pub mod query;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world, entity and component operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The registry handed to a world (or a registration) is unusable.
    #[error("invalid component registry: {0}")]
    InvalidRegistry(String),

    /// The entity is not live in this world.
    #[error("entity {0:?} does not exist")]
    EntityNotFound(entity::Entity),

    /// The configured entity ceiling has been reached.
    #[error("entity capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// A query named no components.
    #[error("a query needs at least one component name")]
    EmptyQuery,

    /// The world is not in a state that accepts the operation.
    #[error("cannot {operation} while the world is {state}")]
    NotReady {
        state: world::WorldState,
        operation: &'static str,
    },

    /// A component name that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },

    /// A supplied instance is not the type registered under the name.
    #[error("component '{name}' expects {expected}, got {found}")]
    ComponentTypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A component pool hit its maximum capacity.
    #[error("component pool '{pool}' exhausted (max capacity {capacity})")]
    PoolExhausted { pool: String, capacity: usize },

    /// An archetype was asked for a component outside its signature.
    #[error("archetype '{archetype}' has no column for {component}")]
    ArchetypeMismatch { archetype: String, component: String },

    /// An entity was inserted twice into one archetype.
    #[error("entity {entity:?} is already stored in archetype '{archetype}'")]
    DuplicateEntity {
        entity: entity::Entity,
        archetype: String,
    },

    /// Moving an entity between archetypes failed. The entity is left in
    /// its original archetype.
    #[error("failed to migrate entity {entity:?} for component '{component}'")]
    Migration {
        entity: entity::Entity,
        component: String,
        #[source]
        source: Box<EcsError>,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::bitmask::ComponentMask;
    pub use crate::command::{ApplyReport, Command, CommandBuffer, CommandKind};
    pub use crate::component::{
        BoxedComponent, Component, ComponentData, ComponentInfo, ComponentRegistry,
        ComponentTypeId,
    };
    pub use crate::entity::Entity;
    pub use crate::event::{EventKind, EventStream, SubscriptionId, WorldEvent};
    pub use crate::pool::{EvictionPolicy, ObjectPool, PoolConfig, PoolStats};
    pub use crate::query::{QueryRow, QueryRowMut};
    pub use crate::world::{World, WorldConfig, WorldMetrics, WorldState};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
