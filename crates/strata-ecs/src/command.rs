//! Deferred structural changes.
//!
//! Code that is iterating query results cannot mutate the world's structure
//! directly. It queues the change in a [`CommandBuffer`] instead, and the
//! owner applies the buffer once iteration has finished. Commands are applied
//! in strict insertion order (FIFO). A command that fails is logged and
//! skipped; the rest still apply.
//!
//! # Example
//!
//! ```
//! use strata_ecs::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Health(u32);
//! impl Component for Health {}
//!
//! let registry = ComponentRegistry::new().with::<Health>("Health").unwrap();
//! let mut world = World::with_registry(registry).unwrap();
//! let entity = world.create_entity().unwrap();
//!
//! let mut cmds = CommandBuffer::new();
//! cmds.add_component(entity, "Health", Some(Box::new(Health(50))));
//! let report = cmds.apply(&mut world);
//!
//! assert_eq!(report.success_count, 1);
//! assert_eq!(world.get::<Health>(entity).map(|h| h.0), Some(50));
//! ```

use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::component::BoxedComponent;
use crate::entity::Entity;
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// What a queued command does.
pub enum CommandKind {
    /// Create an entity and attach the listed components in order. `None`
    /// takes a pooled default instance.
    CreateEntity {
        components: Vec<(String, Option<BoxedComponent>)>,
    },
    /// Destroy an entity.
    DestroyEntity { entity: Entity },
    /// Attach a component (idempotent, like [`World::add_component`]).
    AddComponent {
        entity: Entity,
        component: String,
        value: Option<BoxedComponent>,
    },
    /// Detach a component.
    RemoveComponent { entity: Entity, component: String },
}

impl CommandKind {
    /// The `(entity, component)` pair the command touches, if any.
    fn target(&self) -> Option<(Entity, &str)> {
        match self {
            CommandKind::AddComponent {
                entity, component, ..
            }
            | CommandKind::RemoveComponent { entity, component } => {
                Some((*entity, component.as_str()))
            }
            _ => None,
        }
    }

    fn entity(&self) -> Option<Entity> {
        match self {
            CommandKind::CreateEntity { .. } => None,
            CommandKind::DestroyEntity { entity }
            | CommandKind::AddComponent { entity, .. }
            | CommandKind::RemoveComponent { entity, .. } => Some(*entity),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            CommandKind::CreateEntity { .. } => "create_entity",
            CommandKind::DestroyEntity { .. } => "destroy_entity",
            CommandKind::AddComponent { .. } => "add_component",
            CommandKind::RemoveComponent { .. } => "remove_component",
        }
    }
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::CreateEntity { components } => f
                .debug_struct("CreateEntity")
                .field(
                    "components",
                    &components.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
                )
                .finish(),
            CommandKind::DestroyEntity { entity } => {
                f.debug_struct("DestroyEntity").field("entity", entity).finish()
            }
            CommandKind::AddComponent {
                entity,
                component,
                value,
            } => f
                .debug_struct("AddComponent")
                .field("entity", entity)
                .field("component", component)
                .field("supplied", &value.is_some())
                .finish(),
            CommandKind::RemoveComponent { entity, component } => f
                .debug_struct("RemoveComponent")
                .field("entity", entity)
                .field("component", component)
                .finish(),
        }
    }
}

/// A queued command plus where it came from.
#[derive(Debug)]
pub struct Command {
    /// The mutation.
    pub kind: CommandKind,
    /// Who queued it (a system id, for instance).
    pub issued_by: Option<String>,
    /// Position in the buffer.
    pub command_index: u32,
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

/// Summary of one [`CommandBuffer::apply`] call.
///
/// `conflict_count` counts `(entity, component)` pairs targeted by more than
/// one command. Conflicts are warnings; commands still apply in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// `(entity, component)` pairs targeted by several commands.
    pub conflict_count: usize,
    /// Commands that failed.
    pub failed_count: usize,
    /// Commands that applied.
    pub success_count: usize,
    /// Entities created by `CreateEntity` commands, in order.
    pub created: Vec<Entity>,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// FIFO queue of deferred world mutations.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    next_index: u32,
    issuer: Option<String>,
    last_apply_report: ApplyReport,
}

impl CommandBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag subsequently queued commands with `issuer`.
    pub fn set_issuer(&mut self, issuer: Option<&str>) {
        self.issuer = issuer.map(str::to_owned);
    }

    /// Queue entity creation with the given components.
    pub fn create_entity(&mut self, components: Vec<(String, Option<BoxedComponent>)>) {
        self.push(CommandKind::CreateEntity { components });
    }

    /// Queue entity destruction.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.push(CommandKind::DestroyEntity { entity });
    }

    /// Queue a component attach.
    pub fn add_component(
        &mut self,
        entity: Entity,
        component: &str,
        value: Option<BoxedComponent>,
    ) {
        self.push(CommandKind::AddComponent {
            entity,
            component: component.to_owned(),
            value,
        });
    }

    /// Queue a component detach.
    pub fn remove_component(&mut self, entity: Entity, component: &str) {
        self.push(CommandKind::RemoveComponent {
            entity,
            component: component.to_owned(),
        });
    }

    /// Queued commands in insertion order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Report from the last [`apply`](Self::apply); all zero before the first.
    pub fn last_apply_report(&self) -> &ApplyReport {
        &self.last_apply_report
    }

    /// Drop every queued command without applying it.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.next_index = 0;
    }

    /// Apply every queued command to `world` in insertion order, then clear
    /// the buffer.
    ///
    /// Failures are logged as warnings and counted; they never stop later
    /// commands. A `CreateEntity` whose components fail to attach still
    /// counts as applied, since the entity exists.
    pub fn apply(&mut self, world: &mut World) -> ApplyReport {
        let commands = std::mem::take(&mut self.commands);
        self.next_index = 0;

        // --- Conflict detection ---
        let mut seen: HashMap<(Entity, &str), Vec<u32>> = HashMap::new();
        for cmd in &commands {
            if let Some(target) = cmd.kind.target() {
                seen.entry(target).or_default().push(cmd.command_index);
            }
        }
        let mut report = ApplyReport::default();
        for ((entity, component), indices) in &seen {
            if indices.len() > 1 {
                report.conflict_count += 1;
                warn!(
                    %entity,
                    component = %component,
                    command_indices = ?indices,
                    "{} commands target the same entity and component",
                    indices.len()
                );
            }
        }
        drop(seen);

        // --- Apply loop ---
        for cmd in commands {
            let index = cmd.command_index;
            let label = cmd.kind.label();
            let target = cmd.kind.entity();
            let result = Self::apply_one(world, cmd.kind, index, &mut report.created);
            match result {
                Ok(()) => report.success_count += 1,
                Err(e) => {
                    report.failed_count += 1;
                    warn!(
                        command_index = index,
                        command = label,
                        target = ?target,
                        issued_by = ?cmd.issued_by,
                        error = %e,
                        "command application failed"
                    );
                }
            }
        }

        self.last_apply_report = report.clone();
        report
    }

    fn apply_one(
        world: &mut World,
        kind: CommandKind,
        index: u32,
        created: &mut Vec<Entity>,
    ) -> Result<(), EcsError> {
        match kind {
            CommandKind::CreateEntity { components } => {
                let entity = world.create_entity()?;
                created.push(entity);
                for (name, value) in components {
                    if let Err(e) = world.add_component(entity, &name, value) {
                        warn!(
                            command_index = index,
                            %entity,
                            component = %name,
                            error = %e,
                            "component attach failed (entity was still created)"
                        );
                    }
                }
                Ok(())
            }
            CommandKind::DestroyEntity { entity } => world.destroy_entity(entity),
            CommandKind::AddComponent {
                entity,
                component,
                value,
            } => world.add_component(entity, &component, value).map(|_| ()),
            CommandKind::RemoveComponent { entity, component } => {
                world.remove_component(entity, &component)
            }
        }
    }

    fn push(&mut self, kind: CommandKind) {
        let index = self.next_index;
        self.next_index += 1;
        self.commands.push(Command {
            kind,
            issued_by: self.issuer.clone(),
            command_index: index,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
