//! Phased system scheduler.
//!
//! The [`SystemManager`] runs query-driven systems once per frame. Each
//! frame:
//!
//! 1. Phases run in the fixed order PreUpdate, Update, PostUpdate, Render.
//! 2. Within a phase, enabled systems run in descending priority. Systems
//!    with equal priority keep their registration order.
//! 3. Each system receives the rows matching its component query, the frame
//!    delta and a [`CommandBuffer`]. The buffer is applied to the world as
//!    soon as the system returns, so the next system sees its structural
//!    changes.
//!
//! A failing system is logged and counted in [`FrameDiagnostics`]; it never
//! stops the systems after it.
//!
//! # Example
//!
//! ```
//! use strata_engine::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Health(u32);
//! impl Component for Health {}
//!
//! let registry = ComponentRegistry::new().with::<Health>("Health").unwrap();
//! let mut world = World::with_registry(registry).unwrap();
//! let e = world.create_entity().unwrap();
//! world.add(e, Health(3)).unwrap();
//!
//! let mut systems = SystemManager::new();
//! systems
//!     .register(System::new("decay", &["Health"], |rows, _dt, _cmds| {
//!         for row in rows.iter_mut() {
//!             if let Some(hp) = row.get_mut::<Health>() {
//!                 hp.0 = hp.0.saturating_sub(1);
//!             }
//!         }
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! systems.execute_all(&mut world, 1.0 / 60.0);
//! assert_eq!(world.get::<Health>(e).map(|h| h.0), Some(2));
//! ```

use std::cmp::Reverse;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use strata_ecs::command::CommandBuffer;
use strata_ecs::query::QueryRowMut;
use strata_ecs::world::World;

use crate::{BoxError, SystemError};

// ---------------------------------------------------------------------------
// SystemPhase
// ---------------------------------------------------------------------------

/// The frame phase a system runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPhase {
    PreUpdate,
    #[default]
    Update,
    PostUpdate,
    Render,
}

impl SystemPhase {
    /// Every phase, in execution order.
    pub const ALL: [SystemPhase; 4] = [
        SystemPhase::PreUpdate,
        SystemPhase::Update,
        SystemPhase::PostUpdate,
        SystemPhase::Render,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SystemPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SystemPhase::PreUpdate => "pre_update",
            SystemPhase::Update => "update",
            SystemPhase::PostUpdate => "post_update",
            SystemPhase::Render => "render",
        })
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// The body of a system: the matching rows, the frame delta in seconds and
/// a buffer for structural changes.
pub type SystemFn =
    Box<dyn FnMut(&mut [QueryRowMut<'_>], f64, &mut CommandBuffer) -> Result<(), BoxError>>;

type ToggleFn = Box<dyn FnMut()>;

/// A registered unit of per-frame logic.
///
/// Built with [`System::new`] and the builder methods. Defaults: the
/// `Update` phase, priority 0, enabled.
pub struct System {
    id: String,
    query: Vec<String>,
    phase: SystemPhase,
    priority: i32,
    enabled: bool,
    execute: SystemFn,
    on_enable: Option<ToggleFn>,
    on_disable: Option<ToggleFn>,
}

impl System {
    /// A system named `id` that runs `execute` over the entities carrying
    /// every component in `query`.
    pub fn new(
        id: &str,
        query: &[&str],
        execute: impl FnMut(&mut [QueryRowMut<'_>], f64, &mut CommandBuffer) -> Result<(), BoxError>
            + 'static,
    ) -> Self {
        Self {
            id: id.to_owned(),
            query: query.iter().map(|s| (*s).to_owned()).collect(),
            phase: SystemPhase::Update,
            priority: 0,
            enabled: true,
            execute: Box::new(execute),
            on_enable: None,
            on_disable: None,
        }
    }

    /// The phase to run in. Defaults to `Update`.
    pub fn phase(mut self, phase: SystemPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Higher runs first within the phase.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Register the system disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Called when the system goes from disabled to enabled.
    pub fn on_enable(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_enable = Some(Box::new(f));
        self
    }

    /// Called when the system goes from enabled to disabled, including when
    /// it is replaced or unregistered.
    pub fn on_disable(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_disable = Some(Box::new(f));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &[String] {
        &self.query
    }

    pub fn system_phase(&self) -> SystemPhase {
        self.phase
    }

    pub fn priority_value(&self) -> i32 {
        self.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        let hook = if enabled {
            self.on_enable.as_mut()
        } else {
            self.on_disable.as_mut()
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("phase", &self.phase)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// Timing and failure counts for the last execution.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// Wall-clock time per system, in execution order.
    pub system_times: Vec<(String, Duration)>,
    /// Total time for the execution (systems + command apply).
    pub total_time: Duration,
    /// Time spent applying command buffers.
    pub command_apply_time: Duration,
    /// Commands applied successfully.
    pub commands_applied: usize,
    /// Systems whose query or callback failed.
    pub failures: usize,
}

impl FrameDiagnostics {
    /// Ids of the systems that ran, in execution order.
    pub fn executed(&self) -> Vec<&str> {
        self.system_times.iter().map(|(id, _)| id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// SystemManager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PhaseBucket {
    systems: Vec<System>,
    /// Set when a registration may have broken the priority order.
    dirty: bool,
}

impl PhaseBucket {
    fn sort_if_dirty(&mut self) {
        if self.dirty {
            // Stable, so equal priorities keep registration order.
            self.systems.sort_by_key(|s| Reverse(s.priority));
            self.dirty = false;
        }
    }
}

/// Holds systems grouped into phases and runs them each frame.
#[derive(Debug)]
pub struct SystemManager {
    phases: [PhaseBucket; 4],
    enabled: bool,
    commands: CommandBuffer,
    frames: u64,
    last_diagnostics: FrameDiagnostics,
}

impl Default for SystemManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemManager {
    pub fn new() -> Self {
        Self {
            phases: Default::default(),
            enabled: true,
            commands: CommandBuffer::new(),
            frames: 0,
            last_diagnostics: FrameDiagnostics::default(),
        }
    }

    /// Register `system`. An existing system with the same id is disabled
    /// and replaced, with a warning.
    ///
    /// # Errors
    ///
    /// [`SystemError::EmptyId`] or [`SystemError::EmptyQuery`].
    pub fn register(&mut self, system: System) -> Result<(), SystemError> {
        if system.id.trim().is_empty() {
            return Err(SystemError::EmptyId);
        }
        if system.query.is_empty() {
            return Err(SystemError::EmptyQuery { id: system.id });
        }

        if let Some(mut old) = self.take(&system.id) {
            warn!(
                system = %system.id,
                old_phase = %old.phase,
                new_phase = %system.phase,
                "system already registered, replacing it"
            );
            old.set_enabled(false);
        }

        debug!(
            system = %system.id,
            phase = %system.phase,
            priority = system.priority,
            "system registered"
        );
        let bucket = &mut self.phases[system.phase.index()];
        bucket.systems.push(system);
        bucket.dirty = true;
        Ok(())
    }

    /// Remove a system, disabling it first. Returns `false` if the id is
    /// unknown.
    pub fn unregister(&mut self, id: &str) -> bool {
        match self.take(id) {
            Some(mut system) => {
                system.set_enabled(false);
                true
            }
            None => false,
        }
    }

    fn take(&mut self, id: &str) -> Option<System> {
        self.phases.iter_mut().find_map(|bucket| {
            let pos = bucket.systems.iter().position(|s| s.id == id)?;
            Some(bucket.systems.remove(pos))
        })
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut System> {
        self.phases
            .iter_mut()
            .flat_map(|bucket| bucket.systems.iter_mut())
            .find(|s| s.id == id)
    }

    /// Enable or disable one system, running its toggle callback on change.
    /// Returns `false` if the id is unknown.
    pub fn set_system_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.find_mut(id) {
            Some(system) => {
                system.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Gate all execution.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&System> {
        self.phases
            .iter()
            .flat_map(|bucket| bucket.systems.iter())
            .find(|s| s.id == id)
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.phases.iter().map(|b| b.systems.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of the systems in `phase`, in execution order.
    pub fn system_ids(&mut self, phase: SystemPhase) -> Vec<&str> {
        let bucket = &mut self.phases[phase.index()];
        bucket.sort_if_dirty();
        bucket.systems.iter().map(|s| s.id.as_str()).collect()
    }

    /// Number of [`execute_all`](Self::execute_all) calls that ran.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Diagnostics from the last execution.
    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.last_diagnostics
    }

    /// Run every phase in order. Does nothing while the manager is disabled.
    pub fn execute_all(&mut self, world: &mut World, delta: f64) -> &FrameDiagnostics {
        if !self.enabled {
            return &self.last_diagnostics;
        }
        let start = Instant::now();
        let mut diagnostics = FrameDiagnostics::default();
        for phase in SystemPhase::ALL {
            self.run_phase(world, phase, delta, &mut diagnostics);
        }
        diagnostics.total_time = start.elapsed();
        self.frames += 1;
        self.last_diagnostics = diagnostics;
        &self.last_diagnostics
    }

    /// Run a single phase. Does nothing while the manager is disabled.
    pub fn execute_phase(
        &mut self,
        world: &mut World,
        phase: SystemPhase,
        delta: f64,
    ) -> &FrameDiagnostics {
        if !self.enabled {
            return &self.last_diagnostics;
        }
        let start = Instant::now();
        let mut diagnostics = FrameDiagnostics::default();
        self.run_phase(world, phase, delta, &mut diagnostics);
        diagnostics.total_time = start.elapsed();
        self.last_diagnostics = diagnostics;
        &self.last_diagnostics
    }

    fn run_phase(
        &mut self,
        world: &mut World,
        phase: SystemPhase,
        delta: f64,
        diagnostics: &mut FrameDiagnostics,
    ) {
        let Self { phases, commands, .. } = self;
        let bucket = &mut phases[phase.index()];
        bucket.sort_if_dirty();

        for system in bucket.systems.iter_mut().filter(|s| s.enabled) {
            let sys_start = Instant::now();
            commands.set_issuer(Some(system.id.as_str()));
            {
                let names: Vec<&str> = system.query.iter().map(String::as_str).collect();
                match world.query_mut(&names) {
                    Ok(mut rows) => {
                        let result = (system.execute)(rows.as_mut_slice(), delta, &mut *commands);
                        if let Err(e) = result {
                            diagnostics.failures += 1;
                            error!(
                                system = %system.id,
                                %phase,
                                error = %e,
                                "system execution failed"
                            );
                        }
                    }
                    Err(e) => {
                        diagnostics.failures += 1;
                        error!(system = %system.id, %phase, error = %e, "system query failed");
                    }
                }
            }

            let apply_start = Instant::now();
            let report = commands.apply(world);
            diagnostics.command_apply_time += apply_start.elapsed();
            diagnostics.commands_applied += report.success_count;
            diagnostics.system_times.push((system.id.clone(), sys_start.elapsed()));
        }
        commands.set_issuer(None);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use strata_ecs::prelude::*;

    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position {
        x: f64,
        y: f64,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Velocity {
        dx: f64,
        dy: f64,
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
        let mut world = World::with_registry(registry).unwrap();
        let e = world.create_entity().unwrap();
        world.add(e, Position::default()).unwrap();
        world.add(e, Velocity { dx: 1.0, dy: 2.0 }).unwrap();
        world
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging(id: &str, log: &Log) -> System {
        let log = Rc::clone(log);
        let name = id.to_owned();
        System::new(id, &["Position"], move |_, _, _| {
            log.borrow_mut().push(name.clone());
            Ok(())
        })
    }

    // -- 1. Registration ------------------------------------------------------

    #[test]
    fn rejects_empty_id_and_query() {
        let mut systems = SystemManager::new();
        let err = systems.register(System::new("  ", &["Position"], |_, _, _| Ok(())));
        assert!(matches!(err, Err(SystemError::EmptyId)));
        let err = systems.register(System::new("empty", &[], |_, _, _| Ok(())));
        assert!(matches!(err, Err(SystemError::EmptyQuery { .. })));
        assert!(systems.is_empty());
    }

    #[test]
    fn replacing_disables_the_old_system() {
        let mut world = setup_world();
        let log: Log = Rc::default();
        let disabled = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&disabled);
        let mut systems = SystemManager::new();
        systems
            .register(
                System::new("move", &["Position"], |_, _, _| Ok(()))
                    .on_disable(move || *flag.borrow_mut() = true),
            )
            .unwrap();
        systems.register(logging("move", &log).phase(SystemPhase::Render)).unwrap();

        assert!(*disabled.borrow());
        assert_eq!(systems.len(), 1);
        assert_eq!(systems.get("move").map(System::system_phase), Some(SystemPhase::Render));
        systems.execute_all(&mut world, 0.1);
        assert_eq!(*log.borrow(), vec!["move"]);
    }

    #[test]
    fn unregister_removes_system() {
        let mut systems = SystemManager::new();
        systems.register(System::new("a", &["Position"], |_, _, _| Ok(()))).unwrap();
        assert!(systems.unregister("a"));
        assert!(!systems.unregister("a"));
        assert!(!systems.contains("a"));
    }

    // -- 2. Ordering ----------------------------------------------------------

    #[test]
    fn priority_orders_within_phase() {
        let mut world = setup_world();
        let log: Log = Rc::default();
        let mut systems = SystemManager::new();
        systems.register(logging("low", &log).priority(10)).unwrap();
        systems.register(logging("high", &log).priority(100)).unwrap();
        systems.register(logging("mid", &log).priority(50)).unwrap();

        systems.execute_all(&mut world, 0.1);
        assert_eq!(*log.borrow(), vec!["high", "mid", "low"]);
        assert_eq!(systems.system_ids(SystemPhase::Update), vec!["high", "mid", "low"]);
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let mut world = setup_world();
        let log: Log = Rc::default();
        let mut systems = SystemManager::new();
        for id in ["first", "second", "third"] {
            systems.register(logging(id, &log)).unwrap();
        }
        systems.execute_all(&mut world, 0.1);
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn phases_run_in_fixed_order() {
        let mut world = setup_world();
        let log: Log = Rc::default();
        let mut systems = SystemManager::new();
        systems
            .register(logging("render", &log).phase(SystemPhase::Render).priority(1000))
            .unwrap();
        systems.register(logging("post", &log).phase(SystemPhase::PostUpdate)).unwrap();
        systems.register(logging("update", &log)).unwrap();
        systems.register(logging("pre", &log).phase(SystemPhase::PreUpdate).priority(-5)).unwrap();

        systems.execute_all(&mut world, 0.1);
        assert_eq!(*log.borrow(), vec!["pre", "update", "post", "render"]);

        log.borrow_mut().clear();
        systems.execute_phase(&mut world, SystemPhase::PostUpdate, 0.1);
        assert_eq!(*log.borrow(), vec!["post"]);
    }

    // -- 3. Execution ---------------------------------------------------------

    #[test]
    fn systems_mutate_query_rows() {
        let mut world = setup_world();
        let mut systems = SystemManager::new();
        systems
            .register(System::new("integrate", &["Position", "Velocity"], |rows, dt, _| {
                for row in rows.iter_mut() {
                    let (pos, vel) = row
                        .split_mut::<Position, Velocity>()
                        .ok_or("missing columns")?;
                    pos.x += vel.dx * dt;
                    pos.y += vel.dy * dt;
                }
                Ok(())
            }))
            .unwrap();

        for _ in 0..10 {
            systems.execute_all(&mut world, 0.5);
        }
        let e = world.query_entities(&["Position"]).unwrap()[0];
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 5.0, y: 10.0 }));
        assert_eq!(systems.frame_count(), 10);
    }

    #[test]
    fn commands_apply_before_next_system() {
        let mut world = setup_world();
        let seen = Rc::new(RefCell::new(0usize));
        let sink = Rc::clone(&seen);
        let mut systems = SystemManager::new();
        systems
            .register(
                System::new("spawner", &["Position"], |_, _, cmds| {
                    cmds.create_entity(vec![("Health".to_owned(), None)]);
                    Ok(())
                })
                .priority(10),
            )
            .unwrap();
        systems
            .register(System::new("counter", &["Health"], move |rows, _, _| {
                *sink.borrow_mut() = rows.len();
                Ok(())
            }))
            .unwrap();

        let diagnostics = systems.execute_all(&mut world, 0.1);
        assert_eq!(diagnostics.commands_applied, 1);
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn failing_system_does_not_stop_the_frame() {
        let mut world = setup_world();
        let log: Log = Rc::default();
        let mut systems = SystemManager::new();
        systems
            .register(
                System::new("broken", &["Position"], |_, _, _| Err("boom".into())).priority(5),
            )
            .unwrap();
        systems
            .register(System::new("bad_query", &["Nope"], |_, _, _| Ok(())).priority(4))
            .unwrap();
        systems.register(logging("after", &log)).unwrap();

        let diagnostics = systems.execute_all(&mut world, 0.1);
        assert_eq!(diagnostics.failures, 2);
        assert_eq!(diagnostics.executed(), vec!["broken", "bad_query", "after"]);
        assert_eq!(*log.borrow(), vec!["after"]);
    }

    #[test]
    fn disabled_systems_and_manager_are_skipped() {
        let mut world = setup_world();
        let log: Log = Rc::default();
        let toggles = Rc::new(RefCell::new(Vec::new()));
        let (on, off) = (Rc::clone(&toggles), Rc::clone(&toggles));
        let mut systems = SystemManager::new();
        systems
            .register(
                logging("a", &log)
                    .disabled()
                    .on_enable(move || on.borrow_mut().push("enable"))
                    .on_disable(move || off.borrow_mut().push("disable")),
            )
            .unwrap();

        systems.execute_all(&mut world, 0.1);
        assert!(log.borrow().is_empty());

        assert!(systems.set_system_enabled("a", true));
        assert!(systems.set_system_enabled("a", true));
        systems.set_enabled(false);
        systems.execute_all(&mut world, 0.1);
        assert!(log.borrow().is_empty());
        assert_eq!(systems.frame_count(), 1);

        systems.set_enabled(true);
        systems.execute_all(&mut world, 0.1);
        assert_eq!(*log.borrow(), vec!["a"]);
        assert!(systems.set_system_enabled("a", false));
        assert!(!systems.set_system_enabled("missing", false));
        assert_eq!(*toggles.borrow(), vec!["enable", "disable"]);
    }

    #[test]
    fn diagnostics_record_timing() {
        let mut world = setup_world();
        let mut systems = SystemManager::new();
        systems.register(System::new("a", &["Position"], |_, _, _| Ok(()))).unwrap();
        systems.register(System::new("b", &["Velocity"], |_, _, _| Ok(()))).unwrap();

        systems.execute_all(&mut world, 0.1);
        let diag = systems.last_diagnostics();
        assert_eq!(diag.system_times.len(), 2);
        assert!(diag.total_time >= diag.command_apply_time);
        assert_eq!(diag.failures, 0);
    }
}
