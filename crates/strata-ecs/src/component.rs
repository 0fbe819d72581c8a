//! Component traits and the component registry.
//!
//! A [`ComponentRegistry`] maps component names to constructible component
//! types and defines the universe of names a [`World`](crate::world::World)
//! accepts. Registration order matters: the *i*-th registered type owns bit
//! *i* of every [`ComponentMask`](crate::bitmask::ComponentMask).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// Component traits
// ---------------------------------------------------------------------------

/// A plain data type that can be stored in a world.
///
/// `reset` restores the instance to its default field values before it is
/// reused from a pool. Override it when a type keeps buffers whose capacity
/// should survive recycling.
pub trait Component: Any + fmt::Debug + Default {
    /// Restore default field values.
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Object-safe view of a stored component instance.
///
/// Implemented for every [`Component`]; storage and queries work with
/// `dyn ComponentData` and downcast at the edges.
pub trait ComponentData: Any + fmt::Debug {
    /// Run the type's reset handler.
    fn reset_data(&mut self);
    /// Upcast for downcasting by reference.
    fn as_any(&self) -> &dyn Any;
    /// Upcast for downcasting by mutable reference.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// `std::any::type_name` of the concrete type.
    fn type_name(&self) -> &'static str;
}

impl<T: Component> ComponentData for T {
    fn reset_data(&mut self) {
        Component::reset(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// An owned, type-erased component instance.
pub type BoxedComponent = Box<dyn ComponentData>;

impl dyn ComponentData {
    /// Downcast to a concrete component type.
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutably downcast to a concrete component type.
    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Whether the concrete type is `T`.
    pub fn is<T: Component>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Builds a fresh, default instance of a registered type.
pub type ComponentFactory = fn() -> BoxedComponent;

fn default_instance<T: Component>() -> BoxedComponent {
    Box::new(T::default())
}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Registration index of a component type. Doubles as its bitmask position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(u32);

impl ComponentTypeId {
    /// Build an id from its registration index.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// The registration index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// Unique id assigned at registration time.
    pub id: ComponentTypeId,
    /// Registered name.
    pub name: String,
    /// Rust `TypeId` of the concrete type.
    pub type_id: TypeId,
    /// `std::any::type_name` of the concrete type.
    pub type_name: &'static str,
    /// Constructor for default instances.
    pub factory: ComponentFactory,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping component names and Rust types to [`ComponentTypeId`]s.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by `ComponentTypeId`.
    infos: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`.
    ///
    /// # Errors
    ///
    /// [`EcsError::InvalidRegistry`] if the name is empty or taken, or if `T`
    /// is already registered under another name.
    pub fn register<T: Component>(&mut self, name: &str) -> Result<ComponentTypeId, EcsError> {
        if name.trim().is_empty() {
            return Err(EcsError::InvalidRegistry(
                "component names must not be empty".to_owned(),
            ));
        }
        if self.by_name.contains_key(name) {
            return Err(EcsError::InvalidRegistry(format!(
                "component name '{name}' is already registered"
            )));
        }
        let rust_type = TypeId::of::<T>();
        if let Some(existing) = self.by_type.get(&rust_type) {
            return Err(EcsError::InvalidRegistry(format!(
                "type {} is already registered as '{}'",
                std::any::type_name::<T>(),
                self.infos[existing.index()].name
            )));
        }

        let id = ComponentTypeId::from_index(self.infos.len());
        self.infos.push(ComponentInfo {
            id,
            name: name.to_owned(),
            type_id: rust_type,
            type_name: std::any::type_name::<T>(),
            factory: default_instance::<T>,
        });
        self.by_type.insert(rust_type, id);
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: Component>(mut self, name: &str) -> Result<Self, EcsError> {
        self.register::<T>(name)?;
        Ok(self)
    }

    /// Look up a component type by its Rust type.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentTypeId> {
        self.lookup_type_id(TypeId::of::<T>())
    }

    /// Look up a component type by a Rust `TypeId`.
    pub fn lookup_type_id(&self, type_id: TypeId) -> Option<ComponentTypeId> {
        self.by_type.get(&type_id).copied()
    }

    /// Look up a component type by its registered name.
    pub fn lookup_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Metadata for a registered id.
    pub fn get_info(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Registered name of `T`, if any.
    pub fn name_of<T: 'static>(&self) -> Option<&str> {
        self.name_of_type_id(TypeId::of::<T>())
    }

    /// Registered name for a Rust `TypeId`, if any.
    pub fn name_of_type_id(&self, type_id: TypeId) -> Option<&str> {
        let id = self.lookup_type_id(type_id)?;
        Some(self.infos[id.index()].name.as_str())
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether any component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// All registered infos in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }

    /// Names of all registered component types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Build an [`EcsError::UnknownComponent`] listing the registered names.
    pub(crate) fn unknown(&self, name: &str) -> EcsError {
        EcsError::UnknownComponent {
            name: name.to_owned(),
            registered: self.registered_names().join(", "),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Pos {
        x: f32,
        y: f32,
    }
    impl Component for Pos {}

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Vel {
        dx: f32,
        dy: f32,
    }
    impl Component for Vel {}

    #[derive(Debug, Default)]
    struct Inventory {
        items: Vec<u32>,
    }
    impl Component for Inventory {
        fn reset(&mut self) {
            self.items.clear();
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ComponentRegistry::new();
        let pos = reg.register::<Pos>("Position").unwrap();
        let vel = reg.register::<Vel>("Velocity").unwrap();
        assert_eq!(reg.lookup::<Pos>(), Some(pos));
        assert_eq!(reg.lookup_by_name("Velocity"), Some(vel));
        assert_eq!(reg.name_of::<Vel>(), Some("Velocity"));
        assert_eq!(pos.index(), 0);
        assert_eq!(vel.index(), 1);
    }

    #[test]
    fn duplicate_name_or_type_rejected() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Pos>("Position").unwrap();
        assert!(matches!(
            reg.register::<Vel>("Position"),
            Err(EcsError::InvalidRegistry(_))
        ));
        assert!(matches!(
            reg.register::<Pos>("Other"),
            Err(EcsError::InvalidRegistry(_))
        ));
        assert!(matches!(
            reg.register::<Vel>("  "),
            Err(EcsError::InvalidRegistry(_))
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn factory_builds_default_instances() {
        let reg = ComponentRegistry::new().with::<Pos>("Position").unwrap();
        let info = reg.get_info(ComponentTypeId::from_index(0)).unwrap();
        let instance = (info.factory)();
        assert_eq!(instance.downcast_ref::<Pos>(), Some(&Pos::default()));
        assert!(instance.is::<Pos>());
        assert!(!instance.is::<Vel>());
    }

    #[test]
    fn custom_reset_is_used() {
        let mut inv: BoxedComponent = Box::new(Inventory {
            items: Vec::with_capacity(32),
        });
        inv.downcast_mut::<Inventory>().unwrap().items.push(7);
        inv.reset_data();
        let inv = inv.downcast_ref::<Inventory>().unwrap();
        assert!(inv.items.is_empty());
        assert!(inv.items.capacity() >= 32);
    }
}
