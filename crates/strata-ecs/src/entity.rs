//! Entity handles and allocation.
//!
//! An [`Entity`] is an opaque, non-negative integer handle. Destroyed handles
//! go onto a free list and are handed out again by the next allocation. There
//! is no generation counter: once an entity is destroyed its id may be reused
//! immediately, so callers must not hold on to a handle across a destroy.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An opaque entity handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u32);

impl Entity {
    /// Construct an `Entity` from its raw index.
    #[inline]
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// The raw index of this handle.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`Entity`] handles.
///
/// Free indices are kept in a LIFO stack, so the most recently destroyed id
/// is the next one handed out.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    /// Whether each index is currently alive.
    alive: Vec<bool>,
    /// Recyclable indices.
    free: Vec<u32>,
    /// Number of live handles.
    live: usize,
}

impl EntityAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle, reusing a freed index when one is available.
    pub fn allocate(&mut self) -> Entity {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            self.alive[index as usize] = true;
            return Entity(index);
        }
        let index = self.alive.len() as u32;
        self.alive.push(true);
        Entity(index)
    }

    /// Return a handle to the free list.
    ///
    /// Returns `false` if the handle was not alive.
    pub fn free(&mut self, entity: Entity) -> bool {
        match self.alive.get_mut(entity.0 as usize) {
            Some(alive) if *alive => {
                *alive = false;
                self.free.push(entity.0);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Whether `entity` is currently allocated.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.get(entity.0 as usize).copied().unwrap_or(false)
    }

    /// Number of live handles.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of indices waiting on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
