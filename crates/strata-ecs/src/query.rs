//! Query results and the archetype-match cache.
//!
//! A query names a set of components. Matching is done by bitmask: every
//! archetype whose mask is a superset of the query mask contributes its rows.
//! The list of matching archetypes is memoized in a [`QueryCache`] and thrown
//! away on every structural change.

use std::collections::HashMap;

use crate::archetype::ArchetypeId;
use crate::bitmask::ComponentMask;
use crate::component::{Component, ComponentData};
use crate::entity::Entity;

// ---------------------------------------------------------------------------
// QueryCache
// ---------------------------------------------------------------------------

/// Memoized archetype matches, keyed two ways: by sorted-name string and by
/// bitmask. Both maps are cleared together by [`invalidate`](Self::invalidate).
#[derive(Debug, Default)]
pub struct QueryCache {
    by_key: HashMap<String, CachedMatch>,
    by_mask: HashMap<ComponentMask, Vec<ArchetypeId>>,
    generation: u64,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct CachedMatch {
    generation: u64,
    archetypes: Vec<ArchetypeId>,
}

impl QueryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the string key for a set of names (order-insensitive).
    pub fn key_for<S: AsRef<str>>(names: &[S]) -> String {
        let mut sorted: Vec<&str> = names.iter().map(|n| n.as_ref()).collect();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.join(",")
    }

    /// Cached match for a string key, if still current.
    pub fn get(&mut self, key: &str) -> Option<Vec<ArchetypeId>> {
        match self.by_key.get(key) {
            Some(entry) if entry.generation == self.generation => {
                self.hits += 1;
                Some(entry.archetypes.clone())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a match under a string key.
    pub fn insert(&mut self, key: String, archetypes: Vec<ArchetypeId>) {
        self.by_key.insert(
            key,
            CachedMatch {
                generation: self.generation,
                archetypes,
            },
        );
    }

    /// Cached match for a mask.
    pub fn get_mask(&mut self, mask: &ComponentMask) -> Option<Vec<ArchetypeId>> {
        match self.by_mask.get(mask) {
            Some(archetypes) => {
                self.hits += 1;
                Some(archetypes.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a match under a mask.
    pub fn insert_mask(&mut self, mask: ComponentMask, archetypes: Vec<ArchetypeId>) {
        self.by_mask.insert(mask, archetypes);
    }

    /// Drop every cached match.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.by_key.clear();
        self.by_mask.clear();
    }

    /// Bumped by every [`invalidate`](Self::invalidate).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that had to be recomputed.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of live entries across both maps.
    pub fn len(&self) -> usize {
        self.by_key.len() + self.by_mask.len()
    }

    /// Whether both maps are empty.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty() && self.by_mask.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Result rows
// ---------------------------------------------------------------------------

/// One read-only query result: an entity and its requested components, in
/// the order they were requested.
#[derive(Debug)]
pub struct QueryRow<'w> {
    /// The matching entity.
    pub entity: Entity,
    /// Requested components, in request order.
    pub components: Vec<&'w (dyn ComponentData + 'static)>,
}

impl<'w> QueryRow<'w> {
    /// The first requested component of type `T`.
    pub fn get<T: Component>(&self) -> Option<&'w T> {
        self.components.iter().find_map(|&c| c.downcast_ref::<T>())
    }
}

/// One mutable query result.
#[derive(Debug)]
pub struct QueryRowMut<'w> {
    /// The matching entity.
    pub entity: Entity,
    /// Requested components, in request order.
    pub components: Vec<&'w mut (dyn ComponentData + 'static)>,
}

impl<'w> QueryRowMut<'w> {
    /// The first requested component of type `T`.
    pub fn get<T: Component>(&self) -> Option<&T> {
        self.components.iter().find_map(|c| c.downcast_ref::<T>())
    }

    /// Mutable access to the first requested component of type `T`.
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|c| c.downcast_mut::<T>())
    }

    /// Borrow two distinct component types mutably at once.
    ///
    /// Returns `None` if either is missing or `A` and `B` are the same type.
    pub fn split_mut<A: Component, B: Component>(&mut self) -> Option<(&mut A, &mut B)> {
        let mut a = None;
        let mut b = None;
        for c in self.components.iter_mut() {
            if a.is_none() && c.is::<A>() {
                a = c.downcast_mut::<A>();
            } else if b.is_none() && c.is::<B>() {
                b = c.downcast_mut::<B>();
            }
        }
        Some((a?, b?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
