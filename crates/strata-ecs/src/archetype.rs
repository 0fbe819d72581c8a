//! Archetype storage for the ECS.
//!
//! An [`Archetype`] stores all entities that share the exact same set of
//! component names (its *signature*). Components are laid out column-wise:
//! one [`Column`] per component name holding a dense array of instances, plus
//! a parallel `Vec<Entity>` and an entity-to-row map.
//!
//! Invariant: for an archetype holding N entities, every column holds exactly
//! N instances, and `columns[c].dense[i]` belongs to `entities[i]`.

use std::collections::HashMap;
use std::time::Instant;

use crate::bitmask::ComponentMask;
use crate::component::{BoxedComponent, ComponentData, ComponentInfo, ComponentTypeId};
use crate::entity::Entity;
use crate::pool::{ObjectPool, PoolConfig, PoolStats};
use crate::query::{QueryRow, QueryRowMut};
use crate::EcsError;

/// Canonical id of the archetype with no components.
pub const EMPTY_ARCHETYPE_KEY: &str = "empty";

/// Separator between names in a canonical archetype key.
pub const KEY_SEPARATOR: char = ',';

/// Build the canonical key for a signature. `names` must already be sorted.
pub fn signature_key<S: AsRef<str>>(names: &[S]) -> String {
    if names.is_empty() {
        return EMPTY_ARCHETYPE_KEY.to_owned();
    }
    let mut key = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(name.as_ref());
    }
    key
}

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype within the world. Indexes `World::archetypes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The archetype every entity starts in.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    /// Index into the world's archetype list.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// Dense storage for one component name, plus the pool that recycles its
/// instances.
#[derive(Debug)]
pub struct Column {
    type_id: ComponentTypeId,
    name: String,
    dense: Vec<BoxedComponent>,
    pool: ObjectPool<BoxedComponent>,
}

impl Column {
    fn new(info: &ComponentInfo, archetype_key: &str, config: PoolConfig) -> Self {
        let factory = info.factory;
        Self {
            type_id: info.id,
            name: info.name.clone(),
            dense: Vec::new(),
            pool: ObjectPool::new(
                format!("{}@{}", info.name, archetype_key),
                config,
                factory,
                |c: &mut BoxedComponent| c.reset_data(),
            ),
        }
    }

    /// Component type stored in this column.
    pub fn type_id(&self) -> ComponentTypeId {
        self.type_id
    }

    /// Component name stored in this column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Whether the column holds no instances.
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Pool counters for this column.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// The pool backing this column.
    pub fn pool(&self) -> &ObjectPool<BoxedComponent> {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// All entities sharing one component signature, stored column-wise.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    key: String,
    mask: ComponentMask,
    /// One column per component, sorted by name.
    columns: Vec<Column>,
    /// Row-aligned entity handles.
    entities: Vec<Entity>,
    /// Entity -> row.
    rows: HashMap<Entity, usize>,
}

impl Archetype {
    /// Create an empty archetype for `infos` (any order; columns are sorted
    /// by name).
    pub fn new(id: ArchetypeId, infos: &[&ComponentInfo], pool: &PoolConfig) -> Self {
        let mut sorted: Vec<&ComponentInfo> = infos.to_vec();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<&str> = sorted.iter().map(|i| i.name.as_str()).collect();
        let key = signature_key(&names);
        let columns = sorted
            .iter()
            .map(|info| Column::new(info, &key, pool.clone()))
            .collect();
        Self {
            id,
            mask: ComponentMask::from_ids(sorted.iter().map(|i| i.id)),
            key,
            columns,
            entities: Vec::new(),
            rows: HashMap::new(),
        }
    }

    /// The archetype's index in the world.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Canonical key: the sorted names joined, or `"empty"`.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bitmask of the signature.
    #[inline]
    pub fn mask(&self) -> &ComponentMask {
        &self.mask
    }

    /// Sorted component names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// The columns, sorted by name.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of entities stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the archetype is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Row-aligned entity handles.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Whether `entity` lives here.
    pub fn contains(&self, entity: Entity) -> bool {
        self.rows.contains_key(&entity)
    }

    /// Row of `entity`, if stored here.
    pub fn row_of(&self, entity: Entity) -> Option<usize> {
        self.rows.get(&entity).copied()
    }

    /// Binary search for a column by name.
    #[inline]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
    }

    fn column_index_by_id(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.columns.iter().position(|c| c.type_id == type_id)
    }

    /// Whether the signature includes `name`.
    pub fn has_component(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Take an instance from the pool of `type_id`'s column.
    pub fn acquire(&mut self, type_id: ComponentTypeId) -> Result<BoxedComponent, EcsError> {
        let col = self
            .column_index_by_id(type_id)
            .ok_or_else(|| EcsError::ArchetypeMismatch {
                archetype: self.key.clone(),
                component: format!("{type_id:?}"),
            })?;
        let column = &mut self.columns[col];
        let instance = column.pool.acquire()?;
        // The caller decides where the instance ends up; stop counting it here.
        column.pool.detach();
        Ok(instance)
    }

    /// Return an instance to the pool of `type_id`'s column. Instances of
    /// types outside the signature are dropped.
    pub fn release(&mut self, type_id: ComponentTypeId, instance: BoxedComponent) {
        if let Some(col) = self.column_index_by_id(type_id) {
            let pool = &mut self.columns[col].pool;
            pool.adopt();
            pool.release(instance);
        }
    }

    /// Append `entity`, installing a caller-supplied instance or a pooled
    /// one for every component in the signature.
    ///
    /// Supplied instances that fill a column are drained from `supplied`;
    /// anything left over (types outside the signature, duplicates) stays
    /// with the caller. Missing instances are acquired before anything is
    /// stored, so on error both the archetype and `supplied` are unchanged.
    ///
    /// Returns the new row.
    pub fn add_entity(
        &mut self,
        entity: Entity,
        supplied: &mut Vec<(ComponentTypeId, BoxedComponent)>,
    ) -> Result<usize, EcsError> {
        if self.rows.contains_key(&entity) {
            return Err(EcsError::DuplicateEntity {
                entity,
                archetype: self.key.clone(),
            });
        }

        let mut acquired: Vec<(usize, BoxedComponent)> = Vec::new();
        for col in 0..self.columns.len() {
            let type_id = self.columns[col].type_id;
            if supplied.iter().any(|(t, _)| *t == type_id) {
                continue;
            }
            match self.columns[col].pool.acquire() {
                Ok(instance) => acquired.push((col, instance)),
                Err(e) => {
                    // Hand back what was taken so the pools stay balanced.
                    for (c, instance) in acquired {
                        self.columns[c].pool.release(instance);
                    }
                    return Err(e);
                }
            }
        }

        let mut staged: Vec<Option<BoxedComponent>> = self.columns.iter().map(|_| None).collect();
        for (col, instance) in acquired {
            staged[col] = Some(instance);
        }
        let mut i = 0;
        while i < supplied.len() {
            match self.column_index_by_id(supplied[i].0) {
                Some(col) if staged[col].is_none() => {
                    let (_, instance) = supplied.swap_remove(i);
                    self.columns[col].pool.adopt();
                    staged[col] = Some(instance);
                }
                _ => i += 1,
            }
        }

        let row = self.entities.len();
        self.entities.push(entity);
        self.rows.insert(entity, row);
        for (column, instance) in self.columns.iter_mut().zip(staged) {
            if let Some(instance) = instance {
                column.dense.push(instance);
            }
        }
        Ok(row)
    }

    /// Swap-remove `entity`, handing its instances to the caller instead of
    /// the pools. Used when an entity migrates to another archetype.
    ///
    /// Returns `None` if the entity is not stored here.
    pub fn take_entity(
        &mut self,
        entity: Entity,
    ) -> Option<Vec<(ComponentTypeId, BoxedComponent)>> {
        let row = self.swap_remove_row(entity)?;
        let taken = self
            .columns
            .iter_mut()
            .map(|column| {
                column.pool.detach();
                (column.type_id, column.dense.swap_remove(row))
            })
            .collect();
        Some(taken)
    }

    /// Swap-remove `entity` and release its instances to the column pools.
    ///
    /// Returns `false` if the entity is not stored here.
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        let Some(row) = self.swap_remove_row(entity) else {
            return false;
        };
        for column in &mut self.columns {
            let instance = column.dense.swap_remove(row);
            column.pool.release(instance);
        }
        true
    }

    /// Remove `entity` from the entity array and row map. The caller must
    /// swap-remove the same row from every column.
    fn swap_remove_row(&mut self, entity: Entity) -> Option<usize> {
        let row = self.rows.remove(&entity)?;
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        if row != last {
            let moved = self.entities[row];
            self.rows.insert(moved, row);
        }
        Some(row)
    }

    /// Component `name` of `entity`.
    pub fn get_component(
        &self,
        entity: Entity,
        name: &str,
    ) -> Option<&(dyn ComponentData + 'static)> {
        let row = *self.rows.get(&entity)?;
        let col = self.column_index(name)?;
        self.columns[col].dense.get(row).map(|c| c.as_ref())
    }

    /// Mutable component `name` of `entity`.
    pub fn get_component_mut(
        &mut self,
        entity: Entity,
        name: &str,
    ) -> Option<&mut (dyn ComponentData + 'static)> {
        let row = *self.rows.get(&entity)?;
        let col = self.column_index(name)?;
        self.columns[col].dense.get_mut(row).map(|c| c.as_mut())
    }

    /// Build read-only rows for the given column indices, in that order.
    ///
    /// Rows missing any requested instance are skipped.
    pub(crate) fn rows(&self, cols: &[usize]) -> Vec<QueryRow<'_>> {
        self.entities
            .iter()
            .enumerate()
            .filter_map(|(row, &entity)| {
                let components = cols
                    .iter()
                    .map(|&c| {
                        self.columns
                            .get(c)
                            .and_then(|column| column.dense.get(row))
                            .map(|b| b.as_ref())
                    })
                    .collect::<Option<Vec<&(dyn ComponentData + 'static)>>>()?;
                Some(QueryRow { entity, components })
            })
            .collect()
    }

    /// Build mutable rows for the given column indices, in that order.
    ///
    /// Column indices must be distinct; a repeated index yields no rows.
    pub(crate) fn rows_mut(&mut self, cols: &[usize]) -> Vec<QueryRowMut<'_>> {
        let mut available: Vec<Option<&mut Column>> = self.columns.iter_mut().map(Some).collect();
        let mut iters = Vec::with_capacity(cols.len());
        for &c in cols {
            match available.get_mut(c).and_then(Option::take) {
                Some(column) => iters.push(column.dense.iter_mut()),
                None => return Vec::new(),
            }
        }

        let mut out = Vec::with_capacity(self.entities.len());
        for &entity in &self.entities {
            let components: Vec<&mut (dyn ComponentData + 'static)> = iters
                .iter_mut()
                .filter_map(|it| it.next())
                .map(|b| &mut **b)
                .collect();
            if components.len() == cols.len() {
                out.push(QueryRowMut { entity, components });
            }
        }
        out
    }

    /// Expire idle pooled instances older than their time-to-live.
    ///
    /// Returns the number dropped.
    pub fn prune_pools(&mut self, now: Instant) -> usize {
        self.columns
            .iter_mut()
            .map(|c| c.pool.prune_expired_at(now))
            .sum()
    }

    /// Drop idle pooled instances in every column.
    pub fn clear_pools(&mut self) {
        for column in &mut self.columns {
            column.pool.clear();
        }
    }

    /// Check the column-alignment invariant.
    pub fn is_consistent(&self) -> bool {
        self.rows.len() == self.entities.len()
            && self.columns.iter().all(|c| c.dense.len() == self.entities.len())
            && self
                .entities
                .iter()
                .enumerate()
                .all(|(row, e)| self.rows.get(e) == Some(&row))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
