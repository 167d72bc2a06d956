//! Typed component storage.
//!
//! Each concrete component type gets its own [`ComponentStorage<T>`], a
//! sparse set: components live densely in a `Vec<T>` with a parallel vector
//! of owning entities, and a sparse table indexed by entity index points into
//! the dense arrays. Removal swaps the last element into the hole.

use std::any::Any;

use crate::component::Component;
use crate::entity::EntityId;

const EMPTY: u32 = u32::MAX;

/// Dense storage for every instance of one component type.
#[derive(Debug)]
pub struct ComponentStorage<T> {
    dense: Vec<T>,
    owners: Vec<EntityId>,
    sparse: Vec<u32>,
}

impl<T: Component> ComponentStorage<T> {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            owners: Vec::new(),
            sparse: Vec::new(),
        }
    }

    fn dense_index(&self, entity: EntityId) -> Option<usize> {
        let row = *self.sparse.get(entity.index() as usize)?;
        if row == EMPTY || self.owners[row as usize] != entity {
            return None;
        }
        Some(row as usize)
    }

    /// Insert or replace the component of `entity`, returning the previous
    /// value.
    pub fn insert(&mut self, entity: EntityId, value: T) -> Option<T> {
        if let Some(row) = self.dense_index(entity) {
            return Some(std::mem::replace(&mut self.dense[row], value));
        }
        let slot = entity.index() as usize;
        if slot >= self.sparse.len() {
            self.sparse.resize(slot + 1, EMPTY);
        }
        // A stale handle for the same index may still own a row.
        let stale = self.sparse[slot];
        if stale != EMPTY {
            self.swap_remove_row(stale as usize);
        }
        self.sparse[slot] = self.dense.len() as u32;
        self.dense.push(value);
        self.owners.push(entity);
        None
    }

    /// Remove the component of `entity`, returning it.
    pub fn remove(&mut self, entity: EntityId) -> Option<T> {
        let row = self.dense_index(entity)?;
        Some(self.swap_remove_row(row))
    }

    fn swap_remove_row(&mut self, row: usize) -> T {
        let owner = self.owners[row];
        self.sparse[owner.index() as usize] = EMPTY;
        let value = self.dense.swap_remove(row);
        self.owners.swap_remove(row);
        if let Some(&moved) = self.owners.get(row) {
            self.sparse[moved.index() as usize] = row as u32;
        }
        value
    }

    /// Borrow the component of `entity`.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&T> {
        self.dense_index(entity).map(|row| &self.dense[row])
    }

    /// Mutably borrow the component of `entity`.
    #[must_use]
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut T> {
        self.dense_index(entity).map(|row| &mut self.dense[row])
    }

    /// Returns `true` if `entity` has a component here.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.dense_index(entity).is_some()
    }

    /// Number of stored components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Returns `true` if no component is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Iterate `(entity, component)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.owners.iter().copied().zip(self.dense.iter())
    }

    /// Iterate `(entity, component)` pairs mutably in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.owners.iter().copied().zip(self.dense.iter_mut())
    }

    /// The dense component slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.dense
    }
}

impl<T: Component> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`ComponentStorage`], used by the world for
/// operations that do not know the component type (despawn, clear).
pub(crate) trait ErasedStorage: Send + Sync {
    /// Drop the component of `entity`, if present.
    fn remove_entity(&mut self, entity: EntityId) -> bool;
    /// Drop every component.
    fn clear(&mut self);
    /// Number of stored components.
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedStorage for ComponentStorage<T> {
    fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.remove(entity).is_some()
    }

    fn clear(&mut self) {
        self.dense.clear();
        self.owners.clear();
        self.sparse.clear();
    }

    fn len(&self) -> usize {
        self.dense.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
