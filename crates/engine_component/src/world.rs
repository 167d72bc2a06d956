//! The world: entities, component storages, masks, and resources.
//!
//! A [`World`] owns its own [`EntityManager`], [`ComponentRegistry`] and
//! storages. Nothing is process-global, so several worlds can coexist.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitset::BitSet;
use crate::component::{Component, ComponentKey};
use crate::entity::{EntityId, EntityManager};
use crate::error::EcsError;
use crate::query::{Query, ResolvedQuery};
use crate::registry::ComponentRegistry;
use crate::storage::{ComponentStorage, ErasedStorage};

/// World construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Entity slots reserved up front.
    pub initial_entity_capacity: usize,
}

impl WorldConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            initial_entity_capacity: 1024,
        }
    }
}

/// The container for all entities, components, and resources of one
/// simulation.
#[derive(Default)]
pub struct World {
    entities: EntityManager,
    registry: ComponentRegistry,
    /// One component mask per entity index.
    masks: Vec<BitSet>,
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&WorldConfig::default())
    }

    /// Create an empty world sized by `config`.
    #[must_use]
    pub fn with_config(config: &WorldConfig) -> Self {
        Self {
            entities: EntityManager::with_capacity(config.initial_entity_capacity),
            masks: Vec::with_capacity(config.initial_entity_capacity),
            ..Self::default()
        }
    }

    /// The entity manager.
    #[must_use]
    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    /// The component registry.
    #[must_use]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Register component type `T` ahead of first use.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ComponentLimitExceeded`] when the registry is full.
    pub fn register<T: Component>(&mut self) -> Result<(), EcsError> {
        self.registry.register::<T>()?;
        self.storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ComponentStorage::<T>::new()));
        Ok(())
    }

    /// Spawn an entity with no components.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityCapacityExhausted`] when no index is free.
    pub fn spawn(&mut self) -> Result<EntityId, EcsError> {
        let entity = self.entities.create()?;
        let slot = entity.index() as usize;
        if slot >= self.masks.len() {
            self.masks.resize_with(slot + 1, || self.registry.empty_mask());
        } else {
            self.masks[slot].clear();
        }
        Ok(entity)
    }

    /// Destroy an entity and drop all of its components.
    ///
    /// Returns `false` if the entity is not alive.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.entities.destroy(entity) {
            return false;
        }
        let mask = std::mem::take(&mut self.masks[entity.index() as usize]);
        for key in self.registry.types_from_mask(&mask) {
            if let Some(storage) = self.storages.get_mut(&key.type_id()) {
                storage.remove_entity(entity);
            }
        }
        self.masks[entity.index() as usize] = self.registry.empty_mask();
        true
    }

    /// Returns `true` if `entity` is alive.
    #[must_use]
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    /// Attach `value` to `entity`, registering `T` on first use. Returns the
    /// replaced component, if any.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::DeadEntity`] for a dead handle and
    /// [`EcsError::ComponentLimitExceeded`] when `T` cannot be registered.
    pub fn insert<T: Component>(
        &mut self,
        entity: EntityId,
        value: T,
    ) -> Result<Option<T>, EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        self.register::<T>()?;
        let bit = self
            .registry
            .bit_index_of::<T>()
            .ok_or(EcsError::UnregisteredComponent(T::type_name()))?;
        self.masks[entity.index() as usize].set(bit);
        let previous = self
            .storage_mut::<T>()
            .and_then(|storage| storage.insert(entity, value));
        Ok(previous)
    }

    /// Detach and return the `T` component of `entity`.
    pub fn remove<T: Component>(&mut self, entity: EntityId) -> Option<T> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        let bit = self.registry.bit_index_of::<T>()?;
        let removed = self.storage_mut::<T>()?.remove(entity)?;
        self.masks[entity.index() as usize].unset(bit);
        Some(removed)
    }

    /// Borrow the `T` component of `entity`.
    #[must_use]
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>()?.get(entity)
    }

    /// Mutably borrow the `T` component of `entity`.
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Returns `true` if `entity` has component `T`.
    #[must_use]
    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.get::<T>(entity).is_some()
    }

    /// The component mask of a live entity.
    #[must_use]
    pub fn mask(&self, entity: EntityId) -> Option<&BitSet> {
        if !self.entities.is_alive(entity) {
            return None;
        }
        self.masks.get(entity.index() as usize)
    }

    /// The component types attached to a live entity.
    #[must_use]
    pub fn components_of(&self, entity: EntityId) -> Vec<ComponentKey> {
        self.mask(entity)
            .map(|mask| self.registry.types_from_mask(mask))
            .unwrap_or_default()
    }

    /// The storage for `T`, if the type has been registered here.
    #[must_use]
    pub fn storage<T: Component>(&self) -> Option<&ComponentStorage<T>> {
        self.storages
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<ComponentStorage<T>>()
    }

    /// Mutable storage for `T`, if the type has been registered here.
    pub fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<ComponentStorage<T>>()
    }

    /// Total number of component instances across all storages.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.storages.values().map(|storage| storage.len()).sum()
    }

    /// Iterate the live entities matching `query`, in index order.
    ///
    /// The query is resolved against the current registry first.
    pub fn query_iter(&self, query: &Query) -> QueryIter<'_> {
        QueryIter {
            world: self,
            resolved: query.resolve(&self.registry),
            next_index: 0,
        }
    }

    /// Collect the live entities matching `query`.
    #[must_use]
    pub fn query(&self, query: &Query) -> Vec<EntityId> {
        self.query_iter(query).collect()
    }

    /// Collect the live entities matching an already resolved query.
    #[must_use]
    pub fn query_resolved(&self, resolved: &ResolvedQuery) -> Vec<EntityId> {
        if resolved.is_unsatisfiable() {
            return Vec::new();
        }
        self.entities
            .alive_entities()
            .filter(|e| resolved.matches(&self.masks[e.index() as usize]))
            .collect()
    }

    /// Store a resource, returning the previous one of the same type.
    pub fn insert_resource<R: Any + Send + Sync>(&mut self, resource: R) -> Option<R> {
        self.resources
            .insert(TypeId::of::<R>(), Box::new(resource))
            .and_then(|old| old.downcast::<R>().ok())
            .map(|old| *old)
    }

    /// Borrow a resource.
    #[must_use]
    pub fn resource<R: Any + Send + Sync>(&self) -> Option<&R> {
        self.resources.get(&TypeId::of::<R>())?.downcast_ref::<R>()
    }

    /// Mutably borrow a resource.
    pub fn resource_mut<R: Any + Send + Sync>(&mut self) -> Option<&mut R> {
        self.resources.get_mut(&TypeId::of::<R>())?.downcast_mut::<R>()
    }

    /// Remove and return a resource.
    pub fn remove_resource<R: Any + Send + Sync>(&mut self) -> Option<R> {
        self.resources
            .remove(&TypeId::of::<R>())
            .and_then(|old| old.downcast::<R>().ok())
            .map(|old| *old)
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Reset the world: entities, registrations, storages and resources.
    pub fn clear(&mut self) {
        debug!(
            entities = self.entities.alive_count(),
            component_types = self.registry.count(),
            "clearing world"
        );
        self.entities.clear();
        self.registry.clear();
        self.masks.clear();
        self.storages.clear();
        self.resources.clear();
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.alive_count())
            .field("component_types", &self.registry.count())
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Iterator over the entities matching a query, created by
/// [`World::query_iter`].
pub struct QueryIter<'w> {
    world: &'w World,
    resolved: ResolvedQuery,
    next_index: u32,
}

impl Iterator for QueryIter<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        if self.resolved.is_unsatisfiable() {
            return None;
        }
        while (self.next_index as usize) < self.world.masks.len() {
            let index = self.next_index;
            self.next_index += 1;
            let Some(entity) = self.world.entities.entity_at(index) else {
                continue;
            };
            if self.resolved.matches(&self.world.masks[index as usize]) {
                return Some(entity);
            }
        }
        None
    }
}
