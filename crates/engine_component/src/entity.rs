//! Entity identifiers and the generational entity manager.
//!
//! An [`EntityId`] packs a slot index (low 20 bits) and a generation counter
//! (high 12 bits) into a single `u32`. When an entity is destroyed its index
//! is recycled, but the generation is bumped, so stale handles to the old
//! occupant no longer compare alive.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::EcsError;

/// Number of low bits holding the slot index.
pub const INDEX_BITS: u32 = 20;
/// Number of high bits holding the generation.
pub const GENERATION_BITS: u32 = 12;
/// Largest encodable index.
pub const MAX_INDEX: u32 = (1 << INDEX_BITS) - 1;
/// Largest encodable generation. Generations wrap to 0 past this value.
pub const MAX_GENERATION: u32 = (1 << GENERATION_BITS) - 1;

/// A packed, generation-checked entity handle.
///
/// Entities carry no data of their own; they are compared by equality and
/// used as keys by component storage, queries and the render cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

/// The invalid entity sentinel. Its index is never issued by
/// [`EntityManager`], so no live entity can equal it.
pub const INVALID_ENTITY: EntityId = EntityId::INVALID;

impl EntityId {
    /// The invalid entity sentinel (all bits set).
    pub const INVALID: EntityId = EntityId(u32::MAX);

    /// Packs an index and generation.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] or
    /// [`EcsError::GenerationOutOfRange`] when either part does not fit.
    pub const fn new(index: u32, generation: u32) -> Result<Self, EcsError> {
        if index > MAX_INDEX {
            return Err(EcsError::IndexOutOfRange {
                index,
                max: MAX_INDEX,
            });
        }
        if generation > MAX_GENERATION {
            return Err(EcsError::GenerationOutOfRange {
                generation,
                max: MAX_GENERATION,
            });
        }
        Ok(Self((generation << INDEX_BITS) | index))
    }

    /// Reinterprets a raw packed value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw packed value.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// The slot index part.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 & MAX_INDEX
    }

    /// The generation part.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.0 >> INDEX_BITS
    }

    /// Returns `true` unless this is [`EntityId::INVALID`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        } else {
            f.write_str("Entity(invalid)")
        }
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Issues and recycles [`EntityId`]s.
///
/// Each index has a stored generation and an alive flag. Destroying an entity
/// bumps the generation and pushes the index onto a free stack; creating pops
/// from that stack before allocating a fresh index.
#[derive(Debug, Default, Clone)]
pub struct EntityManager {
    generations: Vec<u16>,
    alive: Vec<bool>,
    free: Vec<u32>,
    alive_count: usize,
    total_created: u64,
}

impl EntityManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty manager with room for `capacity` indices.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            generations: Vec::with_capacity(capacity),
            alive: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Creates a new entity, recycling a destroyed index when one is free.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityCapacityExhausted`] when all `MAX_INDEX`
    /// indices are live.
    pub fn create(&mut self) -> Result<EntityId, EcsError> {
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            let index = self.generations.len() as u32;
            // MAX_INDEX itself stays reserved for the invalid sentinel.
            if index >= MAX_INDEX {
                return Err(EcsError::EntityCapacityExhausted {
                    capacity: MAX_INDEX,
                });
            }
            self.generations.push(0);
            self.alive.push(false);
            index
        };

        let slot = index as usize;
        self.alive[slot] = true;
        self.alive_count += 1;
        self.total_created += 1;

        let id = EntityId::new(index, u32::from(self.generations[slot]))?;
        trace!(entity = %id, "entity created");
        Ok(id)
    }

    /// Destroys an entity.
    ///
    /// Returns `false` if `id` is not alive (already destroyed, stale, or
    /// never issued).
    pub fn destroy(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let slot = id.index() as usize;
        let next = (u32::from(self.generations[slot]) + 1) & MAX_GENERATION;
        self.generations[slot] = next as u16;
        self.alive[slot] = false;
        self.free.push(id.index());
        self.alive_count -= 1;
        trace!(entity = %id, "entity destroyed");
        true
    }

    /// Returns `true` if `id` refers to a live entity of the current
    /// generation.
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        let slot = id.index() as usize;
        self.alive.get(slot).copied().unwrap_or(false)
            && u32::from(self.generations[slot]) == id.generation()
    }

    /// Returns the live entity at `index`, if any.
    #[must_use]
    pub fn entity_at(&self, index: u32) -> Option<EntityId> {
        let slot = index as usize;
        if !self.alive.get(slot).copied().unwrap_or(false) {
            return None;
        }
        EntityId::new(index, u32::from(self.generations[slot])).ok()
    }

    /// Iterates a snapshot of the live entities in index order.
    pub fn alive_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|&(_, &alive)| alive)
            .filter_map(|(slot, _)| {
                EntityId::new(slot as u32, u32::from(self.generations[slot])).ok()
            })
    }

    /// Number of live entities.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Number of entities ever created. Never decreases, except on
    /// [`clear`](Self::clear).
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_created
    }

    /// Number of indices waiting to be recycled.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Number of indices ever allocated (live or free).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.generations.len()
    }

    /// Forgets every entity. Handles issued before the reset must not be
    /// reused: the new manager starts again at generation 0.
    pub fn clear(&mut self) {
        self.generations.clear();
        self.alive.clear();
        self.free.clear();
        self.alive_count = 0;
        self.total_created = 0;
    }
}
