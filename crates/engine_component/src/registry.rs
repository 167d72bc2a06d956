//! Component registry: type IDs, mask bit indices, and mask helpers.
//!
//! The registry assigns each component type a monotonic
//! [`ComponentTypeId`] and a bit index in `0..MAX_COMPONENT_TYPES`. Entity
//! and query masks are [`BitSet`]s over those bit indices.

use std::collections::HashMap;

use tracing::debug;

use crate::bitset::BitSet;
use crate::component::{Component, ComponentInfo, ComponentKey, ComponentTypeId};
use crate::error::EcsError;

/// Maximum number of component types a registry can hold, and the bit
/// capacity of every mask it creates.
pub const MAX_COMPONENT_TYPES: usize = 1024;

/// Maps component types to stable type IDs and mask bit indices.
#[derive(Debug)]
pub struct ComponentRegistry {
    by_key: HashMap<ComponentKey, ComponentInfo>,
    by_bit: Vec<ComponentKey>,
    next_type_id: u32,
    epoch: u64,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_bit: Vec::new(),
            next_type_id: 0,
            epoch: 0,
        }
    }

    /// Registers component type `T`, see [`register_key`](Self::register_key).
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ComponentLimitExceeded`] once
    /// [`MAX_COMPONENT_TYPES`] types are registered.
    pub fn register<T: Component>(&mut self) -> Result<ComponentTypeId, EcsError> {
        self.register_key(T::key())
    }

    /// Registers a component type by key.
    ///
    /// Registering an already-known type returns its existing ID and leaves
    /// the count unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::ComponentLimitExceeded`] once
    /// [`MAX_COMPONENT_TYPES`] types are registered.
    pub fn register_key(&mut self, key: ComponentKey) -> Result<ComponentTypeId, EcsError> {
        if let Some(info) = self.by_key.get(&key) {
            return Ok(info.type_id);
        }
        if self.by_bit.len() >= MAX_COMPONENT_TYPES {
            return Err(EcsError::ComponentLimitExceeded {
                limit: MAX_COMPONENT_TYPES,
            });
        }

        let info = ComponentInfo {
            key,
            type_id: ComponentTypeId(self.next_type_id),
            bit_index: self.by_bit.len(),
        };
        self.next_type_id += 1;
        self.by_bit.push(key);
        self.by_key.insert(key, info);

        debug!(
            component = key.name(),
            type_id = info.type_id.0,
            bit_index = info.bit_index,
            "registered component type"
        );
        Ok(info.type_id)
    }

    /// Returns `true` if `key` is registered.
    #[must_use]
    pub fn is_registered(&self, key: &ComponentKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Returns the metadata for `key`, if registered.
    #[must_use]
    pub fn info(&self, key: &ComponentKey) -> Option<&ComponentInfo> {
        self.by_key.get(key)
    }

    /// Returns the type ID of `T`, if registered.
    #[must_use]
    pub fn type_id_of<T: Component>(&self) -> Option<ComponentTypeId> {
        self.info(&T::key()).map(|info| info.type_id)
    }

    /// Returns the mask bit of `T`, if registered.
    #[must_use]
    pub fn bit_index_of<T: Component>(&self) -> Option<usize> {
        self.bit_index(&T::key())
    }

    /// Returns the mask bit of `key`, if registered.
    #[must_use]
    pub fn bit_index(&self, key: &ComponentKey) -> Option<usize> {
        self.info(key).map(|info| info.bit_index)
    }

    /// Returns the key registered at `bit_index`.
    #[must_use]
    pub fn key_for_bit(&self, bit_index: usize) -> Option<ComponentKey> {
        self.by_bit.get(bit_index).copied()
    }

    /// Number of registered component types.
    #[must_use]
    pub fn count(&self) -> usize {
        self.by_bit.len()
    }

    /// Incremented by every [`clear`](Self::clear). Masks built under an
    /// older epoch refer to bit indices that may since have been reassigned.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Iterates registered types in bit order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.by_bit.iter().filter_map(|key| self.by_key.get(key))
    }

    /// Creates an empty mask sized for this registry.
    #[must_use]
    pub fn empty_mask(&self) -> BitSet {
        BitSet::new(MAX_COMPONENT_TYPES)
    }

    /// Builds a mask with one bit per key.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnregisteredComponent`] for the first key that is
    /// not registered.
    pub fn create_mask(&self, keys: &[ComponentKey]) -> Result<BitSet, EcsError> {
        let mut mask = self.empty_mask();
        for key in keys {
            let bit = self
                .bit_index(key)
                .ok_or(EcsError::UnregisteredComponent(key.name()))?;
            mask.set(bit);
        }
        Ok(mask)
    }

    /// Builds a mask for `keys`, or `None` if any key is unregistered.
    pub(crate) fn try_mask(&self, keys: &[ComponentKey]) -> Option<BitSet> {
        self.create_mask(keys).ok()
    }

    /// Returns `true` if `mask` has the bit of every key. An empty key list
    /// passes; any unregistered key fails.
    #[must_use]
    pub fn mask_contains_all(&self, mask: &BitSet, keys: &[ComponentKey]) -> bool {
        self.try_mask(keys)
            .is_some_and(|required| mask.contains_all(&required))
    }

    /// Returns `true` if `mask` has the bit of at least one key. An empty key
    /// list fails; any unregistered key fails.
    #[must_use]
    pub fn mask_contains_any(&self, mask: &BitSet, keys: &[ComponentKey]) -> bool {
        self.try_mask(keys)
            .is_some_and(|wanted| mask.contains_any(&wanted))
    }

    /// Returns `true` if `mask` has none of the keys' bits. An empty key list
    /// passes; any unregistered key fails.
    #[must_use]
    pub fn mask_excludes_all(&self, mask: &BitSet, keys: &[ComponentKey]) -> bool {
        self.try_mask(keys)
            .is_some_and(|excluded| mask.excludes_all(&excluded))
    }

    /// Lists the component types whose bits are set in `mask`.
    #[must_use]
    pub fn types_from_mask(&self, mask: &BitSet) -> Vec<ComponentKey> {
        mask.ones().filter_map(|bit| self.key_for_bit(bit)).collect()
    }

    /// Forgets every registration. Future registrations restart at type ID
    /// 0 and bit index 0.
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_bit.clear();
        self.next_type_id = 0;
        self.epoch += 1;
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
