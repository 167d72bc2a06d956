//! # engine_component
//!
//! The "E" and "C" in ECS: entity identity, component registration, mask
//! queries, and typed component storage.
//!
//! This crate provides:
//!
//! - [`BitSet`]: fixed-capacity bit vector used for component masks.
//! - [`EntityId`]: packed `(index, generation)` entity handles.
//! - [`EntityManager`]: generational ID allocator with index recycling.
//! - [`Component`] trait and [`ComponentKey`]: the contract all ECS data
//!   must satisfy, and the type-erased handle naming it.
//! - [`ComponentRegistry`]: type IDs, mask bit indices and mask checks.
//! - [`Query`]: `all` / `any` / `none` filters over component masks.
//! - [`AccessDescriptor`]: declared read/write sets of a system.
//! - [`World`]: one simulation's entities, storages and resources.

pub mod bitset;
pub mod component;
pub mod entity;
pub mod error;
pub mod query;
pub mod registry;
pub mod storage;
pub mod world;

pub use bitset::BitSet;
pub use component::{Component, ComponentInfo, ComponentKey, ComponentTypeId};
pub use entity::{EntityId, EntityManager, INVALID_ENTITY, MAX_GENERATION, MAX_INDEX};
pub use error::EcsError;
pub use query::{AccessDescriptor, Query, ResolvedQuery};
pub use registry::{ComponentRegistry, MAX_COMPONENT_TYPES};
pub use storage::ComponentStorage;
pub use world::{QueryIter, World, WorldConfig};
