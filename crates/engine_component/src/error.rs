//! ECS error types.

use crate::entity::EntityId;

/// Errors raised by entity allocation and component registration.
///
/// Only capacity and range violations are errors. Lookup misses return
/// `None` and idempotent operations return `bool` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    /// An entity index does not fit in the index bits of an [`EntityId`].
    #[error("entity index {index} out of range (max {max})")]
    IndexOutOfRange {
        /// The rejected index.
        index: u32,
        /// The largest encodable index.
        max: u32,
    },

    /// An entity generation does not fit in the generation bits.
    #[error("entity generation {generation} out of range (max {max})")]
    GenerationOutOfRange {
        /// The rejected generation.
        generation: u32,
        /// The largest encodable generation.
        max: u32,
    },

    /// Every issuable entity index is currently alive.
    #[error("entity capacity exhausted ({capacity} live entities)")]
    EntityCapacityExhausted {
        /// Number of indices the manager can issue.
        capacity: u32,
    },

    /// The registry already holds the maximum number of component types.
    #[error("component type limit exceeded (max {limit})")]
    ComponentLimitExceeded {
        /// The registry's type capacity.
        limit: usize,
    },

    /// A component type was used before being registered.
    #[error("component '{0}' is not registered")]
    UnregisteredComponent(&'static str),

    /// An operation targeted an entity that is not alive.
    #[error("{0} is not alive")]
    DeadEntity(EntityId),
}
