//! Per-tick execution context provided to system functions.

use engine_component::{EntityId, Query, World};

/// Context provided to a system function on each tick.
///
/// Systems receive exclusive access to the world for the duration of their
/// call. The context is rebuilt for every system, so nothing a system stores
/// here leaks into the next one.
#[derive(Debug)]
pub struct SystemContext<'w> {
    /// The current tick ID.
    pub tick_id: u64,
    /// Delta time since the last tick, in seconds.
    pub dt: f64,
    /// Name of the system being run.
    pub system: &'w str,
    /// The world the stage runs against.
    pub world: &'w mut World,
}

impl<'w> SystemContext<'w> {
    /// Create a new context for a tick.
    #[must_use]
    pub fn new(tick_id: u64, dt: f64, system: &'w str, world: &'w mut World) -> Self {
        Self {
            tick_id,
            dt,
            system,
            world,
        }
    }

    /// Entities matching `query`, collected up front so the caller can
    /// mutate the world while walking them.
    #[must_use]
    pub fn entities(&self, query: &Query) -> Vec<EntityId> {
        self.world.query(query)
    }
}
