//! Stage runner error types.

/// Errors that can occur while planning or running a system stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Two systems were registered under the same name.
    #[error("system '{0}' is already registered")]
    DuplicateSystem(String),

    /// An `after`/`before` constraint named a system that does not exist.
    #[error("system '{system}' references unknown system '{dependency}'")]
    UnknownDependency {
        /// The system declaring the constraint.
        system: String,
        /// The missing system name.
        dependency: String,
    },

    /// The ordering constraints form a cycle.
    #[error("system ordering cycle: {}", join_path(.cycle))]
    Cycle {
        /// Closed cycle path of system names.
        cycle: Vec<String>,
    },

    /// The tick loop was configured with a rate it cannot turn into a tick
    /// duration.
    #[error("tick rate {tick_rate} must be positive and finite")]
    InvalidTickRate {
        /// The rejected rate in ticks per second.
        tick_rate: f64,
    },

    /// A system body returned an error.
    #[error("system '{system}' failed on tick {tick_id}")]
    SystemFailed {
        /// The failing system.
        system: String,
        /// The tick during which it failed.
        tick_id: u64,
        /// The error the system returned.
        #[source]
        source: anyhow::Error,
    },
}

fn join_path(cycle: &[String]) -> String {
    cycle.join(" -> ")
}
