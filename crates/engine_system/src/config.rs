//! System and tick loop configuration.

use std::time::Duration;

use engine_component::AccessDescriptor;
use serde::{Deserialize, Serialize};

/// Configuration for one system in a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Human-readable system name (e.g. `"physics"`). Unique per stage.
    pub name: String,
    /// The data access requirements of this system.
    #[serde(skip)]
    pub access: AccessDescriptor,
    /// Systems that must run before this one.
    pub after: Vec<String>,
    /// Systems that must run after this one.
    pub before: Vec<String>,
    /// Disabled systems stay in the plan but are skipped at run time.
    pub enabled: bool,
}

impl SystemConfig {
    /// Create a new system config with the given name and access.
    #[must_use]
    pub fn new(name: impl Into<String>, access: AccessDescriptor) -> Self {
        Self {
            name: name.into(),
            access,
            ..Self::default()
        }
    }

    /// Run this system after `system`.
    #[must_use]
    pub fn after(mut self, system: impl Into<String>) -> Self {
        self.after.push(system.into());
        self
    }

    /// Run this system before `system`.
    #[must_use]
    pub fn before(mut self, system: impl Into<String>) -> Self {
        self.before.push(system.into());
        self
    }

    /// Enable or disable the system.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            access: AccessDescriptor::default(),
            after: Vec::new(),
            before: Vec::new(),
            enabled: true,
        }
    }
}

/// Configuration for the fixed-timestep tick loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl TickConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The wall-clock budget of one tick, or `None` when `tick_rate` is not
    /// a positive finite number small enough to yield a representable
    /// duration.
    #[must_use]
    pub fn tick_duration(&self) -> Option<Duration> {
        if !self.tick_rate.is_finite() || self.tick_rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(1.0 / self.tick_rate).ok()
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}
