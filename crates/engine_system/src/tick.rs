//! Fixed-timestep tick loop.
//!
//! Each tick advances the counter, replans the stage if its systems
//! changed, and runs every enabled system once against the owned world.

use std::time::Instant;

use tracing::{debug, info, warn};

use engine_component::World;

use crate::config::TickConfig;
use crate::error::StageError;
use crate::stage::{RunReport, SystemStage};

/// The tick loop state: a world and the stage that runs against it.
#[derive(Debug)]
pub struct TickLoop {
    tick_id: u64,
    config: TickConfig,
    world: World,
    stage: SystemStage,
}

impl TickLoop {
    /// Create a tick loop over an empty world.
    #[must_use]
    pub fn new(config: TickConfig) -> Self {
        Self::with_world(config, World::new())
    }

    /// Create a tick loop over an existing world.
    #[must_use]
    pub fn with_world(config: TickConfig, world: World) -> Self {
        Self {
            tick_id: 0,
            config,
            world,
            stage: SystemStage::new(),
        }
    }

    /// Returns the current tick counter.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// The loop configuration.
    #[must_use]
    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    /// The world systems run against.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the world, for spawning entities between ticks.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// The stage run on every tick.
    #[must_use]
    pub fn stage(&self) -> &SystemStage {
        &self.stage
    }

    /// Mutable access to the stage. Adding or removing systems here takes
    /// effect on the next tick.
    pub fn stage_mut(&mut self) -> &mut SystemStage {
        &mut self.stage
    }

    /// Run one tick.
    ///
    /// The tick counter advances even if a system fails, so the failing
    /// tick id matches the one reported in the error.
    ///
    /// # Errors
    ///
    /// Returns the stage's planning or system error.
    pub fn tick(&mut self, dt: f64) -> Result<RunReport, StageError> {
        self.tick_id += 1;
        debug!(tick_id = self.tick_id, dt, "tick start");
        let report = self.stage.run(&mut self.world, self.tick_id, dt)?;
        debug!(
            tick_id = self.tick_id,
            systems = report.systems_run,
            batches = report.batches,
            "tick complete"
        );
        Ok(report)
    }

    /// Run for the configured number of ticks, or until a system fails when
    /// `max_ticks` is 0. Blocks the calling thread, sleeping out the rest of
    /// each tick's budget. Returns the number of ticks run.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidTickRate`] before running anything if
    /// the configured rate is not positive and finite, otherwise the first
    /// error a tick produces.
    pub fn run(&mut self) -> Result<u64, StageError> {
        let tick_duration = self
            .config
            .tick_duration()
            .ok_or(StageError::InvalidTickRate {
                tick_rate: self.config.tick_rate,
            })?;
        let dt = tick_duration.as_secs_f64();
        let mut tick_count = 0u64;

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        loop {
            let start = Instant::now();
            self.tick(dt)?;

            tick_count += 1;
            if self.config.max_ticks > 0 && tick_count >= self.config.max_ticks {
                info!(ticks = tick_count, "tick loop complete");
                return Ok(tick_count);
            }

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            } else {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
    }
}
