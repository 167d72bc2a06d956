//! System stage: plans and runs a set of systems in dependency order.
//!
//! Planning turns the systems' `after`/`before` constraints into a
//! [`DagScheduler`], rejects cycles, groups systems into parallel batches by
//! dependency level, and finally splits each batch into conflict-free stages
//! by declared component access. Running walks that plan in order.
//!
//! Batches are executed sequentially on the calling thread. The plan still
//! records which systems could run side by side, so a thread-pool dispatcher
//! can be layered on top without changing it.

use tracing::{debug, info, trace};

use engine_component::World;

use crate::config::SystemConfig;
use crate::context::SystemContext;
use crate::dag::DagScheduler;
use crate::error::StageError;
use crate::scheduler::compute_stages;

/// A system body. Called once per tick with exclusive world access.
pub type SystemFn = Box<dyn FnMut(&mut SystemContext<'_>) -> anyhow::Result<()> + Send>;

struct SystemEntry {
    config: SystemConfig,
    run: SystemFn,
}

/// A group of systems with no ordering constraints or access conflicts
/// between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Dependency level this batch came from.
    pub level: usize,
    /// System names, in registration order.
    pub systems: Vec<String>,
}

/// Summary of one [`SystemStage::run`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Systems executed.
    pub systems_run: usize,
    /// Disabled systems skipped.
    pub systems_skipped: usize,
    /// Batches walked.
    pub batches: usize,
}

/// An ordered collection of systems.
#[derive(Default)]
pub struct SystemStage {
    systems: Vec<SystemEntry>,
    plan: Vec<Batch>,
    plan_dirty: bool,
}

impl SystemStage {
    /// Create an empty stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            plan: Vec::new(),
            plan_dirty: true,
        }
    }

    /// Register a system.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::DuplicateSystem`] if the name is taken.
    pub fn add_system<F>(&mut self, config: SystemConfig, system: F) -> Result<(), StageError>
    where
        F: FnMut(&mut SystemContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        if self.position(&config.name).is_some() {
            return Err(StageError::DuplicateSystem(config.name));
        }
        debug!(system = %config.name, "system added");
        self.systems.push(SystemEntry {
            config,
            run: Box::new(system),
        });
        self.plan_dirty = true;
        Ok(())
    }

    /// Remove a system by name. Returns `false` if it was not registered.
    ///
    /// Constraints other systems declare against it become dangling and
    /// fail the next plan.
    pub fn remove_system(&mut self, name: &str) -> bool {
        let Some(index) = self.position(name) else {
            return false;
        };
        self.systems.remove(index);
        self.plan_dirty = true;
        true
    }

    /// Enable or disable a system. Returns `false` if it was not registered.
    /// Toggling does not change the plan.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(index) = self.position(name) else {
            return false;
        };
        self.systems[index].config.enabled = enabled;
        true
    }

    /// Returns the config of a system.
    #[must_use]
    pub fn system(&self, name: &str) -> Option<&SystemConfig> {
        self.position(name).map(|i| &self.systems[i].config)
    }

    /// Number of registered systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns `true` if no system is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.systems.iter().position(|s| s.config.name == name)
    }

    /// Build the dependency graph of the registered systems. Node data is
    /// the system's index in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::UnknownDependency`] for a constraint naming a
    /// missing system.
    pub fn dependency_graph(&self) -> Result<DagScheduler<String, usize>, StageError> {
        let mut dag = DagScheduler::new();
        for (index, entry) in self.systems.iter().enumerate() {
            dag.add_node(entry.config.name.clone(), index);
        }
        for entry in &self.systems {
            let name = &entry.config.name;
            let unknown = |dependency: &String| StageError::UnknownDependency {
                system: name.clone(),
                dependency: dependency.clone(),
            };
            for dependency in &entry.config.after {
                dag.add_dependency(name, dependency)
                    .map_err(|_| unknown(dependency))?;
            }
            for dependent in &entry.config.before {
                dag.add_dependency(dependent, name)
                    .map_err(|_| unknown(dependent))?;
            }
        }
        Ok(dag)
    }

    fn recompute_plan(&mut self) -> Result<(), StageError> {
        let dag = self.dependency_graph()?;
        let levels = dag.analyze_parallel_batches().map_err(|err| StageError::Cycle {
            cycle: err.cycle,
        })?;

        let mut plan = Vec::new();
        for (level, names) in levels.into_iter().enumerate() {
            let indices: Vec<usize> = names
                .iter()
                .filter_map(|name| dag.data(name).copied())
                .collect();
            let accesses: Vec<_> = indices
                .iter()
                .map(|&i| &self.systems[i].config.access)
                .collect();
            for stage in compute_stages(&accesses) {
                plan.push(Batch {
                    level,
                    systems: stage
                        .system_indices
                        .iter()
                        .map(|&i| self.systems[indices[i]].config.name.clone())
                        .collect(),
                });
            }
        }

        info!(
            batch_count = plan.len(),
            system_count = self.systems.len(),
            "recomputed execution plan"
        );
        self.plan = plan;
        self.plan_dirty = false;
        Ok(())
    }

    /// Returns the execution plan, recomputing it if systems changed.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::UnknownDependency`] or [`StageError::Cycle`] if
    /// the constraints are invalid.
    pub fn plan(&mut self) -> Result<&[Batch], StageError> {
        if self.plan_dirty {
            self.recompute_plan()?;
        }
        Ok(&self.plan)
    }

    /// Run every enabled system once, batch by batch.
    ///
    /// # Errors
    ///
    /// Returns a planning error, or [`StageError::SystemFailed`] for the first
    /// system that fails. Systems after the failing one do not run.
    pub fn run(
        &mut self,
        world: &mut World,
        tick_id: u64,
        dt: f64,
    ) -> Result<RunReport, StageError> {
        if self.plan_dirty {
            self.recompute_plan()?;
        }

        let mut report = RunReport::default();
        for (batch_idx, batch) in self.plan.iter().enumerate() {
            trace!(tick_id, batch = batch_idx, systems = batch.systems.len(), "executing batch");
            for name in &batch.systems {
                let Some(entry) = self.systems.iter_mut().find(|s| &s.config.name == name) else {
                    continue;
                };
                if !entry.config.enabled {
                    report.systems_skipped += 1;
                    continue;
                }
                let mut ctx = SystemContext::new(tick_id, dt, &entry.config.name, world);
                (entry.run)(&mut ctx).map_err(|source| StageError::SystemFailed {
                    system: name.clone(),
                    tick_id,
                    source,
                })?;
                report.systems_run += 1;
            }
            report.batches += 1;
        }
        Ok(report)
    }
}

impl std::fmt::Debug for SystemStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemStage")
            .field(
                "systems",
                &self.systems.iter().map(|s| s.config.name.as_str()).collect::<Vec<_>>(),
            )
            .field("plan", &self.plan)
            .field("plan_dirty", &self.plan_dirty)
            .finish()
    }
}
