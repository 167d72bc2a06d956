//! # engine_system
//!
//! System scheduling and execution for the ECS engine.
//!
//! - [`DagScheduler`] is a generic dependency graph: topological order,
//!   cycle reporting, dependency levels and parallel batches.
//! - [`compute_stages`] splits a set of systems into stages with no
//!   read/write conflicts between members.
//! - [`SystemStage`] combines both: systems declare `after`/`before`
//!   constraints and component access, and the stage runs them in a valid
//!   order against a [`World`](engine_component::World).
//! - [`TickLoop`] drives a stage at a fixed rate.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_component::AccessDescriptor;
//! use engine_system::{SystemConfig, TickConfig, TickLoop};
//!
//! let mut tick_loop = TickLoop::new(TickConfig::default());
//! tick_loop
//!     .stage_mut()
//!     .add_system(SystemConfig::new("physics", AccessDescriptor::new()), |ctx| {
//!         tracing::trace!(tick = ctx.tick_id, "physics");
//!         Ok(())
//!     })
//!     .unwrap();
//! tick_loop.tick(1.0 / 60.0).unwrap();
//! ```

pub mod config;
pub mod context;
pub mod dag;
pub mod error;
pub mod scheduler;
pub mod stage;
pub mod tick;

pub use config::{SystemConfig, TickConfig};
pub use context::SystemContext;
pub use dag::{CycleError, DagNode, DagScheduler, SchedulerError};
pub use error::StageError;
pub use scheduler::{Stage, compute_stages};
pub use stage::{Batch, RunReport, SystemFn, SystemStage};
pub use tick::TickLoop;
