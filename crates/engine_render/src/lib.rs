//! # engine_render
//!
//! Render-side data cache for the ECS engine.
//!
//! [`RenderDataStorage`] mirrors per-entity transform and appearance data
//! into flat structure-of-arrays buffers, resolves parent hierarchies into
//! world matrices and uploads changed slots through a minimal
//! [`GpuDevice`]/[`GpuBuffer`] boundary. The graphics backend lives outside
//! this crate.
//!
//! ```rust,no_run
//! use engine_component::EntityManager;
//! use engine_render::RenderDataStorage;
//!
//! let mut entities = EntityManager::new();
//! let mut storage = RenderDataStorage::with_capacity(64);
//!
//! let e = entities.create().unwrap();
//! let slot = storage.allocate(e);
//! storage.set_position(slot, 10.0, 0.0, 0.0);
//! storage.update_world_matrices();
//! assert_eq!(storage.world_matrix(slot).unwrap()[12], 10.0);
//! ```

pub mod config;
pub mod error;
pub mod gpu;
pub mod storage;

pub use config::RenderStorageConfig;
pub use error::RenderError;
pub use gpu::{BufferDescriptor, BufferHint, BufferUsage, GpuBuffer, GpuDevice, GpuError};
pub use storage::{
    COLORS_FIELD, MAX_CUSTOM_FIELD_WIDTH, RenderDataStorage, RenderStats, WORLD_MATRICES_FIELD,
};
