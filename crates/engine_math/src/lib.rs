//! # engine_math
//!
//! Math types for the ECS core. Re-exports [`glam`] for linear algebra and
//! defines the transform helpers the render cache builds matrices with.

pub mod transform;

// Re-export glam types for convenience.
pub use glam::{EulerRot, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};

pub use transform::{Transform3D, quat_from_euler_xyz, trs_matrix};
