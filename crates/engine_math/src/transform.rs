//! 3D transform component and matrix helpers.
//!
//! Matrices are column-major `[f32; 16]` arrays, the layout GPU buffers and
//! the render cache use. Translation lives in elements 12, 13 and 14.

use engine_component::Component;
use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Build a column-major translation · rotation · scale matrix.
#[must_use]
pub fn trs_matrix(position: [f32; 3], rotation: [f32; 4], scale: [f32; 3]) -> [f32; 16] {
    Mat4::from_scale_rotation_translation(
        Vec3::from_array(scale),
        Quat::from_array(rotation),
        Vec3::from_array(position),
    )
    .to_cols_array()
}

/// Convert XYZ Euler angles (radians) to a quaternion `[x, y, z, w]`.
#[must_use]
pub fn quat_from_euler_xyz(x: f32, y: f32, z: f32) -> [f32; 4] {
    Quat::from_euler(EulerRot::XYZ, x, y, z).to_array()
}

/// A 3D transform representing position, rotation, and per-axis scale.
///
/// This is the primary spatial component. Gameplay code attaches it to an
/// entity, and `RenderDataStorage::sync_transforms` in `engine_render`
/// copies it into the entity's render slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transform3D {
    /// Position relative to the parent (or the world for roots).
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Per-axis scale factor.
    pub scale: Vec3,
}

impl Transform3D {
    /// The identity transform: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a new transform with the given position and default rotation/scale.
    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Compute the 4×4 model matrix for this transform.
    #[must_use]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// The model matrix as a column-major array.
    #[must_use]
    pub fn to_cols_array(&self) -> [f32; 16] {
        self.to_matrix().to_cols_array()
    }

    /// Translate the transform by the given offset.
    #[must_use]
    pub fn translated(mut self, offset: Vec3) -> Self {
        self.position += offset;
        self
    }

    /// Rotate the transform by the given quaternion.
    #[must_use]
    pub fn rotated(mut self, rotation: Quat) -> Self {
        self.rotation = rotation * self.rotation;
        self
    }

    /// Apply a uniform scale factor.
    #[must_use]
    pub fn scaled(mut self, factor: f32) -> Self {
        self.scale *= factor;
        self
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Component for Transform3D {
    fn type_name() -> &'static str {
        "Transform3D"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let t = Transform3D::default();
        assert_eq!(t.position, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.to_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_trs_matrix_translation_column() {
        let m = trs_matrix([10.0, 2.0, -3.0], [0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0]);
        assert_eq!(&m[12..15], &[10.0, 2.0, -3.0]);
        assert_eq!(m[0], 1.0);
        assert_eq!(m[15], 1.0);
    }

    #[test]
    fn test_trs_matrix_scales_before_translating() {
        let m = Mat4::from_cols_array(&trs_matrix(
            [5.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
            [2.0, 2.0, 2.0],
        ));
        let p = m.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(7.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_quat_from_euler_identity_and_quarter_turn() {
        assert_eq!(quat_from_euler_xyz(0.0, 0.0, 0.0), [0.0, 0.0, 0.0, 1.0]);
        let q = Quat::from_array(quat_from_euler_xyz(0.0, 0.0, std::f32::consts::FRAC_PI_2));
        let v = q * Vec3::X;
        assert!((v - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_translated_and_scaled() {
        let t = Transform3D::from_position(Vec3::new(1.0, 0.0, 0.0))
            .translated(Vec3::new(4.0, 0.0, 0.0))
            .scaled(2.0);
        assert_eq!(t.position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(t.scale, Vec3::splat(2.0));
        assert_eq!(t.to_cols_array()[12], 5.0);
    }

    #[test]
    fn test_rotated_composes_onto_existing_rotation() {
        let quarter = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let t = Transform3D::IDENTITY.rotated(quarter).rotated(quarter);
        let v = t.to_matrix().transform_vector3(Vec3::X);
        assert!((v + Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let t = Transform3D::from_position(Vec3::new(1.0, 2.0, 3.0));
        let bytes = rmp_serde::to_vec(&t).unwrap();
        let restored: Transform3D = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(t, restored);
    }
}
