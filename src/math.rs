// Math utilities for the 3D engine

use glam::{Mat3, Mat4, Quat, Vec3};

/// Determinants below this are treated as singular.
const SINGULAR_EPSILON: f32 = 1e-6;

/// Represents a 3D transformation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// Create a new transform
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Create an identity transform
    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    /// Generate transformation matrix
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Transpose-inverse of the world matrix's upper 3x3, for transforming normals.
///
/// A singular matrix (e.g. zero scale) yields identity instead of NaNs.
pub fn normal_matrix(world: &Mat4) -> Mat3 {
    let upper = Mat3::from_mat4(*world);
    if upper.determinant().abs() < SINGULAR_EPSILON {
        Mat3::IDENTITY
    } else {
        upper.inverse().transpose()
    }
}

/// The rotation part of a world matrix, with scale removed.
pub fn world_rotation(world: &Mat4) -> Quat {
    let (_, rotation, _) = world.to_scale_rotation_translation();
    rotation
}

/// Normalized world-space forward (-Z) axis of a world matrix.
pub fn world_forward(world: &Mat4) -> Vec3 {
    (-world.z_axis.truncate()).normalize_or_zero()
}

/// Orientation that turns an object at `eye` toward `target`.
///
/// With `negative_z` the object's -Z axis faces the target (cameras and
/// lights); otherwise its +Z axis does. Returns `None` when the two points
/// coincide.
pub fn look_rotation(eye: Vec3, target: Vec3, up: Vec3, negative_z: bool) -> Option<Quat> {
    let direction = target - eye;
    if direction.length_squared() < SINGULAR_EPSILON {
        return None;
    }
    // Fall back to another up axis when looking straight along it.
    let up = if direction.normalize().cross(up).length_squared() < SINGULAR_EPSILON {
        Vec3::Z
    } else {
        up
    };
    let view = if negative_z {
        Mat4::look_at_rh(eye, target, up)
    } else {
        Mat4::look_at_rh(target, eye, up)
    };
    let rotation = Quat::from_mat3(&Mat3::from_mat4(view)).inverse();
    Some(rotation.normalize())
}
