//! Light nodes, the per-type packing aggregator and scene ambient light.

pub mod aggregator;
pub mod ambient;

use glam::{Mat4, Vec3, Vec4};

use crate::math::world_forward;

pub use aggregator::{LightAggregator, LightBuffers, MAX_LIGHTS};
pub use ambient::{AmbientDiffuse, AmbientLight};

/// Default cutoff distance of point lights.
pub const DEFAULT_POINT_DISTANCE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Shines along the node's world -Z axis.
    Directional,
    /// Radiates from the node's world position up to `distance`.
    Point { distance: f32 },
}

/// Light payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    color: Vec4,
    intensity: f32,
    kind: LightKind,
    slot: Option<usize>,
    changed: bool,
}

impl Light {
    pub fn directional(color: Vec4, intensity: f32) -> Self {
        Self::new(color, intensity, LightKind::Directional)
    }

    pub fn point(color: Vec4, intensity: f32) -> Self {
        Self::new(
            color,
            intensity,
            LightKind::Point {
                distance: DEFAULT_POINT_DISTANCE,
            },
        )
    }

    fn new(color: Vec4, intensity: f32, kind: LightKind) -> Self {
        Self {
            color,
            intensity,
            kind,
            slot: None,
            changed: false,
        }
    }

    /// Builder form of [`Light::set_distance`].
    pub fn with_distance(mut self, distance: f32) -> Self {
        self.set_distance(distance);
        self
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn is_directional(&self) -> bool {
        matches!(self.kind, LightKind::Directional)
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
        self.changed = true;
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity;
        self.changed = true;
    }

    /// Cutoff distance; `None` for directional lights.
    pub fn distance(&self) -> Option<f32> {
        match self.kind {
            LightKind::Point { distance } => Some(distance),
            LightKind::Directional => None,
        }
    }

    /// Ignored for directional lights.
    pub fn set_distance(&mut self, value: f32) {
        if let LightKind::Point { distance } = &mut self.kind {
            *distance = value;
            self.changed = true;
        }
    }

    /// Slot assigned by the last pack, if the light fit in the buffers.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Color scaled by intensity, as the shaders consume it.
    pub fn light_color(&self) -> Vec4 {
        self.color * self.intensity
    }

    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub(crate) fn set_slot(&mut self, slot: Option<usize>) {
        self.slot = slot;
    }

    /// Writes this light's packed data at `slot`.
    pub(crate) fn append(&self, world: &Mat4, slot: usize, buffers: &mut LightBuffers) {
        let color = self.light_color().truncate();
        let at = slot * 3;
        match self.kind {
            LightKind::Directional => {
                let direction = world_forward(world);
                buffers.direct_color[at..at + 3].copy_from_slice(&color.to_array());
                buffers.direct_direction[at..at + 3].copy_from_slice(&direction.to_array());
            }
            LightKind::Point { distance } => {
                let position: Vec3 = world.w_axis.truncate();
                buffers.point_color[at..at + 3].copy_from_slice(&color.to_array());
                buffers.point_position[at..at + 3].copy_from_slice(&position.to_array());
                buffers.point_distance[slot] = distance;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_point_defaults() {
        let light = Light::point(Vec4::ONE, 1.0);
        assert_eq!(light.distance(), Some(DEFAULT_POINT_DISTANCE));
        assert_eq!(Light::directional(Vec4::ONE, 1.0).distance(), None);
    }

    #[test]
    fn test_setters_flag_changes() {
        let mut light = Light::point(Vec4::ONE, 1.0);
        assert!(!light.take_changed());
        light.set_intensity(2.0);
        assert!(light.take_changed());
        assert!(!light.take_changed());

        let mut directional = Light::directional(Vec4::ONE, 1.0);
        directional.set_distance(5.0);
        assert!(!directional.take_changed());
    }

    #[test]
    fn test_append_directional() {
        let light = Light::directional(Vec4::new(1.0, 0.5, 0.25, 1.0), 2.0);
        let world = Mat4::from_quat(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let mut buffers = LightBuffers::default();
        light.append(&world, 1, &mut buffers);

        assert_eq!(&buffers.direct_color[3..6], &[2.0, 1.0, 0.5]);
        // -Z rotated a quarter turn about +Y points along -X.
        assert!((buffers.direct_direction[3] + 1.0).abs() < 1e-6);
        assert!(buffers.direct_direction[5].abs() < 1e-6);
    }

    #[test]
    fn test_append_point() {
        let light = Light::point(Vec4::ONE, 0.5).with_distance(4.0);
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let mut buffers = LightBuffers::default();
        light.append(&world, 0, &mut buffers);

        assert_eq!(&buffers.point_color[0..3], &[0.5, 0.5, 0.5]);
        assert_eq!(&buffers.point_position[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(buffers.point_distance[0], 4.0);
    }
}
