//! Cameras derive view and projection matrices from their node's world
//! transform and their own frustum settings.

use glam::{Mat3, Mat4, Vec3};

use crate::shader::uniform::{names, UniformValue};
use crate::shader::Shader;

/// Pixel rectangle rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Width over height. A zero height is the caller's problem.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fov_y: f32, near: f32, far: f32 },
    Orthographic { half_size: f32, near: f32, far: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    projection: Projection,
    viewport: Viewport,
    view: Mat4,
    projection_matrix: Mat4,
    view_projection: Mat4,
    position: Vec3,
    view_dirty: bool,
    projection_dirty: bool,
    last_aspect: Option<f32>,
}

impl Camera {
    pub fn new(projection: Projection, viewport: Viewport) -> Self {
        Self {
            projection,
            viewport,
            view: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
            view_dirty: true,
            projection_dirty: true,
            last_aspect: None,
        }
    }

    /// `fov_y` in radians.
    pub fn perspective(fov_y: f32, near: f32, far: f32, viewport: Viewport) -> Self {
        Self::new(Projection::Perspective { fov_y, near, far }, viewport)
    }

    pub fn orthographic(half_size: f32, near: f32, far: f32, viewport: Viewport) -> Self {
        Self::new(
            Projection::Orthographic {
                half_size,
                near,
                far,
            },
            viewport,
        )
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.projection_dirty = true;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.projection_dirty = true;
    }

    pub(crate) fn mark_view_dirty(&mut self) {
        self.view_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.view_dirty || self.projection_dirty || self.last_aspect != Some(self.viewport.aspect())
    }

    /// `(left, right, bottom, top)` of an orthographic camera.
    pub fn ortho_bounds(&self) -> Option<(f32, f32, f32, f32)> {
        match self.projection {
            Projection::Orthographic { half_size, .. } => {
                let half_width = half_size * self.viewport.aspect();
                Some((-half_width, half_width, -half_size, half_size))
            }
            Projection::Perspective { .. } => None,
        }
    }

    /// Recomputes whichever matrices are stale. Returns `true` when the
    /// view-projection changed.
    pub fn update(&mut self, world: &Mat4) -> bool {
        let view_ran = self.view_dirty;
        if view_ran {
            self.view = world.inverse();
            self.position = world.w_axis.truncate();
            self.view_dirty = false;
        }

        let aspect = self.viewport.aspect();
        let projection_ran = self.projection_dirty || self.last_aspect != Some(aspect);
        if projection_ran {
            self.projection_matrix = self.compute_projection(aspect);
            self.last_aspect = Some(aspect);
            self.projection_dirty = false;
        }

        if view_ran || projection_ran {
            self.view_projection = self.projection_matrix * self.view;
        }
        view_ran || projection_ran
    }

    fn compute_projection(&self, aspect: f32) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y, near, far } => {
                Mat4::perspective_rh_gl(fov_y, aspect, near, far)
            }
            Projection::Orthographic { near, far, .. } => {
                let (left, right, bottom, top) = self.ortho_bounds().unwrap_or_default();
                Mat4::orthographic_rh_gl(left, right, bottom, top, near, far)
            }
        }
    }

    pub fn view(&self) -> &Mat4 {
        &self.view
    }

    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection_matrix
    }

    pub fn view_projection(&self) -> &Mat4 {
        &self.view_projection
    }

    /// Inverse projection, for turning clip coordinates back into view space.
    pub fn unprojection_matrix(&self) -> Mat4 {
        self.projection_matrix.inverse()
    }

    /// World position as of the last view recompute.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Writes the camera and per-drawable matrices into `shader`.
    pub fn upload_uniforms(&self, shader: &mut Shader, model: &Mat4, normal: &Mat3) {
        shader.update_uniform(names::VIEW, UniformValue::Mat4(self.view));
        shader.update_uniform(names::PROJECTION, UniformValue::Mat4(self.projection_matrix));
        shader.update_uniform(names::VIEW_PROJECTION, UniformValue::Mat4(self.view_projection));
        shader.update_uniform(names::CAMERA_POSITION, UniformValue::Vec3(self.position));
        shader.update_uniform(names::MODEL, UniformValue::Mat4(*model));
        shader.update_uniform(names::NORMAL, UniformValue::Mat3(*normal));
        shader.update_uniform(
            names::MODEL_VIEW_PROJECTION,
            UniformValue::Mat4(self.view_projection * *model),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ortho_bounds() {
        let mut camera = Camera::orthographic(1.0, 0.1, 100.0, Viewport::new(200, 100));
        assert_eq!(camera.ortho_bounds(), Some((-2.0, 2.0, -1.0, 1.0)));

        camera.update(&Mat4::IDENTITY);
        let expected = Mat4::orthographic_rh_gl(-2.0, 2.0, -1.0, 1.0, 0.1, 100.0);
        assert_eq!(*camera.projection_matrix(), expected);

        let corner = camera.projection_matrix().project_point3(Vec3::new(2.0, 1.0, -1.0));
        assert_relative_eq!(corner.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(corner.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_update_is_lazy() {
        let mut camera = Camera::perspective(1.0, 0.1, 10.0, Viewport::new(4, 3));
        assert!(camera.update(&Mat4::IDENTITY));
        assert!(!camera.update(&Mat4::IDENTITY));
        assert!(!camera.is_dirty());

        camera.set_viewport(Viewport::new(4, 3));
        assert!(camera.is_dirty());
        assert!(camera.update(&Mat4::IDENTITY));
    }

    #[test]
    fn test_view_projection_tracks_both_sources() {
        let mut camera = Camera::perspective(1.0, 0.1, 10.0, Viewport::new(1, 1));
        let world = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        camera.update(&world);
        assert_eq!(camera.position(), Vec3::new(0.0, 0.0, 5.0));

        camera.set_viewport(Viewport::new(2, 1));
        camera.update(&world);
        let expected = Mat4::perspective_rh_gl(1.0, 2.0, 0.1, 10.0) * world.inverse();
        assert!(camera.view_projection().abs_diff_eq(expected, 1e-6));

        // World moved but nobody told the camera: view stays as it was.
        camera.update(&Mat4::IDENTITY);
        assert!(camera.view().abs_diff_eq(world.inverse(), 1e-6));
        camera.mark_view_dirty();
        camera.update(&Mat4::IDENTITY);
        assert!(camera.view_projection().abs_diff_eq(Mat4::perspective_rh_gl(1.0, 2.0, 0.1, 10.0), 1e-6));
    }

    #[test]
    fn test_unprojection_inverts_projection() {
        let mut camera = Camera::perspective(0.8, 0.5, 50.0, Viewport::new(16, 9));
        camera.update(&Mat4::IDENTITY);
        let round = camera.unprojection_matrix() * *camera.projection_matrix();
        assert!(round.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }
}
