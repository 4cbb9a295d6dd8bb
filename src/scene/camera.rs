//! Camera payload: projection and the view matrix derived during update.

use glam::Mat4;

use crate::math;

/// Perspective projection state for a camera node.
///
/// The view matrix is the inverse of the node's world transform and is
/// refreshed by `Scene::update`; a degenerate world transform leaves the
/// previous frame's view replaced by identity rather than failing.
#[derive(Debug, Clone)]
pub struct CameraData {
    fov_y_degrees: f32,
    aspect: f32,
    near: f32,
    far: f32,
    projection: Mat4,
    pub(crate) inverse_matrix: Mat4,
}

impl CameraData {
    pub fn new(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y_degrees,
            aspect,
            near,
            far,
            projection: math::perspective(fov_y_degrees, aspect, near, far),
            inverse_matrix: Mat4::IDENTITY,
        }
    }

    pub fn set_perspective(&mut self, fov_y_degrees: f32, aspect: f32, near: f32, far: f32) {
        self.fov_y_degrees = fov_y_degrees;
        self.aspect = aspect;
        self.near = near;
        self.far = far;
        self.projection = math::perspective(fov_y_degrees, aspect, near, far);
    }

    /// Rebuilds the projection for a new surface aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.set_perspective(self.fov_y_degrees, aspect, self.near, self.far);
    }

    pub fn fov_y_degrees(&self) -> f32 {
        self.fov_y_degrees
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    /// The view matrix as of the last update.
    pub fn inverse_matrix(&self) -> Mat4 {
        self.inverse_matrix
    }
}

impl Default for CameraData {
    fn default() -> Self {
        Self::new(45.0, 4.0 / 3.0, 0.1, 10000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_projection_matches_constructor() {
        let camera = CameraData::default();
        let explicit = CameraData::new(45.0, 4.0 / 3.0, 0.1, 10000.0);
        assert_eq!(camera.projection(), explicit.projection());
        assert_eq!(camera.inverse_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn set_aspect_keeps_other_parameters() {
        let mut camera = CameraData::default();
        camera.set_aspect(16.0 / 9.0);
        assert_eq!(camera.fov_y_degrees(), 45.0);
        assert_eq!(camera.near(), 0.1);
        assert_eq!(camera.far(), 10000.0);
        assert_eq!(
            camera.projection(),
            math::perspective(45.0, 16.0 / 9.0, 0.1, 10000.0)
        );
    }
}
