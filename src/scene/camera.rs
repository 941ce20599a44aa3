//! Perspective camera with lazily recomputed view/projection matrices.

use glam::{Mat4, Vec2, Vec3};
use std::cell::Cell;

/// Basis of the image plane used by the CPU ray tracer to generate primary
/// rays: `point + x·px + y·py + z` spans the viewing plane in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewingPlane {
    pub x: Vec3,
    pub y: Vec3,
    pub z: Vec3,
    pub point: Vec3,
}

/// Look-at camera. All matrix getters are memoized: setters only record the
/// new parameters and flag the cached matrix stale, and the matrix is
/// recomputed deterministically on the next read.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    look_at_point: Vec3,
    up_direction: Vec3,
    field_of_view: f32,
    width: u32,
    height: u32,
    near_distance: f32,
    far_distance: f32,

    arcball: Vec2,
    arcball_look_vector: Vec3,

    view_matrix: Cell<Option<Mat4>>,
    projection_matrix: Cell<Option<Mat4>>,
    viewing_plane: Cell<Option<ViewingPlane>>,
}

impl Camera {
    pub const DEFAULT_FIELD_OF_VIEW: f32 = std::f32::consts::FRAC_PI_4;

    pub fn new(field_of_view: f32, width: u32, height: u32, near: f32, far: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 1.0),
            look_at_point: Vec3::ZERO,
            up_direction: Vec3::Y,
            field_of_view,
            width,
            height,
            near_distance: near,
            far_distance: far,
            arcball: Vec2::ZERO,
            arcball_look_vector: Vec3::new(0.0, 0.0, 1.0),
            view_matrix: Cell::new(None),
            projection_matrix: Cell::new(None),
            viewing_plane: Cell::new(None),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.projection_matrix.set(None);
        self.viewing_plane.set(None);
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn field_of_view(&self) -> f32 {
        self.field_of_view
    }

    pub fn set_field_of_view(&mut self, field_of_view: f32) {
        self.field_of_view = field_of_view;
        self.projection_matrix.set(None);
        self.viewing_plane.set(None);
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.invalidate_view();
        self.arcball_look_vector = self.position - self.look_at_point;
    }

    pub fn look_at_point(&self) -> Vec3 {
        self.look_at_point
    }

    pub fn set_look_at_point(&mut self, look_at_point: Vec3) {
        self.look_at_point = look_at_point;
        self.invalidate_view();
        self.arcball_look_vector = self.position - self.look_at_point;
    }

    pub fn up_direction(&self) -> Vec3 {
        self.up_direction
    }

    pub fn set_up_direction(&mut self, up_direction: Vec3) {
        self.up_direction = up_direction.normalize();
        self.invalidate_view();
    }

    pub fn look_at(&mut self, point: Vec3, eye: Vec3, up: Vec3) {
        self.position = eye;
        self.look_at_point = point;
        self.up_direction = up.normalize();
        self.invalidate_view();
        self.arcball_look_vector = self.position - self.look_at_point;
    }

    /// Move both the eye and the look-at point.
    pub fn translate(&mut self, translation: Vec3) {
        self.position += translation;
        self.look_at_point += translation;
        self.invalidate_view();
    }

    /// Orbit the eye around the look-at point by a screen-space drag delta.
    /// Pitch is clamped so the camera can't flip over the pole.
    pub fn arcball_by(&mut self, delta: Vec2) {
        self.arcball.x -= delta.x;
        self.arcball.y -= delta.y;
        self.arcball.y = self.arcball.y.clamp(
            -std::f32::consts::FRAC_PI_4,
            std::f32::consts::FRAC_PI_4,
        );

        let yaw = Mat4::from_axis_angle(self.up_direction, self.arcball.x);
        let pitch = Mat4::from_axis_angle(-self.left_direction(), self.arcball.y);
        let displacement = (yaw * pitch).transform_vector3(self.arcball_look_vector);

        self.position = self.look_at_point + displacement;
        self.invalidate_view();
    }

    /// Dolly toward (positive) or away from the look-at point.
    pub fn zoom(&mut self, amount: f32) {
        let forward = self.forward_direction();
        let distance = (self.look_at_point - self.position).length();
        let step = (amount * 0.1 * distance).min(distance - self.near_distance);
        self.position += forward * step;
        self.invalidate_view();
        self.arcball_look_vector = self.position - self.look_at_point;
    }

    pub fn forward_direction(&self) -> Vec3 {
        (self.look_at_point - self.position).normalize()
    }

    pub fn left_direction(&self) -> Vec3 {
        self.up_direction.cross(self.forward_direction())
    }

    pub fn view_matrix(&self) -> Mat4 {
        if let Some(matrix) = self.view_matrix.get() {
            return matrix;
        }
        let matrix = Mat4::look_at_rh(self.position, self.look_at_point, self.up_direction);
        self.view_matrix.set(Some(matrix));
        matrix
    }

    pub fn projection_matrix(&self) -> Mat4 {
        if let Some(matrix) = self.projection_matrix.get() {
            return matrix;
        }
        let matrix = Mat4::perspective_rh(
            self.field_of_view,
            self.aspect_ratio(),
            self.near_distance,
            self.far_distance,
        );
        self.projection_matrix.set(Some(matrix));
        matrix
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Image-plane basis for primary ray generation.
    pub fn viewing_plane(&self) -> ViewingPlane {
        if let Some(plane) = self.viewing_plane.get() {
            return plane;
        }

        let yfov_scale = 1.0 / (0.5 * self.field_of_view).tan();

        let z = self.forward_direction();
        let x = self.left_direction();
        let y = x.cross(z);

        let plane = ViewingPlane {
            x,
            y,
            z: -0.5 * self.width as f32 * x - 0.5 * self.height as f32 * y
                + 0.5 * self.height as f32 * yfov_scale * z,
            point: self.position,
        };

        self.viewing_plane.set(Some(plane));
        plane
    }

    fn invalidate_view(&mut self) {
        self.view_matrix.set(None);
        self.viewing_plane.set(None);
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FIELD_OF_VIEW, 1280, 720, 0.01, 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_matrix_is_cached_until_invalidated() {
        let mut camera = Camera::default();
        camera.set_position(Vec3::new(0.0, 0.0, 5.0));

        let first = camera.view_matrix();
        assert_eq!(camera.view_matrix(), first);

        camera.set_position(Vec3::new(1.0, 0.0, 5.0));
        assert_ne!(camera.view_matrix(), first);
    }

    #[test]
    fn test_projection_only_depends_on_lens_parameters() {
        let mut camera = Camera::default();
        let projection = camera.projection_matrix();

        // Moving the eye must not touch the projection.
        camera.set_position(Vec3::splat(3.0));
        assert_eq!(camera.projection_matrix(), projection);

        camera.set_resolution(640, 480);
        assert_ne!(camera.projection_matrix(), projection);
    }

    #[test]
    fn test_translate_preserves_view_direction() {
        let mut camera = Camera::default();
        camera.look_at(Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0), Vec3::Y);
        let forward = camera.forward_direction();

        camera.translate(Vec3::new(2.0, 1.0, 0.0));
        assert!((camera.forward_direction() - forward).length() < 1e-6);
    }
}
