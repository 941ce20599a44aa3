//! Point and directional light sources with cached light-space transforms.
//!
//! Lights live in a flat list on the scene graph rather than in the node
//! tree; hair rendering never needs hierarchical light transforms. The
//! shadow-space view-projection matrix is rebuilt lazily whenever position,
//! direction or projection parameters change.

use glam::{Mat4, Vec3, Vec4};
use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Point,
    Directional,
}

/// GPU-facing light parameters, shared by the strand and mesh shaders.
///
/// `vector.w` discriminates the kind (1 = point, 0 = directional) and
/// `intensity.w` carries the spot cutoff, matching the shader layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightBuffer {
    pub vector: [f32; 4],
    pub intensity: [f32; 4],
    pub view_projection: [[f32; 4]; 4],
}

#[derive(Debug, Clone)]
pub struct LightSource {
    kind: LightKind,
    vector: Vec4,
    intensity: Vec3,
    cutoff: f32,

    /// Extent of the shadow frustum; tuned per scene bundle.
    shadow_extent: f32,
    near_distance: f32,
    far_distance: f32,

    view_projection: Cell<Option<Mat4>>,
}

impl LightSource {
    pub fn point(position: Vec3, intensity: Vec3) -> Self {
        Self {
            kind: LightKind::Point,
            vector: position.extend(1.0),
            intensity,
            cutoff: 0.0,
            shadow_extent: 50.0,
            near_distance: 1.0,
            far_distance: 1000.0,
            view_projection: Cell::new(None),
        }
    }

    pub fn directional(direction: Vec3, intensity: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            vector: direction.normalize().extend(0.0),
            intensity,
            cutoff: 0.0,
            shadow_extent: 50.0,
            near_distance: 1.0,
            far_distance: 1000.0,
            view_projection: Cell::new(None),
        }
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn position(&self) -> Vec3 {
        self.vector.truncate()
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.kind = LightKind::Point;
        self.vector = position.extend(1.0);
        self.view_projection.set(None);
    }

    /// Direction the light travels in, for shading. For point lights this is
    /// the direction from the origin toward the light.
    pub fn direction(&self) -> Vec3 {
        match self.kind {
            LightKind::Directional => self.vector.truncate(),
            LightKind::Point => self.vector.truncate().normalize(),
        }
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.kind = LightKind::Directional;
        self.vector = direction.normalize().extend(0.0);
        self.view_projection.set(None);
    }

    pub fn intensity(&self) -> Vec3 {
        self.intensity
    }

    pub fn set_intensity(&mut self, intensity: Vec3) {
        self.intensity = intensity;
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    pub fn set_cutoff(&mut self, cutoff: f32) {
        self.cutoff = cutoff;
    }

    pub fn set_shadow_range(&mut self, extent: f32, near: f32, far: f32) {
        self.shadow_extent = extent;
        self.near_distance = near;
        self.far_distance = far;
        self.view_projection.set(None);
    }

    /// Light-space view-projection for shadow mapping, aimed at the world
    /// origin. Point lights get a perspective frustum, directional lights an
    /// orthographic slab. Rebuilt only when stale.
    pub fn view_projection(&self) -> Mat4 {
        if let Some(matrix) = self.view_projection.get() {
            return matrix;
        }

        let matrix = match self.kind {
            LightKind::Point => {
                let view = Mat4::look_at_rh(self.position(), Vec3::ZERO, up_for(self.direction()));
                let projection = Mat4::perspective_rh(
                    std::f32::consts::FRAC_PI_2,
                    1.0,
                    self.near_distance,
                    self.far_distance,
                );
                projection * view
            }
            LightKind::Directional => {
                let eye = -self.direction() * self.shadow_extent;
                let view = Mat4::look_at_rh(eye, Vec3::ZERO, up_for(self.direction()));
                let e = self.shadow_extent;
                let projection =
                    Mat4::orthographic_rh(-e, e, -e, e, self.near_distance, self.far_distance);
                projection * view
            }
        };

        self.view_projection.set(Some(matrix));
        matrix
    }

    /// Flattened parameters for the shader uniform block.
    pub fn buffer(&self) -> LightBuffer {
        LightBuffer {
            vector: self.vector.to_array(),
            intensity: self.intensity.extend(self.cutoff).to_array(),
            view_projection: self.view_projection().to_cols_array_2d(),
        }
    }
}

/// Pick an up vector that isn't parallel to the light direction.
fn up_for(direction: Vec3) -> Vec3 {
    if direction.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_projection_is_cached() {
        let light = LightSource::point(Vec3::new(10.0, 20.0, 5.0), Vec3::ONE);
        let first = light.view_projection();
        assert_eq!(light.view_projection(), first);
    }

    #[test]
    fn test_moving_the_light_invalidates_the_transform() {
        let mut light = LightSource::point(Vec3::new(10.0, 20.0, 5.0), Vec3::ONE);
        let first = light.view_projection();
        light.set_position(Vec3::new(-10.0, 20.0, 5.0));
        assert_ne!(light.view_projection(), first);
    }

    #[test]
    fn test_kind_discriminant_in_buffer() {
        let point = LightSource::point(Vec3::ONE, Vec3::ONE);
        let directional = LightSource::directional(Vec3::NEG_Y, Vec3::ONE);
        assert_eq!(point.buffer().vector[3], 1.0);
        assert_eq!(directional.buffer().vector[3], 0.0);
    }

    #[test]
    fn test_vertical_light_gets_non_degenerate_basis() {
        let light = LightSource::directional(Vec3::NEG_Y, Vec3::ONE);
        let matrix = light.view_projection();
        assert!(matrix.is_finite());
    }
}
