//! Hair asset model: strand geometry loading, derived data, and voxelization.
//!
//! A [`HairStyle`] owns the raw per-vertex arrays parsed from a binary `.hair`
//! file plus data derived from them (tangents, segment indices, bounding box).
//! [`Volume`] rasterizes that geometry into dense 3D density/tangent grids for
//! ambient occlusion and raymarching.

pub mod style;
pub mod volume;

pub use style::{FieldFlags, HairError, HairStyle};
pub use volume::Volume;

use glam::Vec3;

/// Axis-aligned bounding volume derived from strand vertices.
///
/// Not persisted unless the source file carries a precomputed box; recomputed
/// on demand otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub origin: Vec3,
    /// Extent from `origin` to the maximum corner.
    pub size: Vec3,
    /// Half the diagonal length.
    pub radius: f32,
    /// Enclosed volume.
    pub volume: f32,
}

impl Aabb {
    /// Build a box from explicit min/max corners.
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        let size = max - min;
        Self {
            origin: min,
            size,
            radius: 0.5 * size.length(),
            volume: size.x * size.y * size.z,
        }
    }

    /// Tight box over a set of points. Empty input yields a degenerate box at
    /// the world origin.
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        if points.is_empty() {
            min = Vec3::ZERO;
            max = Vec3::ZERO;
        }
        Self::from_min_max(min, max)
    }

    /// Maximum corner.
    pub fn max(&self) -> Vec3 {
        self.origin + self.size
    }

    /// Center point.
    pub fn center(&self) -> Vec3 {
        self.origin + 0.5 * self.size
    }

    /// Box grown by `fraction` of its size on every side. Used when
    /// voxelizing so density gradients at the boundary don't clip.
    pub fn expanded(&self, fraction: f32) -> Self {
        let margin = self.size * fraction;
        Self::from_min_max(self.origin - margin, self.max() + margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_from_points() {
        let aabb = Aabb::from_points(&[
            Vec3::new(-1.0, 0.0, 2.0),
            Vec3::new(3.0, -2.0, 0.0),
            Vec3::new(0.0, 1.0, 1.0),
        ]);
        assert_eq!(aabb.origin, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.size, Vec3::new(4.0, 3.0, 2.0));
        assert_eq!(aabb.volume, 24.0);
    }

    #[test]
    fn test_aabb_expansion_is_symmetric() {
        let aabb = Aabb::from_min_max(Vec3::ZERO, Vec3::ONE);
        let grown = aabb.expanded(0.5);
        assert_eq!(grown.origin, Vec3::splat(-0.5));
        assert_eq!(grown.max(), Vec3::splat(1.5));
        assert_eq!(grown.center(), aabb.center());
    }
}
