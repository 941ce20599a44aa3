//! Strand voxelization into dense density/tangent grids.
//!
//! The volume feeds the volumetric ambient occlusion term of the strand
//! shader and the raymarching frontend. Segment voxelization walks every line
//! segment through the grid with a 3D DDA and is the production path; vertex
//! voxelization splats one voxel per vertex and exists as a cheap fallback.

use super::{Aabb, HairStyle};
use glam::{UVec3, Vec3};
use std::path::Path;

/// Fraction of the hair bounding box added on every side of the voxel grid
/// so density gradients don't clip at the boundary.
const BOUNDS_MARGIN: f32 = 0.025;

/// Dense 3D grid of strand density and averaged strand direction.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Grid dimensions (width, height, depth).
    pub resolution: UVec3,
    /// World-space region the grid covers.
    pub bounds: Aabb,
    /// One density byte per voxel, X-major then Y then Z.
    pub densities: Vec<u8>,
    /// Packed signed per-voxel tangent, xyz in [-127, 127], w unused.
    pub tangents: Vec<[i8; 4]>,
}

impl Volume {
    /// Rasterize every line segment of every strand into the grid,
    /// accumulating density and averaging segment directions per voxel.
    pub fn voxelize_segments(style: &HairStyle, width: u32, height: u32, depth: u32) -> Self {
        let mut builder = VolumeBuilder::new(style, width, height, depth);

        let mut base = 0usize;
        for strand in 0..style.strand_count() as usize {
            let count = style.segments.get(strand).map_or(0, |s| *s as usize);
            for segment in 0..count {
                let from = style.vertices[base + segment];
                let to = style.vertices[base + segment + 1];
                builder.rasterize_segment(from, to);
            }
            base += count + 1;
        }

        builder.finish()
    }

    /// Splat a single voxel per vertex point. Lower quality than
    /// [`Volume::voxelize_segments`]; used only as a fast-path fallback.
    pub fn voxelize_vertices(style: &HairStyle, width: u32, height: u32, depth: u32) -> Self {
        let mut builder = VolumeBuilder::new(style, width, height, depth);

        let mut base = 0usize;
        for strand in 0..style.strand_count() as usize {
            let count = style.segments.get(strand).map_or(0, |s| *s as usize);
            for v in 0..=count {
                let position = style.vertices[base + v];
                let direction = if v < count {
                    style.vertices[base + v + 1] - position
                } else {
                    position - style.vertices[base + v - 1]
                };
                let voxel = builder.voxel_of(position);
                builder.splat(voxel, direction.normalize_or_zero());
            }
            base += count + 1;
        }

        builder.finish()
    }

    /// Rescale densities into [0, 255] by the maximum observed value so the
    /// grid can be sampled as a normalized 8-bit texture. Required before the
    /// ambient occlusion raymarch, which assumes [0, 1] opacity.
    pub fn normalize(&mut self) {
        let max = self.densities.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return;
        }
        for d in &mut self.densities {
            *d = ((*d as u32 * 255) / max as u32) as u8;
        }
    }

    /// Halve every dimension, reducing each 8-voxel neighborhood of
    /// densities with `reduce` and averaging its tangents. Dimensions must
    /// be even.
    pub fn downsample(&self, reduce: impl Fn(&[u8; 8]) -> u8) -> Volume {
        assert!(
            self.resolution.x % 2 == 0 && self.resolution.y % 2 == 0 && self.resolution.z % 2 == 0,
            "downsample requires even grid dimensions"
        );

        let res = self.resolution / 2;
        let mut densities = vec![0u8; (res.x * res.y * res.z) as usize];
        let mut tangents = vec![[0i8; 4]; densities.len()];

        for z in 0..res.z {
            for y in 0..res.y {
                for x in 0..res.x {
                    let mut cell = [0u8; 8];
                    let mut direction = Vec3::ZERO;
                    for (i, offset) in NEIGHBORHOOD.iter().enumerate() {
                        let src = UVec3::new(2 * x, 2 * y, 2 * z) + *offset;
                        let index = self.index_of(src);
                        cell[i] = self.densities[index];
                        let t = self.tangents[index];
                        direction += Vec3::new(t[0] as f32, t[1] as f32, t[2] as f32);
                    }
                    let index = ((z * res.y + y) * res.x + x) as usize;
                    densities[index] = reduce(&cell);
                    tangents[index] = pack_tangent(direction.normalize_or_zero());
                }
            }
        }

        Volume {
            resolution: res,
            bounds: self.bounds,
            densities,
            tangents,
        }
    }

    /// Per-neighborhood maximum, for conservative occlusion mips.
    pub fn reduce_max(cell: &[u8; 8]) -> u8 {
        *cell.iter().max().unwrap()
    }

    /// Per-neighborhood average.
    pub fn reduce_average(cell: &[u8; 8]) -> u8 {
        (cell.iter().map(|d| *d as u32).sum::<u32>() / 8) as u8
    }

    /// Dump the raw density bytes for offline inspection.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.densities)
    }

    pub fn voxel_count(&self) -> usize {
        (self.resolution.x * self.resolution.y * self.resolution.z) as usize
    }

    /// World-space size of one voxel.
    pub fn voxel_size(&self) -> Vec3 {
        self.bounds.size / self.resolution.as_vec3()
    }

    fn index_of(&self, voxel: UVec3) -> usize {
        ((voxel.z * self.resolution.y + voxel.y) * self.resolution.x + voxel.x) as usize
    }
}

/// Accumulates float tangent sums during rasterization, packed on `finish`.
struct VolumeBuilder {
    resolution: UVec3,
    bounds: Aabb,
    densities: Vec<u8>,
    tangent_sums: Vec<Vec3>,
}

/// Offsets of the eight children of a downsampled voxel.
const NEIGHBORHOOD: [UVec3; 8] = [
    UVec3::new(0, 0, 0),
    UVec3::new(1, 0, 0),
    UVec3::new(0, 1, 0),
    UVec3::new(1, 1, 0),
    UVec3::new(0, 0, 1),
    UVec3::new(1, 0, 1),
    UVec3::new(0, 1, 1),
    UVec3::new(1, 1, 1),
];

impl VolumeBuilder {
    fn new(style: &HairStyle, width: u32, height: u32, depth: u32) -> Self {
        let resolution = UVec3::new(width, height, depth);
        let bounds = style.bounding_box().expanded(BOUNDS_MARGIN);
        let voxels = (width * height * depth) as usize;
        Self {
            resolution,
            bounds,
            densities: vec![0; voxels],
            tangent_sums: vec![Vec3::ZERO; voxels],
        }
    }

    fn voxel_of(&self, position: Vec3) -> UVec3 {
        let normalized = (position - self.bounds.origin) / self.bounds.size;
        let scaled = normalized * self.resolution.as_vec3();
        let max = self.resolution.as_vec3() - Vec3::ONE;
        scaled.floor().clamp(Vec3::ZERO, max).as_uvec3()
    }

    fn splat(&mut self, voxel: UVec3, direction: Vec3) {
        let index =
            ((voxel.z * self.resolution.y + voxel.y) * self.resolution.x + voxel.x) as usize;
        self.densities[index] = self.densities[index].saturating_add(1);
        self.tangent_sums[index] += direction;
    }

    /// Amanatides–Woo voxel walk from `from` to `to`, splatting the segment
    /// direction into every voxel the segment passes through.
    fn rasterize_segment(&mut self, from: Vec3, to: Vec3) {
        let direction = (to - from).normalize_or_zero();
        let mut voxel = self.voxel_of(from).as_ivec3();
        let last = self.voxel_of(to).as_ivec3();

        let voxel_size = self.bounds.size / self.resolution.as_vec3();
        let step = (to - from).signum();

        // Parametric distance along the segment to the next voxel boundary
        // on each axis, and the distance between consecutive boundaries.
        let mut t_max = Vec3::MAX;
        let mut t_delta = Vec3::MAX;
        let span = to - from;
        for axis in 0..3 {
            if span[axis].abs() > f32::EPSILON {
                let boundary = self.bounds.origin[axis]
                    + (voxel[axis] as f32 + if span[axis] > 0.0 { 1.0 } else { 0.0 })
                        * voxel_size[axis];
                t_max[axis] = (boundary - from[axis]) / span[axis];
                t_delta[axis] = voxel_size[axis] / span[axis].abs();
            }
        }

        // Bounded by the total number of boundary crossings (one per voxel
        // stepped on each axis) so degenerate float cases can't loop forever.
        let crossings = (last - voxel).abs();
        let limit = (crossings.x + crossings.y + crossings.z) as usize + 1;
        for _ in 0..=limit {
            self.splat(voxel.as_uvec3(), direction);
            if voxel == last {
                break;
            }
            let axis = if t_max.x < t_max.y && t_max.x < t_max.z {
                0
            } else if t_max.y < t_max.z {
                1
            } else {
                2
            };
            voxel[axis] += step[axis] as i32;
            t_max[axis] += t_delta[axis];
        }
    }

    fn finish(self) -> Volume {
        let tangents = self
            .tangent_sums
            .iter()
            .map(|sum| pack_tangent(sum.normalize_or_zero()))
            .collect();
        Volume {
            resolution: self.resolution,
            bounds: self.bounds,
            densities: self.densities,
            tangents,
        }
    }
}

fn pack_tangent(tangent: Vec3) -> [i8; 4] {
    [
        (tangent.x * 127.0) as i8,
        (tangent.y * 127.0) as i8,
        (tangent.z * 127.0) as i8,
        0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    /// One strand along the X axis plus a second strand so the bounds have
    /// nonzero extent in every dimension.
    fn axis_style() -> HairStyle {
        let mut style = HairStyle::default();
        style.segments = vec![1, 1];
        style.vertices = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(8.0, 0.0, 0.0),
            Vec3::new(0.0, 8.0, 8.0),
            Vec3::new(8.0, 8.0, 8.0),
        ];
        style
    }

    #[test]
    fn test_straight_segment_covers_only_its_path() {
        let style = axis_style();
        let volume = Volume::voxelize_segments(&style, 8, 8, 8);

        // The first strand runs along X near the minimum Y/Z corner; every
        // voxel it touches must lie in the bottom Y/Z slab (one-voxel
        // tolerance at the endpoints).
        let mut touched = 0;
        for z in 0..8u32 {
            for y in 0..8u32 {
                for x in 0..8u32 {
                    let index = ((z * 8 + y) * 8 + x) as usize;
                    if volume.densities[index] > 0 && y < 4 {
                        assert!(y <= 1 && z <= 1, "unexpected voxel at {x} {y} {z}");
                        touched += 1;
                    }
                }
            }
        }
        assert!(touched >= 8, "segment should touch the full X span");
    }

    #[test]
    fn test_diagonal_segment_reaches_its_endpoint() {
        let mut style = HairStyle::default();
        style.segments = vec![1];
        style.vertices = vec![Vec3::ZERO, Vec3::splat(8.0)];
        let volume = Volume::voxelize_segments(&style, 8, 8, 8);

        // The body diagonal must be walked all the way into the far corner
        // voxel, stepping one axis at a time (about 3 * 7 crossings).
        let far = ((7 * 8 + 7) * 8 + 7) as usize;
        assert!(volume.densities[far] > 0, "endpoint voxel never splatted");

        let touched = volume.densities.iter().filter(|d| **d > 0).count();
        assert!(touched >= 15, "diagonal truncated after {touched} voxels");
    }

    #[test]
    fn test_voxel_tangents_follow_segment_direction() {
        let style = axis_style();
        let volume = Volume::voxelize_segments(&style, 8, 8, 8);

        for (index, density) in volume.densities.iter().enumerate() {
            if *density > 0 {
                let t = volume.tangents[index];
                assert!(t[0] > 100, "tangent should point along +X, got {t:?}");
                assert!(t[1].abs() < 10);
            }
        }
    }

    #[test]
    fn test_normalize_scales_to_full_range() {
        let style = axis_style();
        let mut volume = Volume::voxelize_segments(&style, 8, 8, 8);
        volume.normalize();

        let max = volume.densities.iter().copied().max().unwrap();
        assert_eq!(max, 255);
    }

    #[test]
    fn test_normalize_of_empty_volume_is_a_no_op() {
        let style = axis_style();
        let mut volume = Volume::voxelize_segments(&style, 8, 8, 8);
        volume.densities.fill(0);
        volume.normalize();
        assert!(volume.densities.iter().all(|d| *d == 0));
    }

    #[test]
    fn test_downsample_halves_resolution() {
        let style = axis_style();
        let volume = Volume::voxelize_segments(&style, 8, 8, 8);

        let half = volume.downsample(Volume::reduce_max);
        assert_eq!(half.resolution, UVec3::splat(4));
        assert_eq!(half.voxel_count(), 64);

        // A max-reduced child can never be denser than its parent max.
        let parent_max = volume.densities.iter().copied().max().unwrap();
        let child_max = half.densities.iter().copied().max().unwrap();
        assert_eq!(parent_max, child_max);
    }

    #[test]
    fn test_vertex_voxelization_touches_no_more_than_vertices() {
        let style = axis_style();
        let volume = Volume::voxelize_vertices(&style, 8, 8, 8);
        let touched = volume.densities.iter().filter(|d| **d > 0).count();
        assert!(touched <= style.vertices.len());
    }
}
