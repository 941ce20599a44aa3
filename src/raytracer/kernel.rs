//! Segment BVH and ray-capsule intersection for the CPU ray tracer.
//!
//! Strand segments are treated as capsules. The BVH is a flat array built
//! by median split on the longest centroid axis; internal nodes store their
//! right child's index (the left child is always the next node), leaves
//! store a range into the reordered segment list.

use glam::Vec3;

#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub distance: f32,
    /// Index into the caller's segment list (pre-reorder).
    pub segment: u32,
}

/// One capsule: a strand segment with per-segment radius.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub index: u32,
}

impl Segment {
    fn bounds(&self) -> (Vec3, Vec3) {
        let r = Vec3::splat(self.radius);
        (
            self.start.min(self.end) - r,
            self.start.max(self.end) + r,
        )
    }

    fn centroid(&self) -> Vec3 {
        (self.start + self.end) * 0.5
    }
}

#[derive(Debug, Clone, Copy)]
struct BvhNode {
    min: Vec3,
    max: Vec3,
    /// Leaf: first segment. Internal: right child (left child is self + 1).
    offset: u32,
    /// Leaf: segment count. Internal: zero.
    count: u32,
}

impl BvhNode {
    fn intersects(&self, ray: &Ray, inverse_direction: Vec3, max_distance: f32) -> bool {
        let t0 = (self.min - ray.origin) * inverse_direction;
        let t1 = (self.max - ray.origin) * inverse_direction;
        let near = t0.min(t1).max_element();
        let far = t0.max(t1).min_element();
        near <= far && far >= 0.0 && near <= max_distance
    }
}

const LEAF_SIZE: usize = 4;

#[derive(Debug, Default)]
pub struct SegmentBvh {
    nodes: Vec<BvhNode>,
    segments: Vec<Segment>,
}

impl SegmentBvh {
    /// Build over the given segments; the input order is not preserved, but
    /// each [`Hit::segment`] refers to the original [`Segment::index`].
    pub fn build(mut segments: Vec<Segment>) -> Self {
        let mut nodes = Vec::new();
        if !segments.is_empty() {
            let count = segments.len();
            build_recursive(&mut nodes, &mut segments, 0, count);
        }
        log::debug!(
            "segment BVH: {} segments, {} nodes",
            segments.len(),
            nodes.len()
        );
        Self { nodes, segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Nearest capsule intersection along the ray, if any.
    pub fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        self.traverse(ray, f32::INFINITY, |segment, limit| {
            if let Some(distance) = intersect_capsule(ray, segment) {
                if distance < limit {
                    best = Some(Hit {
                        distance,
                        segment: segment.index,
                    });
                    return Some(distance);
                }
            }
            None
        });
        best
    }

    /// Any-hit query for shadow rays; stops at the first blocker closer
    /// than `max_distance`.
    pub fn occluded(&self, ray: &Ray, max_distance: f32) -> bool {
        let mut blocked = false;
        self.traverse(ray, max_distance, |segment, _| {
            if let Some(distance) = intersect_capsule(ray, segment) {
                if distance < max_distance {
                    blocked = true;
                    // Shrink the interval to zero to stop traversal.
                    return Some(0.0);
                }
            }
            None
        });
        blocked
    }

    /// Stack traversal; `visit` returns a tightened max distance when a
    /// closer hit is found.
    fn traverse<F>(&self, ray: &Ray, mut max_distance: f32, mut visit: F)
    where
        F: FnMut(&Segment, f32) -> Option<f32>,
    {
        if self.nodes.is_empty() {
            return;
        }
        let inverse_direction = ray.direction.recip();
        let mut stack = vec![0u32];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.intersects(ray, inverse_direction, max_distance) {
                continue;
            }
            if node.count > 0 {
                let first = node.offset as usize;
                for segment in &self.segments[first..first + node.count as usize] {
                    if let Some(tightened) = visit(segment, max_distance) {
                        max_distance = tightened;
                        if max_distance <= 0.0 {
                            return;
                        }
                    }
                }
            } else {
                stack.push(node.offset);
                stack.push(index + 1);
            }
        }
    }
}

fn build_recursive(
    nodes: &mut Vec<BvhNode>,
    segments: &mut [Segment],
    first: usize,
    count: usize,
) -> u32 {
    let node_index = nodes.len() as u32;

    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for segment in &segments[first..first + count] {
        let (lo, hi) = segment.bounds();
        min = min.min(lo);
        max = max.max(hi);
    }

    if count <= LEAF_SIZE {
        nodes.push(BvhNode {
            min,
            max,
            offset: first as u32,
            count: count as u32,
        });
        return node_index;
    }

    // Median split on the longest centroid axis.
    let extent = max - min;
    let axis = if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    };
    let mid = count / 2;
    segments[first..first + count].select_nth_unstable_by(mid, |a, b| {
        a.centroid()[axis].total_cmp(&b.centroid()[axis])
    });

    nodes.push(BvhNode {
        min,
        max,
        offset: 0,
        count: 0,
    });
    build_recursive(nodes, segments, first, mid);
    let right = build_recursive(nodes, segments, first + mid, count - mid);
    nodes[node_index as usize].offset = right;
    node_index
}

/// Ray vs capsule (cylinder body plus spherical caps). Returns the entry
/// distance along the ray, or None on a miss.
fn intersect_capsule(ray: &Ray, segment: &Segment) -> Option<f32> {
    let axis = segment.end - segment.start;
    let axis_length_squared = axis.length_squared();
    if axis_length_squared < 1e-12 {
        return intersect_sphere(ray, segment.start, segment.radius);
    }

    let delta = ray.origin - segment.start;
    let d_dot_a = ray.direction.dot(axis);
    let delta_dot_a = delta.dot(axis);

    // Quadratic for the infinite cylinder around the axis.
    let a = axis_length_squared - d_dot_a * d_dot_a;
    let b = axis_length_squared * delta.dot(ray.direction) - delta_dot_a * d_dot_a;
    let c = axis_length_squared * (delta.length_squared() - segment.radius * segment.radius)
        - delta_dot_a * delta_dot_a;

    let mut nearest: Option<f32> = None;
    if a.abs() > 1e-12 {
        let discriminant = b * b - a * c;
        if discriminant >= 0.0 {
            let t = (-b - discriminant.sqrt()) / a;
            if t >= 0.0 {
                // Inside the finite segment span?
                let s = delta_dot_a + t * d_dot_a;
                if s >= 0.0 && s <= axis_length_squared {
                    nearest = Some(t);
                }
            }
        }
    }

    // Spherical end caps.
    for cap in [segment.start, segment.end] {
        if let Some(t) = intersect_sphere(ray, cap, segment.radius) {
            if nearest.map_or(true, |n| t < n) {
                nearest = Some(t);
            }
        }
    }
    nearest
}

fn intersect_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<f32> {
    let delta = ray.origin - center;
    let b = delta.dot(ray.direction);
    let c = delta.length_squared() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let t = -b - discriminant.sqrt();
    (t >= 0.0).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal_segment(y: f32, index: u32) -> Segment {
        Segment {
            start: Vec3::new(-1.0, y, 0.0),
            end: Vec3::new(1.0, y, 0.0),
            radius: 0.1,
            index,
        }
    }

    #[test]
    fn test_ray_hits_capsule_through_the_middle() {
        let bvh = SegmentBvh::build(vec![horizontal_segment(0.0, 7)]);
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);

        let hit = bvh.intersect(&ray).unwrap();
        assert_eq!(hit.segment, 7);
        assert!((hit.distance - 4.9).abs() < 1e-3);
    }

    #[test]
    fn test_ray_misses_offset_capsule() {
        let bvh = SegmentBvh::build(vec![horizontal_segment(0.0, 0)]);
        let ray = Ray::new(Vec3::new(0.0, 1.0, -5.0), Vec3::Z);
        assert!(bvh.intersect(&ray).is_none());
    }

    #[test]
    fn test_nearest_of_stacked_segments_wins() {
        let near = Segment {
            start: Vec3::new(-1.0, 0.0, -2.0),
            end: Vec3::new(1.0, 0.0, -2.0),
            radius: 0.1,
            index: 2,
        };
        let bvh = SegmentBvh::build(vec![horizontal_segment(0.0, 0), near]);
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        assert_eq!(bvh.intersect(&ray).unwrap().segment, 2);
    }

    #[test]
    fn test_occlusion_respects_the_distance_limit() {
        let bvh = SegmentBvh::build(vec![horizontal_segment(0.0, 0)]);
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);

        assert!(bvh.occluded(&ray, 10.0));
        // The blocker is ~4.9 units away; a shorter ray is clear.
        assert!(!bvh.occluded(&ray, 2.0));
    }

    #[test]
    fn test_many_segments_survive_the_median_split() {
        let segments: Vec<Segment> = (0..64)
            .map(|i| horizontal_segment(i as f32 * 0.5, i))
            .collect();
        let bvh = SegmentBvh::build(segments);

        for i in [0u32, 13, 63] {
            let ray = Ray::new(Vec3::new(0.0, i as f32 * 0.5, -5.0), Vec3::Z);
            assert_eq!(bvh.intersect(&ray).unwrap().segment, i);
        }
    }

    #[test]
    fn test_empty_bvh_never_hits() {
        let bvh = SegmentBvh::build(Vec::new());
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        assert!(bvh.intersect(&ray).is_none());
        assert!(!bvh.occluded(&ray, f32::INFINITY));
    }
}
