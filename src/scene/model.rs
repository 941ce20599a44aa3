//! Wavefront OBJ mesh assets for the opaque parts of a scene.
//!
//! Only the subset the demo scenes need: positions, normals and triangulated
//! faces. Faces with more than three corners are fan-triangulated, and
//! position/normal index combinations are deduplicated into a single indexed
//! vertex stream.

use super::graph::SceneError;
use crate::hair::Aabb;
use glam::Vec3;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Model {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Model {
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SceneError::ReadingModel(path.display().to_string()))?;
        let model = Self::parse(&content)
            .ok_or_else(|| SceneError::ReadingModel(path.display().to_string()))?;
        log::debug!(
            "loaded model {}: {} vertices, {} triangles",
            path.display(),
            model.positions.len(),
            model.indices.len() / 3
        );
        Ok(model)
    }

    fn parse(content: &str) -> Option<Self> {
        let mut positions: Vec<Vec3> = Vec::new();
        let mut normals: Vec<Vec3> = Vec::new();

        let mut model = Model::default();
        let mut cache: HashMap<(usize, usize), u32> = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match parts.next()? {
                "v" => positions.push(parse_vec3(&mut parts)?),
                "vn" => normals.push(parse_vec3(&mut parts)?),
                "f" => {
                    let corners: Vec<(usize, usize)> = parts
                        .map(|corner| parse_corner(corner, positions.len(), normals.len()))
                        .collect::<Option<_>>()?;
                    if corners.len() < 3 {
                        return None;
                    }
                    for i in 1..corners.len() - 1 {
                        for corner in [corners[0], corners[i], corners[i + 1]] {
                            let index = *cache.entry(corner).or_insert_with(|| {
                                let (pi, ni) = corner;
                                model.positions.push(positions[pi]);
                                model.normals.push(if ni == usize::MAX {
                                    Vec3::Y
                                } else {
                                    normals[ni]
                                });
                                (model.positions.len() - 1) as u32
                            });
                            model.indices.push(index);
                        }
                    }
                }
                // Materials, groups and texture coordinates are ignored.
                _ => {}
            }
        }

        if model.positions.is_empty() || model.indices.is_empty() {
            return None;
        }
        Some(model)
    }

    pub fn bounding_box(&self) -> Aabb {
        Aabb::from_points(&self.positions)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.positions.len() * std::mem::size_of::<Vec3>()
            + self.normals.len() * std::mem::size_of::<Vec3>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }
}

fn parse_vec3<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Option<Vec3> {
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some(Vec3::new(x, y, z))
}

/// Parse one `f` corner (`v`, `v//vn` or `v/vt/vn`), returning position and
/// normal indices. A missing normal is marked with `usize::MAX`.
fn parse_corner(corner: &str, positions: usize, normals: usize) -> Option<(usize, usize)> {
    let mut fields = corner.split('/');
    let pi = resolve_index(fields.next()?, positions)?;
    let _vt = fields.next();
    let ni = match fields.next() {
        Some(s) if !s.is_empty() => resolve_index(s, normals)?,
        _ => usize::MAX,
    };
    Some((pi, ni))
}

/// OBJ indices are 1-based and may be negative (relative to the end).
fn resolve_index(field: &str, len: usize) -> Option<usize> {
    let value: i64 = field.parse().ok()?;
    let index = if value < 0 {
        len as i64 + value
    } else {
        value - 1
    };
    if index < 0 || index >= len as i64 {
        return None;
    }
    Some(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
# simple quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
f 1//1 2//1 3//1 4//1
";

    #[test]
    fn test_quad_is_fan_triangulated() {
        let model = Model::parse(QUAD).unwrap();
        assert_eq!(model.indices.len(), 6);
        assert_eq!(model.positions.len(), 4);
        for n in &model.normals {
            assert_eq!(*n, Vec3::Z);
        }
    }

    #[test]
    fn test_negative_indices_resolve_from_the_end() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let model = Model::parse(obj).unwrap();
        assert_eq!(model.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_out_of_range_face_is_rejected() {
        let obj = "v 0 0 0\nf 1 2 3\n";
        assert!(Model::parse(obj).is_none());
    }
}
