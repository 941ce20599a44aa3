//! Transform node arena and scene bundle loading.
//!
//! Nodes reference each other and the graph's assets by index, never by
//! pointer. Loading is all-or-nothing: the description is parsed and every
//! asset resolved into a fresh graph, so a malformed bundle leaves whatever
//! graph the caller already had untouched.

use super::{Camera, LightSource, Model};
use crate::hair::HairStyle;
use glam::{Mat4, Quat, Vec3, Vec4};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub type NodeId = usize;

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("failed to open scene bundle: {0}")]
    OpeningFolder(String),
    #[error("scene description is not valid JSON: {0}")]
    InvalidDescription(#[from] serde_json::Error),
    #[error("failed to read scene camera")]
    ReadingCamera,
    #[error("failed to read scene light {0}")]
    ReadingLight(usize),
    #[error("failed to read scene node: {0}")]
    ReadingNode(String),
    #[error("failed to read hair style: {0}")]
    ReadingStyle(String),
    #[error("failed to read model: {0}")]
    ReadingModel(String),
}

/// One transform in the hierarchy, optionally referencing hair and mesh
/// assets owned by the graph.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    /// Axis (xyz) and angle (w) of the local rotation.
    rotation: Vec4,
    translation: Vec3,
    scale: Vec3,

    local_transform: Mat4,
    world_transform: Mat4,
    dirty: bool,

    children: Vec<NodeId>,
    parent: Option<NodeId>,
    styles: Vec<usize>,
    models: Vec<usize>,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            rotation: Vec4::new(1.0, 0.0, 0.0, 0.0),
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            local_transform: Mat4::IDENTITY,
            world_transform: Mat4::IDENTITY,
            dirty: true,
            children: Vec::new(),
            parent: None,
            styles: Vec::new(),
            models: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.translation = translation;
        self.dirty = true;
    }

    pub fn rotation(&self) -> Vec4 {
        self.rotation
    }

    /// Set the local rotation as an axis (xyz) and angle (w).
    pub fn set_rotation(&mut self, rotation: Vec4) {
        self.rotation = rotation;
        self.dirty = true;
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    /// Cached world transform from the last traversal.
    pub fn world_transform(&self) -> Mat4 {
        self.world_transform
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Handles into [`SceneGraph::hair_styles`].
    pub fn style_handles(&self) -> &[usize] {
        &self.styles
    }

    /// Handles into [`SceneGraph::models`].
    pub fn model_handles(&self) -> &[usize] {
        &self.models
    }

    fn recompute_local(&mut self) {
        let axis = self.rotation.truncate();
        let rotation = if axis.length_squared() > 1e-12 {
            Quat::from_axis_angle(axis.normalize(), self.rotation.w)
        } else {
            Quat::IDENTITY
        };
        self.local_transform = Mat4::from_scale_rotation_translation(
            self.scale,
            rotation,
            self.translation,
        );
    }
}

#[derive(Debug, Default, Clone)]
pub struct SceneGraph {
    pub camera: Camera,

    nodes: Vec<Node>,
    root: NodeId,
    lights: Vec<LightSource>,

    hair_styles: Vec<HairStyle>,
    models: Vec<Model>,
    styles_by_path: HashMap<String, usize>,
    models_by_path: HashMap<String, usize>,
    nodes_by_name: HashMap<String, NodeId>,

    hair_node_cache: Vec<NodeId>,
    model_node_cache: Vec<NodeId>,
}

impl SceneGraph {
    /// Load a scene bundle from its JSON description. Asset paths are
    /// resolved relative to the description file. All-or-nothing: any
    /// failure returns an error without producing a partial graph.
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| SceneError::OpeningFolder(path.display().to_string()))?;
        let description: SceneDescription = serde_json::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut graph = SceneGraph::default();

        graph.camera = build_camera(&description.camera)?;

        for (index, light) in description.lights.iter().enumerate() {
            graph.lights.push(build_light(light, index)?);
        }

        for node in &description.nodes {
            graph.add_node_from_description(node, base)?;
        }
        graph.link_children(&description)?;

        if description.root >= graph.nodes.len() && !graph.nodes.is_empty() {
            return Err(SceneError::ReadingNode("root index out of range".into()));
        }
        graph.root = description.root;

        graph.traverse_nodes();

        log::info!(
            "loaded scene {}: {} nodes, {} lights, {} hair styles, {} models",
            path.display(),
            graph.nodes.len(),
            graph.lights.len(),
            graph.hair_styles.len(),
            graph.models.len()
        );

        Ok(graph)
    }

    /// Recompute cached world transforms top-down and rebuild the flattened
    /// hair-node and model-node lists. A node's world transform is
    /// recomputed only when its own parameters changed or an ancestor's
    /// transform changed this pass.
    pub fn traverse_nodes(&mut self) {
        self.hair_node_cache.clear();
        self.model_node_cache.clear();

        if self.nodes.is_empty() {
            return;
        }

        let mut stack = vec![(self.root, Mat4::IDENTITY, false)];
        while let Some((id, parent_world, parent_changed)) = stack.pop() {
            let node = &mut self.nodes[id];
            let changed = node.dirty || parent_changed;
            if node.dirty {
                node.recompute_local();
                node.dirty = false;
            }
            if changed {
                node.world_transform = parent_world * node.local_transform;
            }

            let world = node.world_transform;
            let has_styles = !node.styles.is_empty();
            let has_models = !node.models.is_empty();
            let children = node.children.clone();

            if has_styles {
                self.hair_node_cache.push(id);
            }
            if has_models {
                self.model_node_cache.push(id);
            }
            for child in children {
                stack.push((child, world, changed));
            }
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes_by_name.get(name).copied()
    }

    /// Nodes with at least one hair style attached, from the last traversal.
    pub fn nodes_with_hair_styles(&self) -> &[NodeId] {
        &self.hair_node_cache
    }

    /// Nodes with at least one model attached, from the last traversal.
    pub fn nodes_with_models(&self) -> &[NodeId] {
        &self.model_node_cache
    }

    pub fn lights(&self) -> &[LightSource] {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut [LightSource] {
        &mut self.lights
    }

    pub fn hair_styles(&self) -> &[HairStyle] {
        &self.hair_styles
    }

    pub fn hair_styles_mut(&mut self) -> &mut [HairStyle] {
        &mut self.hair_styles
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Total strand count across all hair assets. O(asset count).
    pub fn strand_count(&self) -> u32 {
        self.hair_styles.iter().map(|s| s.strand_count()).sum()
    }

    /// Bytes used by all hair and mesh assets. O(asset count).
    pub fn memory_usage(&self) -> usize {
        self.hair_styles
            .iter()
            .map(|s| s.size_in_bytes())
            .sum::<usize>()
            + self.models.iter().map(|m| m.size_in_bytes()).sum::<usize>()
    }

    pub fn clear(&mut self) {
        *self = SceneGraph::default();
    }

    fn add_node_from_description(
        &mut self,
        description: &NodeDescription,
        base: &Path,
    ) -> Result<(), SceneError> {
        let name = description
            .name
            .clone()
            .unwrap_or_else(|| format!("node-{}", self.nodes.len()));
        if self.nodes_by_name.contains_key(&name) {
            return Err(SceneError::ReadingNode(format!("duplicate name {name:?}")));
        }

        let mut node = Node::new(name.clone());
        if let Some(scale) = description.scale {
            node.scale = Vec3::from_array(scale);
        }
        if let Some(rotate) = description.rotate {
            node.rotation = Vec4::from_array(rotate);
        }
        if let Some(translate) = description.translate {
            node.translation = Vec3::from_array(translate);
        }

        for style_path in &description.styles {
            node.styles.push(self.add_style(base, style_path)?);
        }
        for model_path in &description.models {
            node.models.push(self.add_model(base, model_path)?);
        }

        self.nodes_by_name.insert(name, self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Load a hair asset unless the same path was already loaded, generating
    /// the derived arrays the renderers rely on.
    fn add_style(&mut self, base: &Path, style_path: &str) -> Result<usize, SceneError> {
        if let Some(&index) = self.styles_by_path.get(style_path) {
            return Ok(index);
        }

        let full_path = base.join(style_path);
        let mut style = HairStyle::load(&full_path).map_err(|error| {
            log::error!("hair style {style_path:?}: {error}");
            SceneError::ReadingStyle(style_path.to_string())
        })?;

        if !style.has_tangents() {
            style.generate_tangents();
        }
        if !style.has_indices() {
            style.generate_indices();
        }
        style.set_default_thickness(0.14);

        let index = self.hair_styles.len();
        self.hair_styles.push(style);
        self.styles_by_path.insert(style_path.to_string(), index);
        Ok(index)
    }

    fn add_model(&mut self, base: &Path, model_path: &str) -> Result<usize, SceneError> {
        if let Some(&index) = self.models_by_path.get(model_path) {
            return Ok(index);
        }

        let model = Model::load(&base.join(model_path))?;
        let index = self.models.len();
        self.models.push(model);
        self.models_by_path.insert(model_path.to_string(), index);
        Ok(index)
    }

    fn link_children(&mut self, description: &SceneDescription) -> Result<(), SceneError> {
        for (id, node) in description.nodes.iter().enumerate() {
            for &child in &node.children {
                if child >= self.nodes.len() {
                    return Err(SceneError::ReadingNode(format!(
                        "dangling child reference {child}"
                    )));
                }
                if self.nodes[child].parent.is_some() {
                    return Err(SceneError::ReadingNode(format!(
                        "node {child} has more than one parent"
                    )));
                }
                self.nodes[child].parent = Some(id);
                self.nodes[id].children.push(child);
            }
        }
        Ok(())
    }
}

// Serde mirror of the on-disk scene description.

#[derive(Debug, Deserialize)]
struct SceneDescription {
    camera: CameraDescription,
    #[serde(default)]
    lights: Vec<LightDescription>,
    #[serde(default)]
    nodes: Vec<NodeDescription>,
    #[serde(default)]
    root: usize,
}

#[derive(Debug, Deserialize)]
struct CameraDescription {
    #[serde(rename = "fieldOfView")]
    field_of_view: Option<f32>,
    origin: Option<[f32; 3]>,
    #[serde(rename = "lookAt")]
    look_at: Option<[f32; 3]>,
    upward: Option<[f32; 3]>,
}

#[derive(Debug, Deserialize)]
struct LightDescription {
    position: Option<[f32; 3]>,
    direction: Option<[f32; 3]>,
    intensity: Option<[f32; 3]>,
    #[serde(default)]
    cutoff: f32,
}

#[derive(Debug, Deserialize)]
struct NodeDescription {
    name: Option<String>,
    scale: Option<[f32; 3]>,
    rotate: Option<[f32; 4]>,
    translate: Option<[f32; 3]>,
    #[serde(default)]
    styles: Vec<String>,
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    children: Vec<usize>,
}

fn build_camera(description: &CameraDescription) -> Result<Camera, SceneError> {
    let origin = description.origin.ok_or(SceneError::ReadingCamera)?;
    let look_at = description.look_at.ok_or(SceneError::ReadingCamera)?;

    let mut camera = Camera::default();
    if let Some(degrees) = description.field_of_view {
        camera.set_field_of_view(degrees.to_radians());
    }
    camera.look_at(
        Vec3::from_array(look_at),
        Vec3::from_array(origin),
        description
            .upward
            .map(Vec3::from_array)
            .unwrap_or(Vec3::Y),
    );
    Ok(camera)
}

fn build_light(description: &LightDescription, index: usize) -> Result<LightSource, SceneError> {
    let intensity = description
        .intensity
        .map(Vec3::from_array)
        .ok_or(SceneError::ReadingLight(index))?;

    let mut light = if let Some(position) = description.position {
        LightSource::point(Vec3::from_array(position), intensity)
    } else if let Some(direction) = description.direction {
        LightSource::directional(Vec3::from_array(direction), intensity)
    } else {
        return Err(SceneError::ReadingLight(index));
    };

    light.set_cutoff(description.cutoff);
    Ok(light)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Root with two children; no assets so no files are touched.
    fn test_graph() -> SceneGraph {
        let mut graph = SceneGraph::default();
        graph.nodes.push(Node::new("root".into()));
        graph.nodes.push(Node::new("left".into()));
        graph.nodes.push(Node::new("right".into()));
        graph.nodes[0].children = vec![1, 2];
        graph.nodes[1].parent = Some(0);
        graph.nodes[2].parent = Some(0);
        graph.nodes_by_name.insert("root".into(), 0);
        graph.nodes_by_name.insert("left".into(), 1);
        graph.nodes_by_name.insert("right".into(), 2);
        graph.root = 0;
        graph
    }

    #[test]
    fn test_world_transform_composes_with_parent() {
        let mut graph = test_graph();
        graph.node_mut(0).set_translation(Vec3::new(1.0, 0.0, 0.0));
        graph.node_mut(1).set_translation(Vec3::new(0.0, 2.0, 0.0));
        graph.traverse_nodes();

        let world = graph.node(1).world_transform();
        let origin = world.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_sibling_transforms_are_bit_identical_across_mutation() {
        let mut graph = test_graph();
        graph.node_mut(1).set_translation(Vec3::new(0.0, 2.0, 0.0));
        graph.node_mut(2).set_translation(Vec3::new(0.0, -2.0, 0.0));
        graph.traverse_nodes();

        let sibling_before = graph.node(2).world_transform();

        // Only node 1 changes; its sibling must not be recomputed.
        graph.node_mut(1).set_translation(Vec3::new(5.0, 0.0, 0.0));
        graph.traverse_nodes();

        let sibling_after = graph.node(2).world_transform();
        assert_eq!(
            sibling_before.to_cols_array().map(f32::to_bits),
            sibling_after.to_cols_array().map(f32::to_bits)
        );
        assert_ne!(
            graph.node(1).world_transform(),
            Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0))
        );
    }

    #[test]
    fn test_parent_mutation_propagates_to_descendants() {
        let mut graph = test_graph();
        graph.traverse_nodes();

        graph.node_mut(0).set_translation(Vec3::new(0.0, 0.0, 3.0));
        graph.traverse_nodes();

        for id in [1, 2] {
            let origin = graph.node(id).world_transform().transform_point3(Vec3::ZERO);
            assert!((origin.z - 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_rejects_dangling_child_reference() {
        let dir = std::env::temp_dir().join("strandview_scene_dangling");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scene.json");
        std::fs::write(
            &path,
            r#"{
                "camera": { "origin": [0, 0, 10], "lookAt": [0, 0, 0] },
                "nodes": [ { "name": "root", "children": [7] } ]
            }"#,
        )
        .unwrap();

        match SceneGraph::load(&path) {
            Err(SceneError::ReadingNode(_)) => {}
            other => panic!("expected ReadingNode, got {:?}", other.err()),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_rejects_duplicate_node_names() {
        let dir = std::env::temp_dir().join("strandview_scene_duplicate");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scene.json");
        std::fs::write(
            &path,
            r#"{
                "camera": { "origin": [0, 0, 10], "lookAt": [0, 0, 0] },
                "nodes": [ { "name": "twin" }, { "name": "twin" } ]
            }"#,
        )
        .unwrap();

        match SceneGraph::load(&path) {
            Err(SceneError::ReadingNode(_)) => {}
            other => panic!("expected ReadingNode, got {:?}", other.err()),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_requires_camera_origin() {
        let dir = std::env::temp_dir().join("strandview_scene_camera");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scene.json");
        std::fs::write(&path, r#"{ "camera": { "lookAt": [0, 0, 0] } }"#).unwrap();

        match SceneGraph::load(&path) {
            Err(SceneError::ReadingCamera) => {}
            other => panic!("expected ReadingCamera, got {:?}", other.err()),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_load_leaves_previous_graph_usable() {
        let mut graph = test_graph();
        graph.traverse_nodes();
        let nodes_before = graph.node_count();

        let result = SceneGraph::load(Path::new("/nonexistent/scene.json"));
        assert!(matches!(result, Err(SceneError::OpeningFolder(_))));

        // The old graph is untouched because load never mutated it.
        assert_eq!(graph.node_count(), nodes_before);
    }

    #[test]
    fn test_light_requires_position_or_direction() {
        let description = LightDescription {
            position: None,
            direction: None,
            intensity: Some([1.0, 1.0, 1.0]),
            cutoff: 0.0,
        };
        assert!(matches!(
            build_light(&description, 0),
            Err(SceneError::ReadingLight(0))
        ));
    }
}
