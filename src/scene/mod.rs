//! Scene graph: transform hierarchy, cameras, lights and asset ownership.
//!
//! The graph owns hair and mesh assets (deduplicated by path) and a flat
//! arena of transform nodes referencing them by handle. Traversal recomputes
//! cached world transforms lazily and maintains flattened per-frame lists of
//! render-participating nodes.

pub mod camera;
pub mod graph;
pub mod light;
pub mod model;

pub use camera::Camera;
pub use graph::{NodeId, SceneError, SceneGraph};
pub use light::{LightKind, LightSource};
pub use model::Model;
