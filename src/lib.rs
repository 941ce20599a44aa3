//! # Strandview: Strand-Based Hair Rendering
//!
//! Strandview is a real-time renderer for strand-based hair geometry. It
//! loads binary hair assets, organizes them in a transform scene graph and
//! draws them with three interchangeable frontends built around
//! order-independent transparency.
//!
//! ## Architecture Overview
//!
//! The codebase is organized into four main subsystems:
//!
//! ### 1. Hair Assets ([`hair`])
//!
//! Strand geometry and derived data:
//! - [`hair::HairStyle`] - binary HAIR file loading/saving, tangent and
//!   index generation, strand reduction and shuffling
//! - [`hair::Volume`] - voxelization of strands into density/tangent grids
//!   for ambient occlusion and raymarching
//!
//! **Key Design**: every per-vertex array is optional in the file; derived
//! arrays are regenerated on demand and defaults fill the gaps.
//!
//! ### 2. Scene Graph ([`scene`])
//!
//! Asset ownership and transforms:
//! - [`scene::SceneGraph`] - arena of transform nodes with dirty-flagged
//!   cached world matrices, JSON scene-bundle loading
//! - [`scene::Camera`] / [`scene::LightSource`] - memoized view/projection
//!   and light-space transforms
//!
//! **Key Design**: all-or-nothing loading; a malformed bundle never
//! clobbers the current scene.
//!
//! ### 3. Rendering ([`rendering`], [`raytracer`])
//!
//! Three frontends behind one [`rendering::Renderer`] trait:
//! - [`rendering::Rasterizer`] - GPU passes around a per-pixel linked list
//!   ([`rendering::ppll`]) for order-independent strand transparency
//! - [`raytracer::Raytracer`] - CPU ray tracing over a segment BVH with
//!   rayon, re-rendered only when the view changes
//! - [`rendering::Raymarcher`] - volume visualization of the voxelized hair
//!
//! ### 4. Application ([`app`], [`ui`])
//!
//! - [`app::App`] - winit/wgpu bootstrap, frontend switching, frame loop
//! - [`ui`] - egui settings window over [`rendering::RenderSettings`]

pub mod app;
pub mod hair;
pub mod raytracer;
pub mod rendering;
pub mod scene;
pub mod ui;
