//! GPU rendering: the per-pixel linked list engine, the render passes that
//! feed it, and the rasterizing / raymarching frontends.

pub mod blit;
pub mod mesh;
pub mod ppll;
pub mod rasterizer;
pub mod raymarcher;
pub mod settings;
pub mod shadow;
pub mod strands;

pub use ppll::{FragmentArena, LinkedListEngine, AVERAGE_FRAGMENTS_PER_PIXEL};
pub use rasterizer::Rasterizer;
pub use raymarcher::Raymarcher;
pub use settings::{Frontend, RenderSettings, ShadingModel, ShadowTechnique};

use crate::scene::SceneGraph;

/// Capability shared by the renderer frontends. `load` rebuilds GPU (or
/// acceleration) state from the scene's assets; `draw` records one frame
/// into the given surface view.
pub trait Renderer {
    fn load(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, scene: &SceneGraph);

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32);

    #[allow(clippy::too_many_arguments)]
    fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        scene: &SceneGraph,
        settings: &RenderSettings,
    );
}
