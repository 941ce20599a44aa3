//! GPU rasterizer frontend.
//!
//! Frame order: linked-list clear, shadow depth pre-pass, opaque mesh pass,
//! strand build pass, linked-list resolve, blit. All passes are recorded on
//! the one control thread; wgpu inserts the barriers between passes that
//! alias the list buffers.

use crate::hair::Volume;
use crate::scene::{LightSource, SceneGraph};
use glam::Vec3;

use super::blit::BlitPipeline;
use super::mesh::MeshRenderer;
use super::ppll::LinkedListEngine;
use super::settings::RenderSettings;
use super::shadow::{ShadowMapper, SHADOW_MAP_SIZE};
use super::strands::{StrandGlobals, StrandRenderer};
use super::Renderer;

/// Density field resolution used for strand ambient occlusion.
const AO_VOLUME_RESOLUTION: u32 = 256;

pub struct Rasterizer {
    ppll: LinkedListEngine,
    strands: StrandRenderer,
    meshes: MeshRenderer,
    shadow: ShadowMapper,
    blit: BlitPipeline,
    blit_bind_group: wgpu::BindGroup,

    environment_layout: wgpu::BindGroupLayout,
    environment: wgpu::BindGroup,
    shadow_sampler: wgpu::Sampler,
    volume_sampler: wgpu::Sampler,
    volume_bounds: (Vec3, Vec3),

    opaque_color: wgpu::TextureView,
    depth: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl Rasterizer {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let (opaque_color, depth) = create_targets(device, width, height);
        let ppll = LinkedListEngine::new(device, width, height, &opaque_color);

        let environment_layout = environment_layout(device);
        let strands = StrandRenderer::new(device, &ppll, &environment_layout);
        let meshes = MeshRenderer::new(device, &environment_layout);
        let shadow = ShadowMapper::new(device, &strands);

        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Comparison Sampler"),
            compare: Some(wgpu::CompareFunction::LessEqual),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let volume_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volume Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // Placeholder volume until a scene is loaded.
        let volume_view = create_volume_texture(device, 1, 1, 1);
        let environment = create_environment(
            device,
            &environment_layout,
            shadow.depth_view(),
            &shadow_sampler,
            &volume_view,
            &volume_sampler,
        );

        let blit = BlitPipeline::new(device, surface_format);
        let blit_bind_group = blit.bind(device, ppll.resolve_target());

        Self {
            ppll,
            strands,
            meshes,
            shadow,
            blit,
            blit_bind_group,
            environment_layout,
            environment,
            shadow_sampler,
            volume_sampler,
            volume_bounds: (Vec3::ZERO, Vec3::ONE),
            opaque_color,
            depth,
            width,
            height,
        }
    }

    /// Re-upload strand index buffers after reduction or shuffle.
    pub fn reload_indices(&mut self, device: &wgpu::Device, scene: &SceneGraph) {
        self.strands.reload_indices(device, scene);
    }

    fn globals(&self, scene: &SceneGraph, settings: &RenderSettings) -> StrandGlobals {
        let camera = &scene.camera;
        let light = scene
            .lights()
            .first()
            .cloned()
            .unwrap_or_else(|| LightSource::directional(Vec3::NEG_Y, Vec3::ONE));

        let params = settings.strand_shader_params();
        let (origin, size) = self.volume_bounds;
        StrandGlobals {
            view_projection: camera.view_projection().to_cols_array_2d(),
            light_view_projection: light.view_projection().to_cols_array_2d(),
            eye: camera.position().extend(1.0).to_array(),
            light_vector: light.buffer().vector,
            light_intensity: light.buffer().intensity,
            volume_origin: origin.extend(1.0 / SHADOW_MAP_SIZE as f32).to_array(),
            volume_size: size.extend(0.0).to_array(),
            params0: [params[0], params[1], params[2], params[3]],
            params1: [params[4], params[5], params[6], params[7]],
        }
    }
}

impl Renderer for Rasterizer {
    fn load(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, scene: &SceneGraph) {
        self.strands.load(device, scene);
        self.meshes.load(device, scene);

        // Voxelize the first hair style for local ambient occlusion.
        if let Some(style) = scene.hair_styles().first() {
            let mut volume = Volume::voxelize_segments(
                style,
                AO_VOLUME_RESOLUTION,
                AO_VOLUME_RESOLUTION,
                AO_VOLUME_RESOLUTION,
            );
            volume.normalize();
            self.volume_bounds = (volume.bounds.origin, volume.bounds.size);

            let volume_view = upload_volume(device, queue, &volume);
            self.environment = create_environment(
                device,
                &self.environment_layout,
                self.shadow.depth_view(),
                &self.shadow_sampler,
                &volume_view,
                &self.volume_sampler,
            );
        }
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        let (opaque_color, depth) = create_targets(device, width, height);
        self.opaque_color = opaque_color;
        self.depth = depth;
        self.ppll.resize(device, width, height, &self.opaque_color);
        self.blit_bind_group = self.blit.bind(device, self.ppll.resolve_target());
    }

    fn draw(
        &mut self,
        _device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        scene: &SceneGraph,
        settings: &RenderSettings,
    ) {
        let globals = self.globals(scene, settings);
        self.strands.upload_globals(queue, &globals);
        self.meshes.upload_globals(queue, &globals);
        self.strands.upload_transforms(queue, scene);
        self.meshes.upload_transforms(queue, scene);
        self.ppll.upload_dimensions(queue);

        if let Some(light) = scene.lights().first() {
            self.shadow.upload_light(queue, light.view_projection());
        }

        self.ppll.record_clear(encoder);
        self.shadow.record(encoder, scene, &self.strands);

        // Opaque pass: meshes into the offscreen color/depth pair.
        {
            let [r, g, b] = settings.background_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Opaque Mesh Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.opaque_color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.meshes.draw(&mut pass, scene, &self.environment);
        }

        // Strand build pass: depth-tested fragment appends, no color target.
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Strand Build Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.strands
                .draw(&mut pass, scene, &self.ppll, &self.environment);
        }

        self.ppll.record_resolve(encoder);
        self.blit.record(encoder, &self.blit_bind_group, target);
    }
}

fn create_targets(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::TextureView, wgpu::TextureView) {
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Opaque Color Target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Scene Depth Target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    (
        color.create_view(&wgpu::TextureViewDescriptor::default()),
        depth.create_view(&wgpu::TextureViewDescriptor::default()),
    )
}

fn environment_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Environment Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D3,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

fn create_environment(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    shadow: &wgpu::TextureView,
    shadow_sampler: &wgpu::Sampler,
    volume: &wgpu::TextureView,
    volume_sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Environment Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(shadow),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(shadow_sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(volume),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(volume_sampler),
            },
        ],
    })
}

fn create_volume_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    depth: u32,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Density Volume"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: depth,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: wgpu::TextureFormat::R8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// Upload the density grid as an `R8Unorm` 3D texture.
pub fn upload_volume(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    volume: &Volume,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Density Volume"),
        size: wgpu::Extent3d {
            width: volume.resolution.x,
            height: volume.resolution.y,
            depth_or_array_layers: volume.resolution.z,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: wgpu::TextureFormat::R8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &volume.densities,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(volume.resolution.x),
            rows_per_image: Some(volume.resolution.y),
        },
        wgpu::Extent3d {
            width: volume.resolution.x,
            height: volume.resolution.y,
            depth_or_array_layers: volume.resolution.z,
        },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}
