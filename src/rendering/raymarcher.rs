//! Volume raymarching frontend.
//!
//! Draws the voxelized hair volume directly: a fullscreen pass steps along
//! each view ray through the density/tangent 3D textures, either
//! accumulating transmittance or stopping at an isosurface and shading the
//! density gradient. Useful for previewing level-of-detail volumes and for
//! debugging the voxelization itself.

use crate::hair::Volume;
use crate::scene::SceneGraph;
use glam::Vec3;

use super::rasterizer::upload_volume;
use super::settings::RenderSettings;
use super::Renderer;

/// Raymarch volume resolution; finer than the AO volume since it is the
/// primary visualization here.
const VOLUME_RESOLUTION: u32 = 256;

/// Must match the shader struct in `raymarch.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RaymarchGlobals {
    plane_x: [f32; 4],
    plane_y: [f32; 4],
    plane_z: [f32; 4],
    eye: [f32; 4],
    volume_origin: [f32; 4],
    volume_size: [f32; 4],
    /// steps, isosurface threshold, isosurface flag, background mix.
    params: [f32; 4],
    /// viewport width, height, then background rg; blue in origin.w.
    resolution: [f32; 4],
}

pub struct Raymarcher {
    pipeline: wgpu::RenderPipeline,
    globals_buffer: wgpu::Buffer,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    volume_bounds: (Vec3, Vec3),
    width: u32,
    height: u32,
}

impl Raymarcher {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Raymarch Globals Buffer"),
            size: std::mem::size_of::<RaymarchGlobals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Raymarch Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
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
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Raymarch Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Raymarch Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/raymarch.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Raymarch Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Raymarch Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Placeholder volumes until a scene is loaded.
        let density = placeholder_volume(device, wgpu::TextureFormat::R8Unorm);
        let tangents = placeholder_volume(device, wgpu::TextureFormat::Rgba8Snorm);
        let bind_group = create_bind_group(
            device,
            &layout,
            &globals_buffer,
            &density,
            &tangents,
            &sampler,
        );

        Self {
            pipeline,
            globals_buffer,
            layout,
            bind_group,
            sampler,
            volume_bounds: (Vec3::ZERO, Vec3::ONE),
            width,
            height,
        }
    }
}

impl Renderer for Raymarcher {
    fn load(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, scene: &SceneGraph) {
        let Some(style) = scene.hair_styles().first() else {
            log::warn!("raymarcher: scene has no hair styles to voxelize");
            return;
        };

        let mut volume = Volume::voxelize_segments(
            style,
            VOLUME_RESOLUTION,
            VOLUME_RESOLUTION,
            VOLUME_RESOLUTION,
        );
        volume.normalize();
        self.volume_bounds = (volume.bounds.origin, volume.bounds.size);

        let density = upload_volume(device, queue, &volume);
        let tangents = upload_tangent_volume(device, queue, &volume);
        self.bind_group = create_bind_group(
            device,
            &self.layout,
            &self.globals_buffer,
            &density,
            &tangents,
            &self.sampler,
        );
    }

    fn resize(&mut self, _device: &wgpu::Device, width: u32, height: u32) {
        self.width = width;
        self.height = height;
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
        let plane = scene.camera.viewing_plane();
        let (origin, size) = self.volume_bounds;
        let [r, g, b] = settings.background_color;
        let globals = RaymarchGlobals {
            plane_x: plane.x.extend(0.0).to_array(),
            plane_y: plane.y.extend(0.0).to_array(),
            plane_z: plane.z.extend(0.0).to_array(),
            eye: plane.point.extend(1.0).to_array(),
            volume_origin: origin.extend(b).to_array(),
            volume_size: size.extend(0.0).to_array(),
            params: [
                settings.raymarch_steps as f32,
                settings.isosurface_threshold,
                if settings.isosurface { 1.0 } else { 0.0 },
                0.0,
            ],
            resolution: [self.width as f32, self.height as f32, r, g],
        };
        queue.write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(&globals));

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Raymarch Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    globals: &wgpu::Buffer,
    density: &wgpu::TextureView,
    tangents: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Raymarch Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: globals.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(density),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(tangents),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn placeholder_volume(device: &wgpu::Device, format: wgpu::TextureFormat) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("Placeholder Volume"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn upload_tangent_volume(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    volume: &Volume,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Tangent Volume"),
        size: wgpu::Extent3d {
            width: volume.resolution.x,
            height: volume.resolution.y,
            depth_or_array_layers: volume.resolution.z,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: wgpu::TextureFormat::Rgba8Snorm,
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
        bytemuck::cast_slice(&volume.tangents),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(volume.resolution.x * 4),
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
