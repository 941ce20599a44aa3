//! GPU strand geometry and the linked-list build pass.
//!
//! Strands are drawn as indexed line lists. The fragment stage shades with
//! Kajiya-Kay, samples the shadow map and the density volume, then appends
//! the shaded fragment to the per-pixel linked list instead of blending.
//! Depth is tested against the opaque pre-pass but never written.

use crate::hair::HairStyle;
use crate::scene::SceneGraph;
use glam::Mat4;
use wgpu::util::DeviceExt;

use super::ppll::LinkedListEngine;

/// Per-frame parameters for the strand shaders (must match shader struct).
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StrandGlobals {
    pub view_projection: [[f32; 4]; 4],
    pub light_view_projection: [[f32; 4]; 4],
    pub eye: [f32; 4],
    /// xyz light position or direction, w = 1 point / 0 directional.
    pub light_vector: [f32; 4],
    /// rgb intensity, w spot cutoff.
    pub light_intensity: [f32; 4],
    /// xyz volume origin, w reciprocal shadow map size.
    pub volume_origin: [f32; 4],
    /// xyz volume extent, w unused.
    pub volume_size: [f32; 4],
    /// shadow mode, pcf kernel, deep-shadow stride, shadow opacity.
    pub params0: [f32; 4],
    /// ao radius, ao strength, shading model, unused.
    pub params1: [f32; 4],
}

/// Per-draw transform slice (dynamic uniform offset).
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ModelUniform {
    model: [[f32; 4]; 4],
}

/// Dynamic uniform slots are 256-byte aligned.
const MODEL_STRIDE: u64 = 256;
const MAX_HAIR_DRAWS: u64 = 64;

/// One hair style's GPU buffers, parallel to `SceneGraph::hair_styles`.
struct StrandGeometry {
    position_thickness: wgpu::Buffer,
    tangents: wgpu::Buffer,
    color_transparency: wgpu::Buffer,
    indices: wgpu::Buffer,
    draw_index_count: u32,
}

pub struct StrandRenderer {
    build_pipeline: wgpu::RenderPipeline,
    globals_buffer: wgpu::Buffer,
    model_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
    geometry: Vec<StrandGeometry>,
}

impl StrandRenderer {
    pub fn new(
        device: &wgpu::Device,
        ppll: &LinkedListEngine,
        environment_layout: &wgpu::BindGroupLayout,
    ) -> Self {
        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Strand Globals Buffer"),
            size: std::mem::size_of::<StrandGlobals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let model_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Strand Model Buffer"),
            size: MODEL_STRIDE * MAX_HAIR_DRAWS,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Strand Globals Layout"),
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
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let globals_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Strand Globals Bind Group"),
            layout: &globals_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: globals_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &model_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<ModelUniform>() as u64),
                    }),
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Strand Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/strand.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Strand Build Pipeline Layout"),
            bind_group_layouts: &[&globals_layout, ppll.build_layout(), environment_layout],
            push_constant_ranges: &[],
        });

        let build_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Strand Build Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &vertex_layouts(),
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                // Fragments go to the linked list, not a color target.
                targets: &[],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                // Test against the opaque scene, never write.
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            build_pipeline,
            globals_buffer,
            model_buffer,
            globals_bind_group,
            geometry: Vec::new(),
        }
    }

    /// Upload vertex/index buffers for every hair style in the scene.
    pub fn load(&mut self, device: &wgpu::Device, scene: &SceneGraph) {
        self.geometry = scene
            .hair_styles()
            .iter()
            .map(|style| upload_style(device, style))
            .collect();
        log::info!("uploaded {} hair styles to the GPU", self.geometry.len());
    }

    /// Re-upload index buffers after a reduction or shuffle changed them.
    pub fn reload_indices(&mut self, device: &wgpu::Device, scene: &SceneGraph) {
        for (geometry, style) in self.geometry.iter_mut().zip(scene.hair_styles()) {
            geometry.indices = index_buffer(device, style);
            geometry.draw_index_count = style.draw_index_count();
        }
    }

    pub fn upload_globals(&self, queue: &wgpu::Queue, globals: &StrandGlobals) {
        queue.write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(globals));
    }

    /// Write the world transforms of every hair node into the per-draw
    /// uniform slots. Call before encoding the pass.
    pub fn upload_transforms(&self, queue: &wgpu::Queue, scene: &SceneGraph) {
        for (slot, &node_id) in scene
            .nodes_with_hair_styles()
            .iter()
            .take(MAX_HAIR_DRAWS as usize)
            .enumerate()
        {
            self.write_model(queue, slot, scene.node(node_id).world_transform());
        }
    }

    fn write_model(&self, queue: &wgpu::Queue, slot: usize, model: Mat4) {
        let uniform = ModelUniform {
            model: model.to_cols_array_2d(),
        };
        queue.write_buffer(
            &self.model_buffer,
            slot as u64 * MODEL_STRIDE,
            bytemuck::bytes_of(&uniform),
        );
    }

    /// Record every hair node's draw into the linked-list build pass.
    pub fn draw<'pass>(
        &'pass self,
        pass: &mut wgpu::RenderPass<'pass>,
        scene: &SceneGraph,
        ppll: &'pass LinkedListEngine,
        environment: &'pass wgpu::BindGroup,
    ) {
        pass.set_pipeline(&self.build_pipeline);
        pass.set_bind_group(1, ppll.build_bind_group(), &[]);
        pass.set_bind_group(2, environment, &[]);

        for (slot, &node_id) in scene
            .nodes_with_hair_styles()
            .iter()
            .take(MAX_HAIR_DRAWS as usize)
            .enumerate()
        {
            let offset = (slot as u64 * MODEL_STRIDE) as u32;
            pass.set_bind_group(0, &self.globals_bind_group, &[offset]);

            for &style in scene.node(node_id).style_handles() {
                let geometry = &self.geometry[style];
                pass.set_vertex_buffer(0, geometry.position_thickness.slice(..));
                pass.set_vertex_buffer(1, geometry.tangents.slice(..));
                pass.set_vertex_buffer(2, geometry.color_transparency.slice(..));
                pass.set_index_buffer(geometry.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..geometry.draw_index_count, 0, 0..1);
            }
        }
    }

    /// Bind group layout/buffers reused by the shadow depth pass, which
    /// draws the same geometry with the same per-draw transforms.
    pub fn model_buffer(&self) -> &wgpu::Buffer {
        &self.model_buffer
    }

    pub fn geometry_buffers(
        &self,
        style: usize,
    ) -> (&wgpu::Buffer, &wgpu::Buffer, u32) {
        let geometry = &self.geometry[style];
        (
            &geometry.position_thickness,
            &geometry.indices,
            geometry.draw_index_count,
        )
    }
}

fn upload_style(device: &wgpu::Device, style: &HairStyle) -> StrandGeometry {
    let position_thickness = style.position_thickness_data();
    let color_transparency = style.color_transparency_data();
    let tangents: Vec<[f32; 3]> = style.tangents.iter().map(|t| t.to_array()).collect();

    StrandGeometry {
        position_thickness: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Strand Position Buffer"),
            contents: bytemuck::cast_slice(&position_thickness),
            usage: wgpu::BufferUsages::VERTEX,
        }),
        tangents: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Strand Tangent Buffer"),
            contents: bytemuck::cast_slice(&tangents),
            usage: wgpu::BufferUsages::VERTEX,
        }),
        color_transparency: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Strand Color Buffer"),
            contents: bytemuck::cast_slice(&color_transparency),
            usage: wgpu::BufferUsages::VERTEX,
        }),
        indices: index_buffer(device, style),
        draw_index_count: style.draw_index_count(),
    }
}

fn index_buffer(device: &wgpu::Device, style: &HairStyle) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Strand Index Buffer"),
        contents: bytemuck::cast_slice(&style.indices),
        usage: wgpu::BufferUsages::INDEX,
    })
}

fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 3] {
    [
        wgpu::VertexBufferLayout {
            array_stride: 16,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x4,
            }],
        },
        wgpu::VertexBufferLayout {
            array_stride: 12,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            }],
        },
        wgpu::VertexBufferLayout {
            array_stride: 16,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x4,
            }],
        },
    ]
}
