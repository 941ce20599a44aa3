//! Opaque mesh pass.
//!
//! Renders the scene's OBJ models with Lambert shading and shadow-map
//! lookups into the offscreen color/depth pair the strand passes depend on:
//! the depth buffer culls hidden strand fragments and the color image is the
//! backdrop the linked-list resolve composites over.

use crate::scene::SceneGraph;
use glam::Mat4;
use wgpu::util::DeviceExt;

use super::strands::StrandGlobals;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ModelUniform {
    model: [[f32; 4]; 4],
}

const MODEL_STRIDE: u64 = 256;
const MAX_MESH_DRAWS: u64 = 64;

/// Interleaved position + normal vertex (must match shader struct).
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct MeshVertex {
    position: [f32; 3],
    normal: [f32; 3],
}

struct MeshGeometry {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

pub struct MeshRenderer {
    pipeline: wgpu::RenderPipeline,
    globals_buffer: wgpu::Buffer,
    model_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
    geometry: Vec<MeshGeometry>,
}

impl MeshRenderer {
    pub fn new(device: &wgpu::Device, environment_layout: &wgpu::BindGroupLayout) -> Self {
        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mesh Globals Buffer"),
            size: std::mem::size_of::<StrandGlobals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let model_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mesh Model Buffer"),
            size: MODEL_STRIDE * MAX_MESH_DRAWS,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let globals_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mesh Globals Layout"),
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
            label: Some("Mesh Globals Bind Group"),
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
            label: Some("Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/mesh.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&globals_layout, environment_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x3,
                        },
                        wgpu::VertexAttribute {
                            offset: 12,
                            shader_location: 1,
                            format: wgpu::VertexFormat::Float32x3,
                        },
                    ],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            pipeline,
            globals_buffer,
            model_buffer,
            globals_bind_group,
            geometry: Vec::new(),
        }
    }

    pub fn load(&mut self, device: &wgpu::Device, scene: &SceneGraph) {
        self.geometry = scene
            .models()
            .iter()
            .map(|model| {
                let vertices: Vec<MeshVertex> = model
                    .positions
                    .iter()
                    .zip(&model.normals)
                    .map(|(p, n)| MeshVertex {
                        position: p.to_array(),
                        normal: n.to_array(),
                    })
                    .collect();
                MeshGeometry {
                    vertices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Mesh Vertex Buffer"),
                        contents: bytemuck::cast_slice(&vertices),
                        usage: wgpu::BufferUsages::VERTEX,
                    }),
                    indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Mesh Index Buffer"),
                        contents: bytemuck::cast_slice(&model.indices),
                        usage: wgpu::BufferUsages::INDEX,
                    }),
                    index_count: model.indices.len() as u32,
                }
            })
            .collect();
    }

    pub fn upload_globals(&self, queue: &wgpu::Queue, globals: &StrandGlobals) {
        queue.write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(globals));
    }

    pub fn upload_transforms(&self, queue: &wgpu::Queue, scene: &SceneGraph) {
        for (slot, &node_id) in scene
            .nodes_with_models()
            .iter()
            .take(MAX_MESH_DRAWS as usize)
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

    pub fn draw<'pass>(
        &'pass self,
        pass: &mut wgpu::RenderPass<'pass>,
        scene: &SceneGraph,
        environment: &'pass wgpu::BindGroup,
    ) {
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(1, environment, &[]);

        for (slot, &node_id) in scene
            .nodes_with_models()
            .iter()
            .take(MAX_MESH_DRAWS as usize)
            .enumerate()
        {
            let offset = (slot as u64 * MODEL_STRIDE) as u32;
            pass.set_bind_group(0, &self.globals_bind_group, &[offset]);

            for &model in scene.node(node_id).model_handles() {
                let geometry = &self.geometry[model];
                pass.set_vertex_buffer(0, geometry.vertices.slice(..));
                pass.set_index_buffer(geometry.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..geometry.index_count, 0, 0..1);
            }
        }
    }
}
