//! Per-pixel linked list engine for order-independent strand transparency.
//!
//! Three GPU passes share two storage buffers: a heads buffer with one
//! `atomic<u32>` slot index per pixel and a node pool with an atomic bump
//! allocator. The clear pass resets both, the strand build pass appends
//! fragments lock-free, and the resolve pass sorts each pixel's chain by
//! depth and composites it over the opaque scene color. The CPU never reads
//! or writes the list; [`FragmentArena`] reimplements the same protocol in
//! plain atomics so the semantics stay unit-testable.

use std::sync::atomic::{AtomicU32, Ordering};

/// Expected average transparent fragments per pixel. The node pool holds
/// `width * height * AVERAGE_FRAGMENTS_PER_PIXEL` entries; beyond that,
/// fragments are dropped silently.
pub const AVERAGE_FRAGMENTS_PER_PIXEL: u32 = 16;

/// Head value marking an empty per-pixel chain.
pub const HEAD_SENTINEL: u32 = u32::MAX;

/// Bytes per pool node: packed rgba8 color, f32 depth, next index, pad.
/// Must match the `Node` struct in `ppll_resolve.wgsl` and `strand.wgsl`.
const NODE_SIZE: u64 = 16;

/// Bytes before the node array: atomic counter, capacity, two pad words.
const POOL_HEADER_SIZE: u64 = 16;

const WORKGROUP_SIZE: u32 = 8;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ListDimensions {
    width: u32,
    height: u32,
    node_capacity: u32,
    _pad: u32,
}

/// GPU resources for the linked list, owned by the rasterizer.
pub struct LinkedListEngine {
    heads: wgpu::Buffer,
    nodes: wgpu::Buffer,
    dimensions: wgpu::Buffer,

    clear_pipeline: wgpu::ComputePipeline,
    resolve_pipeline: wgpu::ComputePipeline,
    clear_bind_group: wgpu::BindGroup,
    resolve_bind_group: wgpu::BindGroup,
    resolve_layout: wgpu::BindGroupLayout,
    build_layout: wgpu::BindGroupLayout,
    build_bind_group: wgpu::BindGroup,

    resolve_target: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl LinkedListEngine {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        opaque_color: &wgpu::TextureView,
    ) -> Self {
        let (heads, nodes, dimensions) = Self::create_buffers(device, width, height);
        let resolve_target = create_resolve_target(device, width, height);

        let clear_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("PPLL Clear Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../shaders/ppll_clear.wgsl").into()),
        });
        let resolve_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("PPLL Resolve Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("../../shaders/ppll_resolve.wgsl").into(),
            ),
        });

        let clear_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PPLL Clear Layout"),
            entries: &[
                storage_entry(0, false, wgpu::ShaderStages::COMPUTE),
                storage_entry(1, false, wgpu::ShaderStages::COMPUTE),
                uniform_entry(2, wgpu::ShaderStages::COMPUTE),
            ],
        });

        let resolve_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PPLL Resolve Layout"),
            entries: &[
                storage_entry(0, false, wgpu::ShaderStages::COMPUTE),
                storage_entry(1, false, wgpu::ShaderStages::COMPUTE),
                uniform_entry(2, wgpu::ShaderStages::COMPUTE),
                // Opaque scene color rendered by the mesh pass.
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Composited output, blitted to the surface afterwards.
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });

        // The strand build pass shares the heads and node pool; visibility
        // is fragment because appends happen per covered pixel.
        let build_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PPLL Build Layout"),
            entries: &[
                storage_entry(0, false, wgpu::ShaderStages::FRAGMENT),
                storage_entry(1, false, wgpu::ShaderStages::FRAGMENT),
                uniform_entry(2, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let clear_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("PPLL Clear Pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("PPLL Clear Pipeline Layout"),
                    bind_group_layouts: &[&clear_layout],
                    push_constant_ranges: &[],
                }),
            ),
            module: &clear_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let resolve_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("PPLL Resolve Pipeline"),
            layout: Some(
                &device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("PPLL Resolve Pipeline Layout"),
                    bind_group_layouts: &[&resolve_layout],
                    push_constant_ranges: &[],
                }),
            ),
            module: &resolve_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let clear_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("PPLL Clear Bind Group"),
            layout: &clear_layout,
            entries: &[
                buffer_entry(0, &heads),
                buffer_entry(1, &nodes),
                buffer_entry(2, &dimensions),
            ],
        });
        let resolve_bind_group = create_resolve_bind_group(
            device,
            &resolve_layout,
            &heads,
            &nodes,
            &dimensions,
            opaque_color,
            &resolve_target,
        );
        let build_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("PPLL Build Bind Group"),
            layout: &build_layout,
            entries: &[
                buffer_entry(0, &heads),
                buffer_entry(1, &nodes),
                buffer_entry(2, &dimensions),
            ],
        });

        log::info!(
            "PPLL: {}x{} pixels, {} nodes ({:.1} MiB)",
            width,
            height,
            node_capacity(width, height),
            (POOL_HEADER_SIZE + node_capacity(width, height) as u64 * NODE_SIZE) as f64
                / (1024.0 * 1024.0)
        );

        Self {
            heads,
            nodes,
            dimensions,
            clear_pipeline,
            resolve_pipeline,
            clear_bind_group,
            resolve_bind_group,
            resolve_layout,
            build_layout,
            build_bind_group,
            resolve_target,
            width,
            height,
        }
    }

    /// Drop and recreate the heads buffer, node pool and resolve target for
    /// a new surface size.
    pub fn resize(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        opaque_color: &wgpu::TextureView,
    ) {
        *self = Self::new(device, width, height, opaque_color);
    }

    /// Layout the strand build pipeline binds the list under.
    pub fn build_layout(&self) -> &wgpu::BindGroupLayout {
        &self.build_layout
    }

    pub fn build_bind_group(&self) -> &wgpu::BindGroup {
        &self.build_bind_group
    }

    /// Composited color output of the resolve pass.
    pub fn resolve_target(&self) -> &wgpu::TextureView {
        &self.resolve_target
    }

    /// Reset every pixel chain to empty and the allocator to zero.
    pub fn record_clear(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("PPLL Clear Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.clear_pipeline);
        pass.set_bind_group(0, &self.clear_bind_group, &[]);
        pass.dispatch_workgroups(
            self.width.div_ceil(WORKGROUP_SIZE),
            self.height.div_ceil(WORKGROUP_SIZE),
            1,
        );
    }

    /// Sort and composite every pixel chain over the opaque scene color.
    pub fn record_resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("PPLL Resolve Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.resolve_pipeline);
        pass.set_bind_group(0, &self.resolve_bind_group, &[]);
        pass.dispatch_workgroups(
            self.width.div_ceil(WORKGROUP_SIZE),
            self.height.div_ceil(WORKGROUP_SIZE),
            1,
        );
    }

    /// Rebind the opaque scene texture (after the mesh targets were
    /// recreated) without touching the list buffers.
    pub fn rebind_opaque_color(&mut self, device: &wgpu::Device, opaque_color: &wgpu::TextureView) {
        self.resolve_bind_group = create_resolve_bind_group(
            device,
            &self.resolve_layout,
            &self.heads,
            &self.nodes,
            &self.dimensions,
            opaque_color,
            &self.resolve_target,
        );
    }

    fn create_buffers(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Buffer, wgpu::Buffer, wgpu::Buffer) {
        let capacity = node_capacity(width, height);
        let heads = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PPLL Heads Buffer"),
            size: width as u64 * height as u64 * 4,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let nodes = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PPLL Node Pool"),
            size: POOL_HEADER_SIZE + capacity as u64 * NODE_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let dimensions = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PPLL Dimensions"),
            size: std::mem::size_of::<ListDimensions>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        (heads, nodes, dimensions)
    }

    /// Upload the current dimensions; the clear pass copies the capacity
    /// into the pool header so the shaders never trust a stale value.
    pub fn upload_dimensions(&self, queue: &wgpu::Queue) {
        let dims = ListDimensions {
            width: self.width,
            height: self.height,
            node_capacity: node_capacity(self.width, self.height),
            _pad: 0,
        };
        queue.write_buffer(&self.dimensions, 0, bytemuck::bytes_of(&dims));
    }
}

fn node_capacity(width: u32, height: u32) -> u32 {
    width * height * AVERAGE_FRAGMENTS_PER_PIXEL
}

fn create_resolve_target(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("PPLL Resolve Target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

#[allow(clippy::too_many_arguments)]
fn create_resolve_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    heads: &wgpu::Buffer,
    nodes: &wgpu::Buffer,
    dimensions: &wgpu::Buffer,
    opaque_color: &wgpu::TextureView,
    resolve_target: &wgpu::TextureView,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("PPLL Resolve Bind Group"),
        layout,
        entries: &[
            buffer_entry(0, heads),
            buffer_entry(1, nodes),
            buffer_entry(2, dimensions),
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(opaque_color),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(resolve_target),
            },
        ],
    })
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn storage_entry(
    binding: u32,
    read_only: bool,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Pack a linear-space color and coverage into the rgba8 node format.
pub fn pack_rgba8(color: [f32; 4]) -> u32 {
    let quantize = |c: f32| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    quantize(color[0])
        | (quantize(color[1]) << 8)
        | (quantize(color[2]) << 16)
        | (quantize(color[3]) << 24)
}

pub fn unpack_rgba8(packed: u32) -> [f32; 4] {
    [
        (packed & 0xFF) as f32 / 255.0,
        ((packed >> 8) & 0xFF) as f32 / 255.0,
        ((packed >> 16) & 0xFF) as f32 / 255.0,
        ((packed >> 24) & 0xFF) as f32 / 255.0,
    ]
}

/// CPU reimplementation of the linked-list protocol, field for field: a bump
/// counter claims pool slots, the head swap is an atomic exchange, and
/// resolve sorts by depth with ties keeping chain order. Backs the unit
/// tests; the renderers never use it.
pub struct FragmentArena {
    width: u32,
    height: u32,
    heads: Vec<AtomicU32>,
    counter: AtomicU32,
    colors: Vec<AtomicU32>,
    depths: Vec<AtomicU32>,
    next: Vec<AtomicU32>,
}

impl FragmentArena {
    pub fn new(width: u32, height: u32, capacity: u32) -> Self {
        let pixel_count = (width * height) as usize;
        let capacity = capacity as usize;
        Self {
            width,
            height,
            heads: (0..pixel_count).map(|_| AtomicU32::new(HEAD_SENTINEL)).collect(),
            counter: AtomicU32::new(0),
            colors: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            depths: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            next: (0..capacity).map(|_| AtomicU32::new(HEAD_SENTINEL)).collect(),
        }
    }

    pub fn clear(&self) {
        for head in &self.heads {
            head.store(HEAD_SENTINEL, Ordering::Relaxed);
        }
        self.counter.store(0, Ordering::Relaxed);
    }

    /// Append one fragment. Returns false when the pool is exhausted; the
    /// counter keeps climbing past capacity exactly like the GPU allocator.
    pub fn append(&self, x: u32, y: u32, color: u32, depth: f32) -> bool {
        debug_assert!(x < self.width && y < self.height);
        let slot = self.counter.fetch_add(1, Ordering::Relaxed) as usize;
        if slot >= self.colors.len() {
            return false;
        }

        self.colors[slot].store(color, Ordering::Relaxed);
        self.depths[slot].store(depth.to_bits(), Ordering::Relaxed);

        let pixel = (y * self.width + x) as usize;
        let previous = self.heads[pixel].swap(slot as u32, Ordering::AcqRel);
        self.next[slot].store(previous, Ordering::Release);
        true
    }

    /// Fragments actually stored, clamped to capacity.
    pub fn fragment_count(&self) -> u32 {
        self.counter
            .load(Ordering::Relaxed)
            .min(self.colors.len() as u32)
    }

    /// Walk one pixel's chain, sort by depth and composite back-to-front
    /// over `background` with the over operator.
    pub fn resolve(&self, x: u32, y: u32, background: [f32; 4]) -> [f32; 4] {
        let pixel = (y * self.width + x) as usize;
        let mut chain: Vec<(f32, u32)> = Vec::new();

        let mut cursor = self.heads[pixel].load(Ordering::Acquire);
        while cursor != HEAD_SENTINEL && chain.len() <= self.colors.len() {
            let slot = cursor as usize;
            chain.push((
                f32::from_bits(self.depths[slot].load(Ordering::Relaxed)),
                self.colors[slot].load(Ordering::Relaxed),
            ));
            cursor = self.next[slot].load(Ordering::Acquire);
        }

        // Stable sort: equal depths stay in chain order.
        chain.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut result = background;
        for (_, packed) in chain.iter().rev() {
            let fragment = unpack_rgba8(*packed);
            let alpha = fragment[3];
            for channel in 0..3 {
                result[channel] =
                    fragment[channel] * alpha + result[channel] * (1.0 - alpha);
            }
            result[3] = alpha + result[3] * (1.0 - alpha);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over(fragment: [f32; 4], backdrop: [f32; 3]) -> [f32; 3] {
        let a = fragment[3];
        [
            fragment[0] * a + backdrop[0] * (1.0 - a),
            fragment[1] * a + backdrop[1] * (1.0 - a),
            fragment[2] * a + backdrop[2] * (1.0 - a),
        ]
    }

    #[test]
    fn test_clear_then_resolve_is_the_identity() {
        let arena = FragmentArena::new(4, 4, 64);
        let background = [0.25, 0.5, 0.75, 1.0];

        arena.clear();
        assert_eq!(arena.resolve(2, 1, background), background);
        // A second clear+resolve must be bit-identical.
        arena.clear();
        assert_eq!(arena.resolve(2, 1, background), background);
        assert_eq!(arena.fragment_count(), 0);
    }

    #[test]
    fn test_fragments_composite_in_depth_order_regardless_of_append_order() {
        let arena = FragmentArena::new(2, 2, 16);
        let red = pack_rgba8([1.0, 0.0, 0.0, 0.5]);
        let green = pack_rgba8([0.0, 1.0, 0.0, 0.5]);
        let blue = pack_rgba8([0.0, 0.0, 1.0, 0.5]);

        // Appended mid, near, far; must composite far -> mid -> near.
        arena.append(0, 0, red, 0.5);
        arena.append(0, 0, green, 0.1);
        arena.append(0, 0, blue, 0.9);

        let background = [0.0, 0.0, 0.0, 1.0];
        let resolved = arena.resolve(0, 0, background);

        let mut expected = [0.0, 0.0, 0.0];
        for packed in [blue, red, green] {
            expected = over(unpack_rgba8(packed), expected);
        }
        for channel in 0..3 {
            assert!((resolved[channel] - expected[channel]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pool_exhaustion_drops_fragments_silently() {
        let arena = FragmentArena::new(1, 1, 2);
        let color = pack_rgba8([1.0, 1.0, 1.0, 1.0]);

        assert!(arena.append(0, 0, color, 0.1));
        assert!(arena.append(0, 0, color, 0.2));
        assert!(!arena.append(0, 0, color, 0.3));

        assert_eq!(arena.fragment_count(), 2);
        // The dropped fragment must not corrupt the surviving chain.
        let resolved = arena.resolve(0, 0, [0.0, 0.0, 0.0, 1.0]);
        assert!((resolved[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_equal_depths_resolve_in_chain_order() {
        let arena = FragmentArena::new(1, 1, 8);
        let first = pack_rgba8([1.0, 0.0, 0.0, 1.0]);
        let second = pack_rgba8([0.0, 1.0, 0.0, 1.0]);

        arena.append(0, 0, first, 0.5);
        arena.append(0, 0, second, 0.5);

        // Chain head is the last append, which sorts nearest among equals,
        // so it wins the composite.
        let resolved = arena.resolve(0, 0, [0.0, 0.0, 0.0, 1.0]);
        assert!((resolved[1] - 1.0).abs() < 1e-6);
        assert!(resolved[0].abs() < 1e-6);
    }

    #[test]
    fn test_chains_are_per_pixel() {
        let arena = FragmentArena::new(2, 1, 8);
        arena.append(0, 0, pack_rgba8([1.0, 0.0, 0.0, 1.0]), 0.5);

        let untouched = arena.resolve(1, 0, [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(untouched, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_color_packing_round_trips() {
        let color = [0.25, 0.5, 0.75, 1.0];
        let unpacked = unpack_rgba8(pack_rgba8(color));
        for channel in 0..4 {
            assert!((unpacked[channel] - color[channel]).abs() < 1.0 / 255.0);
        }
    }
}
