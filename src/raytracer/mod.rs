//! CPU ray tracing frontend.
//!
//! Renders strand capsules through a segment BVH with Kajiya-Kay shading
//! and hard shadow rays, parallelized over image rows with rayon. The
//! framebuffer is only re-rendered when the camera, lights or viewport
//! changed; otherwise the cached image is re-uploaded cheaply and blitted.

pub mod kernel;

use crate::rendering::blit::BlitPipeline;
use crate::rendering::{Renderer, RenderSettings};
use crate::scene::{LightSource, SceneGraph};
use glam::{Mat4, Vec3, Vec4};
use kernel::{Ray, Segment, SegmentBvh};
use rayon::prelude::*;

const SPECULAR_POWER: f32 = 80.0;
const AMBIENT: f32 = 0.2;
const SHADOW_BIAS: f32 = 1e-3;

/// Per-segment shading inputs, indexed by [`kernel::Hit::segment`].
struct SegmentShading {
    tangent: Vec3,
    color: Vec3,
}

/// Camera/light state the last framebuffer was rendered with.
#[derive(PartialEq)]
struct FrameState {
    view_projection: Mat4,
    light_vector: Vec4,
    light_intensity: Vec3,
    background: [f32; 3],
    width: u32,
    height: u32,
}

pub struct Raytracer {
    bvh: SegmentBvh,
    shading: Vec<SegmentShading>,

    framebuffer: Vec<u8>,
    width: u32,
    height: u32,
    last_state: Option<FrameState>,

    texture: wgpu::Texture,
    blit: BlitPipeline,
    blit_bind_group: wgpu::BindGroup,
}

impl Raytracer {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let texture = create_framebuffer_texture(device, width, height);
        let blit = BlitPipeline::new(device, surface_format);
        let blit_bind_group =
            blit.bind(device, &texture.create_view(&Default::default()));

        Self {
            bvh: SegmentBvh::default(),
            shading: Vec::new(),
            framebuffer: vec![0; (width * height * 4) as usize],
            width,
            height,
            last_state: None,
            texture,
            blit,
            blit_bind_group,
        }
    }

    /// Force a re-render on the next draw (after reduction, light edits…).
    pub fn invalidate(&mut self) {
        self.last_state = None;
    }

    fn render(&mut self, scene: &SceneGraph, settings: &RenderSettings) {
        let plane = scene.camera.viewing_plane();
        let light = primary_light(scene);
        let light_vector = light.buffer().vector;
        let light_intensity = light.intensity();
        let background = settings.background_color.map(|c| (c * 255.0) as u8);

        let bvh = &self.bvh;
        let shading = &self.shading;
        let width = self.width;

        let start = std::time::Instant::now();
        self.framebuffer
            .par_chunks_mut((width * 4) as usize)
            .enumerate()
            .for_each(|(row, pixels)| {
                for column in 0..width as usize {
                    let px = column as f32 + 0.5;
                    let py = row as f32 + 0.5;
                    let direction = plane.z + px * plane.x + py * plane.y;
                    let ray = Ray::new(plane.point, direction);

                    let color = match bvh.intersect(&ray) {
                        Some(hit) => {
                            let inputs = &shading[hit.segment as usize];
                            let point = ray.at(hit.distance);
                            let shaded = shade(
                                point,
                                inputs,
                                &ray,
                                light_vector,
                                light_intensity,
                                bvh,
                            );
                            shaded.map(|c| (c.clamp(0.0, 1.0) * 255.0) as u8)
                        }
                        None => background,
                    };

                    let offset = column * 4;
                    pixels[offset..offset + 3].copy_from_slice(&color);
                    pixels[offset + 3] = 0xFF;
                }
            });
        log::info!(
            "ray traced {}x{} in {:.0} ms",
            self.width,
            self.height,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
}

impl Renderer for Raytracer {
    /// Flatten every hair node's strands into world-space capsules and
    /// rebuild the BVH.
    fn load(&mut self, _device: &wgpu::Device, _queue: &wgpu::Queue, scene: &SceneGraph) {
        let mut segments = Vec::new();
        self.shading.clear();

        for &node_id in scene.nodes_with_hair_styles() {
            let node = scene.node(node_id);
            let world = node.world_transform();

            for &style_handle in node.style_handles() {
                let style = &scene.hair_styles()[style_handle];
                let positions = style.position_thickness_data();
                let colors = style.color_transparency_data();
                let drawn = style.draw_index_count() as usize;

                for pair in style.indices[..drawn].chunks_exact(2) {
                    let (a, b) = (pair[0] as usize, pair[1] as usize);
                    let start = world.transform_point3(Vec3::from_slice(&positions[a][..3]));
                    let end = world.transform_point3(Vec3::from_slice(&positions[b][..3]));
                    let radius = 0.5 * (positions[a][3] + positions[b][3]) * 0.5;

                    let index = segments.len() as u32;
                    segments.push(Segment {
                        start,
                        end,
                        radius,
                        index,
                    });
                    self.shading.push(SegmentShading {
                        tangent: (end - start).normalize_or_zero(),
                        color: 0.5
                            * (Vec3::from_slice(&colors[a][..3])
                                + Vec3::from_slice(&colors[b][..3])),
                    });
                }
            }
        }

        log::info!("ray tracer: {} capsules", segments.len());
        self.bvh = SegmentBvh::build(segments);
        self.last_state = None;
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.framebuffer = vec![0; (width * height * 4) as usize];
        self.texture = create_framebuffer_texture(device, width, height);
        self.blit_bind_group = self
            .blit
            .bind(device, &self.texture.create_view(&Default::default()));
        self.last_state = None;
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
        let light = primary_light(scene);
        let state = FrameState {
            view_projection: scene.camera.view_projection(),
            light_vector: Vec4::from_array(light.buffer().vector),
            light_intensity: light.intensity(),
            background: settings.background_color,
            width: self.width,
            height: self.height,
        };

        if self.last_state.as_ref() != Some(&state) {
            self.render(scene, settings);
            self.last_state = Some(state);
        }

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &self.framebuffer,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        self.blit.record(encoder, &self.blit_bind_group, target);
    }
}

fn primary_light(scene: &SceneGraph) -> LightSource {
    scene
        .lights()
        .first()
        .cloned()
        .unwrap_or_else(|| LightSource::directional(Vec3::NEG_Y, Vec3::ONE))
}

/// Kajiya-Kay: diffuse follows sin(T, L), specular is
/// `(cos(T,L)·cos(T,E) + sin(T,L)·sin(T,E))^p`. Hard shadows by occlusion
/// ray toward the light.
fn shade(
    point: Vec3,
    inputs: &SegmentShading,
    ray: &Ray,
    light_vector: [f32; 4],
    light_intensity: Vec3,
    bvh: &SegmentBvh,
) -> [f32; 3] {
    let (to_light, light_distance) = if light_vector[3] != 0.0 {
        let position = Vec3::new(light_vector[0], light_vector[1], light_vector[2]);
        let delta = position - point;
        (delta.normalize_or_zero(), delta.length())
    } else {
        let direction = Vec3::new(light_vector[0], light_vector[1], light_vector[2]);
        (-direction.normalize_or_zero(), f32::INFINITY)
    };

    let tangent = inputs.tangent;
    let eye = -ray.direction;

    let cos_tl = tangent.dot(to_light).clamp(-1.0, 1.0);
    let sin_tl = (1.0 - cos_tl * cos_tl).max(0.0).sqrt();
    let cos_te = tangent.dot(eye).clamp(-1.0, 1.0);
    let sin_te = (1.0 - cos_te * cos_te).max(0.0).sqrt();

    let diffuse = sin_tl;
    let specular = (cos_tl * cos_te + sin_tl * sin_te)
        .max(0.0)
        .powf(SPECULAR_POWER);

    let shadow_ray = Ray::new(point + to_light * SHADOW_BIAS, to_light);
    let visibility = if bvh.occluded(&shadow_ray, light_distance) {
        0.0
    } else {
        1.0
    };

    let lit = light_intensity * visibility * (diffuse + specular);
    let color = inputs.color * (Vec3::splat(AMBIENT) + lit);
    color.to_array()
}

fn create_framebuffer_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Raytracer Framebuffer"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kajiya_kay_diffuse_peaks_perpendicular_to_the_strand() {
        let inputs = SegmentShading {
            tangent: Vec3::X,
            color: Vec3::ONE,
        };
        let bvh = SegmentBvh::build(Vec::new());
        let eye_ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);

        // Light perpendicular to the tangent: sin(T, L) = 1.
        let perpendicular = shade(
            Vec3::ZERO,
            &inputs,
            &eye_ray,
            [0.0, -1.0, 0.0, 0.0],
            Vec3::ONE,
            &bvh,
        );
        // Light along the tangent: sin(T, L) = 0.
        let parallel = shade(
            Vec3::ZERO,
            &inputs,
            &eye_ray,
            [-1.0, 0.0, 0.0, 0.0],
            Vec3::ONE,
            &bvh,
        );

        assert!(perpendicular[0] > parallel[0]);
        // The parallel case keeps only ambient and grazing specular.
        assert!(parallel[0] >= AMBIENT - 1e-6);
    }

    #[test]
    fn test_occluder_between_point_and_light_kills_direct_light() {
        let blocker = Segment {
            start: Vec3::new(-1.0, 2.0, 0.0),
            end: Vec3::new(1.0, 2.0, 0.0),
            radius: 0.5,
            index: 0,
        };
        let bvh = SegmentBvh::build(vec![blocker]);
        let inputs = SegmentShading {
            tangent: Vec3::X,
            color: Vec3::ONE,
        };
        let eye_ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);

        // Point light directly above, behind the blocker.
        let shadowed = shade(
            Vec3::ZERO,
            &inputs,
            &eye_ray,
            [0.0, 5.0, 0.0, 1.0],
            Vec3::ONE,
            &bvh,
        );
        for channel in shadowed {
            assert!((channel - AMBIENT).abs() < 1e-5);
        }
    }
}
