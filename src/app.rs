//! Application bootstrap: window, GPU device, scene loading, frontend
//! switching and the per-frame control flow.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use crate::raytracer::Raytracer;
use crate::rendering::{Frontend, Rasterizer, Raymarcher, RenderSettings, Renderer};
use crate::scene::SceneGraph;
use crate::ui::{FrameStats, UiSystem};

pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,

    scene: SceneGraph,
    settings: RenderSettings,
    /// Settings the geometry was last prepared with, for change detection.
    applied: RenderSettings,

    rasterizer: Rasterizer,
    raytracer: Raytracer,
    raymarcher: Raymarcher,
    ui: UiSystem,

    mouse_pressed: bool,
    last_cursor: Option<(f64, f64)>,

    frame_count: u32,
    fps: u32,
    fps_timer: std::time::Instant,
}

impl App {
    #[allow(clippy::too_many_arguments)]
    fn new(
        window: Arc<Window>,
        surface: wgpu::Surface<'static>,
        device: wgpu::Device,
        queue: wgpu::Queue,
        config: wgpu::SurfaceConfiguration,
        scene: SceneGraph,
    ) -> Self {
        let settings = RenderSettings::default();
        let ui = UiSystem::new(&device, config.format, &window);

        let mut rasterizer = Rasterizer::new(&device, config.format, config.width, config.height);
        let mut raytracer = Raytracer::new(&device, config.format, config.width, config.height);
        let mut raymarcher = Raymarcher::new(&device, config.format, config.width, config.height);

        let mut scene = scene;
        scene.camera.set_resolution(config.width, config.height);
        scene.traverse_nodes();

        rasterizer.load(&device, &queue, &scene);
        raytracer.load(&device, &queue, &scene);
        raymarcher.load(&device, &queue, &scene);

        Self {
            window,
            surface,
            device,
            queue,
            config,
            scene,
            applied: settings.clone(),
            settings,
            rasterizer,
            raytracer,
            raymarcher,
            ui,
            mouse_pressed: false,
            last_cursor: None,
            frame_count: 0,
            fps: 0,
            fps_timer: std::time::Instant::now(),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn handle_event(&mut self, event: &WindowEvent) -> bool {
        if self.ui.handle_event(&self.window, event) {
            return true;
        }

        match event {
            WindowEvent::CloseRequested => {
                log::info!("close requested");
                return false;
            }
            WindowEvent::Resized(size) if size.width > 0 && size.height > 0 => {
                self.config.width = size.width;
                self.config.height = size.height;
                self.surface.configure(&self.device, &self.config);
                self.scene.camera.set_resolution(size.width, size.height);
                self.rasterizer.resize(&self.device, size.width, size.height);
                self.raytracer.resize(&self.device, size.width, size.height);
                self.raymarcher.resize(&self.device, size.width, size.height);
            }
            WindowEvent::MouseInput {
                button: MouseButton::Left,
                state,
                ..
            } => {
                self.mouse_pressed = *state == ElementState::Pressed && !self.ui.wants_pointer_input();
                if !self.mouse_pressed {
                    self.last_cursor = None;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.mouse_pressed {
                    if let Some((x, y)) = self.last_cursor {
                        let delta = glam::Vec2::new(
                            (position.x - x) as f32,
                            (position.y - y) as f32,
                        ) * 0.005;
                        self.scene.camera.arcball_by(delta);
                    }
                    self.last_cursor = Some((position.x, position.y));
                } else {
                    self.last_cursor = None;
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 * 0.05,
                };
                self.scene.camera.zoom(amount);
            }
            WindowEvent::RedrawRequested => {
                self.render();
            }
            _ => {}
        }
        true
    }

    /// React to UI edits that invalidate prepared geometry.
    fn apply_settings(&mut self) {
        let seed_changed = self.settings.shuffle_seed != self.applied.shuffle_seed;
        let ratio_changed = self.settings.reduction_ratio != self.applied.reduction_ratio;

        if seed_changed || ratio_changed {
            for style in self.scene.hair_styles_mut() {
                if seed_changed {
                    style.shuffle_strands(self.settings.shuffle_seed);
                }
                style.reduce(self.settings.reduction_ratio);
            }
            self.rasterizer.reload_indices(&self.device, &self.scene);
            // The BVH spans exactly the drawn segments.
            self.raytracer.load(&self.device, &self.queue, &self.scene);
            log::info!(
                "reduction: ratio {:.2}, seed {}",
                self.settings.reduction_ratio,
                self.settings.shuffle_seed
            );
        }

        self.applied = self.settings.clone();
    }

    fn render(&mut self) {
        self.apply_settings();
        self.scene.traverse_nodes();

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return;
            }
            Err(error) => {
                log::error!("surface error: {error}");
                return;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        let frontend: &mut dyn Renderer = match self.settings.frontend {
            Frontend::Rasterizer => &mut self.rasterizer,
            Frontend::Raytracer => &mut self.raytracer,
            Frontend::Raymarcher => &mut self.raymarcher,
        };
        frontend.draw(
            &self.device,
            &self.queue,
            &mut encoder,
            &view,
            &self.scene,
            &self.settings,
        );

        let stats = FrameStats {
            strand_count: self.scene.strand_count(),
            memory_usage: self.scene.memory_usage(),
            fps: self.fps,
        };
        self.ui.draw(
            &self.device,
            &self.queue,
            &mut encoder,
            &self.window,
            &view,
            &mut self.settings,
            &stats,
        );

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.frame_count += 1;
        if self.fps_timer.elapsed().as_secs_f32() >= 1.0 {
            self.fps = self.frame_count;
            log::debug!("FPS: {}", self.fps);
            self.frame_count = 0;
            self.fps_timer = std::time::Instant::now();
        }
    }
}

struct AppState {
    app: Option<App>,
    scene_path: PathBuf,
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() {
            return;
        }

        let window_attributes = Window::default_attributes()
            .with_title("strandview")
            .with_inner_size(winit::dpi::PhysicalSize::new(1280, 720));
        let window = Arc::new(event_loop.create_window(window_attributes).unwrap());

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone()).unwrap();

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .unwrap();

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .unwrap();

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let scene = match SceneGraph::load(&self.scene_path) {
            Ok(scene) => scene,
            Err(error) => {
                log::error!("failed to load {}: {error}", self.scene_path.display());
                event_loop.exit();
                return;
            }
        };

        self.app = Some(App::new(window, surface, device, queue, config, scene));
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(app) = &mut self.app else { return };
        if window_id != app.window().id() {
            return;
        }
        if !app.handle_event(&event) {
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(app) = &self.app {
            app.window().request_redraw();
        }
    }
}

pub fn run() {
    env_logger::init();

    let scene_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("scenes/ponytail.json").to_path_buf());

    let event_loop = EventLoop::new().unwrap();
    let mut state = AppState {
        app: None,
        scene_path,
    };
    event_loop.run_app(&mut state).unwrap();
}
