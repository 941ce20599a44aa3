//! Settings window, drawn with egui on top of whichever frontend rendered
//! the frame.

use egui_wgpu::ScreenDescriptor;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::rendering::{Frontend, RenderSettings, ShadingModel, ShadowTechnique};

/// Read-only per-frame numbers shown in the window.
pub struct FrameStats {
    pub strand_count: u32,
    pub memory_usage: usize,
    pub fps: u32,
}

pub struct UiSystem {
    ctx: egui::Context,
    winit_state: egui_winit::State,
    renderer: egui_wgpu::Renderer,
}

impl UiSystem {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        window: &Window,
    ) -> Self {
        let ctx = egui::Context::default();
        let winit_state = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            window.theme(),
            Some(device.limits().max_texture_dimension_2d as usize),
        );
        let renderer = egui_wgpu::Renderer::new(device, surface_format, None, 1, false);

        Self {
            ctx,
            winit_state,
            renderer,
        }
    }

    /// Returns whether egui consumed the event.
    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    pub fn wants_pointer_input(&self) -> bool {
        self.ctx.wants_pointer_input()
    }

    /// Run the settings UI for this frame and paint it over `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        window: &Window,
        target: &wgpu::TextureView,
        settings: &mut RenderSettings,
        stats: &FrameStats,
    ) {
        let raw_input = self.winit_state.take_egui_input(window);
        self.ctx.begin_pass(raw_input);

        settings_window(&self.ctx, settings, stats);

        let output = self.ctx.end_pass();
        self.winit_state
            .handle_platform_output(window, output.platform_output);

        let paint_jobs = self
            .ctx
            .tessellate(output.shapes, output.pixels_per_point);
        let screen_descriptor = ScreenDescriptor {
            size_in_pixels: [window.inner_size().width, window.inner_size().height],
            pixels_per_point: output.pixels_per_point,
        };

        for (id, delta) in &output.textures_delta.set {
            self.renderer.update_texture(device, queue, *id, delta);
        }
        self.renderer
            .update_buffers(device, queue, encoder, &paint_jobs, &screen_descriptor);

        {
            let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("UI Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let mut pass = pass.forget_lifetime();
            self.renderer
                .render(&mut pass, &paint_jobs, &screen_descriptor);
        }

        for id in &output.textures_delta.free {
            self.renderer.free_texture(id);
        }
    }
}

fn settings_window(ctx: &egui::Context, settings: &mut RenderSettings, stats: &FrameStats) {
    egui::Window::new("Render Settings")
        .default_width(280.0)
        .show(ctx, |ui| {
            ui.label(format!(
                "{} strands, {:.1} MiB, {} fps",
                stats.strand_count,
                stats.memory_usage as f64 / (1024.0 * 1024.0),
                stats.fps
            ));
            ui.separator();

            egui::ComboBox::from_label("Frontend")
                .selected_text(frontend_name(settings.frontend))
                .show_ui(ui, |ui| {
                    for frontend in [
                        Frontend::Rasterizer,
                        Frontend::Raytracer,
                        Frontend::Raymarcher,
                    ] {
                        ui.selectable_value(
                            &mut settings.frontend,
                            frontend,
                            frontend_name(frontend),
                        );
                    }
                });

            egui::ComboBox::from_label("Shading")
                .selected_text(match settings.shading {
                    ShadingModel::KajiyaKay => "Kajiya-Kay",
                    ShadingModel::Tangents => "Tangents",
                })
                .show_ui(ui, |ui| {
                    ui.selectable_value(&mut settings.shading, ShadingModel::KajiyaKay, "Kajiya-Kay");
                    ui.selectable_value(&mut settings.shading, ShadingModel::Tangents, "Tangents");
                });

            ui.separator();
            egui::ComboBox::from_label("Shadows")
                .selected_text(match settings.shadow_technique {
                    ShadowTechnique::Off => "Off",
                    ShadowTechnique::Pcf => "PCF",
                    ShadowTechnique::ApproximateDeepShadows => "Deep Shadows",
                })
                .show_ui(ui, |ui| {
                    ui.selectable_value(&mut settings.shadow_technique, ShadowTechnique::Off, "Off");
                    ui.selectable_value(&mut settings.shadow_technique, ShadowTechnique::Pcf, "PCF");
                    ui.selectable_value(
                        &mut settings.shadow_technique,
                        ShadowTechnique::ApproximateDeepShadows,
                        "Deep Shadows",
                    );
                });
            ui.add(egui::Slider::new(&mut settings.pcf_kernel, 0..=4).text("PCF kernel"));
            ui.add(
                egui::Slider::new(&mut settings.deep_shadow_stride, 1.0..=8.0)
                    .text("Deep shadow stride"),
            );
            ui.add(
                egui::Slider::new(&mut settings.shadow_opacity, 0.0..=1.0).text("Strand opacity"),
            );

            ui.separator();
            ui.add(egui::Slider::new(&mut settings.ao_radius, 0.0..=5.0).text("AO radius"));
            ui.add(egui::Slider::new(&mut settings.ao_strength, 0.0..=1.0).text("AO strength"));

            ui.separator();
            ui.add(
                egui::Slider::new(&mut settings.reduction_ratio, 0.0..=1.0).text("Strand ratio"),
            );
            ui.horizontal(|ui| {
                ui.label("Shuffle seed");
                ui.add(egui::DragValue::new(&mut settings.shuffle_seed));
            });

            ui.separator();
            ui.add(
                egui::Slider::new(&mut settings.raymarch_steps, 16..=512).text("Raymarch steps"),
            );
            ui.add(
                egui::Slider::new(&mut settings.isosurface_threshold, 0.0..=1.0)
                    .text("Isosurface threshold"),
            );
            ui.checkbox(&mut settings.isosurface, "Isosurface view");

            ui.separator();
            ui.horizontal(|ui| {
                ui.label("Background");
                ui.color_edit_button_rgb(&mut settings.background_color);
            });
        });
}

fn frontend_name(frontend: Frontend) -> &'static str {
    match frontend {
        Frontend::Rasterizer => "Rasterizer",
        Frontend::Raytracer => "Raytracer",
        Frontend::Raymarcher => "Raymarcher",
    }
}
