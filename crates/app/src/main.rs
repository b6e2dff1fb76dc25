//! vge - Main Entry Point
//!
//! Opens a window, brings up the Vulkan presentation core and drives the
//! frame loop: per-frame uniform data is written into its buffer slot and the
//! swapchain render pass clears every image.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{error, info, trace};
use winit::application::ApplicationHandler;
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::window::WindowId;

use vge_core::{Config, FrameTimer};
use vge_platform::{EventLoop, Window, WindowEvent};
use vge_renderer::{GlobalUbo, MAX_FRAMES_IN_FLIGHT, PointLight, Renderer, VulkanBackend};
use vge_rhi::buffer::{Buffer, BufferUsage};
use vge_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};

const CONFIG_PATH: &str = "vge.toml";

/// Per-frame uniform buffer and the descriptor sets pointing into it.
struct FrameGlobals {
    sets: Vec<vk::DescriptorSet>,
    // Sets are returned with the pool; the pool goes before its layout.
    pool: DescriptorPool,
    layout: DescriptorSetLayout,
    ubo_buffer: Buffer,
}

impl FrameGlobals {
    fn new(backend: &VulkanBackend) -> Result<Self> {
        let device = backend.device().clone();
        let frames = MAX_FRAMES_IN_FLIGHT as u32;

        let ubo_buffer = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            GlobalUbo::SIZE as vk::DeviceSize,
            frames,
            device.limits().min_uniform_buffer_offset_alignment,
        )?;

        let layout = DescriptorSetLayout::builder()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::ALL_GRAPHICS,
                1,
            )
            .build(device.clone())?;

        let pool = DescriptorPool::builder()
            .max_sets(frames)
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, frames)
            .build(device)?;

        let sets = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|frame| {
                DescriptorWriter::new(&layout, &pool)
                    .write_buffer(0, ubo_buffer.descriptor_info_for_index(frame))
                    .build()?
                    .context("global descriptor pool exhausted")
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sets,
            pool,
            layout,
            ubo_buffer,
        })
    }
}

/// Everything that exists while the window does.
struct AppState {
    // Drop order: GPU resources, then the renderer and its device, then the window.
    globals: FrameGlobals,
    renderer: Renderer<VulkanBackend>,
    window: Window,
}

impl AppState {
    fn new(event_loop: &ActiveEventLoop, config: &Config) -> Result<Self> {
        let window = Window::new(event_loop, &config.window)?;
        let backend = VulkanBackend::new(&window, &config.renderer)?;
        let globals = FrameGlobals::new(&backend)?;
        let renderer = Renderer::new(backend, config.renderer.clear_color)?;

        info!(
            "Global layout {:?} with {} sets, {} sets left in pool",
            globals.layout.handle(),
            globals.sets.len(),
            globals.pool.remaining_sets()
        );
        Ok(Self {
            globals,
            renderer,
            window,
        })
    }

    fn draw_frame(&mut self, frame_time: f32, elapsed: f32) -> Result<()> {
        // None means the swapchain was rebuilt or the window is minimized.
        let Some(cmd) = self.renderer.begin_frame(&mut self.window)? else {
            return Ok(());
        };
        let context = self
            .renderer
            .frame_context(frame_time, self.globals.sets[self.renderer.frame_index()]);

        let projection = Mat4::perspective_rh(
            50f32.to_radians(),
            self.renderer.aspect_ratio(),
            0.1,
            100.0,
        );
        let view = Mat4::look_at_rh(Vec3::new(0.0, -1.5, -4.0), Vec3::ZERO, Vec3::NEG_Y);
        let mut ubo = GlobalUbo::new(projection, view);
        ubo.push_light(PointLight::new(
            Vec3::new(elapsed.cos() * 2.0, -1.0, elapsed.sin() * 2.0),
            Vec3::new(1.0, 0.9, 0.8),
            0.5,
        ));

        let buffer = &mut self.globals.ubo_buffer;
        buffer.write_to_index(&ubo, context.frame_index)?;
        buffer.flush_index(context.frame_index)?;

        trace!(
            frame_index = context.frame_index,
            image_index = context.image_index,
            frame_time = context.frame_time,
            "Recording frame"
        );
        self.renderer.begin_render_pass(cmd);
        self.renderer.end_render_pass(cmd);
        self.renderer.end_frame(&mut self.window)?;
        Ok(())
    }
}

struct App {
    config: Config,
    state: Option<AppState>,
    timer: FrameTimer,
    /// First fatal error; reported by `main` once the loop exits.
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
            timer: FrameTimer::new(),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match AppState::new(event_loop, &self.config) {
            Ok(state) => {
                info!("Initialization complete, entering main loop");
                self.timer.reset();
                self.state = Some(state);
            }
            Err(e) => self.fail(event_loop, e.context("initialization failed")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = self.state.as_mut() {
                    state.window.handle_resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let frame_time = self.timer.tick();
                let elapsed = self.timer.elapsed().as_secs_f32();
                let result = match self.state.as_mut() {
                    Some(state) => state.draw_frame(frame_time, elapsed),
                    None => Ok(()),
                };
                if let Err(e) = result {
                    self.fail(event_loop, e.context("frame failed"));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.as_ref() {
            state.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = self.state.take() {
            if let Err(e) = state.renderer.wait_idle() {
                error!("Failed to wait for device idle on exit: {e}");
            }
            info!(
                "Rendered {} frames, {:.1} fps average",
                self.timer.frame_count(),
                self.timer.average_fps()
            );
        }
    }
}

fn main() -> Result<()> {
    vge_core::init_logging();
    info!("Starting vge");

    let config = Config::load(CONFIG_PATH)
        .with_context(|| format!("failed to load {CONFIG_PATH}"))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
