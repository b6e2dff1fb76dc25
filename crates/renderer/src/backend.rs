//! The GPU side of the frame scheduler.
//!
//! [`Renderer`](crate::Renderer) owns the frame state machine and talks to
//! the GPU only through [`PresentationBackend`]. [`VulkanBackend`] is the real
//! implementation; tests drive the scheduler with a recording mock.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use vge_core::RendererConfig;
use vge_platform::{Surface, SurfaceExtent, Window};
use vge_rhi::command::CommandPool;
use vge_rhi::device::Device;
use vge_rhi::instance::Instance;
use vge_rhi::physical_device::select_physical_device;
use vge_rhi::swapchain::{PresentationConfig, PresentationSurface, SurfaceStatus, SwapchainFormats};
use vge_rhi::{RhiError, RhiResult};

/// Swapchain, queues and command recording as seen by the frame scheduler.
///
/// Implementations own the swapchain and everything sized to it. The
/// scheduler only decides *when* to acquire, submit and recreate; recoverable
/// surface conditions come back as [`SurfaceStatus::Stale`] and everything
/// else is an error that ends the render loop.
pub trait PresentationBackend {
    /// Extent of the current swapchain.
    fn extent(&self) -> vk::Extent2D;

    /// Number of images in the current swapchain.
    fn image_count(&self) -> usize;

    /// Attachment formats of the current swapchain.
    fn formats(&self) -> SwapchainFormats;

    fn render_pass(&self) -> vk::RenderPass;

    /// Waits for `frame_index`'s fence, then acquires an image.
    ///
    /// # Errors
    ///
    /// Any failure other than an out-of-date swapchain.
    fn acquire_next_image(&mut self, frame_index: usize) -> RhiResult<SurfaceStatus<u32>>;

    /// Submits `command_buffer` and presents `image_index`.
    ///
    /// `Stale` means the frame was submitted but the swapchain needs rebuilding.
    fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        frame_index: usize,
        image_index: u32,
    ) -> RhiResult<SurfaceStatus<()>>;

    /// Replaces the swapchain with one sized to `extent`. The device is idle.
    ///
    /// # Returns
    ///
    /// `Stale` when the surface itself has no drawable area yet, for example
    /// while the window is minimized. The old swapchain is kept and the
    /// caller tries again later.
    ///
    /// # Errors
    ///
    /// Any failure creating the replacement.
    fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<SurfaceStatus<()>>;

    /// Blocks until every submitted frame has finished.
    fn wait_idle(&self) -> RhiResult<()>;

    /// Allocates `count` primary command buffers.
    fn allocate_command_buffers(&self, count: usize) -> RhiResult<Vec<vk::CommandBuffer>>;

    /// Returns buffers that are no longer pending execution.
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);

    /// Resets `command_buffer` and begins recording.
    fn begin_commands(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn end_commands(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Begin the swapchain render pass on `image_index`'s framebuffer,
    /// clearing color to `clear_color` and depth to 1.0.
    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        clear_color: [f32; 4],
    );

    /// Dynamic viewport and scissor covering `extent`.
    fn set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer);
}

/// Vulkan instance, device, surface and swapchain for one window.
///
/// # Drop Order
///
/// Fields drop in declaration order: swapchain, command pool, surface,
/// device, instance. Each of them must be gone before the next one.
pub struct VulkanBackend {
    /// Current swapchain generation.
    presentation: PresentationSurface,
    /// Pool for the scheduler's per-frame command buffers.
    command_pool: CommandPool,
    /// Reused for every recreation.
    config: PresentationConfig,
    /// Window surface.
    surface: Surface,
    /// Logical device, also shared with application resources.
    device: Arc<Device>,
    /// Vulkan instance.
    instance: Instance,
}

impl VulkanBackend {
    /// Brings up Vulkan for `window` and builds its first swapchain.
    ///
    /// # Arguments
    ///
    /// * `window` - Window to present to; its current size sizes the swapchain
    /// * `config` - Validation, present mode and fence timeout settings
    ///
    /// # Errors
    ///
    /// Fails when no GPU can present to the window's surface, when the
    /// surface has no drawable area at startup, or when any Vulkan object
    /// cannot be created.
    pub fn new(window: &Window, config: &RendererConfig) -> RhiResult<Self> {
        let display = window
            .raw_display_handle()
            .map_err(|e| RhiError::Surface(e.to_string()))?;
        let instance = Instance::new(c"vge", config.validation, display)?;
        let surface = window.create_surface(&instance)?;

        let gpu = select_physical_device(
            instance.handle(),
            Some((surface.loader(), surface.handle())),
        )?;
        let device = Device::new(&instance, &gpu)?;
        let graphics_family = gpu
            .queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let presentation_config = PresentationConfig {
            prefer_low_latency: config.prefer_low_latency,
            fence_timeout_ns: config.fence_timeout_ns(),
        };
        let presentation = PresentationSurface::new(
            &instance,
            device.clone(),
            surface.loader(),
            surface.handle(),
            window.extent(),
            presentation_config,
            None,
        )?;
        let SurfaceStatus::Ready(presentation) = presentation else {
            return Err(RhiError::Surface(
                "window surface has no drawable area at startup".to_string(),
            ));
        };

        info!("Vulkan backend ready on '{}'", gpu.device_name());
        Ok(Self {
            presentation,
            command_pool,
            config: presentation_config,
            surface,
            device,
            instance,
        })
    }

    /// Logical device, for creating resources outside the scheduler.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn presentation(&self) -> &PresentationSurface {
        &self.presentation
    }
}

impl PresentationBackend for VulkanBackend {
    fn extent(&self) -> vk::Extent2D {
        self.presentation.extent()
    }

    fn image_count(&self) -> usize {
        self.presentation.image_count()
    }

    fn formats(&self) -> SwapchainFormats {
        self.presentation.formats()
    }

    fn render_pass(&self) -> vk::RenderPass {
        self.presentation.render_pass()
    }

    fn acquire_next_image(&mut self, frame_index: usize) -> RhiResult<SurfaceStatus<u32>> {
        self.presentation.acquire_next_image(frame_index)
    }

    fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        frame_index: usize,
        image_index: u32,
    ) -> RhiResult<SurfaceStatus<()>> {
        self.presentation
            .submit(command_buffer, frame_index, image_index)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<SurfaceStatus<()>> {
        let replacement = PresentationSurface::new(
            &self.instance,
            self.device.clone(),
            self.surface.loader(),
            self.surface.handle(),
            extent,
            self.config,
            Some(&self.presentation),
        )?;
        let SurfaceStatus::Ready(replacement) = replacement else {
            return Ok(SurfaceStatus::Stale);
        };
        // Assigning drops the retired swapchain.
        self.presentation = replacement;
        debug!(
            "Presentation surface recreated at {}x{}",
            extent.width, extent.height
        );
        Ok(SurfaceStatus::Ready(()))
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    fn allocate_command_buffers(&self, count: usize) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.command_pool.allocate_command_buffers(count as u32)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        self.command_pool.free_command_buffers(command_buffers);
    }

    fn begin_commands(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.command_pool.begin(command_buffer)
    }

    fn end_commands(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.command_pool.end(command_buffer)
    }

    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        clear_color: [f32; 4],
    ) {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.presentation.render_pass())
            .framebuffer(self.presentation.framebuffer(image_index))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.presentation.extent(),
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.handle().cmd_begin_render_pass(
                command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let device = self.device.handle();
        unsafe {
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.handle().cmd_end_render_pass(command_buffer) };
    }
}
