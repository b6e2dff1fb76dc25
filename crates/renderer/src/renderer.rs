//! Frame scheduler.
//!
//! [`Renderer`] drives one frame at a time through
//! `Idle -> Recording -> RenderPassActive -> Recording -> Idle` and decides
//! when the swapchain is rebuilt. It owns one command buffer per frame in
//! flight; everything else lives behind the [`PresentationBackend`].
//!
//! # Example
//!
//! ```no_run
//! use vge_platform::Window;
//! use vge_renderer::{PresentationBackend, Renderer};
//!
//! # fn example<B: PresentationBackend>(
//! #     renderer: &mut Renderer<B>,
//! #     window: &mut Window,
//! # ) -> Result<(), vge_rhi::RhiError> {
//! // A stale swapchain yields no command buffer; skip this tick.
//! if let Some(cmd) = renderer.begin_frame(window)? {
//!     renderer.begin_render_pass(cmd);
//!     // Record draws...
//!     renderer.end_render_pass(cmd);
//!     renderer.end_frame(window)?;
//! }
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, error, info};

use vge_platform::SurfaceExtent;
use vge_rhi::RhiResult;
use vge_rhi::swapchain::SurfaceStatus;
use vge_rhi::sync::MAX_FRAMES_IN_FLIGHT;

use crate::backend::PresentationBackend;
use crate::frame::{FrameContext, FramePhase};

/// Orchestrates acquire, record, submit and present for a window.
///
/// # Contract
///
/// Calls must follow `begin_frame`, optionally a `begin_render_pass` /
/// `end_render_pass` pair, then `end_frame`. Out-of-order calls and command
/// buffers that do not belong to the open frame are programming errors and
/// panic.
pub struct Renderer<B: PresentationBackend> {
    backend: B,
    /// One per frame in flight, indexed by `frame_index`.
    command_buffers: Vec<vk::CommandBuffer>,
    frame_index: usize,
    image_index: u32,
    phase: FramePhase,
    /// A recreation was requested while the window had no drawable area.
    recreate_pending: bool,
    clear_color: [f32; 4],
}

impl<B: PresentationBackend> Renderer<B> {
    /// Take ownership of `backend` and allocate the per-frame command buffers.
    ///
    /// # Arguments
    ///
    /// * `backend` - Presentation backend with a ready swapchain
    /// * `clear_color` - RGBA color the render pass clears to
    ///
    /// # Errors
    ///
    /// Returns an error if the command buffers cannot be allocated.
    pub fn new(backend: B, clear_color: [f32; 4]) -> RhiResult<Self> {
        let command_buffers = backend.allocate_command_buffers(MAX_FRAMES_IN_FLIGHT)?;
        info!(
            "Renderer ready: {} frames in flight, {} swapchain images",
            MAX_FRAMES_IN_FLIGHT,
            backend.image_count()
        );
        Ok(Self {
            backend,
            command_buffers,
            frame_index: 0,
            image_index: 0,
            phase: FramePhase::Idle,
            recreate_pending: false,
            clear_color,
        })
    }

    /// Acquire the next swapchain image and start recording.
    ///
    /// Returns `None` when there is nothing to render this tick: the swapchain
    /// was stale and has been rebuilt, or the window has no drawable area.
    /// The caller skips all per-frame work and tries again next tick.
    ///
    /// # Panics
    ///
    /// If a frame is already in progress.
    ///
    /// # Errors
    ///
    /// Device errors, fence timeouts and format changes across recreation.
    pub fn begin_frame<W: SurfaceExtent>(
        &mut self,
        window: &mut W,
    ) -> RhiResult<Option<vk::CommandBuffer>> {
        assert!(
            !self.phase.is_in_progress(),
            "can't call begin_frame while a frame is already in progress"
        );

        if self.recreate_pending && !self.recreate_presentation(window)? {
            return Ok(None);
        }

        let image_index = match self.backend.acquire_next_image(self.frame_index)? {
            SurfaceStatus::Ready(image_index) => image_index,
            SurfaceStatus::Stale => {
                self.recreate_presentation(window)?;
                return Ok(None);
            }
        };

        let command_buffer = self.command_buffers[self.frame_index];
        self.backend.begin_commands(command_buffer)?;
        self.image_index = image_index;
        self.phase = FramePhase::Recording;
        Ok(Some(command_buffer))
    }

    /// Finish recording, submit and present.
    ///
    /// Recreation triggered by a stale surface or a window resize happens
    /// after submission, so the frame is not lost. The frame index advances
    /// whether or not the swapchain was rebuilt.
    ///
    /// # Panics
    ///
    /// If no frame is open or its render pass is still active.
    ///
    /// # Errors
    ///
    /// Submission failures, and the same recreation failures as
    /// [`begin_frame`](Self::begin_frame).
    pub fn end_frame<W: SurfaceExtent>(&mut self, window: &mut W) -> RhiResult<()> {
        assert!(
            self.phase == FramePhase::Recording,
            "can't call end_frame while frame is in phase {:?}",
            self.phase
        );

        let frame_index = self.frame_index;
        let command_buffer = self.command_buffers[frame_index];
        self.phase = FramePhase::Idle;
        self.frame_index = (frame_index + 1) % MAX_FRAMES_IN_FLIGHT;

        self.backend.end_commands(command_buffer)?;
        let status = self
            .backend
            .submit(command_buffer, frame_index, self.image_index)?;

        if status == SurfaceStatus::Stale || window.was_resized() || self.recreate_pending {
            self.recreate_presentation(window)?;
        }
        Ok(())
    }

    /// Open the swapchain render pass and cover the current extent with the
    /// viewport and scissor.
    ///
    /// # Panics
    ///
    /// If no frame is recording or `command_buffer` is not the open frame's.
    pub fn begin_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        assert!(
            self.phase == FramePhase::Recording,
            "can't begin render pass while frame is in phase {:?}",
            self.phase
        );
        assert_eq!(
            command_buffer, self.command_buffers[self.frame_index],
            "can't begin render pass on a command buffer from a different frame"
        );

        let extent = self.backend.extent();
        self.backend
            .begin_render_pass(command_buffer, self.image_index, self.clear_color);
        self.backend.set_viewport_and_scissor(command_buffer, extent);
        self.phase = FramePhase::RenderPassActive;
    }

    /// # Panics
    ///
    /// If the render pass is not open or `command_buffer` is not the open frame's.
    pub fn end_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        assert!(
            self.phase == FramePhase::RenderPassActive,
            "can't end render pass while frame is in phase {:?}",
            self.phase
        );
        assert_eq!(
            command_buffer, self.command_buffers[self.frame_index],
            "can't end render pass on a command buffer from a different frame"
        );

        self.backend.end_render_pass(command_buffer);
        self.phase = FramePhase::Recording;
    }

    /// Rebuild the swapchain for the window's current extent.
    ///
    /// Returns false and leaves the request pending while either the window
    /// or the surface reports no drawable area. Formats must survive
    /// recreation unchanged.
    fn recreate_presentation<W: SurfaceExtent>(&mut self, window: &mut W) -> RhiResult<bool> {
        window.reset_resized();
        let extent = window.extent();
        if window.is_degenerate() {
            if !self.recreate_pending {
                debug!(
                    "Window extent {}x{} has no area, deferring swapchain recreation",
                    extent.width, extent.height
                );
            }
            self.recreate_pending = true;
            return Ok(false);
        }

        self.backend.wait_idle()?;
        let old_formats = self.backend.formats();
        let old_image_count = self.backend.image_count();

        if self.backend.recreate(extent)? == SurfaceStatus::Stale {
            if !self.recreate_pending {
                debug!("Surface has no drawable area, deferring swapchain recreation");
            }
            self.recreate_pending = true;
            return Ok(false);
        }
        old_formats.ensure_matches(&self.backend.formats())?;

        if self.backend.image_count() != old_image_count {
            debug!(
                "Swapchain image count changed {} -> {}, reallocating command buffers",
                old_image_count,
                self.backend.image_count()
            );
            self.backend.free_command_buffers(&self.command_buffers);
            self.command_buffers = self
                .backend
                .allocate_command_buffers(MAX_FRAMES_IN_FLIGHT)?;
        }

        self.recreate_pending = false;
        info!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Slot of the open frame, for indexing per-frame resources.
    ///
    /// # Panics
    ///
    /// If no frame is in progress.
    pub fn frame_index(&self) -> usize {
        assert!(
            self.phase.is_in_progress(),
            "can't get frame index when frame not in progress"
        );
        self.frame_index
    }

    /// Swapchain image acquired by the open frame.
    ///
    /// # Panics
    ///
    /// If no frame is in progress.
    pub fn image_index(&self) -> u32 {
        assert!(
            self.phase.is_in_progress(),
            "can't get image index when frame not in progress"
        );
        self.image_index
    }

    /// # Panics
    ///
    /// If no frame is in progress.
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        assert!(
            self.phase.is_in_progress(),
            "can't get command buffer when frame not in progress"
        );
        self.command_buffers[self.frame_index]
    }

    /// Bundle the open frame's handles for render systems.
    ///
    /// # Arguments
    ///
    /// * `frame_time` - Seconds since the previous frame
    /// * `descriptor_set` - Global set for this frame slot
    ///
    /// # Panics
    ///
    /// If no frame is in progress.
    pub fn frame_context(&self, frame_time: f32, descriptor_set: vk::DescriptorSet) -> FrameContext {
        FrameContext {
            frame_index: self.frame_index(),
            image_index: self.image_index,
            frame_time,
            command_buffer: self.current_command_buffer(),
            descriptor_set,
        }
    }

    #[inline]
    pub fn is_frame_in_progress(&self) -> bool {
        self.phase.is_in_progress()
    }

    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Extent of the current swapchain, which may lag the window while
    /// recreation is deferred.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.backend.extent()
    }

    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.backend.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.backend.render_pass()
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        self.clear_color = clear_color;
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Block until the GPU has finished all submitted frames.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.backend.wait_idle()
    }
}

impl<B: PresentationBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            error!("Failed to wait for device idle during renderer cleanup: {e}");
        }
        self.backend.free_command_buffers(&self.command_buffers);
        debug!("Renderer destroyed");
    }
}
