//! Presentation: swapchain images, their attachments and frame synchronization.
//!
//! A [`PresentationSurface`] owns everything tied to one swapchain generation:
//! the images and views, one depth image and framebuffer per image, the shared
//! render pass, and the per-frame semaphores and fences. Recreation builds a
//! new surface that borrows its predecessor's swapchain as `old_swapchain`;
//! the caller drops the predecessor right after.
//!
//! # Overview
//!
//! - [`SurfaceSupport`] is what the physical device reports for the surface
//! - [`SwapchainFormats`] are the color and depth formats a generation was built with
//! - [`SurfaceStatus`] separates "recreate and retry" from real failures
//!
//! Acquire and submit report a stale surface as [`SurfaceStatus::Stale`];
//! every other failure is a fatal [`RhiError`]. Construction reports a surface
//! with no drawable area the same way, so a minimized window never reaches
//! swapchain creation with a zero extent.
//!
//! # Example
//!
//! ```no_run
//! use vge_rhi::swapchain::{PresentationSurface, SurfaceStatus};
//!
//! # fn example(surface: &mut PresentationSurface, cmd: ash::vk::CommandBuffer)
//! #     -> vge_rhi::RhiResult<()> {
//! let frame_index = 0;
//! if let SurfaceStatus::Ready(image_index) = surface.acquire_next_image(frame_index)? {
//!     // Record `cmd` against `surface.framebuffer(image_index)`...
//!     if surface.submit(cmd, frame_index, image_index)? == SurfaceStatus::Stale {
//!         // Rebuild before the next frame.
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::depth::{DepthImage, choose_depth_format};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::render_pass::{Framebuffer, RenderPass};
use crate::sync::{FrameSync, ImageFenceTracker, MAX_FRAMES_IN_FLIGHT, wait_for_fence};

/// Outcome of a presentation call that may find the surface unusable.
#[must_use = "a stale surface must trigger recreation"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus<T> {
    /// The call went through.
    Ready(T),
    /// The swapchain no longer matches the surface, or the surface has no
    /// drawable area yet. Recreate and try again later.
    Stale,
}

/// Attachment formats fixed at swapchain creation.
///
/// Every generation of a window's swapchain must agree on these; pipelines
/// are built against them once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainFormats {
    /// Swapchain image format.
    pub color: vk::Format,
    /// Depth attachment format.
    pub depth: vk::Format,
}

impl SwapchainFormats {
    /// Picks the color format for `support` and pairs it with `depth`.
    ///
    /// Identical surface support always yields identical formats, which is
    /// what lets recreation demand an exact match.
    ///
    /// # Arguments
    ///
    /// * `support` - Surface formats reported by the physical device
    /// * `depth` - Depth format chosen for the device
    ///
    /// # Returns
    ///
    /// The formats and the color space of the chosen surface format.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Configuration`] if the surface reports no formats.
    pub fn select(
        support: &SurfaceSupport,
        depth: vk::Format,
    ) -> RhiResult<(Self, vk::ColorSpaceKHR)> {
        let surface_format = choose_surface_format(&support.formats)?;
        Ok((
            Self {
                color: surface_format.format,
                depth,
            },
            surface_format.color_space,
        ))
    }

    /// Checks that a recreated swapchain kept the same formats.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FormatMismatch`] when either format differs.
    /// Callers treat this as fatal.
    pub fn ensure_matches(&self, new: &SwapchainFormats) -> RhiResult<()> {
        if self == new {
            return Ok(());
        }
        Err(RhiError::FormatMismatch {
            old_color: self.color,
            new_color: new.color,
            old_depth: self.depth,
            new_depth: new.depth,
        })
    }
}

/// Creation options that do not come from the surface itself.
#[derive(Debug, Clone, Copy)]
pub struct PresentationConfig {
    /// Prefer MAILBOX over FIFO
    pub prefer_low_latency: bool,
    /// Fence and acquire timeout, `u64::MAX` for unbounded
    pub fence_timeout_ns: u64,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            prefer_low_latency: true,
            fence_timeout_ns: u64::MAX,
        }
    }
}

/// Surface capabilities, formats and present modes for one physical device.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Extent limits, image count limits and the current transform.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space pairs, in driver order.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries the surface as seen by `physical_device`.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three surface queries fails, including
    /// `VK_ERROR_SURFACE_LOST_KHR`.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Swapchain extent for a window of size `requested`.
    ///
    /// Returns `None` when the result has no area. Some platforms report a
    /// zero current extent while the window is minimized, before the window
    /// system has told the application about it.
    pub fn drawable_extent(&self, requested: vk::Extent2D) -> Option<vk::Extent2D> {
        let extent = choose_extent(&self.capabilities, requested);
        (extent.width > 0 && extent.height > 0).then_some(extent)
    }
}

/// One generation of a window's swapchain and everything sized to it.
///
/// Frame slot `i` owns `imageAvailable[i]`, `renderFinished[i]` and
/// `inFlight[i]`. Each swapchain image additionally remembers which slot last
/// rendered to it, so a slot never writes an image another slot's commands
/// are still reading.
///
/// # Drop Order
///
/// Framebuffers and depth images go first, then the color views and finally
/// the swapchain. The render pass and sync objects follow as fields.
pub struct PresentationSurface {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// `VK_KHR_swapchain` device functions.
    loader: ash::khr::swapchain::Device,
    /// Swapchain handle.
    swapchain: vk::SwapchainKHR,
    /// Images owned by the swapchain.
    images: Vec<vk::Image>,
    /// One color view per image.
    image_views: Vec<vk::ImageView>,
    /// One depth attachment per image.
    depth_images: Vec<DepthImage>,
    /// One framebuffer per image.
    framebuffers: Vec<Framebuffer>,
    /// Color+depth pass shared by every framebuffer.
    render_pass: RenderPass,
    /// Semaphores and fence per frame slot.
    frames: Vec<FrameSync>,
    /// Frame slot guarding each image.
    image_fences: ImageFenceTracker,
    formats: SwapchainFormats,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    /// Applied to fence waits and image acquisition.
    fence_timeout_ns: u64,
}

impl PresentationSurface {
    /// Builds a swapchain for `surface` sized to `window_extent`.
    ///
    /// When `previous` is given its swapchain is handed to the driver for
    /// reuse and retired. The caller releases `previous` as soon as this
    /// returns and must have waited for the device to go idle beforehand.
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the surface was created from
    /// * `device` - Logical device with `VK_KHR_swapchain` enabled
    /// * `surface_loader` - Surface extension functions
    /// * `surface` - Window surface to present to
    /// * `window_extent` - Window size in pixels, used when the surface leaves the size open
    /// * `config` - Present mode preference and fence timeout
    /// * `previous` - Swapchain generation being replaced, if any
    ///
    /// # Returns
    ///
    /// [`SurfaceStatus::Stale`] without creating anything when the surface
    /// currently has no drawable area. `previous` stays valid in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries fail, if no depth format is
    /// usable, or if any Vulkan object cannot be created.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        config: PresentationConfig,
        previous: Option<&PresentationSurface>,
    ) -> RhiResult<SurfaceStatus<Self>> {
        let support = SurfaceSupport::query(device.physical_device(), surface, surface_loader)?;
        let Some(extent) = support.drawable_extent(window_extent) else {
            debug!(
                "Surface extent {:?} has no area, not creating a swapchain",
                support.capabilities.current_extent
            );
            return Ok(SurfaceStatus::Stale);
        };
        let depth_format = choose_depth_format(instance, &device)?;
        let (formats, color_space) = SwapchainFormats::select(&support, depth_format)?;
        let present_mode = choose_present_mode(&support.present_modes, config.prefer_low_latency);
        let min_image_count = determine_image_count(&support.capabilities);

        let queue_families = device.queue_families();
        let family_indices: Vec<u32> = queue_families.unique_families();
        let sharing_mode = if family_indices.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let shared_families: &[u32] = if family_indices.len() > 1 {
            &family_indices
        } else {
            &[]
        };

        let old_swapchain = previous.map_or(vk::SwapchainKHR::null(), |p| p.swapchain);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(formats.color)
            .image_color_space(color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };

        let render_pass = match RenderPass::new(device.clone(), formats.color, formats.depth) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        let mut presentation = Self {
            device: device.clone(),
            loader,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            depth_images: Vec::new(),
            framebuffers: Vec::new(),
            render_pass,
            frames: Vec::new(),
            image_fences: ImageFenceTracker::new(0, MAX_FRAMES_IN_FLIGHT),
            formats,
            extent,
            present_mode,
            fence_timeout_ns: config.fence_timeout_ns,
        };
        presentation.create_attachments()?;
        presentation.frames = FrameSync::create_all(&device)?;
        presentation.image_fences =
            ImageFenceTracker::new(presentation.images.len(), MAX_FRAMES_IN_FLIGHT);

        info!(
            "Swapchain ready: {}x{}, {:?}/{:?}, depth {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            formats.color,
            color_space,
            formats.depth,
            present_mode,
            presentation.images.len()
        );
        Ok(SurfaceStatus::Ready(presentation))
    }

    /// Color views, then one depth image and framebuffer per swapchain image.
    fn create_attachments(&mut self) -> RhiResult<()> {
        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain)? };
        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.formats.color)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe { self.device.handle().create_image_view(&view_info, None)? };
            self.image_views.push(view);
        }

        for &view in &self.image_views {
            let depth = DepthImage::new(self.device.clone(), self.extent, self.formats.depth)?;
            let framebuffer = self
                .render_pass
                .create_framebuffer(view, depth.view(), self.extent)?;
            self.depth_images.push(depth);
            self.framebuffers.push(framebuffer);
        }
        debug!(
            "Created {} color views, depth images and framebuffers",
            self.images.len()
        );
        Ok(())
    }

    /// Waits for `frame_index`'s previous submission, then acquires the next image.
    ///
    /// A suboptimal acquire still yields an image; the submit that follows
    /// reports the surface as stale.
    ///
    /// # Arguments
    ///
    /// * `frame_index` - Frame slot whose fence and `imageAvailable` semaphore are used
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] if the slot's fence or the acquire
    /// does not complete within the configured timeout, and any other Vulkan
    /// error except `VK_ERROR_OUT_OF_DATE_KHR`.
    pub fn acquire_next_image(&self, frame_index: usize) -> RhiResult<SurfaceStatus<u32>> {
        let sync = &self.frames[frame_index];
        sync.in_flight().wait(self.fence_timeout_ns)?;

        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                self.fence_timeout_ns,
                sync.image_available(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, _suboptimal)) => Ok(SurfaceStatus::Ready(image_index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date on acquire");
                Ok(SurfaceStatus::Stale)
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::FenceTimeout {
                timeout_ns: self.fence_timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Submits `command_buffer` for `image_index` and queues it for presentation.
    ///
    /// Waits first if another frame slot is still rendering to the same image.
    /// The submission signals `frame_index`'s fence and `renderFinished`
    /// semaphore; presentation waits on the semaphore.
    ///
    /// # Arguments
    ///
    /// * `command_buffer` - Fully recorded commands for this frame
    /// * `frame_index` - Frame slot that acquired `image_index`
    /// * `image_index` - Image returned by [`acquire_next_image`](Self::acquire_next_image)
    ///
    /// # Returns
    ///
    /// [`SurfaceStatus::Stale`] when presentation found the swapchain out of
    /// date or suboptimal. The work was still submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting, submission or presentation fails for any
    /// other reason.
    pub fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        frame_index: usize,
        image_index: u32,
    ) -> RhiResult<SurfaceStatus<()>> {
        let raw = self.device.handle();
        let image = image_index as usize;

        if let Some(owner) = self.image_fences.guard(image) {
            wait_for_fence(
                raw,
                self.frames[owner].in_flight().handle(),
                self.fence_timeout_ns,
            )?;
        }
        self.image_fences.assign(image, frame_index);

        let sync = &self.frames[frame_index];
        let wait_semaphores = [sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [sync.render_finished()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        sync.in_flight().reset()?;
        unsafe {
            raw.queue_submit(
                self.device.graphics_queue(),
                &[submit_info],
                sync.in_flight().handle(),
            )?;
        }

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe {
            self.loader
                .queue_present(self.device.present_queue(), &present_info)
        } {
            Ok(false) => Ok(SurfaceStatus::Ready(())),
            Ok(true) => {
                debug!("Swapchain suboptimal on present");
                Ok(SurfaceStatus::Stale)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date on present");
                Ok(SurfaceStatus::Stale)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Color and depth formats of this generation.
    #[inline]
    pub fn formats(&self) -> SwapchainFormats {
        self.formats
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Width over height, safe for a zero height.
    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Framebuffer bound to swapchain image `image_index`.
    #[inline]
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize].handle()
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        self.framebuffers.clear();
        self.depth_images.clear();
        unsafe {
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        debug!(
            "Swapchain destroyed ({}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Prefer B8G8R8A8_SRGB in the sRGB non-linear color space, else the first listed format.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let first = formats.first().ok_or_else(|| {
        RhiError::Configuration("surface reports no supported formats".to_string())
    })?;

    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    match preferred {
        Some(&format) => Ok(format),
        None => {
            warn!(
                "Preferred surface format unavailable, using {:?}/{:?}",
                first.format, first.color_space
            );
            Ok(*first)
        }
    }
}

/// MAILBOX when allowed and available, otherwise FIFO, which every surface supports.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_low_latency: bool,
) -> vk::PresentModeKHR {
    if prefer_low_latency && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent if it reports one, else `requested` clamped to its limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_requires_color_space_match() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        let selected = choose_surface_format(&formats).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_empty_is_configuration_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RhiError::Configuration(_))
        ));
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1920, 1080),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(2000, 2000),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(3000, 50)), extent(2000, 100));
        assert_eq!(choose_extent(&capabilities, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded), 3);
    }

    fn support(current_extent: vk::Extent2D, formats: Vec<vk::SurfaceFormatKHR>) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                current_extent,
                min_image_extent: extent(1, 1),
                max_image_extent: extent(4096, 4096),
                min_image_count: 2,
                ..Default::default()
            },
            formats,
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn test_identical_support_selects_matching_formats() {
        let listed = vec![
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let first = support(extent(800, 600), listed.clone());
        // Only the extent differs, as after a resize.
        let second = support(extent(1024, 768), listed);

        let (old, old_space) = SwapchainFormats::select(&first, vk::Format::D32_SFLOAT).unwrap();
        let (new, new_space) = SwapchainFormats::select(&second, vk::Format::D32_SFLOAT).unwrap();

        assert_eq!(old.color, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(old_space, new_space);
        assert!(old.ensure_matches(&new).is_ok());
    }

    #[test]
    fn test_changed_support_fails_format_check() {
        let before = support(
            extent(800, 600),
            vec![surface_format(vk::Format::B8G8R8A8_SRGB)],
        );
        let after = support(
            extent(800, 600),
            vec![surface_format(vk::Format::R8G8B8A8_UNORM)],
        );

        let (old, _) = SwapchainFormats::select(&before, vk::Format::D32_SFLOAT).unwrap();
        let (new, _) = SwapchainFormats::select(&after, vk::Format::D32_SFLOAT).unwrap();
        assert!(matches!(
            old.ensure_matches(&new),
            Err(RhiError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_minimized_surface_has_no_drawable_extent() {
        let formats = vec![surface_format(vk::Format::B8G8R8A8_SRGB)];
        let minimized = support(extent(0, 0), formats.clone());
        assert_eq!(minimized.drawable_extent(extent(800, 600)), None);

        let collapsed = support(extent(1280, 0), formats.clone());
        assert_eq!(collapsed.drawable_extent(extent(800, 600)), None);

        let visible = support(extent(800, 600), formats);
        assert_eq!(
            visible.drawable_extent(extent(800, 600)),
            Some(extent(800, 600))
        );
    }

    #[test]
    fn test_open_surface_extent_uses_window_size() {
        let open = support(
            extent(u32::MAX, u32::MAX),
            vec![surface_format(vk::Format::B8G8R8A8_SRGB)],
        );
        assert_eq!(open.drawable_extent(extent(640, 480)), Some(extent(640, 480)));
    }

    #[test]
    fn test_format_mismatch_is_fatal() {
        let old = SwapchainFormats {
            color: vk::Format::B8G8R8A8_SRGB,
            depth: vk::Format::D32_SFLOAT,
        };
        let new = SwapchainFormats {
            depth: vk::Format::D24_UNORM_S8_UINT,
            ..old
        };
        match old.ensure_matches(&new) {
            Err(RhiError::FormatMismatch {
                old_depth,
                new_depth,
                ..
            }) => {
                assert_eq!(old_depth, vk::Format::D32_SFLOAT);
                assert_eq!(new_depth, vk::Format::D24_UNORM_S8_UINT);
            }
            other => panic!("expected FormatMismatch, got {other:?}"),
        }
    }
}
