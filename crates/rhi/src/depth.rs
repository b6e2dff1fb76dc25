//! Depth attachments for swapchain framebuffers.
//!
//! Each swapchain image gets its own [`DepthImage`] so frames in flight never
//! share a depth buffer.

use std::sync::{Arc, PoisonError};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate usable as an optimally tiled depth attachment.
///
/// # Errors
///
/// Returns [`RhiError::Configuration`] if the device supports none of
/// [`DEPTH_FORMAT_CANDIDATES`].
pub fn choose_depth_format(instance: &Instance, device: &Device) -> RhiResult<vk::Format> {
    device.find_supported_format(
        instance,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// GPU-only depth image with a view covering its depth aspect.
pub struct DepthImage {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan image handle.
    image: vk::Image,
    /// View over the depth (and stencil) aspect.
    view: vk::ImageView,
    /// GPU memory allocation, taken on drop.
    allocation: Option<Allocation>,
    format: vk::Format,
}

impl DepthImage {
    /// Creates a depth image and its view.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `extent` - Size in pixels, matching the swapchain
    /// * `format` - Depth format from [`choose_depth_format`]
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Configuration`] for a zero extent, or an error if
    /// image, memory or view creation fails.
    pub fn new(device: Arc<Device>, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::Configuration(
                "depth image dimensions must be non-zero".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw = device.handle();
        let image = unsafe { raw.create_image(&image_info, None)? };
        let requirements = unsafe { raw.get_image_memory_requirements(image) };

        let allocation = device
            .allocator()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name: "swapchain_depth",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { raw.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        // From here on Drop owns cleanup.
        let mut depth = Self {
            device: device.clone(),
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
        };

        if let Some(allocation) = depth.allocation.as_ref() {
            unsafe { raw.bind_image_memory(image, allocation.memory(), allocation.offset())? };
        }

        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if has_stencil_component(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(1)
                    .layer_count(1),
            );
        depth.view = unsafe { raw.create_image_view(&view_info, None)? };

        debug!(
            "Depth image created: {}x{} ({:?})",
            extent.width, extent.height, format
        );
        Ok(depth)
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for DepthImage {
    fn drop(&mut self) {
        let raw = self.device.handle();
        unsafe {
            if self.view != vk::ImageView::null() {
                raw.destroy_image_view(self.view, None);
            }
            raw.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self
                .device
                .allocator()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free depth image memory: {}", e);
            }
        }
    }
}
