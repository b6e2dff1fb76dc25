//! Physical device (GPU) selection.
//!
//! Picks a GPU with a graphics queue and, when a surface is supplied, a queue
//! able to present to it plus `VK_KHR_swapchain`. Discrete GPUs win ties.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue families used by the engine. Graphics and present may coincide.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for rendering and one-time transfers.
    pub graphics_family: Option<u32>,
    /// Family used for presentation.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }

    /// Resolve families from raw queue properties.
    ///
    /// A family supporting both graphics and present is preferred so the
    /// swapchain can use exclusive sharing.
    ///
    /// # Arguments
    ///
    /// * `families` - Queue family properties in index order
    /// * `supports_present` - Whether family `i` can present to the target surface
    pub fn from_properties(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();
        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count == 0 {
                continue;
            }
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = supports_present(i);

            if graphics && present {
                return Self {
                    graphics_family: Some(i),
                    present_family: Some(i),
                };
            }
            if graphics && indices.graphics_family.is_none() {
                indices.graphics_family = Some(i);
            }
            if present && indices.present_family.is_none() {
                indices.present_family = Some(i);
            }
        }
        indices
    }
}

/// Properties of the selected GPU needed by the rest of the engine.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties, including name, type and limits.
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory types and heaps.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved graphics and present families.
    pub queue_families: QueueFamilyIndices,
    /// Whether the device was selected for presentation
    pub presentable: bool,
}

impl PhysicalDeviceInfo {
    /// Driver-reported device name.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Minimum offset alignment for uniform buffer descriptors.
    pub fn min_uniform_buffer_offset_alignment(&self) -> vk::DeviceSize {
        self.properties.limits.min_uniform_buffer_offset_alignment
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Select the best GPU.
///
/// With `surface = None` the present family mirrors the graphics family and
/// no swapchain support is required.
///
/// # Arguments
///
/// * `instance` - The Vulkan instance
/// * `surface` - Surface loader and surface the device must present to, if any
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface))
        .max_by_key(rate_device)
        .ok_or(RhiError::NoSuitableGpu)?;

    info!(
        "Selected GPU '{}' ({:?}), min UBO alignment {}",
        best.device_name(),
        best.properties.device_type,
        best.min_uniform_buffer_offset_alignment()
    );
    Ok(best)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let queue_families = match surface {
        Some((loader, surface)) => QueueFamilyIndices::from_properties(&families, |i| unsafe {
            loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        }),
        None => {
            let mut indices = QueueFamilyIndices::from_properties(&families, |_| false);
            indices.present_family = indices.graphics_family;
            indices
        }
    };

    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return None;
    }
    if surface.is_some() && !supports_swapchain(instance, device) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain unsupported", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
        presentable: surface.is_some(),
    })
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == ash::khr::swapchain::NAME
    })
}

fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };
    type_score + info.properties.limits.max_image_dimension2_d / 1024
}
