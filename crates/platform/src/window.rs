//! Window management using winit, and the Vulkan surface bound to it.
//!
//! [`Window`] tracks its drawable size from resize events instead of asking
//! winit every frame, and remembers that a resize happened until the frame
//! scheduler has dealt with it.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use vge_core::{Error, Result, WindowConfig};
use vge_rhi::instance::Instance;
use vge_rhi::{RhiError, RhiResult};

/// What the frame scheduler needs to know about the drawable area.
pub trait SurfaceExtent {
    /// Current drawable size in pixels. Either side may be 0 while minimized.
    fn extent(&self) -> vk::Extent2D;

    /// True once the size has changed since the last [`SurfaceExtent::reset_resized`].
    fn was_resized(&self) -> bool;

    /// Clears the resized flag once the swapchain has been rebuilt.
    fn reset_resized(&mut self);

    /// No drawable area; nothing can be presented.
    fn is_degenerate(&self) -> bool {
        let extent = self.extent();
        extent.width == 0 || extent.height == 0
    }
}

/// `VkSurfaceKHR` destroyed on drop. Must be dropped before its instance.
pub struct Surface {
    /// Vulkan surface handle.
    handle: vk::SurfaceKHR,
    /// Surface extension functions, also used for capability queries.
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance as the loader.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Application window.
///
/// Wraps a winit window together with the last size the event loop reported.
pub struct Window {
    /// The underlying winit window.
    window: Arc<WinitWindow>,
    /// Last reported drawable size in physical pixels.
    extent: vk::Extent2D,
    /// Set by [`handle_resize`](Self::handle_resize), cleared by the scheduler.
    resized: bool,
}

impl Window {
    /// Creates a resizable window.
    ///
    /// # Arguments
    ///
    /// * `event_loop` - The active event loop
    /// * `config` - Title and initial size
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if winit cannot create the window.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;
        let size = window.inner_size();

        tracing::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            extent: vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            resized: false,
        })
    }

    /// Returns the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Record a new drawable size reported by the event loop.
    ///
    /// Repeating the current size does not set the resized flag.
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        if self.extent.width == width && self.extent.height == height {
            return;
        }
        self.extent = vk::Extent2D { width, height };
        self.resized = true;
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// Display handle, needed to pick instance extensions before a surface exists.
    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        self.window
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Surface`] if the window handles are unavailable,
    /// or the Vulkan error from surface creation.
    pub fn create_surface(&self, instance: &Instance) -> RhiResult<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| RhiError::Surface(format!("display handle unavailable: {e}")))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| RhiError::Surface(format!("window handle unavailable: {e}")))?;

        // SAFETY: the handles come from a live winit window; the surface is
        // destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )?
        };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        tracing::info!("Vulkan surface created");
        Ok(Surface { handle, loader })
    }
}

impl SurfaceExtent for Window {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn reset_resized(&mut self) {
        self.resized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(vk::Extent2D);

    impl SurfaceExtent for Fixed {
        fn extent(&self) -> vk::Extent2D {
            self.0
        }
        fn was_resized(&self) -> bool {
            false
        }
        fn reset_resized(&mut self) {}
    }

    #[test]
    fn test_degenerate_extent() {
        assert!(Fixed(vk::Extent2D { width: 0, height: 0 }).is_degenerate());
        assert!(Fixed(vk::Extent2D { width: 800, height: 0 }).is_degenerate());
        assert!(!Fixed(vk::Extent2D { width: 800, height: 600 }).is_degenerate());
    }
}
