//! Vulkan device layer.
//!
//! Wraps `ash` for the pieces the frame loop needs:
//! - Instance, physical device selection and logical device
//! - Presentation surfaces (swapchain, render pass, depth, framebuffers)
//! - Frame synchronization primitives
//! - Per-frame host-visible buffers
//! - Descriptor layouts, pools and writers

mod error;

pub mod buffer;
pub mod command;
pub mod depth;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
