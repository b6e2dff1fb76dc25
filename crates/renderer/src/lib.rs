//! Frame scheduling on top of the presentation layer.
//!
//! This crate drives the render loop:
//! - Frame state machine and frame-in-flight rotation
//! - Swapchain recreation on resize or stale surfaces
//! - The uniform block shared by every frame

pub mod backend;
pub mod frame;
pub mod renderer;
pub mod ubo;

pub use backend::{PresentationBackend, VulkanBackend};
pub use frame::{FrameContext, FramePhase};
pub use renderer::Renderer;
pub use ubo::{GlobalUbo, MAX_LIGHTS, PointLight};

pub use vge_rhi::sync::MAX_FRAMES_IN_FLIGHT;
