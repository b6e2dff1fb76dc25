//! Platform layer: winit windows and the Vulkan surfaces presented to them.

mod window;

pub use window::{Surface, SurfaceExtent, Window};

pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
