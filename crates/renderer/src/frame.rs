//! Per-frame state handed to recording code.
//!
//! [`FramePhase`] is the scheduler's state; [`FrameContext`] is the read-only
//! snapshot render systems get while a frame is open.

use ash::vk;

/// Where the renderer is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// Between `end_frame` and the next successful `begin_frame`.
    #[default]
    Idle,
    /// A command buffer is recording, outside any render pass.
    Recording,
    /// The swapchain render pass is open.
    RenderPassActive,
}

impl FramePhase {
    /// True between a successful `begin_frame` and `end_frame`.
    pub fn is_in_progress(self) -> bool {
        self != FramePhase::Idle
    }
}

/// Everything a render system needs to record one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Frame-in-flight slot, used to index per-frame resources.
    pub frame_index: usize,
    /// Swapchain image being rendered to.
    pub image_index: u32,
    /// Seconds since the previous frame.
    pub frame_time: f32,
    /// Primary command buffer recording this frame.
    pub command_buffer: vk::CommandBuffer,
    /// Global descriptor set for `frame_index`.
    pub descriptor_set: vk::DescriptorSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_phase_is_idle() {
        assert_eq!(FramePhase::default(), FramePhase::Idle);
        assert!(!FramePhase::Idle.is_in_progress());
        assert!(FramePhase::Recording.is_in_progress());
        assert!(FramePhase::RenderPassActive.is_in_progress());
    }
}
