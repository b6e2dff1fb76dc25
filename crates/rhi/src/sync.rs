//! Frame synchronization primitives.
//!
//! Semaphores order GPU work against other GPU work, fences let the CPU wait
//! for the GPU. Both are RAII wrappers tied to the device that created them.
//!
//! # Overview
//!
//! - [`Semaphore`]: GPU-to-GPU ordering between acquire, submit and present
//! - [`Fence`]: GPU-to-CPU completion signal for a frame slot
//! - [`FrameSync`]: the semaphore pair and fence owned by one frame slot
//! - [`ImageFenceTracker`]: which frame slot last rendered to each swapchain image

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Binary semaphore destroyed on drop.
pub struct Semaphore {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence the CPU can wait on, destroyed on drop.
pub struct Fence {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan fence handle.
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Start signaled so the first wait returns at once
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until signaled. `timeout_ns == u64::MAX` waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] when the timeout expires first.
    pub fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        wait_for_fence(self.device.handle(), self.fence, timeout_ns)
    }

    /// Returns the fence to the unsignaled state before it is submitted again.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Wait on a raw fence handle, mapping an expired wait to [`RhiError::FenceTimeout`].
pub fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()> {
    match unsafe { device.wait_for_fences(&[fence], true, timeout_ns) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout { timeout_ns }),
        Err(e) => Err(e.into()),
    }
}

/// Synchronization objects owned by one frame slot.
pub struct FrameSync {
    /// Signaled by acquire, waited on by the submission.
    image_available: Semaphore,
    /// Signaled by the submission, waited on by present.
    render_finished: Semaphore,
    /// Signaled when the slot's submission completes.
    in_flight: Fence,
}

impl FrameSync {
    /// The fence starts signaled so the first frame does not block.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }

    /// Allocate sync objects for every frame slot.
    pub fn create_all(device: &Arc<Device>) -> RhiResult<Vec<Self>> {
        let frames = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| Self::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;
        debug!("Created sync objects for {} frames in flight", frames.len());
        Ok(frames)
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

/// Per-swapchain-image record of the frame slot whose fence guards it.
///
/// Every entry is either empty or an index into the frame-slot array, so it
/// always refers to a live in-flight fence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFenceTracker {
    /// Owning frame slot per swapchain image.
    owners: Vec<Option<usize>>,
    frame_slots: usize,
}

impl ImageFenceTracker {
    /// Creates a table for `image_count` images with every entry empty.
    ///
    /// # Panics
    ///
    /// If `frame_slots` is zero.
    pub fn new(image_count: usize, frame_slots: usize) -> Self {
        assert!(frame_slots > 0, "at least one frame slot is required");
        Self {
            owners: vec![None; image_count],
            frame_slots,
        }
    }

    pub fn image_count(&self) -> usize {
        self.owners.len()
    }

    /// Frame slot whose fence must be waited on before `image_index` is reused.
    pub fn guard(&self, image_index: usize) -> Option<usize> {
        self.owners[image_index]
    }

    /// Record that `frame_slot` now renders to `image_index`.
    pub fn assign(&mut self, image_index: usize, frame_slot: usize) {
        assert!(
            frame_slot < self.frame_slots,
            "frame slot {frame_slot} out of range (slots: {})",
            self.frame_slots
        );
        self.owners[image_index] = Some(frame_slot);
    }

    /// Forgets every owner, for use once the device is idle.
    pub fn clear(&mut self) {
        self.owners.iter_mut().for_each(|owner| *owner = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_starts_unset() {
        let tracker = ImageFenceTracker::new(3, MAX_FRAMES_IN_FLIGHT);
        assert_eq!(tracker.image_count(), 3);
        assert!((0..3).all(|i| tracker.guard(i).is_none()));
    }

    #[test]
    fn test_tracker_follows_latest_owner() {
        let mut tracker = ImageFenceTracker::new(3, MAX_FRAMES_IN_FLIGHT);
        tracker.assign(2, 0);
        assert_eq!(tracker.guard(2), Some(0));
        tracker.assign(2, 1);
        assert_eq!(tracker.guard(2), Some(1));
        assert_eq!(tracker.guard(0), None);

        tracker.clear();
        assert_eq!(tracker.guard(2), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_tracker_rejects_unknown_slot() {
        let mut tracker = ImageFenceTracker::new(3, MAX_FRAMES_IN_FLIGHT);
        tracker.assign(0, MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
